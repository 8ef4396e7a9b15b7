//! Linear scheduling of a scalar hyperparameter.
use serde::{Deserialize, Serialize};

/// Linearly interpolates a value from `initial_value` to `final_value`.
///
/// The value reaches `final_value` after `step_size` calls of
/// [`LinearScheduler::get_value`] and stays there. Used, for example, for the
/// momentum coefficient of an EMA target update.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct LinearScheduler {
    /// Value at step 0.
    pub initial_value: f32,

    /// Value at and after `step_size`.
    pub final_value: f32,

    /// Number of steps over which the value moves.
    pub step_size: usize,

    /// Current step.
    #[serde(default)]
    pub step: usize,
}

impl LinearScheduler {
    /// Creates a scheduler.
    pub fn new(initial_value: f32, final_value: f32, step_size: usize) -> Self {
        Self {
            initial_value,
            final_value,
            step_size,
            step: 0,
        }
    }

    /// Returns the value at the current step without advancing.
    pub fn value(&self) -> f32 {
        if self.step >= self.step_size {
            self.final_value
        } else {
            let d = self.final_value - self.initial_value;
            self.initial_value + d * (self.step as f32 / self.step_size as f32)
        }
    }

    /// Returns the value at the current step, then advances one step.
    pub fn get_value(&mut self) -> f32 {
        let v = self.value();
        self.step = (self.step + 1).min(self.step_size);
        v
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_linear_scheduler_endpoints() {
        let mut s = LinearScheduler::new(0.0, 1.0, 4);

        assert_eq!(s.get_value(), 0.0);
        assert_eq!(s.get_value(), 0.25);
        assert_eq!(s.get_value(), 0.5);
        assert_eq!(s.get_value(), 0.75);
        assert_eq!(s.get_value(), 1.0);
        assert_eq!(s.get_value(), 1.0);
        assert_eq!(s.step, 4);
    }

    #[test]
    fn test_step_defaults_to_zero_in_yaml() -> anyhow::Result<()> {
        let yaml = "initial_value: 0.99\nfinal_value: 1.0\nstep_size: 100000\n";
        let s: LinearScheduler = serde_yaml::from_str(yaml)?;
        assert_eq!(s, LinearScheduler::new(0.99, 1.0, 100_000));
        Ok(())
    }

    #[test]
    fn test_zero_steps_is_constant() {
        let mut s = LinearScheduler::new(0.9, 1.0, 0);
        assert_eq!(s.get_value(), 1.0);
    }
}
