//! Default implementation of the [`Evaluator`] trait.
use super::Evaluator;
use crate::{
    record::{Record, RecordValue},
    Env, LogMode, Logger, Policy,
};
use anyhow::Result;

/// Runs a fixed number of trajectories and reports the average return.
///
/// A trajectory ends when [`Info::is_traj_done`](crate::Info::is_traj_done)
/// returns `true`; the per-life `is_done` flag of a step does not stop the
/// rollout. The environment is expected to restart a life by itself.
///
/// # Examples
///
/// ```ignore
/// let mut evaluator = DefaultEvaluator::<AtariEnv>::new(&config, 42, 10)?;
/// let record = evaluator.evaluate(&mut policy, &mut logger)?;
/// println!("{}", record.get_scalar("eval_return")?);
/// ```
pub struct DefaultEvaluator<E: Env> {
    n_trajectories: usize,
    env: E,
}

impl<E: Env> Evaluator<E> for DefaultEvaluator<E> {
    fn evaluate<P, L>(&mut self, policy: &mut P, logger: &mut L) -> Result<Record>
    where
        P: Policy<E>,
        L: Logger<E>,
    {
        let mut r_total = 0f32;
        let mut n_steps = 0usize;

        for _ in 0..self.n_trajectories {
            let mut obs = self.env.reset()?;

            loop {
                let act = policy.sample(&obs)?;
                let step = self.env.step(&act)?;
                logger.step(&step.obs, step.reward, step.is_done, &step.info, LogMode::Eval);
                r_total += step.reward;
                n_steps += 1;
                if step.is_traj_done() {
                    break;
                }
                obs = step.obs;
            }
        }
        logger.write_log(LogMode::Eval)?;

        let n = self.n_trajectories.max(1) as f32;
        log::info!(
            "Evaluated {} trajectories, average return {}",
            self.n_trajectories,
            r_total / n
        );

        Ok(Record::from_slice(&[
            ("eval_return", RecordValue::Scalar(r_total / n)),
            (
                "eval_length",
                RecordValue::Scalar(n_steps as f32 / n),
            ),
        ]))
    }
}

impl<E: Env> DefaultEvaluator<E> {
    /// Constructs a new [`DefaultEvaluator`] that builds its own environment.
    pub fn new(config: &E::Config, seed: i64, n_trajectories: usize) -> Result<Self> {
        Ok(Self {
            n_trajectories,
            env: E::build(config, seed)?,
        })
    }

    /// Constructs an evaluator on an existing environment.
    pub fn from_env(env: E, n_trajectories: usize) -> Self {
        Self {
            n_trajectories,
            env,
        }
    }

    /// Returns a reference to the evaluation environment.
    pub fn env(&self) -> &E {
        &self.env
    }
}
