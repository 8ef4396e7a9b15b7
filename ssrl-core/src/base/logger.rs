//! Logger interface.
use super::Env;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Phase of the run in which a step was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum LogMode {
    /// Interaction for collecting training data.
    Train,

    /// Evaluation rollouts.
    Eval,
}

impl fmt::Display for LogMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Train => write!(f, "train"),
            Self::Eval => write!(f, "eval"),
        }
    }
}

/// Accumulates per-step metrics and flushes them.
///
/// Agents only push into a logger; no value computed by a logger flows back
/// into training.
pub trait Logger<E: Env> {
    /// Records a single environment step.
    fn step(&mut self, obs: &E::Obs, reward: f32, done: bool, info: &E::Info, mode: LogMode);

    /// Writes the metrics accumulated for `mode` and resets them.
    fn write_log(&mut self, mode: LogMode) -> Result<()>;
}
