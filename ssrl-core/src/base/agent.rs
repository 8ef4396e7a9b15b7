//! Agent.
use super::ReplayBufferBase;
use crate::record::Record;
use anyhow::Result;
use std::path::Path;

/// Represents a trainable agent.
///
/// The training loop is driven from outside: the caller decides when to
/// call [`Agent::opt`] and owns the replay buffer.
pub trait Agent<R: ReplayBufferBase> {
    /// Set the agent to training mode.
    fn train(&mut self);

    /// Set the agent to evaluation mode.
    fn eval(&mut self);

    /// Return if it is in training mode.
    fn is_train(&self) -> bool;

    /// Performs an optimization step and returns some information.
    ///
    /// `buffer` is a replay buffer from which transitions will be taken
    /// for updating model parameters.
    fn opt(&mut self, buffer: &mut R) -> Result<Record>;

    /// Save the parameters of the agent in the given directory.
    ///
    /// This method commonly creates a number of files in the directory, for example
    /// the online and target networks of a value-based agent.
    fn save_params(&self, path: &Path) -> Result<()>;

    /// Load the parameters of the agent from the given directory.
    fn load_params(&mut self, path: &Path) -> Result<()>;
}
