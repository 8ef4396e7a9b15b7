//! Environment.
use super::{Info, Step};
use anyhow::Result;
use std::fmt::Debug;

/// Represents an environment, typically an Atari game behind some wrappers.
///
/// Only the interface is defined here; emulators and wrappers live outside
/// of this workspace.
pub trait Env {
    /// Configurations.
    type Config: Clone;

    /// Observation of the environment.
    type Obs: Clone + Debug;

    /// Action of the environment.
    type Act: Clone + Debug;

    /// Information in the [`Step`] object.
    type Info: Info;

    /// Builds an environment with a given random seed.
    fn build(config: &Self::Config, seed: i64) -> Result<Self>
    where
        Self: Sized;

    /// Starts a new trajectory and returns its first observation.
    fn reset(&mut self) -> Result<Self::Obs>;

    /// Performs an environment step.
    ///
    /// `is_done` in the returned [`Step`] marks the end of a life, while
    /// [`Info::is_traj_done`] marks the end of the whole trajectory.
    fn step(&mut self, a: &Self::Act) -> Result<Step<Self>>
    where
        Self: Sized;
}
