//! Environment step.
use super::Env;

/// Additional information to `Obs` and `Act`.
pub trait Info {
    /// Returns `true` when the trajectory is complete.
    ///
    /// This is distinct from the per-life `is_done` flag of a [`Step`]:
    /// an Atari game may lose a life (`is_done`) without ending the
    /// trajectory.
    fn is_traj_done(&self) -> bool;
}

/// Represents an observation, reward and done tuple `(o_t+1, r_t, d_t)`
/// with some additional information.
pub struct Step<E: Env> {
    /// Observation after the action.
    pub obs: E::Obs,

    /// Reward.
    pub reward: f32,

    /// Flag denoting the end of a life or an episode.
    pub is_done: bool,

    /// Information defined by the environment.
    pub info: E::Info,
}

impl<E: Env> Step<E> {
    /// Constructs a [`Step`] object.
    pub fn new(obs: E::Obs, reward: f32, is_done: bool, info: E::Info) -> Self {
        Step {
            obs,
            reward,
            is_done,
            info,
        }
    }

    #[inline]
    /// Returns `true` when the trajectory is complete.
    pub fn is_traj_done(&self) -> bool {
        self.info.is_traj_done()
    }
}
