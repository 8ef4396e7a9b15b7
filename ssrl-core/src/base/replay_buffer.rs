//! Replay buffer interface for reinforcement learning.
//!
//! Storage and sampling are implemented outside of this workspace. Agents see
//! a replay buffer only through the round trip defined here: sample a batch,
//! then optionally report new priorities for the sampled indices.
use super::TransitionBatch;
use anyhow::Result;

/// Interface for replay buffers that generate batches for training.
pub trait ReplayBufferBase {
    /// Configuration parameters for the replay buffer.
    type Config: Clone;

    /// The type of batch generated for training.
    type Batch: TransitionBatch;

    /// Raw observation pushed into the buffer by the environment loop.
    type Obs;

    /// Observation encoded for the model, see [`ReplayBufferBase::encode_obs`].
    type ObsBatch;

    /// Builds a new replay buffer from the given configuration.
    fn build(config: &Self::Config) -> Self
    where
        Self: Sized;

    /// Samples a batch of `size` n-step transitions.
    ///
    /// Implementations must not pad: a buffer unable to provide `size`
    /// samples returns an error or a shorter batch, which the agent rejects.
    fn batch(&mut self, size: usize) -> Result<Self::Batch>;

    /// Updates the priorities of sampled experiences.
    ///
    /// `ixs` are the indices returned with the batch. Non-prioritized
    /// buffers ignore the call.
    fn update_priority(&mut self, ixs: &Option<Vec<usize>>, priorities: &Option<Vec<f32>>);

    /// Returns `n` of the n-step returns stored in the buffer.
    fn n_step(&self) -> usize;

    /// Encodes the latest raw observation, together with the history kept by
    /// the buffer, into the input expected by the model.
    ///
    /// `prediction` is `true` when the encoded observation is used for acting
    /// rather than for training.
    fn encode_obs(&self, obs: &Self::Obs, prediction: bool) -> Result<Self::ObsBatch>;
}
