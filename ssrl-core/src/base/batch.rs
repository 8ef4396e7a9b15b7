//! Batch.

/// A batch of n-step transitions sampled from a replay buffer.
pub trait TransitionBatch {
    /// A set of observations in a batch.
    type ObsBatch;

    /// A set of actions in a batch.
    type ActBatch;

    /// Unpack the data `(o_t, a_t, o_t+n, R_t^(n), d_t, ixs, w)`.
    ///
    /// * `R_t^(n)` - n-step discounted return.
    /// * `d_t` - 1 if an episode ended within the n steps.
    /// * `ixs` - sample indices, present only for prioritized buffers.
    /// * `w` - importance sampling weights, present only for prioritized buffers.
    fn unpack(
        self,
    ) -> (
        Self::ObsBatch,
        Self::ActBatch,
        Self::ObsBatch,
        Vec<f32>,
        Vec<i8>,
        Option<Vec<usize>>,
        Option<Vec<f32>>,
    );

    /// Returns the number of samples.
    fn len(&self) -> usize;

    /// Returns `true` if the batch holds no sample.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
