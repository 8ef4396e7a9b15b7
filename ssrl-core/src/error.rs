//! Errors in the library.
use thiserror::Error;

/// Errors in the library.
///
/// Library functions return [`anyhow::Result`]; callers that need to react to a
/// particular failure can recover the variant with `downcast_ref::<SsrlError>()`.
#[derive(Error, Debug, PartialEq)]
pub enum SsrlError {
    /// Invalid configuration, detected at construction or first use.
    ///
    /// Examples are an image size not divisible by the patch size or an
    /// unsupported dataset type.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Tensors whose shapes do not agree with the expected layout.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// The replay buffer returned fewer samples than requested.
    #[error("Replay buffer returned {got} samples, {expected} were requested")]
    ShortBatch {
        /// Requested batch size.
        expected: usize,

        /// Number of samples actually returned.
        got: usize,
    },

    /// Record key error.
    #[error("Record key error: {0}")]
    RecordKeyError(String),

    /// Record value type error.
    #[error("Record value type error: {0}")]
    RecordValueTypeError(String),
}

impl SsrlError {
    /// Shorthand for [`SsrlError::Config`].
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Shorthand for [`SsrlError::ShapeMismatch`].
    pub fn shape(msg: impl Into<String>) -> Self {
        Self::ShapeMismatch(msg.into())
    }
}
