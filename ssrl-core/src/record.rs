//! Types for recording metrics of training and evaluation.
//!
//! Losses and diagnostics returned by agents and trainers are [`Record`]s.
//! [`RecordStorage`] aggregates a sequence of records, which is what loggers
//! do before flushing.
//!
//! ```rust
//! use ssrl_core::record::{Record, RecordValue};
//!
//! let mut record = Record::empty();
//! record.insert("loss", RecordValue::Scalar(0.5));
//! record.insert("pos_sim", RecordValue::Scalar(0.9));
//! assert_eq!(record.get_scalar("loss").unwrap(), 0.5);
//! ```
mod base;
mod storage;

pub use base::{Record, RecordValue};
pub use storage::RecordStorage;
