#![warn(missing_docs)]
//! Core interfaces for sample-efficient reinforcement learning.
//!
//! This crate does not depend on any tensor backend. It defines the contracts
//! through which agents and self-supervised trainers talk to their collaborators
//! (environments, replay buffers and loggers), the containers used for metrics
//! and the error taxonomy shared by the backend crates.
pub mod error;
pub mod record;

mod base;
pub use base::{
    Agent, Env, Info, LogMode, Logger, Policy, ReplayBufferBase, Step, TransitionBatch,
};

mod evaluator;
pub use evaluator::{DefaultEvaluator, Evaluator};

mod logger;
pub use logger::{EpisodeLogger, NullLogger};

mod scheduler;
pub use scheduler::LinearScheduler;

pub use error::SsrlError;
