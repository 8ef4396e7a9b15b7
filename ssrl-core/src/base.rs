//! Core functionalities.
mod agent;
mod batch;
mod env;
mod logger;
mod policy;
mod replay_buffer;
mod step;
pub use agent::Agent;
pub use batch::TransitionBatch;
pub use env::Env;
pub use logger::{LogMode, Logger};
pub use policy::Policy;
pub use replay_buffer::ReplayBufferBase;
pub use step::{Info, Step};
