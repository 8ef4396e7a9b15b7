//! Self-predictive representation learning with masked latent reconstruction.
mod base;
mod config;
mod model;
pub use base::MlrTrainer;
pub use config::{MaskType, MlrConfig};
pub use model::MlrModel;
