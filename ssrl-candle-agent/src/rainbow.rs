//! Rainbow agent with a distributional (C51) dueling head on a ViT backbone.
mod base;
mod config;
mod model;
mod noisy;
mod policy;
mod projection;
pub use base::{GreedyPolicy, Rainbow};
pub use config::RainbowConfig;
pub use model::RainbowModel;
pub use noisy::{scale_grad, NoisyLinear};
pub use policy::RainbowPolicy;
pub use projection::{categorical_projection, Support};
