//! Optimizers.
use anyhow::Result;
use candle_core::{backprop::GradStore, Tensor, Var};
use candle_nn::{AdamW, Optimizer as _, ParamsAdamW};
use candle_optimisers::adam::{Adam, ParamsAdam};
use serde::{Deserialize, Serialize};

/// Configuration of the optimizer of an agent or a trainer.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub enum OptimizerConfig {
    /// AdamW optimizer.
    AdamW {
        /// Learning rate.
        lr: f64,
        #[serde(default = "default_beta1")]
        /// First moment decay.
        beta1: f64,
        #[serde(default = "default_beta2")]
        /// Second moment decay.
        beta2: f64,
        #[serde(default = "default_eps")]
        /// Denominator offset.
        eps: f64,
        #[serde(default = "default_weight_decay")]
        /// Decoupled weight decay.
        weight_decay: f64,
    },

    /// Adam optimizer.
    Adam {
        /// Learning rate.
        lr: f64,
        #[serde(default = "default_adam_eps")]
        /// Denominator offset. Rainbow is usually trained with 1.5e-4.
        eps: f64,
    },
}

fn default_beta1() -> f64 {
    ParamsAdamW::default().beta1
}

fn default_beta2() -> f64 {
    ParamsAdamW::default().beta2
}

fn default_eps() -> f64 {
    ParamsAdamW::default().eps
}

fn default_weight_decay() -> f64 {
    ParamsAdamW::default().weight_decay
}

fn default_adam_eps() -> f64 {
    ParamsAdam::default().eps
}

impl OptimizerConfig {
    /// Constructs the optimizer over `vars`.
    ///
    /// With `clip_grad_norm`, gradients are rescaled so that their global L2
    /// norm does not exceed the given value before each step.
    pub fn build(&self, vars: Vec<Var>, clip_grad_norm: Option<f64>) -> Result<Optimizer> {
        let inner = match &self {
            OptimizerConfig::AdamW {
                lr,
                beta1,
                beta2,
                eps,
                weight_decay,
            } => {
                let params = ParamsAdamW {
                    lr: *lr,
                    beta1: *beta1,
                    beta2: *beta2,
                    eps: *eps,
                    weight_decay: *weight_decay,
                };
                Inner::AdamW(AdamW::new(vars.clone(), params)?)
            }
            OptimizerConfig::Adam { lr, eps } => {
                let params = ParamsAdam {
                    lr: *lr,
                    eps: *eps,
                    ..ParamsAdam::default()
                };
                Inner::Adam(Adam::new(vars.clone(), params)?)
            }
        };

        Ok(Optimizer {
            inner,
            vars,
            clip_grad_norm,
        })
    }

    /// Override learning rate.
    pub fn learning_rate(self, lr: f64) -> Self {
        match self {
            Self::AdamW {
                beta1,
                beta2,
                eps,
                weight_decay,
                ..
            } => Self::AdamW {
                lr,
                beta1,
                beta2,
                eps,
                weight_decay,
            },
            Self::Adam { eps, .. } => Self::Adam { lr, eps },
        }
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::Adam {
            lr: 1e-4,
            eps: 1.5e-4,
        }
    }
}

enum Inner {
    AdamW(AdamW),
    Adam(Adam),
}

/// Optimizer over a fixed set of variables.
pub struct Optimizer {
    inner: Inner,
    vars: Vec<Var>,
    clip_grad_norm: Option<f64>,
}

impl Optimizer {
    /// Computes gradients of `loss` and applies an update.
    ///
    /// Returns the global gradient norm before clipping.
    pub fn backward_step(&mut self, loss: &Tensor) -> Result<f32> {
        let mut grads = loss.backward()?;
        let norm = self.grad_norm(&grads)?;

        if let Some(max_norm) = self.clip_grad_norm {
            if norm as f64 > max_norm {
                let scale = max_norm / (norm as f64 + 1e-6);
                for var in self.vars.iter() {
                    if let Some(g) = grads.remove(var.as_tensor()) {
                        grads.insert(var.as_tensor(), (g * scale)?);
                    }
                }
            }
        }

        self.step(&grads)?;
        Ok(norm)
    }

    /// Applies an update with precomputed gradients.
    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        match &mut self.inner {
            Inner::AdamW(opt) => Ok(opt.step(grads)?),
            Inner::Adam(opt) => Ok(opt.step(grads)?),
        }
    }

    fn grad_norm(&self, grads: &GradStore) -> Result<f32> {
        let mut sq = 0f32;
        for var in self.vars.iter() {
            if let Some(g) = grads.get(var.as_tensor()) {
                sq += g.sqr()?.sum_all()?.to_dtype(candle_core::DType::F32)?.to_scalar::<f32>()?;
            }
        }
        Ok(sq.sqrt())
    }
}
