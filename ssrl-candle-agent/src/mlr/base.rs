//! MLR trainer.
use super::{
    config::{MaskType, MlrConfig},
    model::MlrModel,
};
use crate::{
    augment::Augmentation,
    head::{DatasetType, Modalities},
    mask::{gather_masked, patchify, random_mask, scatter_restore, MaskShape, MaskStrategy},
    model::Head,
    opt::Optimizer,
    util::{cosine_similarity, l2_normalize, sync, track},
};
use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use log::debug;
use rand::{rngs::SmallRng, SeedableRng};
use ssrl_core::{
    record::{Record, RecordValue},
    LinearScheduler, SsrlError,
};
use std::{fs, path::Path};

/// Self-predictive trainer with a momentum target.
///
/// Two augmented views of a batch are encoded. The online branch sees a
/// masked view, decodes it with the actions and predicts the projection of
/// the other, unmasked view computed by the target model.
pub struct MlrTrainer {
    model: MlrModel,
    target_model: MlrModel,
    opt: Optimizer,
    tau_scheduler: LinearScheduler,
    mask_type: MaskType,
    mask_ratio: f64,
    mask_strategy: MaskStrategy,
    augmentation: Augmentation,
    patch_size: (usize, usize),
    device: Device,
    rng: SmallRng,
    n_opts: usize,
}

/// `2 - 2 cos(p, z)` per row.
fn consistency_loss(p: &Tensor, z: &Tensor) -> Result<Tensor> {
    Ok(((cosine_similarity(p, z)? * -2.0)? + 2.0)?)
}

impl MlrTrainer {
    /// Constructs the trainer, failing on invalid hyperparameters.
    pub fn build(config: MlrConfig) -> Result<Self> {
        config.validate()?;
        let device = config.device.to_candle()?;
        let model = MlrModel::build(&config, &device)?;
        let target_model = MlrModel::build(&config, &device)?;
        sync(target_model.get_varmap(), model.get_varmap())?;
        let opt = config
            .opt_config
            .build(model.get_varmap().all_vars(), config.clip_grad_norm)?;

        Ok(Self {
            model,
            target_model,
            opt,
            tau_scheduler: config.tau_scheduler,
            mask_type: config.mask_type,
            mask_ratio: config.mask_ratio,
            mask_strategy: config.mask_strategy,
            augmentation: config.augmentation,
            patch_size: config.vit_config.patch_size,
            device,
            rng: SmallRng::seed_from_u64(config.seed),
            n_opts: 0,
        })
    }

    /// Online model.
    pub fn model(&self) -> &MlrModel {
        &self.model
    }

    /// Target model.
    pub fn target_model(&self) -> &MlrModel {
        &self.target_model
    }

    /// Computes the symmetrized consistency loss of a batch.
    ///
    /// `obs` is `(n, t, f, c, h, w)` with pixel values in `[0, 255]`; `act`,
    /// `rew`, `done` and `rtg` are `(n, t)`. Rewards, done flags and returns
    /// to go are checked but not used by the objective.
    pub fn compute_loss(
        &mut self,
        obs: &Tensor,
        act: &Tensor,
        rew: &Tensor,
        done: &Tensor,
        rtg: &Tensor,
    ) -> Result<(Tensor, Record)> {
        let (n, t) = match obs.dims() {
            [n, t, _, _, _, _] => (*n, *t),
            dims => {
                return Err(SsrlError::shape(format!(
                    "expected observations (n, t, f, c, h, w), got {:?}",
                    dims
                ))
                .into())
            }
        };
        for (name, x) in [("act", act), ("rew", rew), ("done", done), ("rtg", rtg)] {
            if x.dims() != [n, t] {
                return Err(SsrlError::shape(format!(
                    "{} must be ({}, {}), got {:?}",
                    name,
                    n,
                    t,
                    x.dims()
                ))
                .into());
            }
        }
        let num_patches = self.model.backbone.num_patches();

        // two weakly augmented views, stacked along the batch
        let x = (obs.to_device(&self.device)?.to_dtype(DType::F32)? / 255.0)?;
        let x1 = self.augmentation.apply(&x, &mut self.rng)?;
        let x2 = self.augmentation.apply(&x, &mut self.rng)?;
        let x = Tensor::cat(&[x1, x2], 0)?;
        let act = act.to_device(&self.device)?.to_dtype(DType::U32)?;
        let act = Tensor::cat(&[&act, &act], 0)?;
        let patches = patchify(&x, self.patch_size)?;

        // online branch
        let patches_o = match self.mask_type {
            MaskType::Latent => patches.clone(),
            MaskType::Pixel => {
                let shape = MaskShape {
                    batch: 2 * n,
                    time: t,
                    num_patches,
                };
                let mask = random_mask(shape, self.mask_ratio, self.mask_strategy, &mut self.rng)?
                    .to_tensors(&self.device)?;
                scatter_restore(&gather_masked(&patches, &mask.ids_keep)?, &mask.ids_restore, None)?
            }
        };
        let y_o = self.model.backbone.embed_patches(&patches_o, true)?;
        let head = &self.model.head;
        let obs_o = match self.mask_type {
            MaskType::Pixel => {
                let x = Modalities::from_obs(y_o).act(act);
                head.decode(&x, DatasetType::Demonstration, true)?.obs
            }
            MaskType::Latent => {
                let z = head.obs_to_latent(&y_o)?;
                let mask = random_mask(
                    MaskShape::temporal(2 * n, t),
                    self.mask_ratio,
                    MaskStrategy::Uniform,
                    &mut self.rng,
                )?
                .to_tensors(&self.device)?;
                let z = scatter_restore(
                    &gather_masked(&z, &mask.ids_keep)?,
                    &mask.ids_restore,
                    Some(head.mask_token()),
                )?;
                head.decode_latent(&z, &act, true)?
            }
        };
        let p_o = head.predict(&head.project(&obs_o, true)?, true)?;

        // target branch
        let z_t = {
            let head = &self.target_model.head;
            let y_t = self.target_model.backbone.embed_patches(&patches, true)?;
            head.project_target(&head.obs_to_latent(&y_t)?)?.detach()
        };

        let d = p_o.dim(2)?;
        let rows = |x: &Tensor, i: usize| -> Result<Tensor> {
            Ok(x.narrow(0, i * n, n)?.reshape((n * t, d))?)
        };
        let (p1, p2) = (rows(&p_o, 0)?, rows(&p_o, 1)?);
        let (z1, z2) = (rows(&z_t, 0)?, rows(&z_t, 1)?);

        let loss_12 = consistency_loss(&p1, &z2)?.mean_all()?;
        let loss_21 = consistency_loss(&p2, &z1)?.mean_all()?;
        let loss = ((loss_12 + loss_21)? * 0.5)?;

        // similarity of every (online, target) pair of rows
        let (pos_sim, neg_sim) = {
            let m = n * t;
            let p1 = p1.detach();
            let sim = l2_normalize(&p1)?.matmul(&l2_normalize(&z2)?.t()?.contiguous()?)?;
            let pos = cosine_similarity(&p1, &z2)?.sum_all()?.to_scalar::<f32>()?;
            let total = sim.sum_all()?.to_scalar::<f32>()?;
            let neg = if m > 1 {
                (total - pos) / (m * (m - 1)) as f32
            } else {
                0.0
            };
            (pos / m as f32, neg)
        };

        let loss_value = loss.to_scalar::<f32>()?;
        let record = Record::from_slice(&[
            ("loss", RecordValue::Scalar(loss_value)),
            ("obs_loss", RecordValue::Scalar(loss_value)),
            ("pos_sim", RecordValue::Scalar(pos_sim)),
            ("neg_sim", RecordValue::Scalar(neg_sim)),
            ("pos_neg_diff", RecordValue::Scalar(pos_sim - neg_sim)),
        ]);
        Ok((loss, record))
    }

    /// Moves the target towards the online model,
    /// `target ← τ·target + (1−τ)·online`, and advances the schedule of τ.
    ///
    /// Returns the coefficient used.
    pub fn update(&mut self) -> Result<f32> {
        let tau = self.tau_scheduler.get_value();
        track(
            self.target_model.get_varmap(),
            self.model.get_varmap(),
            1.0 - tau as f64,
        )?;
        Ok(tau)
    }

    /// Performs one optimization step followed by [`MlrTrainer::update`].
    pub fn opt(
        &mut self,
        obs: &Tensor,
        act: &Tensor,
        rew: &Tensor,
        done: &Tensor,
        rtg: &Tensor,
    ) -> Result<Record> {
        let (loss, mut record) = self.compute_loss(obs, act, rew, done, rtg)?;
        let grad_norm = self.opt.backward_step(&loss)?;
        let tau = self.update()?;
        self.n_opts += 1;
        debug!(
            "opt step {}: loss {}, tau {}",
            self.n_opts,
            record.get_scalar("loss")?,
            tau
        );

        record.insert("grad_norm", RecordValue::Scalar(grad_norm));
        record.insert("tau", RecordValue::Scalar(tau));
        Ok(record)
    }

    /// Saves the online and target models in `path`.
    pub fn save_params(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)?;
        self.model.save(path.join("model.safetensors"))?;
        self.target_model.save(path.join("target_model.safetensors"))?;
        Ok(())
    }

    /// Loads the online and target models from `path`.
    pub fn load_params(&mut self, path: &Path) -> Result<()> {
        self.model.load(path.join("model.safetensors"))?;
        self.target_model.load(path.join("target_model.safetensors"))?;
        Ok(())
    }
}
