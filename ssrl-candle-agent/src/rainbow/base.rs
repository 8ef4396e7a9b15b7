//! Rainbow agent implemented with candle.
use super::{
    config::RainbowConfig,
    model::RainbowModel,
    projection::{categorical_projection, Support},
};
use crate::{augment::Augmentation, util::sync};
use anyhow::Result;
use candle_core::{DType, Device, Tensor, D};
use log::{debug, trace};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use ssrl_core::{
    record::{Record, RecordValue},
    Agent, Env, Evaluator, Logger, Policy, ReplayBufferBase, SsrlError, TransitionBatch,
};
use std::{fs, marker::PhantomData, path::Path};

/// Rainbow agent: C51 dueling head with noisy layers, n-step returns,
/// double Q-learning and prioritized replay.
///
/// The online and target models own independent var maps. The target is
/// only changed by [`Rainbow::update`].
pub struct Rainbow<E, R>
where
    E: Env,
    R: ReplayBufferBase,
{
    model: RainbowModel,
    target_model: RainbowModel,
    support: Support,
    gamma: f64,
    double: bool,
    batch_size: usize,
    action_size: usize,
    eval_eps: f64,
    target_update_interval: usize,
    augmentation: Augmentation,
    device: Device,
    train: bool,
    n_opts: usize,
    rng: SmallRng,
    phantom: PhantomData<(E, R)>,
}

impl<E, R> Rainbow<E, R>
where
    E: Env,
    E::Act: From<usize>,
    R: ReplayBufferBase<Obs = E::Obs>,
    R::ObsBatch: Into<Tensor>,
    <R::Batch as TransitionBatch>::ObsBatch: Into<Tensor>,
    <R::Batch as TransitionBatch>::ActBatch: Into<Tensor>,
{
    /// Constructs the agent, failing on invalid hyperparameters.
    pub fn build(config: RainbowConfig) -> Result<Self> {
        config.validate()?;
        let device = config.device.to_candle()?;
        let model = RainbowModel::build(&config, &device)?;
        let target_model = RainbowModel::build(&config, &device)?;
        sync(target_model.get_varmap(), model.get_varmap())?;

        Ok(Self {
            model,
            target_model,
            support: Support::new(config.v_min, config.v_max, config.num_atoms, &device)?,
            gamma: config.gamma,
            double: config.double,
            batch_size: config.batch_size,
            action_size: config.action_size(),
            eval_eps: config.eval_eps,
            target_update_interval: config.target_update_interval,
            augmentation: config.augmentation,
            device,
            train: true,
            n_opts: 0,
            rng: SmallRng::seed_from_u64(config.seed),
            phantom: PhantomData,
        })
    }

    /// Online model.
    pub fn model(&self) -> &RainbowModel {
        &self.model
    }

    /// Target model.
    pub fn target_model(&self) -> &RainbowModel {
        &self.target_model
    }

    /// Atom support.
    pub fn support(&self) -> &Support {
        &self.support
    }

    /// Greedy actions for a batch of observations `(n, t, f, c, h, w)`.
    ///
    /// The noise of the online policy is resampled before the forward pass;
    /// it only affects the output in training mode.
    pub fn act(&mut self, obs: &Tensor) -> Result<Vec<usize>> {
        self.model.reset_noise()?;
        let obs = obs.to_device(&self.device)?;
        let probs = self.model.forward(&obs, false, self.train)?.detach();
        let q = self.support.expectation(&probs)?;
        Ok(q
            .argmax(D::Minus1)?
            .to_vec1::<u32>()?
            .into_iter()
            .map(|a| a as usize)
            .collect())
    }

    /// ε-greedy action for a single observation `(1, t, f, c, h, w)`.
    pub fn predict_greedy(&mut self, obs: &Tensor, eps: f64) -> Result<usize> {
        if self.rng.gen::<f64>() < eps {
            Ok(self.rng.gen_range(0..self.action_size))
        } else {
            self.act(obs)?
                .first()
                .copied()
                .ok_or_else(|| SsrlError::shape("no observation to act on").into())
        }
    }

    /// Samples a batch and computes the importance-weighted KL loss.
    ///
    /// Buffers that return sample indices receive the per-sample KL
    /// divergences as new priorities.
    pub fn compute_loss(&mut self, buffer: &mut R) -> Result<(Tensor, Record)> {
        let batch = buffer.batch(self.batch_size)?;
        if batch.len() < self.batch_size {
            return Err(SsrlError::ShortBatch {
                expected: self.batch_size,
                got: batch.len(),
            }
            .into());
        }
        let (obs, act, next_obs, ret, is_done, ixs, weight) = batch.unpack();
        let n = ret.len();
        let k = self.support.num_atoms();

        let obs: Tensor = obs.into();
        let next_obs: Tensor = next_obs.into();
        let act: Tensor = act.into();
        let obs = obs.to_device(&self.device)?;
        let next_obs = next_obs.to_device(&self.device)?;
        let obs = self.augmentation.apply(&obs, &mut self.rng)?;
        let next_obs = self.augmentation.apply(&next_obs, &mut self.rng)?;
        let act = act.to_device(&self.device)?.to_dtype(DType::U32)?.reshape((n, 1, 1))?;
        let ret = Tensor::from_vec(ret, n, &self.device)?;
        let done = {
            let done = is_done.into_iter().map(|d| d as f32).collect::<Vec<_>>();
            Tensor::from_vec(done, n, &self.device)?
        };

        self.model.reset_noise()?;
        self.target_model.reset_noise()?;

        // log p(z | s_t, a_t): (n, num_atoms)
        let log_p = self
            .model
            .forward(&obs, true, true)?
            .gather(&act.broadcast_as((n, 1, k))?.contiguous()?, 1)?
            .squeeze(1)?;

        let m = {
            let next_target = self.target_model.forward(&next_obs, false, true)?.detach();
            let next_act = if self.double {
                let next_online = self.model.forward(&next_obs, false, true)?.detach();
                self.support.expectation(&next_online)?.argmax(D::Minus1)?
            } else {
                self.support.expectation(&next_target)?.argmax(D::Minus1)?
            };
            let idx = next_act.reshape((n, 1, 1))?.broadcast_as((n, 1, k))?.contiguous()?;
            let target = next_target.gather(&idx, 1)?.squeeze(1)?;
            let gamma_n = self.gamma.powi(buffer.n_step() as i32);
            categorical_projection(&target, &ret, &done, gamma_n, &self.support)?.detach()
        };

        let kl = (m * &log_p)?.sum(D::Minus1)?.neg()?;
        let w = match weight {
            Some(w) => Tensor::from_vec(w, n, &self.device)?,
            None => Tensor::ones(n, DType::F32, &self.device)?,
        };
        let loss = (&kl * w)?.mean_all()?;

        if ixs.is_some() {
            let priorities = kl.detach().to_vec1::<f32>()?;
            buffer.update_priority(&ixs, &Some(priorities));
        }

        let record = Record::from_slice(&[("loss", RecordValue::Scalar(loss.to_scalar::<f32>()?))]);
        Ok((loss, record))
    }

    /// Copies the online parameters into the target model.
    pub fn update(&mut self) -> Result<()> {
        sync(self.target_model.get_varmap(), self.model.get_varmap())?;
        trace!("Synchronized the target model");
        Ok(())
    }

    /// Runs greedy rollouts with exploration rate `eval_eps`.
    ///
    /// Observations are encoded by `buffer`, which keeps the frame history.
    /// The agent is in evaluation mode during the rollouts and returns to its
    /// previous mode afterwards.
    pub fn evaluate<V, L>(&mut self, buffer: &R, evaluator: &mut V, logger: &mut L) -> Result<Record>
    where
        V: Evaluator<E>,
        L: Logger<E>,
    {
        let was_train = self.train;
        self.train = false;
        let eps = self.eval_eps;
        let record = {
            let mut policy = GreedyPolicy {
                agent: &mut *self,
                buffer,
                eps,
            };
            evaluator.evaluate(&mut policy, logger)
        };
        self.train = was_train;
        record
    }
}

/// ε-greedy policy of a [`Rainbow`] agent, used for evaluation.
pub struct GreedyPolicy<'a, E, R>
where
    E: Env,
    R: ReplayBufferBase,
{
    agent: &'a mut Rainbow<E, R>,
    buffer: &'a R,
    eps: f64,
}

impl<'a, E, R> Policy<E> for GreedyPolicy<'a, E, R>
where
    E: Env,
    E::Act: From<usize>,
    R: ReplayBufferBase<Obs = E::Obs>,
    R::ObsBatch: Into<Tensor>,
    <R::Batch as TransitionBatch>::ObsBatch: Into<Tensor>,
    <R::Batch as TransitionBatch>::ActBatch: Into<Tensor>,
{
    fn sample(&mut self, obs: &E::Obs) -> Result<E::Act> {
        let x: Tensor = self.buffer.encode_obs(obs, true)?.into();
        let a = self.agent.predict_greedy(&x, self.eps)?;
        Ok(a.into())
    }
}

impl<E, R> Agent<R> for Rainbow<E, R>
where
    E: Env,
    E::Act: From<usize>,
    R: ReplayBufferBase<Obs = E::Obs>,
    R::ObsBatch: Into<Tensor>,
    <R::Batch as TransitionBatch>::ObsBatch: Into<Tensor>,
    <R::Batch as TransitionBatch>::ActBatch: Into<Tensor>,
{
    fn train(&mut self) {
        self.train = true;
    }

    fn eval(&mut self) {
        self.train = false;
    }

    fn is_train(&self) -> bool {
        self.train
    }

    fn opt(&mut self, buffer: &mut R) -> Result<Record> {
        let (loss, mut record) = self.compute_loss(buffer)?;
        let grad_norm = self.model.backward_step(&loss)?;
        self.n_opts += 1;
        debug!(
            "opt step {}: loss {}, grad norm {}",
            self.n_opts,
            record.get_scalar("loss")?,
            grad_norm
        );

        if self.n_opts % self.target_update_interval == 0 {
            self.update()?;
        }
        record.insert("grad_norm", RecordValue::Scalar(grad_norm));
        Ok(record)
    }

    fn save_params(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)?;
        self.model.save(path.join("model.safetensors"))?;
        self.target_model.save(path.join("target_model.safetensors"))?;
        Ok(())
    }

    fn load_params(&mut self, path: &Path) -> Result<()> {
        self.model.load(path.join("model.safetensors"))?;
        self.target_model.load(path.join("target_model.safetensors"))?;
        Ok(())
    }
}
