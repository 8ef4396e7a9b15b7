use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarMap;
use ssrl_candle_agent::{
    augment::Augmentation,
    head::HeadParams,
    mask::MaskStrategy,
    mlr::{MaskType, MlrConfig, MlrTrainer},
    vit::VitConfig,
};
use ssrl_core::{LinearScheduler, SsrlError};
use tempdir::TempDir;

const N: usize = 2;
const T: usize = 4;
const N_ACTIONS: usize = 3;

fn config(mask_type: MaskType, strategy: MaskStrategy) -> MlrConfig {
    let vit_config = VitConfig::default()
        .obs_shape((1, 1, 8, 8))
        .patch_size((4, 4))
        .action_size(N_ACTIONS)
        .t_step(T)
        .encoder(1, 8, 16, 2)
        .decoder(1, 8, 16, 2);
    let head_params = HeadParams::default()
        .action_size(N_ACTIONS)
        .dims(8, 16)
        .decoder(1, 2, 16);
    MlrConfig::default()
        .vit_config(vit_config)
        .head_params(head_params)
        .mask(mask_type, 0.5, strategy)
        .augmentation(Augmentation::RandomShift { pad: 1 })
}

struct Batch {
    obs: Tensor,
    act: Tensor,
    rew: Tensor,
    done: Tensor,
    rtg: Tensor,
}

fn batch() -> Result<Batch> {
    let device = Device::Cpu;
    let act = (0..N * T).map(|i| (i % N_ACTIONS) as u32).collect::<Vec<_>>();
    Ok(Batch {
        obs: Tensor::rand(0f32, 255.0, (N, T, 1, 1, 8, 8), &device)?,
        act: Tensor::from_vec(act, (N, T), &device)?,
        rew: Tensor::zeros((N, T), DType::F32, &device)?,
        done: Tensor::zeros((N, T), DType::F32, &device)?,
        rtg: Tensor::zeros((N, T), DType::F32, &device)?,
    })
}

fn max_abs_diff(a: &VarMap, b: &VarMap) -> Result<f32> {
    let a = a.data().lock().unwrap();
    let b = b.data().lock().unwrap();
    let mut max = 0f32;
    for (k, va) in a.iter() {
        let vb = b.get(k).ok_or_else(|| anyhow::anyhow!("missing {}", k))?;
        let d = (va.as_tensor() - vb.as_tensor())?
            .abs()?
            .flatten_all()?
            .max(0)?
            .to_scalar::<f32>()?;
        max = max.max(d);
    }
    Ok(max)
}

fn snapshot(vm: &VarMap) -> Result<VarMap> {
    let copy = VarMap::new();
    {
        let src = vm.data().lock().unwrap();
        let mut dest = copy.data().lock().unwrap();
        for (k, v) in src.iter() {
            dest.insert(k.clone(), candle_core::Var::from_tensor(&v.as_tensor().copy()?)?);
        }
    }
    Ok(copy)
}

fn check_loss(mask_type: MaskType, strategy: MaskStrategy) -> Result<()> {
    let mut trainer = MlrTrainer::build(config(mask_type, strategy))?;
    let b = batch()?;
    let (loss, record) = trainer.compute_loss(&b.obs, &b.act, &b.rew, &b.done, &b.rtg)?;

    let loss = loss.to_scalar::<f32>()?;
    assert!(loss.is_finite());
    assert!((0.0..=4.0).contains(&loss));
    let pos = record.get_scalar("pos_sim")?;
    let neg = record.get_scalar("neg_sim")?;
    assert!((-1.0 - 1e-5..=1.0 + 1e-5).contains(&pos));
    assert!((record.get_scalar("pos_neg_diff")? - (pos - neg)).abs() < 1e-6);
    Ok(())
}

#[test]
fn test_latent_masking_loss() -> Result<()> {
    check_loss(MaskType::Latent, MaskStrategy::Uniform)
}

#[test]
fn test_pixel_masking_loss() -> Result<()> {
    check_loss(MaskType::Pixel, MaskStrategy::Uniform)?;
    check_loss(MaskType::Pixel, MaskStrategy::Tube)
}

#[test]
fn test_target_follows_online_with_zero_tau() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = config(MaskType::Latent, MaskStrategy::Uniform)
        .tau_scheduler(LinearScheduler::new(0.0, 0.0, 1));
    let mut trainer = MlrTrainer::build(config)?;
    let b = batch()?;

    let record = trainer.opt(&b.obs, &b.act, &b.rew, &b.done, &b.rtg)?;
    assert_eq!(record.get_scalar("tau")?, 0.0);
    assert_eq!(
        max_abs_diff(trainer.model().get_varmap(), trainer.target_model().get_varmap())?,
        0.0
    );
    Ok(())
}

#[test]
fn test_target_is_frozen_with_unit_tau() -> Result<()> {
    let config = config(MaskType::Pixel, MaskStrategy::Frame)
        .tau_scheduler(LinearScheduler::new(1.0, 1.0, 1));
    let mut trainer = MlrTrainer::build(config)?;
    let b = batch()?;
    let before = snapshot(trainer.target_model().get_varmap())?;

    trainer.opt(&b.obs, &b.act, &b.rew, &b.done, &b.rtg)?;
    assert_eq!(max_abs_diff(trainer.target_model().get_varmap(), &before)?, 0.0);
    assert!(max_abs_diff(trainer.model().get_varmap(), &before)? > 0.0);
    Ok(())
}

#[test]
fn test_compute_loss_leaves_target_untouched() -> Result<()> {
    for mask_type in [MaskType::Latent, MaskType::Pixel] {
        let mut trainer = MlrTrainer::build(config(mask_type, MaskStrategy::Uniform))?;
        let b = batch()?;
        let target = snapshot(trainer.target_model().get_varmap())?;
        let online = snapshot(trainer.model().get_varmap())?;

        trainer.compute_loss(&b.obs, &b.act, &b.rew, &b.done, &b.rtg)?;
        assert_eq!(max_abs_diff(trainer.target_model().get_varmap(), &target)?, 0.0);
        // batch norm statistics of the online branch do move
        assert!(max_abs_diff(trainer.model().get_varmap(), &online)? > 0.0);
    }
    Ok(())
}

#[test]
fn test_action_shape_mismatch() -> Result<()> {
    let mut trainer = MlrTrainer::build(config(MaskType::Latent, MaskStrategy::Uniform))?;
    let b = batch()?;
    let act = Tensor::zeros((N, T + 1), DType::U32, &Device::Cpu)?;

    let err = match trainer.compute_loss(&b.obs, &act, &b.rew, &b.done, &b.rtg) {
        Err(e) => e,
        Ok(_) => anyhow::bail!("mismatched actions must be rejected"),
    };
    assert!(matches!(
        err.downcast_ref::<SsrlError>(),
        Some(SsrlError::ShapeMismatch(_))
    ));
    Ok(())
}

#[test]
fn test_save_and_load_params() -> Result<()> {
    let dir = TempDir::new("mlr")?;
    let trainer = MlrTrainer::build(config(MaskType::Latent, MaskStrategy::Uniform))?;
    trainer.save_params(dir.path())?;

    let mut other = MlrTrainer::build(config(MaskType::Latent, MaskStrategy::Uniform).seed(7))?;
    other.load_params(dir.path())?;
    assert_eq!(
        max_abs_diff(trainer.model().get_varmap(), other.model().get_varmap())?,
        0.0
    );
    assert_eq!(
        max_abs_diff(trainer.target_model().get_varmap(), other.target_model().get_varmap())?,
        0.0
    );
    Ok(())
}
