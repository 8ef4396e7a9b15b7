use super::config::MlrConfig;
use crate::{head::MlrHead, vit::Vit};
use anyhow::Result;
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use log::info;
use std::path::Path;

/// Backbone and head of the MLR trainer, sharing one var map.
pub struct MlrModel {
    varmap: VarMap,
    pub(super) backbone: Vit,
    pub(super) head: MlrHead,
}

impl MlrModel {
    /// Constructs [`MlrModel`].
    pub fn build(config: &MlrConfig, device: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let backbone = Vit::build(vb.pp("backbone"), config.vit_config.clone())?;
        let head = MlrHead::build(vb.pp("head"), &config.head_params)?;
        Ok(Self {
            varmap,
            backbone,
            head,
        })
    }

    /// Backbone, to be reused by downstream agents.
    pub fn backbone(&self) -> &Vit {
        &self.backbone
    }

    pub fn get_varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub fn save<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        self.varmap.save(&path)?;
        info!("Save mlr model to {:?}", path.as_ref());
        Ok(())
    }

    pub fn load<T: AsRef<Path>>(&mut self, path: T) -> Result<()> {
        self.varmap.load(&path)?;
        info!("Load mlr model from {:?}", path.as_ref());
        Ok(())
    }
}
