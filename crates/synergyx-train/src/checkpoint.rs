//! Best-epoch checkpoints addressed by epoch number.
//!
//! ```text
//! best_model_epoch_{n}.model.safetensors   model parameters
//! best_model_epoch_{n}.optim.safetensors   AdamW moments
//! best_model_epoch_{n}.text.safetensors    text-channel parameters (optional)
//! best_model_epoch_{n}.json                CheckpointMeta
//! ```
//!
//! The metadata file is written last; its presence marks a complete
//! checkpoint.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use synergyx_common::{Result, SynergyError};
use tracing::{debug, info, warn};

use crate::metrics::RankingMetric;
use crate::report::EpochRecord;
use crate::scaler::ScalerState;
use crate::schedule::OneCycleState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub run_id: String,
    pub epoch: usize,
    pub metric: RankingMetric,
    pub score: f64,
    pub optimizer_step: usize,
    pub scheduler: Option<OneCycleState>,
    pub scaler: Option<ScalerState>,
    pub record: EpochRecord,
    pub saved_at: DateTime<Utc>,
}

/// What the loop controller knows when it decides to save.
#[derive(Debug, Clone)]
pub struct CheckpointRecord {
    pub run_id: String,
    pub epoch: usize,
    pub metric: RankingMetric,
    pub score: f64,
    pub record: EpochRecord,
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn stem(epoch: usize) -> String {
        format!("best_model_epoch_{}", epoch)
    }

    pub fn model_path(&self, epoch: usize) -> PathBuf {
        self.dir.join(format!("{}.model.safetensors", Self::stem(epoch)))
    }

    pub fn optimizer_path(&self, epoch: usize) -> PathBuf {
        self.dir.join(format!("{}.optim.safetensors", Self::stem(epoch)))
    }

    pub fn text_path(&self, epoch: usize) -> PathBuf {
        self.dir.join(format!("{}.text.safetensors", Self::stem(epoch)))
    }

    pub fn meta_path(&self, epoch: usize) -> PathBuf {
        self.dir.join(format!("{}.json", Self::stem(epoch)))
    }

    pub fn exists(&self, epoch: usize) -> bool {
        self.meta_path(epoch).is_file()
    }

    pub fn save_tensors(&self, path: &Path, tensors: &HashMap<String, Tensor>) -> Result<()> {
        candle_core::safetensors::save(tensors, path)?;
        debug!("Wrote {} tensors to {}", tensors.len(), path.display());
        Ok(())
    }

    pub fn save_varmap(&self, path: &Path, varmap: &VarMap) -> Result<()> {
        varmap.save(path)?;
        Ok(())
    }

    pub fn load_tensors(&self, path: &Path, device: &Device) -> Result<HashMap<String, Tensor>> {
        if !path.is_file() {
            return Err(SynergyError::Checkpoint(format!("{} not found", path.display())));
        }
        Ok(candle_core::safetensors::load(path, device)?)
    }

    pub fn write_meta(&self, meta: &CheckpointMeta) -> Result<()> {
        let path = self.meta_path(meta.epoch);
        let writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(writer, meta)?;
        info!(
            "Saved checkpoint for epoch {} ({} = {:.4}) to {}",
            meta.epoch,
            meta.metric,
            meta.score,
            self.dir.display()
        );
        Ok(())
    }

    pub fn read_meta(&self, epoch: usize) -> Result<CheckpointMeta> {
        let path = self.meta_path(epoch);
        if !path.is_file() {
            return Err(SynergyError::Checkpoint(format!("no checkpoint for epoch {}", epoch)));
        }
        let reader = BufReader::new(File::open(&path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

/// Copies saved tensors into the variables of `varmap`, matching by name.
/// Variables without a saved tensor keep their current value and are
/// reported in a single warning. Returns the number restored.
pub fn restore_vars(varmap: &VarMap, tensors: &HashMap<String, Tensor>) -> Result<usize> {
    let data = varmap
        .data()
        .lock()
        .map_err(|_| SynergyError::Checkpoint("parameter map lock poisoned".into()))?;
    let mut restored = 0;
    let mut missing = Vec::new();
    for (name, var) in data.iter() {
        match tensors.get(name) {
            Some(saved) => {
                if saved.dims() != var.dims() {
                    return Err(SynergyError::Checkpoint(format!(
                        "shape mismatch for {}: saved {:?}, model {:?}",
                        name,
                        saved.dims(),
                        var.dims()
                    )));
                }
                var.set(&saved.to_device(var.device())?.to_dtype(var.dtype())?)?;
                restored += 1;
            }
            None => missing.push(name.as_str()),
        }
    }
    if !missing.is_empty() {
        missing.sort_unstable();
        warn!("{} parameters missing from checkpoint, kept as-is: {:?}", missing.len(), missing);
    }
    Ok(restored)
}
