//! One optimisation step at a time.
//!
//! The loop controller only sees [`TrainingEngine`]; [`SynergyEngine`] owns
//! the model parameters, the text channel, the optimiser, the schedule and
//! the loss scaler, and is the only code that mutates them.

use candle_core::{DType, Device, Var};
use candle_nn::{Optimizer, VarMap};
use chrono::Utc;
use synergyx_common::{Result, SynergyError};
use synergyx_embed::EmbeddingProvider;
use synergyx_features::Batch;
use synergyx_model::{synergy_probability, Objective, SynergyModel};
use tracing::{debug, info, warn};

use crate::checkpoint::{restore_vars, CheckpointMeta, CheckpointRecord, CheckpointStore};
use crate::config::TrainingConfig;
use crate::optimizer::{clip_grad_norm, AdamW};
use crate::scaler::LossScaler;
use crate::schedule::OneCycle;

/// Result of one batch.
#[derive(Debug, Clone)]
pub struct StepOutput {
    /// Unscaled batch loss.
    pub loss: f64,
    pub labels: Vec<u32>,
    /// Synergy probability per pair.
    pub probabilities: Vec<f32>,
}

pub trait TrainingEngine {
    /// Forward, backward and (unless the loss scaler skips it) one
    /// optimiser step.
    fn train_step(&mut self, batch: &Batch) -> Result<StepOutput>;

    /// Forward pass in inference mode, no parameter updates.
    fn eval_step(&mut self, batch: &Batch) -> Result<StepOutput>;

    fn learning_rate(&self) -> f64;

    fn save_checkpoint(&mut self, store: &CheckpointStore, record: &CheckpointRecord) -> Result<()>;

    /// Loads the checkpoint of `epoch`. `Ok(false)` when none exists.
    fn restore_checkpoint(&mut self, store: &CheckpointStore, epoch: usize) -> Result<bool>;
}

/// Model variables sorted by name so optimiser state keys are stable.
fn named_vars(varmap: &VarMap) -> Result<Vec<(String, Var)>> {
    let data = varmap
        .data()
        .lock()
        .map_err(|_| SynergyError::Checkpoint("parameter map lock poisoned".into()))?;
    let mut named: Vec<(String, Var)> = data.iter().map(|(name, var)| (name.clone(), var.clone())).collect();
    named.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(named)
}

pub struct SynergyEngine {
    model: SynergyModel,
    varmap: VarMap,
    provider: Option<Box<dyn EmbeddingProvider>>,
    optimizer: AdamW,
    vars: Vec<Var>,
    scheduler: Option<OneCycle>,
    scaler: LossScaler,
    objective: Objective,
    max_grad_norm: f64,
    device: Device,
}

impl SynergyEngine {
    /// `varmap` must hold every parameter of `model`. Trainable parameters
    /// of the text channel are optimised alongside under `text.{i}`.
    pub fn new(
        model: SynergyModel,
        varmap: VarMap,
        provider: Option<Box<dyn EmbeddingProvider>>,
        config: &TrainingConfig,
        total_steps: usize,
        device: Device,
    ) -> Result<Self> {
        if model.uses_text() != provider.is_some() {
            return Err(SynergyError::config("text channel configured on only one of model and provider"));
        }

        let mut named = named_vars(&varmap)?;
        let model_params = named.len();
        if let Some(provider) = &provider {
            named.extend(
                provider
                    .trainable_vars()
                    .into_iter()
                    .enumerate()
                    .map(|(i, var)| (format!("text.{}", i), var)),
            );
        }

        let scheduler = config
            .schedule
            .enabled
            .then(|| OneCycle::new(config.schedule.clone(), total_steps));
        let mut params = config.optimizer.params();
        if let Some(scheduler) = &scheduler {
            params.lr = scheduler.current_lr();
        }
        let optimizer = AdamW::from_named(named, params)?;
        let vars = optimizer.vars();
        let scaler = LossScaler::new(config.scaler.clone(), model.precision().is_reduced());
        let objective = Objective::from_config(&config.loss)?;

        info!(
            "Training engine: {} model tensors, {} text tensors, {} steps, lr {:.2e}, loss scaling {}",
            model_params,
            vars.len() - model_params,
            total_steps,
            optimizer.learning_rate(),
            scaler.is_enabled()
        );

        Ok(Self {
            model,
            varmap,
            provider,
            optimizer,
            vars,
            scheduler,
            scaler,
            objective,
            max_grad_norm: config.optimizer.max_grad_norm,
            device,
        })
    }

    pub fn model(&self) -> &SynergyModel {
        &self.model
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub fn optimizer_steps(&self) -> usize {
        self.optimizer.step_count()
    }

    pub fn loss_scale(&self) -> f64 {
        self.scaler.scale()
    }

    fn forward(&self, batch: &Batch, train: bool) -> Result<(Batch, candle_core::Tensor)> {
        let batch = batch.to_device(&self.device)?;
        let text = match &self.provider {
            Some(provider) => Some(
                provider
                    .embed(&batch.smiles_a, &batch.smiles_b, &batch.cell)
                    .map_err(|e| SynergyError::Data(format!("text channel: {}", e)))?,
            ),
            None => None,
        };
        let logits = self.model.forward_t(&batch, text.as_ref(), train)?;
        Ok((batch, logits))
    }
}

impl TrainingEngine for SynergyEngine {
    fn train_step(&mut self, batch: &Batch) -> Result<StepOutput> {
        let (batch, logits) = self.forward(batch, true)?;
        let loss = self.objective.compute(&logits, &batch.labels, &batch.class_weights)?;
        let loss_value = loss.to_dtype(DType::F32)?.to_scalar::<f32>()? as f64;
        if !loss_value.is_finite() && !self.scaler.is_enabled() {
            return Err(SynergyError::Data(format!("non-finite loss {}", loss_value)));
        }

        let mut grads = self.scaler.scale_loss(&loss)?.backward()?;
        let finite = self.scaler.unscale(&mut grads, &self.vars)?;
        if finite {
            let norm = clip_grad_norm(&mut grads, &self.vars, self.max_grad_norm)?;
            self.optimizer.step(&grads)?;
            debug!("step {}: loss {:.4}, grad norm {:.4}", self.optimizer.step_count(), loss_value, norm);
        }
        self.scaler.update(!finite);

        // The schedule advances on skipped steps too.
        if let Some(scheduler) = &mut self.scheduler {
            let lr = scheduler.step();
            self.optimizer.set_learning_rate(lr);
        }

        Ok(StepOutput {
            loss: loss_value,
            labels: batch.label_values.clone(),
            probabilities: synergy_probability(&logits.detach())?,
        })
    }

    fn eval_step(&mut self, batch: &Batch) -> Result<StepOutput> {
        let (batch, logits) = self.forward(batch, false)?;
        let logits = logits.detach();
        let loss = self.objective.compute(&logits, &batch.labels, &batch.class_weights)?;
        Ok(StepOutput {
            loss: loss.to_dtype(DType::F32)?.to_scalar::<f32>()? as f64,
            labels: batch.label_values.clone(),
            probabilities: synergy_probability(&logits)?,
        })
    }

    fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    fn save_checkpoint(&mut self, store: &CheckpointStore, record: &CheckpointRecord) -> Result<()> {
        let epoch = record.epoch;
        store.save_varmap(&store.model_path(epoch), &self.varmap)?;
        store.save_tensors(&store.optimizer_path(epoch), &self.optimizer.state_tensors())?;
        if let Some(varmap) = self.provider.as_ref().and_then(|p| p.varmap()) {
            store.save_varmap(&store.text_path(epoch), varmap)?;
        }
        store.write_meta(&CheckpointMeta {
            run_id: record.run_id.clone(),
            epoch,
            metric: record.metric,
            score: record.score,
            optimizer_step: self.optimizer.step_count(),
            scheduler: self.scheduler.as_ref().map(OneCycle::state),
            scaler: self.scaler.is_enabled().then(|| self.scaler.state()),
            record: record.record.clone(),
            saved_at: Utc::now(),
        })
    }

    fn restore_checkpoint(&mut self, store: &CheckpointStore, epoch: usize) -> Result<bool> {
        if !store.exists(epoch) {
            return Ok(false);
        }
        let meta = store.read_meta(epoch)?;

        let tensors = store.load_tensors(&store.model_path(epoch), &self.device)?;
        let restored = restore_vars(&self.varmap, &tensors)?;

        if let Some(varmap) = self.provider.as_ref().and_then(|p| p.varmap()) {
            let path = store.text_path(epoch);
            if path.is_file() {
                restore_vars(varmap, &store.load_tensors(&path, &self.device)?)?;
            } else {
                warn!("Checkpoint for epoch {} has no text-channel weights; keeping current ones", epoch);
            }
        }

        let optim = store.load_tensors(&store.optimizer_path(epoch), &self.device)?;
        self.optimizer.load_state(&optim, meta.optimizer_step)?;
        if let (Some(scheduler), Some(state)) = (&mut self.scheduler, &meta.scheduler) {
            scheduler.load_state(state);
            self.optimizer.set_learning_rate(scheduler.current_lr());
        }
        if let Some(state) = &meta.scaler {
            self.scaler.load_state(state);
        }

        info!(
            "Restored epoch {} checkpoint ({} tensors, {} = {:.4})",
            epoch, restored, meta.metric, meta.score
        );
        Ok(true)
    }
}
