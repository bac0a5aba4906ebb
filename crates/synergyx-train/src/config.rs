use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use synergyx_common::{Result, SynergyError};
use synergyx_features::LoaderConfig;
use synergyx_model::{LossConfig, Variant};

use crate::metrics::RankingMetric;
use crate::optimizer::OptimConfig;
use crate::scaler::ScalerConfig;
use crate::schedule::OneCycleConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_size")]
    pub eval_batch_size: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_prefetch")]
    pub prefetch: usize,
    /// Structural augmentation of training samples.
    #[serde(default = "default_true")]
    pub augment: bool,
    #[serde(default = "default_train_fraction")]
    pub train_fraction: f64,
    #[serde(default = "default_val_fraction")]
    pub val_fraction: f64,
    #[serde(default = "default_patience")]
    pub patience: usize,
    #[serde(default = "default_min_delta")]
    pub min_delta: f64,
    /// Epochs between metrics report flushes.
    #[serde(default = "default_report_every")]
    pub report_every: usize,
    /// Overrides the per-variant ranking metric.
    #[serde(default)]
    pub ranking_metric: Option<RankingMetric>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub use_gpu: bool,
    #[serde(default)]
    pub optimizer: OptimConfig,
    #[serde(default)]
    pub schedule: OneCycleConfig,
    #[serde(default)]
    pub scaler: ScalerConfig,
    #[serde(default)]
    pub loss: LossConfig,
}

fn default_epochs() -> usize { 100 }
fn default_batch_size() -> usize { 16 }
fn default_seed() -> u64 { 42 }
fn default_workers() -> usize { 1 }
fn default_prefetch() -> usize { 2 }
fn default_true() -> bool { true }
fn default_train_fraction() -> f64 { 0.7 }
fn default_val_fraction() -> f64 { 0.15 }
fn default_patience() -> usize { 15 }
fn default_min_delta() -> f64 { 0.001 }
fn default_report_every() -> usize { 10 }
fn default_output_dir() -> PathBuf { PathBuf::from("outputs") }

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: default_epochs(),
            batch_size: default_batch_size(),
            eval_batch_size: default_batch_size(),
            seed: default_seed(),
            workers: default_workers(),
            prefetch: default_prefetch(),
            augment: true,
            train_fraction: default_train_fraction(),
            val_fraction: default_val_fraction(),
            patience: default_patience(),
            min_delta: default_min_delta(),
            report_every: default_report_every(),
            ranking_metric: None,
            output_dir: default_output_dir(),
            use_gpu: false,
            optimizer: OptimConfig::default(),
            schedule: OneCycleConfig::default(),
            scaler: ScalerConfig::default(),
            loss: LossConfig::default(),
        }
    }
}

impl TrainingConfig {
    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_patience(mut self, patience: usize) -> Self {
        self.patience = patience;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self.eval_batch_size = batch_size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(SynergyError::config("training.epochs must be at least 1"));
        }
        if self.batch_size == 0 || self.eval_batch_size == 0 {
            return Err(SynergyError::config("training batch sizes must be at least 1"));
        }
        if self.patience == 0 {
            return Err(SynergyError::config("training.patience must be at least 1"));
        }
        if self.report_every == 0 {
            return Err(SynergyError::config("training.report_every must be at least 1"));
        }
        if self.min_delta.is_nan() || self.min_delta < 0.0 {
            return Err(SynergyError::config("training.min_delta must be non-negative"));
        }
        if self.train_fraction <= 0.0 || self.val_fraction < 0.0 || self.train_fraction + self.val_fraction > 1.0 {
            return Err(SynergyError::config(format!(
                "invalid split fractions train={} val={}",
                self.train_fraction, self.val_fraction
            )));
        }
        let schedule = &self.schedule;
        if schedule.enabled && (schedule.pct_start <= 0.0 || schedule.pct_start >= 1.0) {
            return Err(SynergyError::config("schedule.pct_start must be in (0, 1)"));
        }
        Ok(())
    }

    pub fn ranking_metric(&self, variant: Variant) -> RankingMetric {
        self.ranking_metric.unwrap_or_else(|| RankingMetric::for_variant(variant))
    }

    /// Optimiser steps in a full run.
    pub fn total_steps(&self, batches_per_epoch: usize) -> usize {
        self.epochs * batches_per_epoch.max(1)
    }

    pub fn train_loader(&self) -> LoaderConfig {
        LoaderConfig {
            augment: self.augment,
            ..LoaderConfig::training(self.batch_size, self.seed)
        }
        .with_workers(self.workers)
        .with_prefetch(self.prefetch)
    }

    pub fn eval_loader(&self) -> LoaderConfig {
        LoaderConfig::evaluation(self.eval_batch_size, self.seed)
            .with_workers(self.workers)
            .with_prefetch(self.prefetch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TrainingConfig::default();
        assert_eq!(config.epochs, 100);
        assert_eq!(config.patience, 15);
        assert_eq!(config.report_every, 10);
        assert!(config.schedule.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_metric_follows_variant_unless_overridden() {
        let mut config = TrainingConfig::default();
        assert_eq!(config.ranking_metric(Variant::Enhanced), RankingMetric::Auroc);
        assert_eq!(config.ranking_metric(Variant::Baseline), RankingMetric::F1);
        config.ranking_metric = Some(RankingMetric::Mcc);
        assert_eq!(config.ranking_metric(Variant::Enhanced), RankingMetric::Mcc);
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        assert!(TrainingConfig::default().with_epochs(0).validate().unwrap_err().is_fatal());
        assert!(TrainingConfig::default().with_patience(0).validate().is_err());
        let config = TrainingConfig {
            train_fraction: 0.9,
            val_fraction: 0.2,
            ..TrainingConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_loader_flavours() {
        let config = TrainingConfig::default().with_batch_size(8);
        let train = config.train_loader();
        assert!(train.shuffle && train.augment);
        assert_eq!(train.batch_size, 8);
        assert!(!config.eval_loader().shuffle);
        assert_eq!(config.total_steps(5), 500);
    }
}
