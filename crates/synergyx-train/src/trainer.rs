//! The training loop controller.
//!
//! ```text
//! Init -> { TrainEpoch -> ValidateEpoch -> CheckpointDecision }* -> FinalEvaluate -> Done
//! ```
//!
//! A failing batch is logged and skipped. Cancellation is polled between
//! batches; an interrupted run discards the partial epoch, flushes the
//! report for completed epochs and returns without the final evaluation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use synergyx_common::Result;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::checkpoint::{CheckpointRecord, CheckpointStore};
use crate::config::TrainingConfig;
use crate::engine::TrainingEngine;
use crate::metrics::{compute_metrics, RankingMetric, SplitMetrics};
use crate::report::{EpochRecord, MetricsReport};
use crate::source::BatchSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    TrainEpoch,
    ValidateEpoch,
    CheckpointDecision,
    FinalEvaluate,
    Done,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub run_id: String,
    pub metric: RankingMetric,
    /// Epoch whose validation score was saved as best, if any improved on
    /// the initial best of 0.
    pub best_epoch: Option<usize>,
    pub best_score: f64,
    pub epochs_run: usize,
    pub history: Vec<EpochRecord>,
    /// Held-out metrics; absent when the run was interrupted.
    pub test: Option<SplitMetrics>,
    pub stopped_early: bool,
    pub interrupted: bool,
}

/// Outcome of one pass over a split.
struct Pass {
    metrics: SplitMetrics,
    failed: usize,
}

pub struct Trainer {
    config: TrainingConfig,
    metric: RankingMetric,
    store: CheckpointStore,
    report: MetricsReport,
    cancel: Arc<AtomicBool>,
    run_id: String,
    phase: Phase,
}

impl Trainer {
    pub fn new(config: TrainingConfig, metric: RankingMetric, cancel: Arc<AtomicBool>) -> Result<Self> {
        config.validate()?;
        let store = CheckpointStore::new(&config.output_dir)?;
        let run_id = Uuid::new_v4().to_string();
        let report = MetricsReport::new(&config.output_dir, run_id.clone());
        Ok(Self {
            config,
            metric,
            store,
            report,
            cancel,
            run_id,
            phase: Phase::Init,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    pub fn report(&self) -> &MetricsReport {
        &self.report
    }

    fn enter(&mut self, phase: Phase) {
        debug!("{:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// One pass over `source`. `None` when cancelled part-way.
    fn pass<E, S>(&self, engine: &mut E, source: &S, epoch: usize, train: bool) -> Result<Option<Pass>>
    where
        E: TrainingEngine + ?Sized,
        S: BatchSource + ?Sized,
    {
        let split = if train { "train" } else { "eval" };
        let mut loss_sum = 0f64;
        let mut succeeded = 0usize;
        let mut failed = 0usize;
        let mut labels = Vec::new();
        let mut probabilities = Vec::new();

        for (index, batch) in source.batches(epoch).enumerate() {
            if self.cancelled() {
                return Ok(None);
            }
            let step = batch.and_then(|batch| {
                if train {
                    engine.train_step(&batch)
                } else {
                    engine.eval_step(&batch)
                }
            });
            match step {
                Ok(out) => {
                    loss_sum += out.loss;
                    succeeded += 1;
                    labels.extend(out.labels);
                    probabilities.extend(out.probabilities);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    failed += 1;
                    warn!("Epoch {} {} batch {} failed, skipping: {}", epoch, split, index, e);
                }
            }
        }
        if self.cancelled() {
            return Ok(None);
        }

        let loss = if succeeded > 0 {
            loss_sum / succeeded as f64
        } else {
            warn!("Epoch {} {}: no batch succeeded; loss undefined", epoch, split);
            f64::NAN
        };
        Ok(Some(Pass {
            metrics: compute_metrics(&labels, &probabilities, loss),
            failed,
        }))
    }

    fn flush_report(&mut self, history: &[EpochRecord]) {
        if let Err(e) = self.report.append(history) {
            error!("Failed to write metrics report {}: {}", self.report.path().display(), e);
        }
    }

    fn interrupted(&mut self, history: Vec<EpochRecord>, best_epoch: Option<usize>, best_score: f64) -> TrainingSummary {
        self.flush_report(&history);
        match best_epoch {
            Some(epoch) => warn!(
                "Training interrupted after {} epochs; best checkpoint is epoch {} in {}",
                history.len(),
                epoch,
                self.store.dir().display()
            ),
            None => warn!("Training interrupted after {} epochs; no checkpoint found", history.len()),
        }
        self.enter(Phase::Done);
        TrainingSummary {
            run_id: self.run_id.clone(),
            metric: self.metric,
            best_epoch,
            best_score,
            epochs_run: history.len(),
            history,
            test: None,
            stopped_early: false,
            interrupted: true,
        }
    }

    /// Runs the full loop and returns the summary. Only configuration
    /// errors abort; everything else is logged and recovered.
    pub fn run<E>(
        &mut self,
        engine: &mut E,
        train: &dyn BatchSource,
        val: &dyn BatchSource,
        test: &dyn BatchSource,
    ) -> Result<TrainingSummary>
    where
        E: TrainingEngine + ?Sized,
    {
        let epochs = self.config.epochs;
        info!(
            "Run {}: {} epochs, {} train / {} val / {} test batches, ranking by val {}",
            self.run_id,
            epochs,
            train.num_batches(),
            val.num_batches(),
            test.num_batches(),
            self.metric
        );

        let mut history: Vec<EpochRecord> = Vec::new();
        let mut best_score = 0.0f64;
        let mut best_epoch: Option<usize> = None;
        let mut counter = 0usize;
        let mut stopped_early = false;

        for epoch in 1..=epochs {
            let started = Instant::now();

            self.enter(Phase::TrainEpoch);
            let Some(train_pass) = self.pass(engine, train, epoch, true)? else {
                return Ok(self.interrupted(history, best_epoch, best_score));
            };
            let t = &train_pass.metrics;
            info!(
                "Epoch {}/{} train: loss={:.4} acc={:.4} f1={:.4} auroc={:.4}",
                epoch, epochs, t.loss, t.accuracy, t.f1, t.auroc
            );

            self.enter(Phase::ValidateEpoch);
            let Some(val_pass) = self.pass(engine, val, epoch, false)? else {
                return Ok(self.interrupted(history, best_epoch, best_score));
            };
            info!("Epoch {}/{} val: {}", epoch, epochs, val_pass.metrics);

            let record = EpochRecord {
                epoch,
                learning_rate: engine.learning_rate(),
                duration_secs: started.elapsed().as_secs_f64(),
                train: train_pass.metrics,
                val: val_pass.metrics,
                failed_batches: train_pass.failed + val_pass.failed,
            };

            self.enter(Phase::CheckpointDecision);
            let score = self.metric.value(&record.val);
            if score > best_score + self.config.min_delta {
                info!(
                    "Val {} improved {:.4} -> {:.4}; saving checkpoint",
                    self.metric, best_score, score
                );
                best_score = score;
                best_epoch = Some(epoch);
                counter = 0;
                let checkpoint = CheckpointRecord {
                    run_id: self.run_id.clone(),
                    epoch,
                    metric: self.metric,
                    score,
                    record: record.clone(),
                };
                if let Err(e) = engine.save_checkpoint(&self.store, &checkpoint) {
                    error!("Failed to save checkpoint for epoch {}: {}", epoch, e);
                }
            } else {
                counter += 1;
                info!(
                    "Val {} {:.4} did not improve on {:.4} (patience {}/{})",
                    self.metric, score, best_score, counter, self.config.patience
                );
            }

            history.push(record);
            if epoch % self.config.report_every == 0 {
                self.flush_report(&history);
            }

            if counter >= self.config.patience {
                info!("Early stopping after epoch {}", epoch);
                stopped_early = true;
                break;
            }
        }

        self.enter(Phase::FinalEvaluate);
        match best_epoch {
            Some(epoch) => match engine.restore_checkpoint(&self.store, epoch) {
                Ok(true) => {}
                Ok(false) => warn!("No checkpoint found for epoch {}; evaluating the current model", epoch),
                Err(e) => warn!("Cannot restore epoch {} checkpoint ({}); evaluating the current model", epoch, e),
            },
            None => warn!("No checkpoint found; evaluating the current model"),
        }
        let Some(test_pass) = self.pass(engine, test, 0, false)? else {
            return Ok(self.interrupted(history, best_epoch, best_score));
        };
        info!("Test: {}", test_pass.metrics);

        self.flush_report(&history);
        self.enter(Phase::Done);
        Ok(TrainingSummary {
            run_id: self.run_id.clone(),
            metric: self.metric,
            best_epoch,
            best_score,
            epochs_run: history.len(),
            history,
            test: Some(test_pass.metrics),
            stopped_early,
            interrupted: false,
        })
    }
}
