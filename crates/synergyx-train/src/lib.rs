//! synergyx training
//!
//! Everything that turns batches into a trained, checkpointed model:
//!
//! * [`optimizer`]: AdamW with persisted moments, global gradient clipping
//! * [`schedule`]: the one-cycle learning-rate policy, stepped per batch
//! * [`scaler`]: dynamic loss scaling for reduced-precision runs
//! * [`metrics`]: per-split classification metrics and the ranking metric
//! * [`checkpoint`] / [`report`]: best-epoch checkpoints and the CSV report
//! * [`engine`]: one optimisation step ([`SynergyEngine`])
//! * [`trainer`]: the epoch loop with early stopping and interruption

pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod metrics;
pub mod optimizer;
pub mod report;
pub mod scaler;
pub mod schedule;
pub mod source;
pub mod trainer;

pub use checkpoint::{restore_vars, CheckpointMeta, CheckpointRecord, CheckpointStore};
pub use config::TrainingConfig;
pub use engine::{StepOutput, SynergyEngine, TrainingEngine};
pub use metrics::{average_precision, compute_metrics, roc_auc, ConfusionMatrix, RankingMetric, SplitMetrics};
pub use optimizer::{clip_grad_norm, global_grad_norm, AdamW, OptimConfig};
pub use report::{EpochRecord, MetricsReport};
pub use scaler::{LossScaler, ScalerConfig, ScalerState};
pub use schedule::{OneCycle, OneCycleConfig, OneCycleState};
pub use source::BatchSource;
pub use trainer::{Phase, Trainer, TrainingSummary};
