//! Per-epoch records and the CSV metrics report.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use synergyx_common::Result;
use tracing::debug;

use crate::metrics::SplitMetrics;

/// Everything recorded about one completed epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    /// 1-based.
    pub epoch: usize,
    /// Rate in effect at the end of the epoch.
    pub learning_rate: f64,
    pub duration_secs: f64,
    pub train: SplitMetrics,
    pub val: SplitMetrics,
    pub failed_batches: usize,
}

/// One flattened report line. The csv writer cannot flatten nested
/// structs, so every split metric gets its own column.
#[derive(Debug, Serialize)]
struct ReportRow<'a> {
    run_id: &'a str,
    timestamp: DateTime<Utc>,
    epoch: usize,
    learning_rate: f64,
    duration_secs: f64,
    failed_batches: usize,
    train_loss: f64,
    train_accuracy: f64,
    train_f1: f64,
    train_precision: f64,
    train_recall: f64,
    train_auroc: f64,
    train_auprc: f64,
    train_mcc: f64,
    train_kappa: f64,
    train_positives: usize,
    train_negatives: usize,
    val_loss: f64,
    val_accuracy: f64,
    val_f1: f64,
    val_precision: f64,
    val_recall: f64,
    val_auroc: f64,
    val_auprc: f64,
    val_mcc: f64,
    val_kappa: f64,
    val_positives: usize,
    val_negatives: usize,
}

impl<'a> ReportRow<'a> {
    fn new(run_id: &'a str, timestamp: DateTime<Utc>, r: &EpochRecord) -> Self {
        Self {
            run_id,
            timestamp,
            epoch: r.epoch,
            learning_rate: r.learning_rate,
            duration_secs: r.duration_secs,
            failed_batches: r.failed_batches,
            train_loss: r.train.loss,
            train_accuracy: r.train.accuracy,
            train_f1: r.train.f1,
            train_precision: r.train.precision,
            train_recall: r.train.recall,
            train_auroc: r.train.auroc,
            train_auprc: r.train.auprc,
            train_mcc: r.train.mcc,
            train_kappa: r.train.kappa,
            train_positives: r.train.positives,
            train_negatives: r.train.negatives,
            val_loss: r.val.loss,
            val_accuracy: r.val.accuracy,
            val_f1: r.val.f1,
            val_precision: r.val.precision,
            val_recall: r.val.recall,
            val_auroc: r.val.auroc,
            val_auprc: r.val.auprc,
            val_mcc: r.val.mcc,
            val_kappa: r.val.kappa,
            val_positives: r.val.positives,
            val_negatives: r.val.negatives,
        }
    }
}

/// Append-only `training_metrics.csv`. Remembers how many records of the
/// run history are already on disk so each flush writes only new rows.
#[derive(Debug)]
pub struct MetricsReport {
    path: PathBuf,
    run_id: String,
    written: usize,
}

impl MetricsReport {
    pub const FILE_NAME: &'static str = "training_metrics.csv";

    pub fn new(dir: &Path, run_id: impl Into<String>) -> Self {
        Self {
            path: dir.join(Self::FILE_NAME),
            run_id: run_id.into(),
            written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows_written(&self) -> usize {
        self.written
    }

    /// Appends `history[rows_written..]` and returns how many rows were
    /// added. The header is written only when the file is new or empty.
    pub fn append(&mut self, history: &[EpochRecord]) -> Result<usize> {
        let pending = history.get(self.written..).unwrap_or(&[]);
        if pending.is_empty() {
            return Ok(0);
        }

        let needs_header = std::fs::metadata(&self.path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut writer = csv::WriterBuilder::new().has_headers(needs_header).from_writer(file);
        let now = Utc::now();
        for record in pending {
            writer.serialize(ReportRow::new(&self.run_id, now, record))?;
        }
        writer.flush()?;

        self.written += pending.len();
        debug!("Appended {} rows to {}", pending.len(), self.path.display());
        Ok(pending.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::compute_metrics;

    fn record(epoch: usize) -> EpochRecord {
        EpochRecord {
            epoch,
            learning_rate: 1e-3,
            duration_secs: 1.5,
            train: compute_metrics(&[0, 1], &[0.3, 0.8], 0.4),
            val: compute_metrics(&[0, 1], &[0.6, 0.7], 0.6),
            failed_batches: 0,
        }
    }

    #[test]
    fn test_only_new_rows_are_appended() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = MetricsReport::new(dir.path(), "run-1");
        let mut history = vec![record(1), record(2)];
        assert_eq!(report.append(&history).unwrap(), 2);
        assert_eq!(report.append(&history).unwrap(), 0);
        history.push(record(3));
        assert_eq!(report.append(&history).unwrap(), 1);

        let mut reader = csv::Reader::from_path(report.path()).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[0], "run_id");
        assert!(headers.iter().any(|h| h == "val_auroc"));
        let epochs: Vec<String> = reader.records().map(|r| r.unwrap()[2].to_string()).collect();
        assert_eq!(epochs, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_nothing_written_for_empty_history() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = MetricsReport::new(dir.path(), "run-2");
        assert_eq!(report.append(&[]).unwrap(), 0);
        assert!(!report.path().exists());
    }
}
