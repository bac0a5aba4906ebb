//! Binary classification metrics for one pass over a split.
//!
//! Synergy (class 1) is the positive class and a pair is predicted
//! synergistic when its synergy probability exceeds 0.5. Undefined values
//! are substituted rather than raised: AUROC and AUPRC fall back to 0.5
//! when only one class is present, ratio metrics with a zero denominator
//! fall back to 0.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use synergyx_model::Variant;
use tracing::warn;

pub const DECISION_THRESHOLD: f32 = 0.5;

/// Neutral value for ranking metrics that are undefined on a split.
pub const NEUTRAL_AUC: f64 = 0.5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub tp: usize,
    pub fp: usize,
    pub tn: usize,
    pub fn_: usize,
}

impl ConfusionMatrix {
    pub fn from_predictions(labels: &[u32], probabilities: &[f32]) -> Self {
        let mut cm = Self::default();
        for (&label, &p) in labels.iter().zip(probabilities) {
            match (label == 1, p > DECISION_THRESHOLD) {
                (true, true) => cm.tp += 1,
                (false, true) => cm.fp += 1,
                (false, false) => cm.tn += 1,
                (true, false) => cm.fn_ += 1,
            }
        }
        cm
    }

    pub fn total(&self) -> usize {
        self.tp + self.fp + self.tn + self.fn_
    }
}

fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

/// Everything recorded for one split after one pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitMetrics {
    /// Mean batch loss; NaN when no batch succeeded. JSON writes NaN as
    /// null, so null reads back as NaN.
    #[serde(deserialize_with = "nan_from_null")]
    pub loss: f64,
    pub accuracy: f64,
    pub f1: f64,
    pub precision: f64,
    pub recall: f64,
    pub auroc: f64,
    pub auprc: f64,
    pub mcc: f64,
    pub kappa: f64,
    pub num_samples: usize,
    pub positives: usize,
    pub negatives: usize,
}

fn nan_from_null<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

impl SplitMetrics {
    /// Metrics of a pass that produced no predictions.
    pub fn empty(loss: f64) -> Self {
        Self {
            loss,
            accuracy: 0.0,
            f1: 0.0,
            precision: 0.0,
            recall: 0.0,
            auroc: NEUTRAL_AUC,
            auprc: NEUTRAL_AUC,
            mcc: 0.0,
            kappa: 0.0,
            num_samples: 0,
            positives: 0,
            negatives: 0,
        }
    }
}

impl fmt::Display for SplitMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "loss={:.4} acc={:.4} f1={:.4} prec={:.4} rec={:.4} auroc={:.4} auprc={:.4} mcc={:.4} kappa={:.4}",
            self.loss,
            self.accuracy,
            self.f1,
            self.precision,
            self.recall,
            self.auroc,
            self.auprc,
            self.mcc,
            self.kappa
        )
    }
}

/// Computes every metric from labels (0/1) and synergy probabilities.
pub fn compute_metrics(labels: &[u32], probabilities: &[f32], loss: f64) -> SplitMetrics {
    let n = labels.len().min(probabilities.len());
    if n == 0 {
        return SplitMetrics::empty(loss);
    }
    let labels = &labels[..n];
    let probabilities = &probabilities[..n];

    let cm = ConfusionMatrix::from_predictions(labels, probabilities);
    let (tp, fp, tn, fn_) = (cm.tp as f64, cm.fp as f64, cm.tn as f64, cm.fn_ as f64);
    let total = n as f64;

    let accuracy = (tp + tn) / total;
    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let f1 = ratio(2.0 * precision * recall, precision + recall);
    let mcc = ratio(
        tp * tn - fp * fn_,
        ((tp + fp) * (tp + fn_) * (tn + fp) * (tn + fn_)).sqrt(),
    );

    let observed = accuracy;
    let expected = ((tp + fp) * (tp + fn_) + (tn + fn_) * (tn + fp)) / (total * total);
    let kappa = ratio(observed - expected, 1.0 - expected);

    let positives = cm.tp + cm.fn_;
    let negatives = cm.tn + cm.fp;
    let (auroc, auprc) = if positives == 0 || negatives == 0 {
        warn!(
            "Only one class present ({} positive, {} negative); AUROC and AUPRC set to {}",
            positives, negatives, NEUTRAL_AUC
        );
        (NEUTRAL_AUC, NEUTRAL_AUC)
    } else {
        (roc_auc(labels, probabilities), average_precision(labels, probabilities))
    };

    SplitMetrics {
        loss,
        accuracy,
        f1,
        precision,
        recall,
        auroc,
        auprc,
        mcc,
        kappa,
        num_samples: n,
        positives,
        negatives,
    }
}

/// Area under the ROC curve as the Mann-Whitney U statistic, with tied
/// scores given their average rank. Requires both classes.
pub fn roc_auc(labels: &[u32], scores: &[f32]) -> f64 {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut ranks = vec![0f64; scores.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // 1-based ranks i+1..=j+1 share their mean.
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for &k in &order[i..=j] {
            ranks[k] = rank;
        }
        i = j + 1;
    }

    let positives = labels.iter().filter(|&&l| l == 1).count() as f64;
    let negatives = labels.len() as f64 - positives;
    let rank_sum: f64 = labels.iter().zip(&ranks).filter(|(&l, _)| l == 1).map(|(_, r)| r).sum();
    (rank_sum - positives * (positives + 1.0) / 2.0) / (positives * negatives)
}

/// Average precision: precision at each distinct score threshold weighted
/// by the recall gained there. Requires at least one positive.
pub fn average_precision(labels: &[u32], scores: &[f32]) -> f64 {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let positives = labels.iter().filter(|&&l| l == 1).count() as f64;
    let mut tp = 0f64;
    let mut seen = 0f64;
    let mut last_recall = 0f64;
    let mut ap = 0f64;
    let mut i = 0;
    while i < order.len() {
        let threshold = scores[order[i]];
        while i < order.len() && scores[order[i]] == threshold {
            if labels[order[i]] == 1 {
                tp += 1.0;
            }
            seen += 1.0;
            i += 1;
        }
        let recall = tp / positives;
        ap += (recall - last_recall) * (tp / seen);
        last_recall = recall;
    }
    ap
}

/// Validation metric that drives checkpointing and early stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingMetric {
    Auroc,
    Auprc,
    F1,
    Accuracy,
    Mcc,
}

impl RankingMetric {
    /// AUROC for the enhanced variant, F1 for the baseline.
    pub fn for_variant(variant: Variant) -> Self {
        match variant {
            Variant::Enhanced => RankingMetric::Auroc,
            Variant::Baseline => RankingMetric::F1,
        }
    }

    pub fn value(&self, metrics: &SplitMetrics) -> f64 {
        match self {
            RankingMetric::Auroc => metrics.auroc,
            RankingMetric::Auprc => metrics.auprc,
            RankingMetric::F1 => metrics.f1,
            RankingMetric::Accuracy => metrics.accuracy,
            RankingMetric::Mcc => metrics.mcc,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RankingMetric::Auroc => "auroc",
            RankingMetric::Auprc => "auprc",
            RankingMetric::F1 => "f1",
            RankingMetric::Accuracy => "accuracy",
            RankingMetric::Mcc => "mcc",
        }
    }
}

impl fmt::Display for RankingMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
