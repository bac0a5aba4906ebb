//! Training objectives.
//!
//! Focal loss (Lin et al. 2017) down-weights well-classified examples:
//!
//! ```text
//! CE_i = -log softmax(logits_i)[y_i]
//! p_t  = exp(-CE_i)
//! FL_i = alpha * (1 - p_t)^gamma * CE_i
//! ```
//!
//! With `gamma = 0` and `alpha = 1` it is plain cross-entropy. The static
//! inverse-frequency class weights are available through
//! [`Objective::WeightedCrossEntropy`] instead.

use candle_core::{DType, Result, Tensor, D};
use serde::{Deserialize, Serialize};
use synergyx_common::SynergyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reduction {
    #[default]
    Mean,
    Sum,
    /// Per-example losses, `[N]`.
    None,
}

/// Per-example cross-entropy `[N]` for `[N, C]` logits and `[N]` u32 labels.
pub fn cross_entropy_per_example(logits: &Tensor, labels: &Tensor) -> Result<Tensor> {
    let log_probs = candle_nn::ops::log_softmax(&logits.to_dtype(DType::F32)?, D::Minus1)?;
    log_probs
        .gather(&labels.to_dtype(DType::U32)?.unsqueeze(1)?, 1)?
        .squeeze(1)?
        .neg()
}

fn reduce(losses: Tensor, reduction: Reduction) -> Result<Tensor> {
    match reduction {
        Reduction::Mean => losses.mean_all(),
        Reduction::Sum => losses.sum_all(),
        Reduction::None => Ok(losses),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FocalLoss {
    pub alpha: f64,
    pub gamma: f64,
    #[serde(default)]
    pub reduction: Reduction,
}

impl Default for FocalLoss {
    fn default() -> Self {
        Self {
            alpha: 0.75,
            gamma: 2.0,
            reduction: Reduction::Mean,
        }
    }
}

impl FocalLoss {
    pub fn new(alpha: f64, gamma: f64, reduction: Reduction) -> Self {
        Self { alpha, gamma, reduction }
    }

    pub fn forward(&self, logits: &Tensor, labels: &Tensor) -> Result<Tensor> {
        let ce = cross_entropy_per_example(logits, labels)?;
        let losses = if self.gamma == 0.0 {
            ce.affine(self.alpha, 0.0)?
        } else {
            let p_t = ce.neg()?.exp()?;
            // p_t can exceed 1 by rounding when CE is ~0.
            let modulating = p_t.affine(-1.0, 1.0)?.relu()?.powf(self.gamma)?;
            (modulating * &ce)?.affine(self.alpha, 0.0)?
        };
        reduce(losses, self.reduction)
    }
}

/// `sum(w_i * CE_i) / sum(w_i)` with per-example weights `[N]`.
pub fn weighted_cross_entropy(logits: &Tensor, labels: &Tensor, weights: &Tensor) -> Result<Tensor> {
    let ce = cross_entropy_per_example(logits, labels)?;
    let weights = weights.to_dtype(DType::F32)?;
    let total = weights.sum_all()?;
    (ce * &weights)?.sum_all()?.broadcast_div(&total)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossKind {
    #[default]
    Focal,
    WeightedCrossEntropy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LossConfig {
    #[serde(default)]
    pub kind: LossKind,
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default = "default_gamma")]
    pub gamma: f64,
    #[serde(default)]
    pub reduction: Reduction,
}

fn default_alpha() -> f64 { 0.75 }
fn default_gamma() -> f64 { 2.0 }

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            kind: LossKind::Focal,
            alpha: default_alpha(),
            gamma: default_gamma(),
            reduction: Reduction::Mean,
        }
    }
}

/// The scalar objective optimised during training.
#[derive(Debug, Clone, Copy)]
pub enum Objective {
    Focal(FocalLoss),
    WeightedCrossEntropy,
}

impl Objective {
    pub fn from_config(config: &LossConfig) -> synergyx_common::Result<Self> {
        match config.kind {
            LossKind::Focal => {
                if config.reduction == Reduction::None {
                    return Err(SynergyError::config("training loss needs a mean or sum reduction"));
                }
                if config.gamma < 0.0 {
                    return Err(SynergyError::config(format!("focal gamma {} is negative", config.gamma)));
                }
                Ok(Objective::Focal(FocalLoss::new(config.alpha, config.gamma, config.reduction)))
            }
            LossKind::WeightedCrossEntropy => Ok(Objective::WeightedCrossEntropy),
        }
    }

    pub fn compute(&self, logits: &Tensor, labels: &Tensor, class_weights: &Tensor) -> Result<Tensor> {
        match self {
            Objective::Focal(focal) => focal.forward(logits, labels),
            Objective::WeightedCrossEntropy => weighted_cross_entropy(logits, labels, class_weights),
        }
    }
}

impl Default for Objective {
    fn default() -> Self {
        Objective::Focal(FocalLoss::default())
    }
}
