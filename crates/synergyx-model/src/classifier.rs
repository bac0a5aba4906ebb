use candle_core::{DType, Module, Result, Tensor};
use candle_nn::VarBuilder;

use crate::layers::{Dense, FeedForwardBlock};

/// Logit index of the antagonism class.
pub const ANTAGONISM: usize = 0;
/// Logit index of the synergy class.
pub const SYNERGY: usize = 1;
pub const NUM_CLASSES: usize = 2;

/// Latent to raw class logits; no activation on the output.
#[derive(Debug, Clone)]
pub struct ClassifierHead {
    hidden: FeedForwardBlock,
    logits: Dense,
}

impl ClassifierHead {
    pub fn new(latent_dim: usize, hidden: usize, dropout: f64, eps: f64, compute: DType, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            hidden: FeedForwardBlock::new(latent_dim, hidden, dropout, eps, compute, vb.pp("hidden"))?,
            logits: Dense::new(hidden, NUM_CLASSES, compute, vb.pp("logits"))?,
        })
    }

    pub fn forward_t(&self, latent: &Tensor, train: bool) -> Result<Tensor> {
        self.logits.forward(&self.hidden.forward_t(latent, train)?)
    }
}

/// Probability of the synergy class per row of `[N, 2]` logits.
pub fn synergy_probability(logits: &Tensor) -> Result<Vec<f32>> {
    candle_nn::ops::softmax_last_dim(&logits.to_dtype(DType::F32)?)?
        .narrow(1, SYNERGY, 1)?
        .flatten_all()?
        .to_vec1::<f32>()
}

/// Arg-max class per row.
pub fn predicted_classes(logits: &Tensor) -> Result<Vec<u32>> {
    logits.argmax(1)?.to_vec1::<u32>()
}
