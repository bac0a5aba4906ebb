//! Cross-modal attention refiner.
//!
//! Scaled dot-product self-attention over `[N, L, D]`. The model calls it
//! with the fused latent as a single token (`L = 1`), where it reduces to a
//! learned multi-head re-mixing of the latent.

use candle_core::{DType, Module, Result, Tensor};
use candle_nn::VarBuilder;

use crate::layers::{dropout, Dense};

#[derive(Debug, Clone)]
pub struct CrossModalAttention {
    q: Dense,
    k: Dense,
    v: Dense,
    out: Dense,
    heads: usize,
    head_dim: usize,
    dropout: f64,
}

impl CrossModalAttention {
    pub fn new(dim: usize, heads: usize, dropout: f64, compute: DType, vb: VarBuilder) -> Result<Self> {
        if heads == 0 || dim % heads != 0 {
            candle_core::bail!("width {} cannot be split into {} heads", dim, heads);
        }
        Ok(Self {
            q: Dense::new(dim, dim, compute, vb.pp("q"))?,
            k: Dense::new(dim, dim, compute, vb.pp("k"))?,
            v: Dense::new(dim, dim, compute, vb.pp("v"))?,
            out: Dense::new(dim, dim, compute, vb.pp("out"))?,
            heads,
            head_dim: dim / heads,
            dropout,
        })
    }

    fn split_heads(&self, xs: &Tensor) -> Result<Tensor> {
        let (n, l, _) = xs.dims3()?;
        xs.reshape((n, l, self.heads, self.head_dim))?.transpose(1, 2)?.contiguous()
    }

    /// `[N, L, D] -> [N, L, D]`.
    pub fn forward_t(&self, query: &Tensor, key: &Tensor, value: &Tensor, train: bool) -> Result<Tensor> {
        let (n, l, d) = query.dims3()?;
        let q = self.split_heads(&self.q.forward(query)?)?;
        let k = self.split_heads(&self.k.forward(key)?)?;
        let v = self.split_heads(&self.v.forward(value)?)?;

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let scores = (q.matmul(&k.t()?.contiguous()?)? * scale)?;
        let weights = candle_nn::ops::softmax_last_dim(&scores)?;
        let weights = dropout(&weights, self.dropout, train)?;

        let attended = weights.matmul(&v)?.transpose(1, 2)?.reshape((n, l, d))?;
        self.out.forward(&attended)
    }

    /// `[N, D] -> [N, D]`, the latent treated as one token.
    pub fn refine(&self, latent: &Tensor, train: bool) -> Result<Tensor> {
        let token = latent.unsqueeze(1)?;
        self.forward_t(&token, &token, &token, train)?.squeeze(1)
    }
}
