//! Token-to-sequence pooling for the text channel.

use candle_core::{DType, Tensor};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PoolingStrategy {
    /// Mask-weighted mean over real tokens
    #[default]
    Mean,

    /// First ([CLS]) token
    Cls,

    /// Element-wise max over real tokens
    Max,
}

impl PoolingStrategy {
    /// `hidden` is `(batch, seq, dim)`, `mask` is `(batch, seq)` with 1 for
    /// real tokens. Returns `(batch, dim)`.
    pub fn apply(&self, hidden: &Tensor, mask: &Tensor) -> candle_core::Result<Tensor> {
        let mask = mask.to_dtype(hidden.dtype())?;
        match self {
            PoolingStrategy::Mean => mean_pool(hidden, &mask),
            PoolingStrategy::Cls => hidden.narrow(1, 0, 1)?.squeeze(1),
            PoolingStrategy::Max => max_pool(hidden, &mask),
        }
    }
}

fn mean_pool(hidden: &Tensor, mask: &Tensor) -> candle_core::Result<Tensor> {
    let weights = mask.unsqueeze(2)?;
    let summed = hidden.broadcast_mul(&weights)?.sum(1)?;
    // an all-padding row divides by the clamp, not by zero
    let counts = weights.sum(1)?.clamp(1e-9f32, f32::MAX)?;
    summed.broadcast_div(&counts)
}

fn max_pool(hidden: &Tensor, mask: &Tensor) -> candle_core::Result<Tensor> {
    let penalty = ((mask.unsqueeze(2)? - 1.0)? * 1e9)?;
    hidden.broadcast_add(&penalty)?.max(1)
}

/// Row-wise unit length.
pub fn l2_normalize(embeddings: &Tensor) -> candle_core::Result<Tensor> {
    let norms = embeddings
        .to_dtype(DType::F32)?
        .sqr()?
        .sum_keepdim(1)?
        .sqrt()?
        .clamp(1e-9f32, f32::MAX)?
        .to_dtype(embeddings.dtype())?;
    embeddings.broadcast_div(&norms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn inputs() -> (Tensor, Tensor) {
        let dev = Device::Cpu;
        let hidden = Tensor::from_vec(
            vec![
                1.0f32, 4.0, //
                3.0, 0.0, //
                9.0, 9.0, // padding
                2.0, 2.0, //
                -1.0, 5.0, //
                7.0, -7.0,
            ],
            (2, 3, 2),
            &dev,
        )
        .unwrap();
        let mask = Tensor::from_vec(vec![1u32, 1, 0, 1, 1, 1], (2, 3), &dev).unwrap();
        (hidden, mask)
    }

    #[test]
    fn test_mean_ignores_padding() {
        let (hidden, mask) = inputs();
        let pooled = PoolingStrategy::Mean.apply(&hidden, &mask).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(pooled[0], vec![2.0, 2.0]);
        assert!((pooled[1][0] - 8.0 / 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_max_ignores_padding() {
        let (hidden, mask) = inputs();
        let pooled = PoolingStrategy::Max.apply(&hidden, &mask).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(pooled[0], vec![3.0, 4.0]);
        assert_eq!(pooled[1], vec![7.0, 5.0]);
    }

    #[test]
    fn test_cls_takes_first_token() {
        let (hidden, mask) = inputs();
        let pooled = PoolingStrategy::Cls.apply(&hidden, &mask).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(pooled, vec![vec![1.0, 4.0], vec![2.0, 2.0]]);
    }

    #[test]
    fn test_l2_normalize_rows() {
        let t = Tensor::from_vec(vec![3.0f32, 4.0, 0.0, 0.0], (2, 2), &Device::Cpu).unwrap();
        let rows = l2_normalize(&t).unwrap().to_vec2::<f32>().unwrap();
        assert!((rows[0][0] - 0.6).abs() < 1e-6);
        assert!((rows[0][1] - 0.8).abs() < 1e-6);
        assert_eq!(rows[1], vec![0.0, 0.0]);
    }
}
