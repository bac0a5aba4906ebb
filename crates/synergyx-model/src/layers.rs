//! Dense building blocks shared by the fusion, attention and head modules.

use candle_core::{DType, Module, Result, Tensor};
use candle_nn::{init::Init, layer_norm, LayerNorm, Linear, VarBuilder};

/// Xavier-uniform bound for a `fan_in -> fan_out` projection.
pub fn xavier_bound(fan_in: usize, fan_out: usize) -> f64 {
    (6.0 / (fan_in + fan_out) as f64).sqrt()
}

/// `[out, in]` Xavier-uniform weight at `vb/weight`.
pub fn xavier_weight(in_dim: usize, out_dim: usize, vb: &VarBuilder) -> Result<Tensor> {
    let bound = xavier_bound(in_dim, out_dim);
    vb.get_with_hints((out_dim, in_dim), "weight", Init::Uniform { lo: -bound, up: bound })
}

pub fn zero_bias(dim: usize, vb: &VarBuilder) -> Result<Tensor> {
    vb.get_with_hints(dim, "bias", Init::Const(0.0))
}

/// Linear projection that casts to `compute` for the matmul and returns f32.
#[derive(Debug, Clone)]
pub struct Dense {
    weight: Tensor,
    bias: Option<Tensor>,
    compute: DType,
}

impl Dense {
    pub fn new(in_dim: usize, out_dim: usize, compute: DType, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            weight: xavier_weight(in_dim, out_dim, &vb)?,
            bias: Some(zero_bias(out_dim, &vb)?),
            compute,
        })
    }

    pub fn no_bias(in_dim: usize, out_dim: usize, compute: DType, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            weight: xavier_weight(in_dim, out_dim, &vb)?,
            bias: None,
            compute,
        })
    }

    pub fn out_dim(&self) -> usize {
        self.weight.dims()[0]
    }
}

impl Module for Dense {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        if self.compute == DType::F32 {
            return Linear::new(self.weight.clone(), self.bias.clone()).forward(xs);
        }
        let bias = self.bias.as_ref().map(|b| b.to_dtype(self.compute)).transpose()?;
        let linear = Linear::new(self.weight.to_dtype(self.compute)?, bias);
        linear.forward(&xs.to_dtype(self.compute)?)?.to_dtype(DType::F32)
    }
}

pub fn dropout(xs: &Tensor, p: f64, train: bool) -> Result<Tensor> {
    if train && p > 0.0 {
        candle_nn::ops::dropout(xs, p as f32)
    } else {
        Ok(xs.clone())
    }
}

/// `Dense -> LayerNorm -> GELU -> Dropout`.
#[derive(Debug, Clone)]
pub struct FeedForwardBlock {
    dense: Dense,
    norm: LayerNorm,
    dropout: f64,
}

impl FeedForwardBlock {
    pub fn new(in_dim: usize, out_dim: usize, dropout: f64, eps: f64, compute: DType, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            dense: Dense::new(in_dim, out_dim, compute, vb.pp("dense"))?,
            norm: layer_norm(out_dim, eps, vb.pp("norm"))?,
            dropout,
        })
    }

    pub fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let h = self.norm.forward(&self.dense.forward(xs)?)?.gelu_erf()?;
        dropout(&h, self.dropout, train)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::VarMap;

    #[test]
    fn test_dense_init_is_xavier_with_zero_bias() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let dense = Dense::new(30, 10, DType::F32, vb.pp("proj")).unwrap();
        assert_eq!(dense.out_dim(), 10);

        let data = varmap.data().lock().unwrap();
        let weight = data["proj.weight"].as_tensor().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let bound = xavier_bound(30, 10) as f32;
        assert!(weight.iter().all(|w| w.abs() <= bound));
        let bias = data["proj.bias"].as_tensor().to_vec1::<f32>().unwrap();
        assert!(bias.iter().all(|&b| b == 0.0));
    }

    #[test]
    fn test_feed_forward_shapes_and_eval_is_deterministic() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let block = FeedForwardBlock::new(12, 8, 0.5, 1e-5, DType::F32, vb).unwrap();
        let xs = Tensor::randn(0f32, 1.0, (4, 12), &Device::Cpu).unwrap();
        let a = block.forward_t(&xs, false).unwrap();
        let b = block.forward_t(&xs, false).unwrap();
        assert_eq!(a.dims(), &[4, 8]);
        assert_eq!(a.to_vec2::<f32>().unwrap(), b.to_vec2::<f32>().unwrap());
    }

    #[test]
    fn test_dense_accepts_sequence_input() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let dense = Dense::no_bias(6, 3, DType::F32, vb).unwrap();
        let xs = Tensor::ones((2, 5, 6), DType::F32, &Device::Cpu).unwrap();
        assert_eq!(dense.forward(&xs).unwrap().dims(), &[2, 5, 3]);
    }
}
