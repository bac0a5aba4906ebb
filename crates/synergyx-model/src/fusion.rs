//! Multimodal fusion: concatenation of every per-sample component followed
//! by narrowing feed-forward blocks down to the latent width.

use candle_core::{DType, Module, Result, Tensor};
use candle_nn::VarBuilder;

use crate::layers::{Dense, FeedForwardBlock};

/// Per-sample inputs to the fusion block, each `[N, width]`.
#[derive(Debug, Clone, Copy)]
pub struct FusionInputs<'a> {
    pub graph_a: &'a Tensor,
    pub graph_b: &'a Tensor,
    pub target_a: &'a Tensor,
    pub target_b: &'a Tensor,
    pub physchem_a: &'a Tensor,
    pub physchem_b: &'a Tensor,
    pub cell: &'a Tensor,
    pub text: Option<&'a Tensor>,
}

impl<'a> FusionInputs<'a> {
    /// Components in concatenation order. Zero-width families are dropped.
    pub fn components(&self) -> Vec<&'a Tensor> {
        [
            Some(self.graph_a),
            Some(self.graph_b),
            Some(self.target_a),
            Some(self.target_b),
            Some(self.physchem_a),
            Some(self.physchem_b),
            Some(self.cell),
            self.text,
        ]
        .into_iter()
        .flatten()
        .filter(|t| t.dims().last().copied().unwrap_or(0) > 0)
        .collect()
    }
}

#[derive(Debug, Clone)]
pub struct FusionBlock {
    blocks: Vec<FeedForwardBlock>,
    projection: Dense,
    input_width: usize,
}

impl FusionBlock {
    pub fn new(
        input_width: usize,
        dims: &[usize],
        dropout: &[f64],
        latent_dim: usize,
        eps: f64,
        compute: DType,
        vb: VarBuilder,
    ) -> Result<Self> {
        let mut blocks = Vec::with_capacity(dims.len());
        let mut width = input_width;
        for (i, (&dim, &p)) in dims.iter().zip(dropout).enumerate() {
            blocks.push(FeedForwardBlock::new(width, dim, p, eps, compute, vb.pp(format!("block{}", i + 1)))?);
            width = dim;
        }
        let projection = Dense::new(width, latent_dim, compute, vb.pp("projection"))?;
        Ok(Self {
            blocks,
            projection,
            input_width,
        })
    }

    pub fn input_width(&self) -> usize {
        self.input_width
    }

    /// `[N, latent_dim]`.
    pub fn forward_t(&self, inputs: &FusionInputs, train: bool) -> Result<Tensor> {
        let fused = Tensor::cat(&inputs.components(), 1)?;
        let width = fused.dim(1)?;
        if width != self.input_width {
            candle_core::bail!("fusion input is {} wide, block was built for {}", width, self.input_width);
        }
        let mut h = fused;
        for block in &self.blocks {
            h = block.forward_t(&h, train)?;
        }
        self.projection.forward(&h)
    }
}

/// Trainable projection of the text channel into the latent width.
#[derive(Debug, Clone)]
pub struct TextProjection {
    hidden: FeedForwardBlock,
    out: Dense,
}

impl TextProjection {
    pub fn new(
        in_dim: usize,
        hidden: usize,
        out_dim: usize,
        dropout: f64,
        eps: f64,
        compute: DType,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            hidden: FeedForwardBlock::new(in_dim, hidden, dropout, eps, compute, vb.pp("hidden"))?,
            out: Dense::new(hidden, out_dim, compute, vb.pp("out"))?,
        })
    }

    pub fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        self.out.forward(&self.hidden.forward_t(xs, train)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::VarMap;

    fn ones(n: usize, w: usize) -> Tensor {
        Tensor::ones((n, w), DType::F32, &Device::Cpu).unwrap()
    }

    #[test]
    fn test_zero_width_components_are_skipped() {
        let (g, t, p, c) = (ones(3, 4), ones(3, 2), ones(3, 0), ones(3, 5));
        let inputs = FusionInputs {
            graph_a: &g,
            graph_b: &g,
            target_a: &t,
            target_b: &t,
            physchem_a: &p,
            physchem_b: &p,
            cell: &c,
            text: None,
        };
        assert_eq!(inputs.components().len(), 5);

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let fusion = FusionBlock::new(17, &[16, 8], &[0.4, 0.3], 6, 1e-5, DType::F32, vb).unwrap();
        assert_eq!(fusion.forward_t(&inputs, true).unwrap().dims(), &[3, 6]);
    }

    #[test]
    fn test_width_mismatch_is_an_error() {
        let (g, t, c, text) = (ones(2, 4), ones(2, 2), ones(2, 5), ones(2, 3));
        let inputs = FusionInputs {
            graph_a: &g,
            graph_b: &g,
            target_a: &t,
            target_b: &t,
            physchem_a: &t,
            physchem_b: &t,
            cell: &c,
            text: Some(&text),
        };
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let fusion = FusionBlock::new(21, &[8], &[0.0], 4, 1e-5, DType::F32, vb).unwrap();
        assert!(fusion.forward_t(&inputs, false).is_err());
    }

    #[test]
    fn test_text_projection_width() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let projection = TextProjection::new(10, 16, 4, 0.3, 1e-5, DType::F32, vb).unwrap();
        assert_eq!(projection.forward_t(&ones(2, 10), false).unwrap().dims(), &[2, 4]);
    }
}
