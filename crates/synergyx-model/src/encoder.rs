//! Molecular graph encoders.
//!
//! Two message-passing layer types are supported:
//!
//! | Layer | Aggregation | Activation |
//! |---|---|---|
//! | [`GcnConv`] | symmetric normalised sum, `D^-1/2 (A + I) D^-1/2 X W` | ReLU |
//! | [`GatConv`] | GATv2 attention over incoming edges, multi-head | ELU |
//!
//! A [`GraphEncoder`] stacks `num_layers` of one type, normalises and
//! activates every layer but the last, optionally adds a linear shortcut
//! from the raw atom features and mean-pools nodes into one row per graph.

use candle_core::{DType, Module, Result, Tensor};
use candle_nn::{init::Init, layer_norm, LayerNorm, VarBuilder};
use synergyx_features::BatchedGraph;

use crate::config::{ConvKind, EncoderConfig};
use crate::graph::{global_mean_pool, EdgeView};
use crate::layers::{dropout, xavier_weight, zero_bias, Dense};

const LEAKY_SLOPE: f64 = 0.2;

fn leaky_relu(xs: &Tensor, slope: f64) -> Result<Tensor> {
    let zeros = xs.zeros_like()?;
    xs.maximum(&zeros)? + xs.minimum(&zeros)?.affine(slope, 0.0)?
}

/// Graph convolution (Kipf & Welling 2017).
#[derive(Debug, Clone)]
pub struct GcnConv {
    weight: Tensor,
    bias: Tensor,
    out_dim: usize,
}

impl GcnConv {
    pub fn new(in_dim: usize, out_dim: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            weight: xavier_weight(in_dim, out_dim, &vb.pp("lin"))?,
            bias: zero_bias(out_dim, &vb)?,
            out_dim,
        })
    }

    pub fn forward(&self, xs: &Tensor, edges: &EdgeView) -> Result<Tensor> {
        let h = xs.matmul(&self.weight.t()?)?;
        let messages = h.index_select(&edges.src, 0)?.broadcast_mul(&edges.gcn_norm)?;
        let out = Tensor::zeros((edges.num_nodes, self.out_dim), DType::F32, xs.device())?;
        out.index_add(&edges.dst, &messages, 0)?.broadcast_add(&self.bias)
    }
}

/// GATv2 attention layer (Brody et al. 2022).
///
/// For an edge `j -> i` the score of head `h` is
/// `a_h . LeakyReLU(W_l x_j + W_r x_i)`, normalised by a softmax over all
/// edges entering `i`. Heads are concatenated or averaged.
#[derive(Debug, Clone)]
pub struct GatConv {
    lin_l: Dense,
    lin_r: Dense,
    att: Tensor,
    bias: Tensor,
    heads: usize,
    channels: usize,
    concat: bool,
    dropout: f64,
}

impl GatConv {
    pub fn new(
        in_dim: usize,
        channels: usize,
        heads: usize,
        concat: bool,
        dropout: f64,
        vb: VarBuilder,
    ) -> Result<Self> {
        let width = heads * channels;
        let bound = (6.0 / (channels + 1) as f64).sqrt();
        let att = vb.get_with_hints((1, heads, channels), "att", Init::Uniform { lo: -bound, up: bound })?;
        let bias = zero_bias(if concat { width } else { channels }, &vb)?;
        Ok(Self {
            lin_l: Dense::new(in_dim, width, DType::F32, vb.pp("lin_l"))?,
            lin_r: Dense::new(in_dim, width, DType::F32, vb.pp("lin_r"))?,
            att,
            bias,
            heads,
            channels,
            concat,
            dropout,
        })
    }

    pub fn out_dim(&self) -> usize {
        if self.concat {
            self.heads * self.channels
        } else {
            self.channels
        }
    }

    pub fn forward_t(&self, xs: &Tensor, edges: &EdgeView, train: bool) -> Result<Tensor> {
        let n = edges.num_nodes;
        let shape = (n, self.heads, self.channels);
        let x_l = self.lin_l.forward(xs)?.reshape(shape)?;
        let x_r = self.lin_r.forward(xs)?.reshape(shape)?;

        let x_j = x_l.index_select(&edges.src, 0)?;
        let x_i = x_r.index_select(&edges.dst, 0)?;
        let scores = leaky_relu(&(&x_j + &x_i)?, LEAKY_SLOPE)?
            .broadcast_mul(&self.att)?
            .sum(2)?;

        let alpha = segment_softmax(&scores, edges)?;
        let alpha = dropout(&alpha, self.dropout, train)?;

        let messages = x_j.broadcast_mul(&alpha.unsqueeze(2)?)?;
        let out = Tensor::zeros(shape, DType::F32, xs.device())?.index_add(&edges.dst, &messages, 0)?;
        let out = if self.concat {
            out.reshape((n, self.heads * self.channels))?
        } else {
            out.mean(1)?
        };
        out.broadcast_add(&self.bias)
    }
}

/// Softmax of `[E, H]` scores over the edges sharing a target node.
fn segment_softmax(scores: &Tensor, edges: &EdgeView) -> Result<Tensor> {
    let heads = scores.dim(1)?;
    let host = scores.to_vec2::<f32>()?;
    let mut max = vec![f32::NEG_INFINITY; edges.num_nodes * heads];
    for (row, &t) in host.iter().zip(&edges.dst_host) {
        for (h, &v) in row.iter().enumerate() {
            let slot = &mut max[t as usize * heads + h];
            if v > *slot {
                *slot = v;
            }
        }
    }
    // Every node has a self loop, so every slot has been written.
    let max = Tensor::from_vec(max, (edges.num_nodes, heads), scores.device())?;
    let exp = (scores - max.index_select(&edges.dst, 0)?)?.exp()?;
    let denom = Tensor::zeros((edges.num_nodes, heads), DType::F32, scores.device())?.index_add(&edges.dst, &exp, 0)?;
    exp.broadcast_div(&(denom.index_select(&edges.dst, 0)? + 1e-16)?)
}

#[derive(Debug, Clone)]
enum ConvLayer {
    Gcn(GcnConv),
    Gat(GatConv),
}

impl ConvLayer {
    fn forward_t(&self, xs: &Tensor, edges: &EdgeView, train: bool) -> Result<Tensor> {
        match self {
            ConvLayer::Gcn(conv) => conv.forward(xs, edges),
            ConvLayer::Gat(conv) => conv.forward_t(xs, edges, train),
        }
    }

    fn activate(&self, xs: &Tensor) -> Result<Tensor> {
        match self {
            ConvLayer::Gcn(_) => xs.relu(),
            ConvLayer::Gat(_) => xs.elu(1.0),
        }
    }
}

/// Maps a batched molecular graph to one embedding row per graph.
#[derive(Debug, Clone)]
pub struct GraphEncoder {
    layers: Vec<ConvLayer>,
    norms: Vec<LayerNorm>,
    residual: Option<Dense>,
    dropout: f64,
    out_dim: usize,
}

impl GraphEncoder {
    pub fn new(config: &EncoderConfig, eps: f64, vb: VarBuilder) -> Result<Self> {
        let mut layers = Vec::with_capacity(config.num_layers);
        let mut norms = Vec::with_capacity(config.num_layers.saturating_sub(1));
        let mut width = config.in_dim;

        for i in 0..config.num_layers {
            let last = i + 1 == config.num_layers;
            let vb_layer = vb.pp(format!("conv{}", i + 1));
            let layer = match config.conv {
                ConvKind::Gcn => {
                    let out = if last { config.out_dim } else { config.hidden_dim };
                    let conv = GcnConv::new(width, out, vb_layer)?;
                    width = out;
                    ConvLayer::Gcn(conv)
                }
                ConvKind::Gatv2 => {
                    let conv = if last {
                        GatConv::new(width, config.out_dim, 1, false, config.dropout, vb_layer)?
                    } else {
                        GatConv::new(width, config.hidden_dim, config.heads, true, config.dropout, vb_layer)?
                    };
                    width = conv.out_dim();
                    ConvLayer::Gat(conv)
                }
            };
            layers.push(layer);
            if !last {
                norms.push(layer_norm(width, eps, vb.pp(format!("norm{}", i + 1)))?);
            }
        }

        let residual = if config.residual {
            Some(Dense::new(config.in_dim, config.out_dim, DType::F32, vb.pp("residual"))?)
        } else {
            None
        };

        Ok(Self {
            layers,
            norms,
            residual,
            dropout: config.dropout,
            out_dim: config.out_dim,
        })
    }

    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    /// `[num_graphs, out_dim]` embeddings.
    pub fn forward_t(&self, graph: &BatchedGraph, train: bool) -> Result<Tensor> {
        let x = graph.x.to_dtype(DType::F32)?;
        let edges = EdgeView::new(graph, x.device())?;

        let mut h = x.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            h = layer.forward_t(&h, &edges, train)?;
            if let Some(norm) = self.norms.get(i) {
                h = layer.activate(&norm.forward(&h)?)?;
                h = dropout(&h, self.dropout, train)?;
            }
        }

        if let Some(residual) = &self.residual {
            let shortcut = residual.forward(&x)?;
            // An all-zero shortcut (all-zero atom features) is skipped.
            if shortcut.abs()?.sum_all()?.to_scalar::<f32>()? > 0.0 {
                h = (h + shortcut)?;
            }
        }

        global_mean_pool(&h, graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::VarMap;

    fn two_graphs(in_dim: usize) -> BatchedGraph {
        // Graph 0: path 0-1-2. Graph 1: single node 3 with a self loop.
        let sources = vec![0u32, 1, 1, 2, 3];
        let targets = vec![1u32, 0, 2, 1, 3];
        let assignment = vec![0u32, 0, 0, 1];
        let x = Tensor::randn(0f32, 1.0, (4, in_dim), &Device::Cpu).unwrap();
        let mut rows = sources.clone();
        rows.extend(&targets);
        BatchedGraph {
            x,
            edge_index: Tensor::from_vec(rows, (2, sources.len()), &Device::Cpu).unwrap(),
            batch: Tensor::from_slice(&assignment, 4, &Device::Cpu).unwrap(),
            sources,
            targets,
            assignment,
            num_graphs: 2,
        }
    }

    fn config(conv: ConvKind) -> EncoderConfig {
        EncoderConfig {
            conv,
            in_dim: 8,
            hidden_dim: 6,
            out_dim: 5,
            num_layers: 3,
            heads: 2,
            dropout: 0.2,
            residual: true,
        }
    }

    #[test]
    fn test_gcn_encoder_one_row_per_graph() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let encoder = GraphEncoder::new(&config(ConvKind::Gcn), 1e-5, vb).unwrap();
        let out = encoder.forward_t(&two_graphs(8), true).unwrap();
        assert_eq!(out.dims(), &[2, 5]);
        assert!(varmap.data().lock().unwrap().contains_key("residual.weight"));
    }

    #[test]
    fn test_gat_encoder_concatenates_then_averages_heads() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let encoder = GraphEncoder::new(&config(ConvKind::Gatv2), 1e-5, vb).unwrap();
        let out = encoder.forward_t(&two_graphs(8), false).unwrap();
        assert_eq!(out.dims(), &[2, 5]);

        let data = varmap.data().lock().unwrap();
        assert_eq!(data["conv1.att"].as_tensor().dims(), &[1, 2, 6]);
        assert_eq!(data["conv2.lin_l.weight"].as_tensor().dims(), &[12, 12]);
        assert_eq!(data["conv3.att"].as_tensor().dims(), &[1, 1, 5]);
    }

    #[test]
    fn test_attention_weights_sum_to_one_per_target() {
        let edges = EdgeView::from_edges(&[0, 1, 2], &[1, 0, 1], 3, &Device::Cpu).unwrap();
        let scores = Tensor::randn(0f32, 3.0, (edges.num_edges(), 2), &Device::Cpu).unwrap();
        let alpha = segment_softmax(&scores, &edges).unwrap();
        let sums = Tensor::zeros((3, 2), DType::F32, &Device::Cpu)
            .unwrap()
            .index_add(&edges.dst, &alpha, 0)
            .unwrap()
            .to_vec2::<f32>()
            .unwrap();
        for row in sums {
            for v in row {
                assert!((v - 1.0).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_zero_features_skip_residual() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let mut cfg = config(ConvKind::Gcn);
        cfg.dropout = 0.0;
        let encoder = GraphEncoder::new(&cfg, 1e-5, vb.clone()).unwrap();
        let mut graph = two_graphs(8);
        graph.x = Tensor::zeros((4, 8), DType::F32, &Device::Cpu).unwrap();
        let with_residual = encoder.forward_t(&graph, false).unwrap();

        cfg.residual = false;
        let plain = GraphEncoder::new(&cfg, 1e-5, vb).unwrap();
        let without = plain.forward_t(&graph, false).unwrap();
        assert_eq!(with_residual.to_vec2::<f32>().unwrap(), without.to_vec2::<f32>().unwrap());
    }
}
