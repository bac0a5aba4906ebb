//! Edge preparation and node-to-graph pooling for batched graphs.
//!
//! Message passing here is scatter based: messages are gathered from source
//! nodes with `index_select` and summed into target nodes with `index_add`,
//! so no dense `[N, N]` adjacency is ever built.

use candle_core::{DType, Device, Result, Tensor};
use synergyx_features::BatchedGraph;

/// Edge list of one batched graph with every self loop replaced by exactly
/// one loop per node.
#[derive(Debug, Clone)]
pub struct EdgeView {
    pub num_nodes: usize,
    pub src: Tensor,
    pub dst: Tensor,
    pub dst_host: Vec<u32>,
    /// `deg(src)^-1/2 * deg(dst)^-1/2` per edge, shaped `[E, 1]`.
    pub gcn_norm: Tensor,
}

impl EdgeView {
    pub fn new(graph: &BatchedGraph, device: &Device) -> Result<Self> {
        Self::from_edges(&graph.sources, &graph.targets, graph.num_nodes(), device)
    }

    pub fn from_edges(sources: &[u32], targets: &[u32], num_nodes: usize, device: &Device) -> Result<Self> {
        let mut src: Vec<u32> = Vec::with_capacity(sources.len() + num_nodes);
        let mut dst: Vec<u32> = Vec::with_capacity(sources.len() + num_nodes);
        for (&s, &t) in sources.iter().zip(targets) {
            if s != t {
                src.push(s);
                dst.push(t);
            }
        }
        src.extend(0..num_nodes as u32);
        dst.extend(0..num_nodes as u32);

        let mut degree = vec![0f32; num_nodes];
        for &t in &dst {
            degree[t as usize] += 1.0;
        }
        let inv_sqrt: Vec<f32> = degree.iter().map(|&d| if d > 0.0 { d.powf(-0.5) } else { 0.0 }).collect();
        let norm: Vec<f32> = src
            .iter()
            .zip(&dst)
            .map(|(&s, &t)| inv_sqrt[s as usize] * inv_sqrt[t as usize])
            .collect();

        let num_edges = src.len();
        Ok(Self {
            num_nodes,
            src: Tensor::from_slice(&src, num_edges, device)?,
            dst: Tensor::from_slice(&dst, num_edges, device)?,
            gcn_norm: Tensor::from_vec(norm, (num_edges, 1), device)?,
            dst_host: dst,
        })
    }

    pub fn num_edges(&self) -> usize {
        self.dst_host.len()
    }
}

/// Mean of the node rows assigned to each graph. Always `[num_graphs, D]`.
pub fn global_mean_pool(h: &Tensor, graph: &BatchedGraph) -> Result<Tensor> {
    let width = h.dim(1)?;
    let mut counts = vec![0f32; graph.num_graphs];
    for &g in &graph.assignment {
        counts[g as usize] += 1.0;
    }
    let inv: Vec<f32> = counts.iter().map(|&c| 1.0 / c.max(1.0)).collect();
    let inv = Tensor::from_vec(inv, (graph.num_graphs, 1), h.device())?;

    let batch = graph.batch.to_device(h.device())?;
    let summed = Tensor::zeros((graph.num_graphs, width), DType::F32, h.device())?.index_add(&batch, h, 0)?;
    summed.broadcast_mul(&inv)
}
