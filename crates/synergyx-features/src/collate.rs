//! Disjoint-union batching.

use candle_core::{DType, Device, Tensor};
use synergyx_common::{Result, SynergyError};
use tracing::warn;

use crate::sample::{GraphTensors, Sample};

/// Several graphs merged into one. Node ids in the edge list are offset
/// into the combined numbering; `assignment[n]` is the sample node `n`
/// came from. Host copies of the index arrays are kept so graph layers can
/// derive normalisation without reading back from the device.
#[derive(Debug, Clone)]
pub struct BatchedGraph {
    pub x: Tensor,
    pub edge_index: Tensor,
    pub batch: Tensor,
    pub sources: Vec<u32>,
    pub targets: Vec<u32>,
    pub assignment: Vec<u32>,
    pub num_graphs: usize,
}

impl BatchedGraph {
    pub fn from_graphs(graphs: &[&GraphTensors]) -> Result<Self> {
        let first = graphs
            .first()
            .ok_or_else(|| SynergyError::Data("cannot batch zero graphs".into()))?;
        let device = first.x.device().clone();

        let mut xs = Vec::with_capacity(graphs.len());
        let mut sources = Vec::new();
        let mut targets = Vec::new();
        let mut assignment = Vec::new();
        let mut offset = 0u32;

        for (i, graph) in graphs.iter().enumerate() {
            let num_nodes = graph.num_nodes() as u32;
            let edges = graph.edge_index.to_vec2::<u32>()?;
            sources.extend(edges[0].iter().map(|&s| s + offset));
            targets.extend(edges[1].iter().map(|&t| t + offset));
            assignment.extend(std::iter::repeat(i as u32).take(num_nodes as usize));
            xs.push(graph.x.clone());
            offset += num_nodes;
        }

        let x = Tensor::cat(&xs, 0)?;
        let num_edges = sources.len();
        let mut edge_rows = Vec::with_capacity(num_edges * 2);
        edge_rows.extend_from_slice(&sources);
        edge_rows.extend_from_slice(&targets);
        let edge_index = Tensor::from_vec(edge_rows, (2, num_edges), &device)?;
        let batch = Tensor::from_slice(&assignment, assignment.len(), &device)?;

        Ok(Self {
            x,
            edge_index,
            batch,
            sources,
            targets,
            assignment,
            num_graphs: graphs.len(),
        })
    }

    pub fn num_nodes(&self) -> usize {
        self.assignment.len()
    }

    pub fn to_device(&self, device: &Device) -> Result<Self> {
        Ok(Self {
            x: self.x.to_device(device)?,
            edge_index: self.edge_index.to_device(device)?,
            batch: self.batch.to_device(device)?,
            ..self.clone()
        })
    }
}

/// Model input for N samples. Vectors are `[N, width]`; `labels` is `[N]`
/// u32 and `class_weights` is `[N]` f32.
#[derive(Debug, Clone)]
pub struct Batch {
    pub graph_a: BatchedGraph,
    pub graph_b: BatchedGraph,
    pub target_a: Tensor,
    pub target_b: Tensor,
    pub physchem_a: Tensor,
    pub physchem_b: Tensor,
    pub cell: Tensor,
    pub labels: Tensor,
    pub class_weights: Tensor,
    pub label_values: Vec<u32>,
    pub smiles_a: Vec<String>,
    pub smiles_b: Vec<String>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.label_values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.label_values.is_empty()
    }

    pub fn to_device(&self, device: &Device) -> Result<Self> {
        Ok(Self {
            graph_a: self.graph_a.to_device(device)?,
            graph_b: self.graph_b.to_device(device)?,
            target_a: self.target_a.to_device(device)?,
            target_b: self.target_b.to_device(device)?,
            physchem_a: self.physchem_a.to_device(device)?,
            physchem_b: self.physchem_b.to_device(device)?,
            cell: self.cell.to_device(device)?,
            labels: self.labels.to_device(device)?,
            class_weights: self.class_weights.to_device(device)?,
            label_values: self.label_values.clone(),
            smiles_a: self.smiles_a.clone(),
            smiles_b: self.smiles_b.clone(),
        })
    }
}

fn stack_vectors<F>(samples: &[Sample], pick: F) -> Result<Tensor>
where
    F: Fn(&Sample) -> &Tensor,
{
    let first = pick(&samples[0]);
    let width = first.dims().first().copied().unwrap_or(0);
    if width == 0 {
        return Ok(Tensor::zeros((samples.len(), 0), DType::F32, first.device())?);
    }
    let rows: Vec<&Tensor> = samples.iter().map(&pick).collect();
    Ok(Tensor::stack(&rows, 0)?)
}

/// Merges samples into one batch. All samples must share widths.
pub fn collate(samples: &[Sample]) -> Result<Batch> {
    let first = samples
        .first()
        .ok_or_else(|| SynergyError::Data("cannot collate an empty batch".into()))?;
    let device = first.cell.device().clone();

    let graphs_a: Vec<&GraphTensors> = samples.iter().map(|s| &s.graph_a).collect();
    let graphs_b: Vec<&GraphTensors> = samples.iter().map(|s| &s.graph_b).collect();

    let label_values: Vec<u32> = samples.iter().map(|s| s.label).collect();
    let weights: Vec<f32> = samples.iter().map(|s| s.class_weight).collect();

    Ok(Batch {
        graph_a: BatchedGraph::from_graphs(&graphs_a)?,
        graph_b: BatchedGraph::from_graphs(&graphs_b)?,
        target_a: stack_vectors(samples, |s| &s.target_a)?,
        target_b: stack_vectors(samples, |s| &s.target_b)?,
        physchem_a: stack_vectors(samples, |s| &s.physchem_a)?,
        physchem_b: stack_vectors(samples, |s| &s.physchem_b)?,
        cell: stack_vectors(samples, |s| &s.cell)?,
        labels: Tensor::from_slice(&label_values, label_values.len(), &device)?,
        class_weights: Tensor::from_vec(weights, samples.len(), &device)?,
        label_values,
        smiles_a: samples.iter().map(|s| s.smiles_a.clone()).collect(),
        smiles_b: samples.iter().map(|s| s.smiles_b.clone()).collect(),
    })
}

/// Drops samples that are malformed or disagree with `fallback`'s widths,
/// then collates. An all-invalid batch becomes a single fallback sample.
pub fn safe_collate(samples: Vec<Sample>, fallback: &Sample) -> Result<Batch> {
    let total = samples.len();
    let valid: Vec<Sample> = samples
        .into_iter()
        .filter(|s| s.is_compatible_with(fallback))
        .collect();
    if valid.len() < total {
        warn!("Discarded {} malformed samples from batch of {}", total - valid.len(), total);
    }
    if valid.is_empty() {
        return collate(std::slice::from_ref(fallback));
    }
    collate(&valid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(nodes: usize, edges: &[(u32, u32)], width: usize) -> GraphTensors {
        let dev = Device::Cpu;
        let (src, dst): (Vec<u32>, Vec<u32>) = edges.iter().copied().unzip();
        let mut rows = src;
        rows.extend(dst);
        GraphTensors {
            x: Tensor::ones((nodes, width), DType::F32, &dev).unwrap(),
            edge_index: Tensor::from_vec(rows, (2, edges.len()), &dev).unwrap(),
        }
    }

    fn sample(nodes: usize, label: u32) -> Sample {
        let dev = Device::Cpu;
        let v = |w: usize| Tensor::zeros(w, DType::F32, &dev).unwrap();
        Sample {
            graph_a: graph(nodes, &[(0, 1), (1, 0)], 8),
            graph_b: graph(1, &[(0, 0)], 8),
            target_a: v(3),
            target_b: v(3),
            physchem_a: v(0),
            physchem_b: v(0),
            cell: v(5),
            label,
            class_weight: 1.5,
            smiles_a: "CC".into(),
            smiles_b: "C".into(),
        }
    }

    #[test]
    fn test_collate_offsets_edges_and_stacks_vectors() {
        let batch = collate(&[sample(2, 1), sample(3, 0), sample(2, 1)]).unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.graph_a.x.dims(), &[7, 8]);
        assert_eq!(batch.graph_a.sources, vec![0, 1, 2, 3, 5, 6]);
        assert_eq!(batch.graph_a.targets, vec![1, 0, 3, 2, 6, 5]);
        assert_eq!(batch.graph_a.assignment, vec![0, 0, 1, 1, 1, 2, 2]);
        assert_eq!(batch.graph_b.x.dims(), &[3, 8]);
        assert_eq!(batch.target_a.dims(), &[3, 3]);
        assert_eq!(batch.physchem_b.dims(), &[3, 0]);
        assert_eq!(batch.cell.dims(), &[3, 5]);
        assert_eq!(batch.labels.to_vec1::<u32>().unwrap(), vec![1, 0, 1]);
        assert_eq!(batch.class_weights.to_vec1::<f32>().unwrap(), vec![1.5; 3]);
    }

    #[test]
    fn test_assignment_max_is_len_minus_one() {
        for n in 1..6 {
            let samples: Vec<Sample> = (0..n).map(|i| sample(1 + i % 3, 0)).collect();
            let batch = collate(&samples).unwrap();
            let max = batch.graph_a.batch.max(0).unwrap().to_scalar::<u32>().unwrap();
            assert_eq!(max as usize, n - 1);
            assert_eq!(batch.graph_b.assignment.iter().max().copied(), Some(n as u32 - 1));
        }
    }

    #[test]
    fn test_empty_collate_is_error() {
        assert!(collate(&[]).is_err());
    }

    #[test]
    fn test_safe_collate_drops_wrong_rank() {
        let fallback = sample(2, 0);
        let mut bad = sample(2, 1);
        bad.graph_a.x = Tensor::zeros(8, DType::F32, &Device::Cpu).unwrap();
        let batch = safe_collate(vec![sample(3, 1), bad, sample(2, 1)], &fallback).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.graph_a.x.dims(), &[5, 8]);
    }

    #[test]
    fn test_safe_collate_all_invalid_uses_fallback() {
        let fallback = sample(4, 0);
        let mut bad = sample(2, 1);
        bad.cell = Tensor::zeros((1, 5), DType::F32, &Device::Cpu).unwrap();
        let batch = safe_collate(vec![bad], &fallback).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.label_values, vec![0]);
        assert_eq!(batch.graph_a.num_nodes(), 4);
    }
}
