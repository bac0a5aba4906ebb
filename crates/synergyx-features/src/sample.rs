//! Per-record assembly of training examples.

use std::sync::Arc;

use candle_core::{DType, Device, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use synergyx_common::{FeatureFamily, Result, SynergyError};
use synergyx_molecules::{augment_graph, AugmentConfig, GraphBuilder, GraphOrigin, MolecularGraph};
use tracing::warn;

use crate::store::{FeatureStore, StructureTable, PLACEHOLDER_STRUCTURE};

/// Directed edges of the default sample's graphs.
const DEFAULT_EDGES: [(u32, u32); 4] = [(0, 1), (1, 0), (1, 2), (2, 1)];
const DEFAULT_NODES: usize = 10;

/// One molecular graph as tensors: `x` is `[nodes, W]` f32 and
/// `edge_index` is `[2, edges]` u32.
#[derive(Debug, Clone)]
pub struct GraphTensors {
    pub x: Tensor,
    pub edge_index: Tensor,
}

impl GraphTensors {
    pub fn from_graph(graph: &MolecularGraph, device: &Device) -> Result<Self> {
        let x = Tensor::from_slice(graph.node_features(), (graph.num_nodes(), graph.width()), device)?;
        let mut edges = Vec::with_capacity(graph.num_edges() * 2);
        edges.extend_from_slice(graph.sources());
        edges.extend_from_slice(graph.targets());
        let edge_index = Tensor::from_vec(edges, (2, graph.num_edges()), device)?;
        Ok(Self { x, edge_index })
    }

    pub fn is_well_formed(&self) -> bool {
        self.x.rank() == 2
            && self.edge_index.rank() == 2
            && self.edge_index.dims()[0] == 2
            && self.edge_index.dtype() == DType::U32
    }

    pub fn num_nodes(&self) -> usize {
        self.x.dims().first().copied().unwrap_or(0)
    }
}

/// A single labelled drug pair on a cell line.
#[derive(Debug, Clone)]
pub struct Sample {
    pub graph_a: GraphTensors,
    pub graph_b: GraphTensors,
    pub target_a: Tensor,
    pub target_b: Tensor,
    pub physchem_a: Tensor,
    pub physchem_b: Tensor,
    pub cell: Tensor,
    pub label: u32,
    pub class_weight: f32,
    pub smiles_a: String,
    pub smiles_b: String,
}

impl Sample {
    pub fn with_label(mut self, label: u32, class_weight: f32) -> Self {
        self.label = label;
        self.class_weight = class_weight;
        self
    }

    fn vectors(&self) -> [&Tensor; 5] {
        [&self.target_a, &self.target_b, &self.physchem_a, &self.physchem_b, &self.cell]
    }

    /// Graph tensors are rank 2 and every feature vector is rank 1.
    pub fn is_well_formed(&self) -> bool {
        self.graph_a.is_well_formed()
            && self.graph_b.is_well_formed()
            && self.vectors().iter().all(|t| t.rank() == 1)
    }

    /// Well formed, and every width agrees with `reference`.
    pub fn is_compatible_with(&self, reference: &Sample) -> bool {
        self.is_well_formed()
            && self.graph_a.x.dims()[1] == reference.graph_a.x.dims()[1]
            && self.graph_b.x.dims()[1] == reference.graph_b.x.dims()[1]
            && self
                .vectors()
                .iter()
                .zip(reference.vectors())
                .all(|(a, b)| a.dims() == b.dims())
    }
}

/// Builds [`Sample`]s from ids. Never fails per record: any error yields the
/// default sample.
pub struct SampleAssembler {
    store: FeatureStore,
    structures: StructureTable,
    builder: Arc<GraphBuilder>,
    augment: AugmentConfig,
    device: Device,
    default: Sample,
}

impl SampleAssembler {
    pub fn new(
        store: FeatureStore,
        structures: StructureTable,
        builder: Arc<GraphBuilder>,
        augment: AugmentConfig,
    ) -> Result<Self> {
        augment.validate().map_err(|e| SynergyError::config(e.to_string()))?;
        let device = Device::Cpu;
        let default = Self::build_default(&store, &builder, &device)?;
        Ok(Self {
            store,
            structures,
            builder,
            augment,
            device,
            default,
        })
    }

    fn build_default(store: &FeatureStore, builder: &GraphBuilder, device: &Device) -> Result<Sample> {
        let mut rng = StdRng::seed_from_u64(0);
        let graph = MolecularGraph::synthetic(DEFAULT_NODES, builder.node_features(), &DEFAULT_EDGES, &mut rng);
        let graph = GraphTensors::from_graph(&graph, device)?;
        let zeros = |family| Tensor::zeros(store.width(family), DType::F32, device);
        Ok(Sample {
            graph_a: graph.clone(),
            graph_b: graph,
            target_a: zeros(FeatureFamily::Target)?,
            target_b: zeros(FeatureFamily::Target)?,
            physchem_a: zeros(FeatureFamily::Physchem)?,
            physchem_b: zeros(FeatureFamily::Physchem)?,
            cell: zeros(FeatureFamily::Expression)?,
            label: 0,
            class_weight: 1.0,
            smiles_a: PLACEHOLDER_STRUCTURE.to_string(),
            smiles_b: PLACEHOLDER_STRUCTURE.to_string(),
        })
    }

    pub fn default_sample(&self) -> &Sample {
        &self.default
    }

    pub fn store(&self) -> &FeatureStore {
        &self.store
    }

    pub fn builder(&self) -> &GraphBuilder {
        &self.builder
    }

    pub fn structures(&self) -> &StructureTable {
        &self.structures
    }

    /// Assembles the sample for one pair. Labels are left at 0 / weight 1;
    /// see [`Sample::with_label`].
    pub fn assemble<R: Rng + ?Sized>(
        &self,
        drug_a: &str,
        drug_b: &str,
        cell_line: &str,
        augment: bool,
        rng: &mut R,
    ) -> Sample {
        match self.try_assemble(drug_a, drug_b, cell_line, augment, rng) {
            Ok(sample) => sample,
            Err(e) => {
                warn!("Failed to assemble ({}, {}, {}): {}; using default sample", drug_a, drug_b, cell_line, e);
                self.default.clone()
            }
        }
    }

    fn try_assemble<R: Rng + ?Sized>(
        &self,
        drug_a: &str,
        drug_b: &str,
        cell_line: &str,
        augment: bool,
        rng: &mut R,
    ) -> Result<Sample> {
        let smiles_a = self.structures.resolve(drug_a);
        let smiles_b = self.structures.resolve(drug_b);

        let graph_a = self.graph(smiles_a, augment, rng)?;
        let graph_b = self.graph(smiles_b, augment, rng)?;

        let vector = |values: &[f32]| -> Result<Tensor> {
            if values.is_empty() {
                return Ok(Tensor::zeros(0, DType::F32, &self.device)?);
            }
            Ok(Tensor::from_slice(values, values.len(), &self.device)?)
        };

        Ok(Sample {
            graph_a,
            graph_b,
            target_a: vector(self.store.target_features(drug_a))?,
            target_b: vector(self.store.target_features(drug_b))?,
            physchem_a: vector(self.store.physchem_features(drug_a))?,
            physchem_b: vector(self.store.physchem_features(drug_b))?,
            cell: vector(self.store.cell_line_features(cell_line))?,
            label: 0,
            class_weight: 1.0,
            smiles_a: smiles_a.to_string(),
            smiles_b: smiles_b.to_string(),
        })
    }

    fn graph<R: Rng + ?Sized>(&self, structure: &str, augment: bool, rng: &mut R) -> Result<GraphTensors> {
        let graph = self.builder.build(structure);
        if graph.origin() == GraphOrigin::Synthetic {
            warn!("Using synthetic graph for structure {:?}", structure);
        }
        if augment {
            let perturbed = augment_graph(&graph, &self.augment, rng);
            GraphTensors::from_graph(&perturbed, &self.device)
        } else {
            GraphTensors::from_graph(&graph, &self.device)
        }
    }
}
