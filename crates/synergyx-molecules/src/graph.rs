//! Molecular graphs as flat host buffers.

use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use sha2::{Digest, Sha256};

use crate::features::atom_features;
use crate::smiles::Molecule;

/// Directed edges of the fallback graph: a 4-node path in both directions.
const FALLBACK_EDGES: [(u32, u32); 6] = [(0, 1), (1, 0), (1, 2), (2, 1), (2, 3), (3, 2)];

pub const FALLBACK_NODES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphOrigin {
    Parsed,
    /// Stand-in for a structure that could not be parsed.
    Synthetic,
}

/// Nodes are atoms with `width` features each, row-major. Every bond is
/// stored as two directed edges in `sources`/`targets`.
#[derive(Debug, Clone, PartialEq)]
pub struct MolecularGraph {
    num_nodes: usize,
    width: usize,
    node_features: Vec<f32>,
    sources: Vec<u32>,
    targets: Vec<u32>,
    origin: GraphOrigin,
}

impl MolecularGraph {
    /// Builds a graph from raw buffers, rejecting anything that breaks the
    /// shape invariants.
    pub fn from_parts(
        width: usize,
        node_features: Vec<f32>,
        sources: Vec<u32>,
        targets: Vec<u32>,
        origin: GraphOrigin,
    ) -> Option<Self> {
        if width == 0 || node_features.is_empty() || node_features.len() % width != 0 {
            return None;
        }
        let graph = Self {
            num_nodes: node_features.len() / width,
            width,
            node_features,
            sources,
            targets,
            origin,
        };
        graph.is_valid().then_some(graph)
    }

    pub fn from_molecule(mol: &Molecule, width: usize) -> Self {
        let mut node_features = Vec::with_capacity(mol.num_atoms() * width);
        for idx in 0..mol.num_atoms() {
            node_features.extend(atom_features(mol, idx, width));
        }

        let mut sources = Vec::with_capacity(mol.num_bonds() * 2);
        let mut targets = Vec::with_capacity(mol.num_bonds() * 2);
        for bond in &mol.bonds {
            sources.extend([bond.begin as u32, bond.end as u32]);
            targets.extend([bond.end as u32, bond.begin as u32]);
        }
        if sources.is_empty() {
            sources.push(0);
            targets.push(0);
        }

        Self {
            num_nodes: mol.num_atoms(),
            width,
            node_features,
            sources,
            targets,
            origin: GraphOrigin::Parsed,
        }
    }

    /// Fixed-size random graph. Features are uniform in [-1, 1).
    pub fn synthetic<R: Rng + ?Sized>(num_nodes: usize, width: usize, edges: &[(u32, u32)], rng: &mut R) -> Self {
        let num_nodes = num_nodes.max(1);
        let node_features: Vec<f32> = (0..num_nodes * width).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let (mut sources, mut targets): (Vec<u32>, Vec<u32>) = edges
            .iter()
            .filter(|(s, t)| (*s as usize) < num_nodes && (*t as usize) < num_nodes)
            .copied()
            .unzip();
        if sources.is_empty() {
            sources.push(0);
            targets.push(0);
        }
        Self {
            num_nodes,
            width,
            node_features,
            sources,
            targets,
            origin: GraphOrigin::Synthetic,
        }
    }

    /// Stand-in for an unparseable structure. Seeded from the string's
    /// digest so the same input always maps to the same graph.
    pub fn fallback(input: &str, width: usize) -> Self {
        let digest = Sha256::digest(input.as_bytes());
        let mut seed = [0u8; 8];
        seed.copy_from_slice(&digest[..8]);
        let mut rng = StdRng::seed_from_u64(u64::from_le_bytes(seed));
        Self::synthetic(FALLBACK_NODES, width, &FALLBACK_EDGES, &mut rng)
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn num_edges(&self) -> usize {
        self.sources.len()
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn origin(&self) -> GraphOrigin {
        self.origin
    }

    pub fn node_features(&self) -> &[f32] {
        &self.node_features
    }

    pub fn node(&self, idx: usize) -> &[f32] {
        &self.node_features[idx * self.width..(idx + 1) * self.width]
    }

    pub fn sources(&self) -> &[u32] {
        &self.sources
    }

    pub fn targets(&self) -> &[u32] {
        &self.targets
    }

    /// Both edge rows have equal length and every index is a node.
    pub fn is_valid(&self) -> bool {
        self.num_nodes > 0
            && self.node_features.len() == self.num_nodes * self.width
            && self.sources.len() == self.targets.len()
            && !self.sources.is_empty()
            && self
                .sources
                .iter()
                .chain(&self.targets)
                .all(|&i| (i as usize) < self.num_nodes)
    }

    pub(crate) fn with_edges(&self, sources: Vec<u32>, targets: Vec<u32>) -> Self {
        Self { sources, targets, ..self.clone() }
    }

    pub(crate) fn with_features(&self, node_features: Vec<f32>) -> Self {
        Self { node_features, ..self.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smiles::{MoleculeParser, SmilesParser};

    #[test]
    fn test_bonds_become_two_directed_edges() {
        let mol = SmilesParser.parse("CCO").unwrap();
        let g = MolecularGraph::from_molecule(&mol, 64);
        assert_eq!(g.num_nodes(), 3);
        assert_eq!(g.num_edges(), 4);
        assert_eq!(g.sources(), &[0, 1, 1, 2]);
        assert_eq!(g.targets(), &[1, 0, 2, 1]);
        assert!(g.is_valid());
    }

    #[test]
    fn test_single_atom_gets_self_edge() {
        let mol = SmilesParser.parse("C").unwrap();
        let g = MolecularGraph::from_molecule(&mol, 64);
        assert_eq!(g.sources(), &[0]);
        assert_eq!(g.targets(), &[0]);
        assert!(g.is_valid());
    }

    #[test]
    fn test_fallback_is_deterministic_per_input() {
        let a = MolecularGraph::fallback("garbage", 64);
        let b = MolecularGraph::fallback("garbage", 64);
        let c = MolecularGraph::fallback("other garbage", 64);
        assert_eq!(a, b);
        assert_ne!(a.node_features(), c.node_features());
        assert_eq!(a.num_nodes(), FALLBACK_NODES);
        assert_eq!(a.num_edges(), 6);
        assert_eq!(a.origin(), GraphOrigin::Synthetic);
        assert!(a.is_valid());
    }

    #[test]
    fn test_from_parts_rejects_out_of_range_edges() {
        assert!(MolecularGraph::from_parts(2, vec![0.0; 4], vec![0, 1], vec![1, 0], GraphOrigin::Parsed).is_some());
        assert!(MolecularGraph::from_parts(2, vec![0.0; 4], vec![0, 2], vec![1, 0], GraphOrigin::Parsed).is_none());
        assert!(MolecularGraph::from_parts(2, vec![0.0; 3], vec![0], vec![0], GraphOrigin::Parsed).is_none());
    }
}
