//! Stochastic structural perturbation of training graphs.

use rand::seq::index;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::MolecularGraph;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("augment.{field} must be within [0, 1], got {value}")]
pub struct InvalidAugmentConfig {
    pub field: &'static str,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentConfig {
    /// Probability of dropping edges from a graph (default: 0.5)
    pub edge_drop_prob: f64,

    /// Fraction of directed edges kept when dropping (default: 0.9)
    pub edge_keep_ratio: f64,

    /// Edges are only dropped from graphs with more directed edges than
    /// this (default: 2)
    pub min_edges: usize,

    /// Probability of masking node features (default: 0.5)
    pub feature_mask_prob: f64,

    /// Per-entry probability of zeroing a feature when masking (default: 0.1)
    pub feature_mask_ratio: f64,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            edge_drop_prob: 0.5,
            edge_keep_ratio: 0.9,
            min_edges: 2,
            feature_mask_prob: 0.5,
            feature_mask_ratio: 0.1,
        }
    }
}

impl AugmentConfig {
    /// Every probability and ratio must lie in [0, 1]; NaN is rejected.
    pub fn validate(&self) -> Result<(), InvalidAugmentConfig> {
        let fields = [
            ("edge_drop_prob", self.edge_drop_prob),
            ("edge_keep_ratio", self.edge_keep_ratio),
            ("feature_mask_prob", self.feature_mask_prob),
            ("feature_mask_ratio", self.feature_mask_ratio),
        ];
        match fields.into_iter().find(|(_, value)| !(0.0..=1.0).contains(value)) {
            Some((field, value)) => Err(InvalidAugmentConfig { field, value }),
            None => Ok(()),
        }
    }
}

/// NaN counts as never.
fn probability(p: f64) -> f64 {
    if p.is_nan() {
        0.0
    } else {
        p.clamp(0.0, 1.0)
    }
}

/// Returns a perturbed copy of `graph`. Node count and width never change,
/// so the result satisfies the same invariants as the input.
pub fn augment_graph<R: Rng + ?Sized>(graph: &MolecularGraph, config: &AugmentConfig, rng: &mut R) -> MolecularGraph {
    let mut out = graph.clone();

    let num_edges = graph.num_edges();
    if rng.gen_bool(probability(config.edge_drop_prob)) && num_edges > config.min_edges {
        let keep = ((num_edges as f64) * probability(config.edge_keep_ratio)) as usize;
        let keep = keep.clamp(1, num_edges);
        let picked = index::sample(rng, num_edges, keep);
        let sources = picked.iter().map(|i| graph.sources()[i]).collect();
        let targets = picked.iter().map(|i| graph.targets()[i]).collect();
        out = out.with_edges(sources, targets);
    }

    if rng.gen_bool(probability(config.feature_mask_prob)) {
        let ratio = probability(config.feature_mask_ratio);
        let masked = out
            .node_features()
            .iter()
            .map(|&x| if rng.gen_bool(ratio) { 0.0 } else { x })
            .collect();
        out = out.with_features(masked);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::GraphBuilder;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn always() -> AugmentConfig {
        AugmentConfig {
            edge_drop_prob: 1.0,
            feature_mask_prob: 1.0,
            ..AugmentConfig::default()
        }
    }

    #[test]
    fn test_edge_drop_keeps_ninety_percent() {
        let builder = GraphBuilder::default();
        // 10 bonds -> 20 directed edges
        let graph = builder.build("CCCCCCCCCCC");
        let mut rng = StdRng::seed_from_u64(7);
        let out = augment_graph(&graph, &always(), &mut rng);
        assert_eq!(out.num_edges(), 18);
        assert_eq!(out.num_nodes(), graph.num_nodes());
        assert!(out.is_valid());
    }

    #[test]
    fn test_small_graphs_keep_all_edges() {
        let builder = GraphBuilder::default();
        let graph = builder.build("CC");
        let mut rng = StdRng::seed_from_u64(7);
        let out = augment_graph(&graph, &always(), &mut rng);
        assert_eq!(out.num_edges(), 2);
    }

    #[test]
    fn test_disabled_augmentation_is_identity() {
        let builder = GraphBuilder::default();
        let graph = builder.build("c1ccccc1O");
        let config = AugmentConfig {
            edge_drop_prob: 0.0,
            feature_mask_prob: 0.0,
            ..AugmentConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(augment_graph(&graph, &config, &mut rng), *graph);
    }

    #[test]
    fn test_same_seed_same_perturbation() {
        let builder = GraphBuilder::default();
        let graph = builder.build("CC(=O)Nc1ccc(O)cc1");
        let a = augment_graph(&graph, &always(), &mut StdRng::seed_from_u64(42));
        let b = augment_graph(&graph, &always(), &mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
    }

    #[test]
    fn test_mask_only_zeroes_entries() {
        let builder = GraphBuilder::default();
        let graph = builder.build("CCCCCCCC");
        let config = AugmentConfig { edge_drop_prob: 0.0, feature_mask_prob: 1.0, feature_mask_ratio: 1.0, ..AugmentConfig::default() };
        let out = augment_graph(&graph, &config, &mut StdRng::seed_from_u64(3));
        assert!(out.node_features().iter().all(|&x| x == 0.0));
        assert_eq!(out.sources(), graph.sources());
    }

    #[test]
    fn test_validate_rejects_out_of_range_probabilities() {
        assert!(AugmentConfig::default().validate().is_ok());

        let nan = AugmentConfig { edge_drop_prob: f64::NAN, ..AugmentConfig::default() };
        assert_eq!(nan.validate().unwrap_err().field, "edge_drop_prob");

        let high = AugmentConfig { feature_mask_ratio: 1.5, ..AugmentConfig::default() };
        let err = high.validate().unwrap_err();
        assert_eq!(err.field, "feature_mask_ratio");
        assert!(err.to_string().contains("1.5"));
    }

    #[test]
    fn test_nan_probabilities_never_perturb() {
        let builder = GraphBuilder::default();
        let graph = builder.build("CCCCCCCCCCC");
        let config = AugmentConfig {
            edge_drop_prob: f64::NAN,
            feature_mask_prob: f64::NAN,
            ..AugmentConfig::default()
        };
        let out = augment_graph(&graph, &config, &mut StdRng::seed_from_u64(5));
        assert_eq!(out, *graph);
    }
}
