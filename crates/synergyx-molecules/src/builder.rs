//! Graph construction with a content-addressed cache.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use lru::LruCache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::features::DEFAULT_NODE_FEATURES;
use crate::graph::MolecularGraph;
use crate::smiles::{MoleculeParser, SmilesParser};

/// Configuration for [`GraphBuilder`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphBuilderConfig {
    /// Per-atom feature width W (default: 64)
    pub node_features: usize,

    /// Maximum cached graphs; `None` keeps every graph for the process
    /// lifetime (default: None)
    pub cache_capacity: Option<usize>,
}

impl Default for GraphBuilderConfig {
    fn default() -> Self {
        Self {
            node_features: DEFAULT_NODE_FEATURES,
            cache_capacity: None,
        }
    }
}

impl GraphBuilderConfig {
    pub fn with_node_features(mut self, width: usize) -> Self {
        self.node_features = width.max(1);
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = Some(capacity);
        self
    }

    pub fn cache_policy(&self) -> CachePolicy {
        match self.cache_capacity.and_then(NonZeroUsize::new) {
            Some(capacity) => CachePolicy::Bounded(capacity),
            None => CachePolicy::Unbounded,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    Unbounded,
    /// Least-recently-used eviction past the capacity.
    Bounded(NonZeroUsize),
}

/// Graphs keyed by the SHA-256 of their structure string.
pub struct GraphCache {
    entries: Mutex<LruCache<String, Arc<MolecularGraph>>>,
    policy: CachePolicy,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl GraphCache {
    pub fn new(policy: CachePolicy) -> Self {
        let entries = match policy {
            CachePolicy::Unbounded => LruCache::unbounded(),
            CachePolicy::Bounded(capacity) => LruCache::new(capacity),
        };
        Self {
            entries: Mutex::new(entries),
            policy,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn key(structure: &str) -> String {
        format!("{:x}", Sha256::digest(structure.as_bytes()))
    }

    pub fn get(&self, key: &str) -> Option<Arc<MolecularGraph>> {
        let found = self.lock().get(key).cloned();
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    /// Stores `graph` unless another caller got there first, in which case
    /// the earlier graph wins so every caller sees the same instance.
    pub fn insert(&self, key: String, graph: Arc<MolecularGraph>) -> Arc<MolecularGraph> {
        let mut entries = self.lock();
        if let Some(existing) = entries.get(&key) {
            return Arc::clone(existing);
        }
        entries.put(key, Arc::clone(&graph));
        graph
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<String, Arc<MolecularGraph>>> {
        // A panic while holding the lock cannot leave a half-written entry.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BuilderStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub parses: u64,
    pub fallbacks: u64,
}

/// Converts structure strings into [`MolecularGraph`]s. Never fails:
/// unparseable input yields a synthetic graph of the configured width.
pub struct GraphBuilder {
    config: GraphBuilderConfig,
    parser: Box<dyn MoleculeParser>,
    cache: GraphCache,
    parses: AtomicU64,
    fallbacks: AtomicU64,
}

impl GraphBuilder {
    pub fn new(config: GraphBuilderConfig) -> Self {
        Self::with_parser(config, Box::new(SmilesParser))
    }

    pub fn with_parser(config: GraphBuilderConfig, parser: Box<dyn MoleculeParser>) -> Self {
        let cache = GraphCache::new(config.cache_policy());
        Self {
            config,
            parser,
            cache,
            parses: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
        }
    }

    pub fn build(&self, structure: &str) -> Arc<MolecularGraph> {
        let key = GraphCache::key(structure);
        if let Some(graph) = self.cache.get(&key) {
            return graph;
        }

        self.parses.fetch_add(1, Ordering::Relaxed);
        let width = self.config.node_features;
        let graph = match self.parser.parse(structure) {
            Ok(mol) => {
                debug!("Parsed structure with {} atoms, {} bonds", mol.num_atoms(), mol.num_bonds());
                MolecularGraph::from_molecule(&mol, width)
            }
            Err(e) => {
                self.fallbacks.fetch_add(1, Ordering::Relaxed);
                warn!("Could not parse structure {:?}: {}; using synthetic graph", structure, e);
                MolecularGraph::fallback(structure, width)
            }
        };
        self.cache.insert(key, Arc::new(graph))
    }

    /// Whether the structure parses, without touching the cache.
    pub fn is_valid_structure(&self, structure: &str) -> bool {
        self.parser.parse(structure).is_ok()
    }

    pub fn node_features(&self) -> usize {
        self.config.node_features
    }

    pub fn cache(&self) -> &GraphCache {
        &self.cache
    }

    pub fn stats(&self) -> BuilderStats {
        BuilderStats {
            cache_hits: self.cache.hits.load(Ordering::Relaxed),
            cache_misses: self.cache.misses.load(Ordering::Relaxed),
            parses: self.parses.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
        }
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new(GraphBuilderConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphOrigin;

    #[test]
    fn test_shape_invariants_hold_for_any_input() {
        let builder = GraphBuilder::default();
        for input in ["", "C", "CCO", "c1ccccc1", "((((", "[Xx]", "C1CC", "🙂", "[Na+].[Cl-]"] {
            let graph = builder.build(input);
            assert_eq!(graph.width(), 64, "width for {:?}", input);
            assert_eq!(graph.sources().len(), graph.targets().len());
            assert!(graph.is_valid(), "invalid graph for {:?}", input);
        }
    }

    #[test]
    fn test_second_build_hits_cache() {
        let builder = GraphBuilder::default();
        let first = builder.build("CC(=O)O");
        let second = builder.build("CC(=O)O");
        assert!(Arc::ptr_eq(&first, &second));
        let stats = builder.stats();
        assert_eq!(stats.parses, 1);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
    }

    #[test]
    fn test_fallback_graphs_are_cached_too() {
        let builder = GraphBuilder::default();
        let a = builder.build("not smiles");
        let b = builder.build("not smiles");
        assert_eq!(a.origin(), GraphOrigin::Synthetic);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(builder.stats().fallbacks, 1);
    }

    #[test]
    fn test_bounded_cache_evicts() {
        let builder = GraphBuilder::new(GraphBuilderConfig::default().with_cache_capacity(2));
        builder.build("C");
        builder.build("CC");
        builder.build("CCC");
        assert_eq!(builder.cache().len(), 2);
        builder.build("C");
        assert_eq!(builder.stats().parses, 4);
    }

    #[test]
    fn test_custom_width() {
        let builder = GraphBuilder::new(GraphBuilderConfig::default().with_node_features(16));
        assert_eq!(builder.build("CCN").width(), 16);
        assert_eq!(builder.build("???").width(), 16);
    }

    #[test]
    fn test_heavily_branched_atom_builds_a_graph() {
        let builder = GraphBuilder::default();
        for input in [format!("C{}", "(C)".repeat(256)), format!("C{}", "($C)".repeat(64))] {
            let graph = builder.build(&input);
            assert!(graph.is_valid());
            assert_eq!(graph.width(), 64);
        }
    }
}
