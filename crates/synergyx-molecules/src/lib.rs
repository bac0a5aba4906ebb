//! synergyx molecules - structure strings to molecular graphs.
//!
//! 1. Parsing SMILES into atoms and bonds ([`smiles`])
//! 2. Fixed-width per-atom featurisation ([`features`])
//! 3. Graph construction with a content-addressed cache ([`builder`])
//! 4. Stochastic structural augmentation for training ([`augment`])
//!
//! # Example
//! ```rust
//! use synergyx_molecules::{GraphBuilder, GraphBuilderConfig};
//!
//! let builder = GraphBuilder::new(GraphBuilderConfig::default());
//! let aspirin = builder.build("CC(=O)OC1=CC=CC=C1C(=O)O");
//! assert_eq!(aspirin.num_nodes(), 13);
//! assert_eq!(aspirin.width(), 64);
//! ```

pub mod augment;
pub mod builder;
pub mod element;
pub mod features;
pub mod graph;
pub mod smiles;

pub use augment::{augment_graph, AugmentConfig, InvalidAugmentConfig};
pub use builder::{BuilderStats, CachePolicy, GraphBuilder, GraphBuilderConfig, GraphCache};
pub use features::{atom_features, DEFAULT_NODE_FEATURES};
pub use graph::{GraphOrigin, MolecularGraph};
pub use smiles::{Molecule, MoleculeParser, SmilesError, SmilesParser};
