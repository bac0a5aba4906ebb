//! synergyx features - everything between the flat input tables and a
//! model-ready [`Batch`].
//!
//! ```text
//! FeatureStore + GraphBuilder -> SampleAssembler -> collate -> Batch
//! ```
//!
//! * [`table`] / [`store`]: per-family lookup tables with fixed widths
//! * [`dataset`]: the drug-pair label table, class weights and splits
//! * [`sample`]: per-record assembly with augmentation and a default fallback
//! * [`collate`]: disjoint-union batching of graphs plus stacked vectors
//! * [`loader`]: seeded epoch ordering with optional parallel prefetch

pub mod collate;
pub mod dataset;
pub mod loader;
pub mod sample;
pub mod store;
pub mod table;

pub use collate::{collate, safe_collate, Batch, BatchedGraph};
pub use dataset::{map_label, split_indices, DatasetSplit, LabelColumns, LabelTable, PairRecord, SynergyDataset};
pub use loader::{BatchLoader, EpochBatches, LoaderConfig};
pub use sample::{GraphTensors, Sample, SampleAssembler};
pub use store::{FeatureStore, FeatureStoreConfig, StructureTable};
pub use table::{FeatureTable, TableSpec};
