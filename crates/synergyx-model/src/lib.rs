//! synergyx model
//!
//! Pure-Rust Candle implementation of the drug-pair synergy classifier:
//!
//! ```text
//! graph A -> GraphEncoder ─┐
//! graph B -> GraphEncoder ─┤
//! target/physchem/cell ────┼─> FusionBlock -> [CrossModalAttention] -> ClassifierHead -> logits
//! text -> TextProjection ──┘
//! ```
//!
//! The baseline variant uses GCN encoders and no refiner; the enhanced
//! variant uses GATv2 encoders with the attention refiner and always runs
//! in full precision.

pub mod attention;
pub mod classifier;
pub mod config;
pub mod device;
pub mod encoder;
pub mod fusion;
pub mod graph;
pub mod layers;
pub mod loss;
pub mod model;

pub use attention::CrossModalAttention;
pub use classifier::{predicted_classes, synergy_probability, ClassifierHead, ANTAGONISM, NUM_CLASSES, SYNERGY};
pub use config::{ConvKind, EncoderConfig, ModelConfig, Precision, Variant};
pub use device::select_device;
pub use encoder::{GatConv, GcnConv, GraphEncoder};
pub use fusion::{FusionBlock, FusionInputs, TextProjection};
pub use graph::{global_mean_pool, EdgeView};
pub use layers::{Dense, FeedForwardBlock};
pub use loss::{cross_entropy_per_example, weighted_cross_entropy, FocalLoss, LossConfig, LossKind, Objective, Reduction};
pub use model::SynergyModel;
