//! synergyx text channel
//!
//! An optional per-pair embedding fused alongside the graph and tabular
//! features. Two providers exist and are chosen in configuration:
//!
//! - [`NullProvider`]: zero vectors of a declared width
//! - [`PretrainedProvider`]: a BERT-family encoder pulled from the Hugging
//!   Face Hub and run with Candle, with its first layers frozen
//!
//! # Example
//! ```rust
//! use candle_core::{DType, Device, Tensor};
//! use synergyx_embed::{build_provider, EmbeddingConfig};
//!
//! let provider = build_provider(&EmbeddingConfig::null(64), &Device::Cpu)?.expect("enabled");
//! let cell = Tensor::zeros((1, 10), DType::F32, &Device::Cpu)?;
//! let out = provider.embed(&["CCO".into()], &["c1ccccc1".into()], &cell)?;
//! assert_eq!(out.dims(), &[1, 64]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod adapter;
pub mod config;
pub mod error;
pub mod pooling;
pub mod pretrained;
pub mod provider;

pub use adapter::{split_trainable, BertEncoder, LayerGroup, SequenceEncoder, TrainableSplit};
pub use config::{EmbeddingConfig, ProviderKind};
pub use error::{EmbedError, Result};
pub use pooling::PoolingStrategy;
pub use pretrained::{ModelFiles, PretrainedProvider, TokenizerSource};
pub use provider::{build_provider, EmbeddingProvider, NullProvider};
