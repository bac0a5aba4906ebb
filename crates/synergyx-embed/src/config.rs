//! Configuration for the text channel.

use serde::{Deserialize, Serialize};

use crate::PoolingStrategy;

/// Which provider feeds the fusion block's text slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// No text channel; the fusion input has no text component.
    #[default]
    None,
    /// Zero vectors of `null_width`.
    Null,
    /// A BERT-family encoder from the Hugging Face Hub.
    Pretrained,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: ProviderKind,

    /// Hugging Face model ID
    #[serde(default = "default_model_id")]
    pub model_id: String,

    #[serde(default = "default_revision")]
    pub revision: String,

    /// Token budget for one "A [SEP] B" pair.
    #[serde(default = "default_max_length")]
    pub max_length: usize,

    #[serde(default)]
    pub pooling: PoolingStrategy,

    #[serde(default)]
    pub normalize: bool,

    /// Leading layer groups (embeddings first) excluded from optimisation.
    #[serde(default = "default_freeze_layers")]
    pub freeze_layers: usize,

    /// Declared width of the null provider.
    #[serde(default = "default_null_width")]
    pub null_width: usize,

    #[serde(default = "default_true")]
    pub use_gpu: bool,

    /// Cache directory for downloaded models
    #[serde(default)]
    pub cache_dir: Option<String>,
}

fn default_model_id() -> String { "NeuML/pubmedbert-base-embeddings".to_string() }
fn default_revision() -> String { "main".to_string() }
fn default_max_length() -> usize { 128 }
fn default_freeze_layers() -> usize { 8 }
fn default_null_width() -> usize { 768 }
fn default_true() -> bool { true }

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::None,
            model_id: default_model_id(),
            revision: default_revision(),
            max_length: default_max_length(),
            pooling: PoolingStrategy::Mean,
            normalize: false,
            freeze_layers: default_freeze_layers(),
            null_width: default_null_width(),
            use_gpu: true,
            cache_dir: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn null(width: usize) -> Self {
        Self {
            provider: ProviderKind::Null,
            null_width: width,
            ..Default::default()
        }
    }

    pub fn pretrained(model_id: impl Into<String>) -> Self {
        Self {
            provider: ProviderKind::Pretrained,
            model_id: model_id.into(),
            ..Default::default()
        }
    }

    pub fn with_freeze_layers(mut self, layers: usize) -> Self {
        self.freeze_layers = layers;
        self
    }

    pub fn with_max_length(mut self, length: usize) -> Self {
        self.max_length = length;
        self
    }

    pub fn with_pooling(mut self, pooling: PoolingStrategy) -> Self {
        self.pooling = pooling;
        self
    }

    pub fn cpu(mut self) -> Self {
        self.use_gpu = false;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.provider != ProviderKind::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_by_default() {
        let config = EmbeddingConfig::default();
        assert!(!config.is_enabled());
        assert_eq!(config.freeze_layers, 8);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: EmbeddingConfig =
            serde_json::from_str(r#"{"provider":"pretrained","pooling":"cls","freeze_layers":4}"#).unwrap();
        assert_eq!(config.provider, ProviderKind::Pretrained);
        assert_eq!(config.pooling, PoolingStrategy::Cls);
        assert_eq!(config.freeze_layers, 4);
        assert_eq!(config.max_length, 128);
    }
}
