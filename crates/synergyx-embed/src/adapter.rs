//! Uniform view over wrapped sequence encoders.
//!
//! Freezing needs two facts about an encoder: its hidden width and its
//! parameters grouped by layer in forward order. Each supported model family
//! answers both through [`SequenceEncoder`].

use candle_core::{Tensor, Var};
use candle_nn::{VarBuilder, VarMap};
use candle_transformers::models::bert::{BertModel, Config, HiddenAct, PositionEmbeddingType};
use tracing::debug;

use crate::{EmbedError, Result};

/// Parameters whose names start with `prefix`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerGroup {
    pub name: String,
    pub prefix: String,
}

impl LayerGroup {
    pub fn new(name: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
        }
    }

    pub fn contains(&self, parameter: &str) -> bool {
        parameter
            .strip_prefix(self.prefix.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
    }
}

pub trait SequenceEncoder: Send + Sync {
    fn hidden_size(&self) -> usize;

    /// Layer groups, input side first.
    fn layer_groups(&self) -> Vec<LayerGroup>;

    /// `(batch, seq)` ids and mask to `(batch, seq, hidden)` states.
    fn encode(&self, input_ids: &Tensor, token_type_ids: &Tensor, attention_mask: &Tensor) -> Result<Tensor>;
}

pub struct BertEncoder {
    model: BertModel,
    config: Config,
}

impl BertEncoder {
    pub fn load(vb: VarBuilder, config: Config) -> Result<Self> {
        let model = BertModel::load(vb, &config).map_err(|e| EmbedError::ModelLoad(e.to_string()))?;
        Ok(Self { model, config })
    }

    /// Reads a Hugging Face `config.json`; absent fields take BERT-base values.
    pub fn parse_config(json: &serde_json::Value) -> Config {
        let uint = |key: &str, default: usize| json.get(key).and_then(|v| v.as_u64()).map_or(default, |v| v as usize);
        let float = |key: &str, default: f64| json.get(key).and_then(|v| v.as_f64()).unwrap_or(default);
        let hidden_act = match json.get("hidden_act").and_then(|v| v.as_str()) {
            Some("relu") => HiddenAct::Relu,
            Some("gelu_new") | Some("gelu_approximate") => HiddenAct::GeluApproximate,
            _ => HiddenAct::Gelu,
        };
        Config {
            vocab_size: uint("vocab_size", 30522),
            hidden_size: uint("hidden_size", 768),
            num_hidden_layers: uint("num_hidden_layers", 12),
            num_attention_heads: uint("num_attention_heads", 12),
            intermediate_size: uint("intermediate_size", 3072),
            hidden_act,
            hidden_dropout_prob: float("hidden_dropout_prob", 0.1),
            max_position_embeddings: uint("max_position_embeddings", 512),
            type_vocab_size: uint("type_vocab_size", 2),
            initializer_range: float("initializer_range", 0.02),
            layer_norm_eps: float("layer_norm_eps", 1e-12),
            pad_token_id: uint("pad_token_id", 0),
            position_embedding_type: PositionEmbeddingType::Absolute,
            use_cache: true,
            classifier_dropout: None,
            model_type: None,
        }
    }
}

impl SequenceEncoder for BertEncoder {
    fn hidden_size(&self) -> usize {
        self.config.hidden_size
    }

    fn layer_groups(&self) -> Vec<LayerGroup> {
        let mut groups = vec![LayerGroup::new("embeddings", "embeddings")];
        groups.extend(
            (0..self.config.num_hidden_layers)
                .map(|i| LayerGroup::new(format!("layer {}", i), format!("encoder.layer.{}", i))),
        );
        groups
    }

    fn encode(&self, input_ids: &Tensor, token_type_ids: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
        Ok(self.model.forward(input_ids, token_type_ids, Some(attention_mask))?)
    }
}

/// Parameter partition after freezing the first `n` layer groups.
#[derive(Debug, Default)]
pub struct TrainableSplit {
    pub frozen: Vec<String>,
    pub trainable: Vec<(String, Var)>,
}

/// Partitions `varmap` by the encoder's layer groups. Parameters outside
/// every group stay trainable.
pub fn split_trainable(encoder: &dyn SequenceEncoder, varmap: &VarMap, freeze: usize) -> TrainableSplit {
    let groups = encoder.layer_groups();
    let frozen_groups = &groups[..freeze.min(groups.len())];
    let data = varmap.data().lock().unwrap_or_else(|p| p.into_inner());

    let mut split = TrainableSplit::default();
    let mut names: Vec<&String> = data.keys().collect();
    names.sort();
    for name in names {
        if frozen_groups.iter().any(|g| g.contains(name)) {
            split.frozen.push(name.clone());
        } else if let Some(var) = data.get(name) {
            split.trainable.push((name.clone(), var.clone()));
        }
    }
    debug!(
        "Froze {} of {} layer groups: {} frozen, {} trainable parameters",
        frozen_groups.len(),
        groups.len(),
        split.frozen.len(),
        split.trainable.len()
    );
    split
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_prefix_respects_dot_boundary() {
        let group = LayerGroup::new("layer 1", "encoder.layer.1");
        assert!(group.contains("encoder.layer.1.attention.self.query.weight"));
        assert!(!group.contains("encoder.layer.10.attention.self.query.weight"));
        assert!(!group.contains("embeddings.word_embeddings.weight"));
    }

    #[test]
    fn test_parse_config_defaults() {
        let json = serde_json::json!({"hidden_size": 8, "num_hidden_layers": 2, "hidden_act": "relu"});
        let config = BertEncoder::parse_config(&json);
        assert_eq!(config.hidden_size, 8);
        assert_eq!(config.num_hidden_layers, 2);
        assert_eq!(config.vocab_size, 30522);
        assert!(matches!(config.hidden_act, HiddenAct::Relu));
    }
}
