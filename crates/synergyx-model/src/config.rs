//! Model hyperparameters and the per-variant precision policy.

use candle_core::{DType, Device};
use serde::{Deserialize, Serialize};
use synergyx_common::{FeatureSchema, Result, SynergyError};
use tracing::{debug, warn};

/// The two published model variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    /// GCN encoders, no attention refiner, checkpointed on validation F1.
    #[default]
    Baseline,
    /// GATv2 encoders with the attention refiner, checkpointed on AUROC.
    Enhanced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvKind {
    Gcn,
    Gatv2,
}

/// Dtype of the dense projections. Graph aggregation and normalisation
/// always run in f32.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    #[default]
    Full,
    Bf16,
    F16,
}

impl Precision {
    pub fn compute_dtype(&self) -> DType {
        match self {
            Precision::Full => DType::F32,
            Precision::Bf16 => DType::BF16,
            Precision::F16 => DType::F16,
        }
    }

    pub fn is_reduced(&self) -> bool {
        !matches!(self, Precision::Full)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    #[serde(default = "default_conv")]
    pub conv: ConvKind,
    /// Per-atom feature width.
    #[serde(default = "default_in_dim")]
    pub in_dim: usize,
    #[serde(default = "default_hidden_dim")]
    pub hidden_dim: usize,
    /// Graph embedding width.
    #[serde(default = "default_out_dim")]
    pub out_dim: usize,
    #[serde(default = "default_num_layers")]
    pub num_layers: usize,
    /// Attention heads of every GATv2 layer but the last.
    #[serde(default = "default_heads")]
    pub heads: usize,
    #[serde(default = "default_encoder_dropout")]
    pub dropout: f64,
    /// Linear input-to-output shortcut added after the last layer.
    #[serde(default = "default_true")]
    pub residual: bool,
}

fn default_conv() -> ConvKind { ConvKind::Gcn }
fn default_in_dim() -> usize { 64 }
fn default_hidden_dim() -> usize { 128 }
fn default_out_dim() -> usize { 256 }
fn default_num_layers() -> usize { 3 }
fn default_heads() -> usize { 4 }
fn default_encoder_dropout() -> f64 { 0.2 }
fn default_true() -> bool { true }

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            conv: default_conv(),
            in_dim: default_in_dim(),
            hidden_dim: default_hidden_dim(),
            out_dim: default_out_dim(),
            num_layers: default_num_layers(),
            heads: default_heads(),
            dropout: default_encoder_dropout(),
            residual: true,
        }
    }
}

/// Full model description. Deserialising starts from the preset of the
/// named `variant` and overrides only the fields present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "ModelConfigFile")]
pub struct ModelConfig {
    pub variant: Variant,
    pub encoder: EncoderConfig,
    /// Widths of the fusion feed-forward blocks before the latent projection.
    pub fusion_dims: Vec<usize>,
    /// Dropout after each fusion block, paired with `fusion_dims`.
    pub fusion_dropout: Vec<f64>,
    pub latent_dim: usize,
    /// Declared fusion input width. Checked against the feature schema at
    /// construction when present.
    pub fusion_input_width: Option<usize>,
    pub use_attention: bool,
    pub attention_heads: usize,
    pub attention_dropout: f64,
    pub classifier_hidden: usize,
    pub classifier_dropout: f64,
    /// Hidden width of the text projection.
    pub text_hidden: usize,
    pub text_dropout: f64,
    pub precision: Precision,
    pub layer_norm_eps: f64,
}

#[derive(Debug, Default, Deserialize)]
struct EncoderOverrides {
    conv: Option<ConvKind>,
    in_dim: Option<usize>,
    hidden_dim: Option<usize>,
    out_dim: Option<usize>,
    num_layers: Option<usize>,
    heads: Option<usize>,
    dropout: Option<f64>,
    residual: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct ModelConfigFile {
    #[serde(default)]
    variant: Variant,
    #[serde(default)]
    encoder: EncoderOverrides,
    fusion_dims: Option<Vec<usize>>,
    fusion_dropout: Option<Vec<f64>>,
    latent_dim: Option<usize>,
    fusion_input_width: Option<usize>,
    use_attention: Option<bool>,
    attention_heads: Option<usize>,
    attention_dropout: Option<f64>,
    classifier_hidden: Option<usize>,
    classifier_dropout: Option<f64>,
    text_hidden: Option<usize>,
    text_dropout: Option<f64>,
    precision: Option<Precision>,
    layer_norm_eps: Option<f64>,
}

impl From<ModelConfigFile> for ModelConfig {
    fn from(file: ModelConfigFile) -> Self {
        let mut config = ModelConfig::for_variant(file.variant);
        let e = file.encoder;
        let encoder = &mut config.encoder;
        encoder.conv = e.conv.unwrap_or(encoder.conv);
        encoder.in_dim = e.in_dim.unwrap_or(encoder.in_dim);
        encoder.hidden_dim = e.hidden_dim.unwrap_or(encoder.hidden_dim);
        encoder.out_dim = e.out_dim.unwrap_or(encoder.out_dim);
        encoder.num_layers = e.num_layers.unwrap_or(encoder.num_layers);
        encoder.heads = e.heads.unwrap_or(encoder.heads);
        encoder.dropout = e.dropout.unwrap_or(encoder.dropout);
        encoder.residual = e.residual.unwrap_or(encoder.residual);

        if let Some(dims) = file.fusion_dims {
            config.fusion_dims = dims;
        }
        if let Some(rates) = file.fusion_dropout {
            config.fusion_dropout = rates;
        }
        config.latent_dim = file.latent_dim.unwrap_or(config.latent_dim);
        config.fusion_input_width = file.fusion_input_width;
        config.use_attention = file.use_attention.unwrap_or(config.use_attention);
        config.attention_heads = file.attention_heads.unwrap_or(config.attention_heads);
        config.attention_dropout = file.attention_dropout.unwrap_or(config.attention_dropout);
        config.classifier_hidden = file.classifier_hidden.unwrap_or(config.classifier_hidden);
        config.classifier_dropout = file.classifier_dropout.unwrap_or(config.classifier_dropout);
        config.text_hidden = file.text_hidden.unwrap_or(config.text_hidden);
        config.text_dropout = file.text_dropout.unwrap_or(config.text_dropout);
        config.precision = file.precision.unwrap_or(config.precision);
        config.layer_norm_eps = file.layer_norm_eps.unwrap_or(config.layer_norm_eps);
        config
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::baseline()
    }
}

impl ModelConfig {
    /// GCN encoders, no refiner, bf16 projections when an accelerator is used.
    pub fn baseline() -> Self {
        Self {
            variant: Variant::Baseline,
            encoder: EncoderConfig::default(),
            fusion_dims: vec![1024, 512],
            fusion_dropout: vec![0.4, 0.3],
            latent_dim: 256,
            fusion_input_width: None,
            use_attention: false,
            attention_heads: 8,
            attention_dropout: 0.2,
            classifier_hidden: 128,
            classifier_dropout: 0.3,
            text_hidden: 1024,
            text_dropout: 0.3,
            precision: Precision::Bf16,
            layer_norm_eps: 1e-5,
        }
    }

    /// GATv2 encoders plus the attention refiner, full precision.
    pub fn enhanced() -> Self {
        Self {
            variant: Variant::Enhanced,
            encoder: EncoderConfig {
                conv: ConvKind::Gatv2,
                residual: false,
                ..EncoderConfig::default()
            },
            use_attention: true,
            precision: Precision::Full,
            ..Self::baseline()
        }
    }

    pub fn for_variant(variant: Variant) -> Self {
        match variant {
            Variant::Baseline => Self::baseline(),
            Variant::Enhanced => Self::enhanced(),
        }
    }

    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    pub fn with_encoder(mut self, encoder: EncoderConfig) -> Self {
        self.encoder = encoder;
        self
    }

    /// Small widths for tests and smoke runs.
    pub fn with_widths(mut self, hidden: usize, latent: usize) -> Self {
        self.encoder.hidden_dim = hidden;
        self.encoder.out_dim = latent;
        self.fusion_dims = vec![latent * 2, latent];
        self.latent_dim = latent;
        self.classifier_hidden = latent / 2;
        self.text_hidden = latent * 2;
        self
    }

    /// Rejects structurally impossible configurations.
    pub fn validate(&self) -> Result<()> {
        let e = &self.encoder;
        if e.num_layers == 0 || e.in_dim == 0 || e.hidden_dim == 0 || e.out_dim == 0 {
            return Err(SynergyError::config("graph encoder widths and depth must be positive"));
        }
        if e.conv == ConvKind::Gatv2 && e.heads == 0 {
            return Err(SynergyError::config("GATv2 encoder needs at least one head"));
        }
        if self.fusion_dims.len() != self.fusion_dropout.len() {
            return Err(SynergyError::config(format!(
                "{} fusion blocks but {} dropout rates",
                self.fusion_dims.len(),
                self.fusion_dropout.len()
            )));
        }
        if self.latent_dim == 0 || self.classifier_hidden == 0 {
            return Err(SynergyError::config("latent and classifier widths must be positive"));
        }
        if self.use_attention && (self.attention_heads == 0 || self.latent_dim % self.attention_heads != 0) {
            return Err(SynergyError::config(format!(
                "latent width {} is not divisible into {} attention heads",
                self.latent_dim, self.attention_heads
            )));
        }
        let rates = self
            .fusion_dropout
            .iter()
            .chain([&e.dropout, &self.attention_dropout, &self.classifier_dropout, &self.text_dropout]);
        for &p in rates {
            if !(0.0..1.0).contains(&p) {
                return Err(SynergyError::config(format!("dropout rate {} outside [0, 1)", p)));
            }
        }
        Ok(())
    }

    /// Checks the encoder and fusion widths against the loaded tables.
    pub fn validate_schema(&self, schema: &FeatureSchema) -> Result<()> {
        schema.validate_node_features(self.encoder.in_dim)?;
        if schema.graph_embedding != self.encoder.out_dim {
            return Err(SynergyError::config(format!(
                "schema graph embedding width {} does not match encoder output {}",
                schema.graph_embedding, self.encoder.out_dim
            )));
        }
        if let Some(text) = schema.text {
            if text != self.latent_dim {
                return Err(SynergyError::config(format!(
                    "text channel enters fusion at width {} but the projection emits {}",
                    text, self.latent_dim
                )));
            }
        }
        schema.validate_fusion_input(self.fusion_input_width)
    }

    /// Precision actually used on `device`. Attention-heavy variants and
    /// CPU runs use full precision.
    pub fn effective_precision(&self, device: &Device) -> Precision {
        if !self.precision.is_reduced() {
            return Precision::Full;
        }
        if self.encoder.conv == ConvKind::Gatv2 || self.use_attention {
            warn!(
                "Mixed precision ({:?}) is unstable with attention layers; using full precision",
                self.precision
            );
            return Precision::Full;
        }
        if device.is_cpu() {
            debug!("Reduced precision has no benefit on CPU; using full precision");
            return Precision::Full;
        }
        self.precision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> FeatureSchema {
        FeatureSchema {
            node_features: 64,
            graph_embedding: 256,
            target: 5,
            physchem: 3,
            expression: 6,
            text: None,
        }
    }

    #[test]
    fn test_variant_presets() {
        let baseline = ModelConfig::baseline();
        assert_eq!(baseline.encoder.conv, ConvKind::Gcn);
        assert!(!baseline.use_attention);
        let enhanced = ModelConfig::for_variant(Variant::Enhanced);
        assert_eq!(enhanced.encoder.conv, ConvKind::Gatv2);
        assert!(enhanced.use_attention);
        assert!(baseline.validate().is_ok());
        assert!(enhanced.validate().is_ok());
    }

    #[test]
    fn test_enhanced_forces_full_precision() {
        let config = ModelConfig::enhanced().with_precision(Precision::Bf16);
        assert_eq!(config.effective_precision(&Device::Cpu), Precision::Full);
    }

    #[test]
    fn test_attention_heads_must_divide_latent() {
        let mut config = ModelConfig::enhanced();
        config.attention_heads = 7;
        assert!(config.validate().unwrap_err().is_fatal());
    }

    #[test]
    fn test_schema_mismatch_is_fatal() {
        let config = ModelConfig::baseline();
        assert!(config.validate_schema(&schema()).is_ok());

        let mut declared = config.clone();
        declared.fusion_input_width = Some(100);
        assert!(declared.validate_schema(&schema()).unwrap_err().is_fatal());

        let narrow = FeatureSchema { node_features: 32, ..schema() };
        assert!(config.validate_schema(&narrow).is_err());
    }

    #[test]
    fn test_partial_config_overrides_variant_preset() {
        let config: ModelConfig =
            serde_json::from_str(r#"{"variant": "enhanced", "encoder": {"hidden_dim": 32}}"#).unwrap();
        assert_eq!(config.variant, Variant::Enhanced);
        assert_eq!(config.encoder.conv, ConvKind::Gatv2);
        assert_eq!(config.encoder.hidden_dim, 32);
        assert_eq!(config.encoder.out_dim, 256);
        assert!(config.use_attention);
        assert_eq!(config.fusion_dims, vec![1024, 512]);

        let baseline: ModelConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(baseline.variant, Variant::Baseline);
        assert_eq!(baseline.precision, Precision::Bf16);
    }
}
