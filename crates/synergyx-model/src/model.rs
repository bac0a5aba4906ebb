//! The full synergy classifier.

use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;
use synergyx_common::{FeatureSchema, Result, SynergyError};
use synergyx_features::Batch;
use tracing::info;

use crate::attention::CrossModalAttention;
use crate::classifier::ClassifierHead;
use crate::config::{ModelConfig, Precision};
use crate::encoder::GraphEncoder;
use crate::fusion::{FusionBlock, FusionInputs, TextProjection};

/// Two graph encoders, the fusion block, the optional refiner and the head.
///
/// Every parameter lives in the `VarBuilder` passed to [`SynergyModel::new`]
/// under the prefixes `drug_a`, `drug_b`, `text`, `fusion`, `attention` and
/// `classifier`.
pub struct SynergyModel {
    config: ModelConfig,
    schema: FeatureSchema,
    precision: Precision,
    encoder_a: GraphEncoder,
    encoder_b: GraphEncoder,
    text: Option<TextProjection>,
    fusion: FusionBlock,
    attention: Option<CrossModalAttention>,
    classifier: ClassifierHead,
}

impl SynergyModel {
    /// Validates `config` against `schema` and allocates every parameter.
    ///
    /// `text_input` is the raw width of the text channel; when present,
    /// `schema.text` must be the latent width it is projected to.
    pub fn new(
        config: &ModelConfig,
        schema: &FeatureSchema,
        text_input: Option<usize>,
        device: &Device,
        vb: VarBuilder,
    ) -> Result<Self> {
        config.validate()?;
        config.validate_schema(schema)?;
        if text_input.is_some() != schema.text.is_some() {
            return Err(SynergyError::config(
                "text channel must be declared in both the provider and the feature schema",
            ));
        }
        if text_input == Some(0) {
            return Err(SynergyError::config("text channel width must be positive"));
        }

        let precision = config.effective_precision(device);
        let compute = precision.compute_dtype();
        let eps = config.layer_norm_eps;

        let encoder_a = GraphEncoder::new(&config.encoder, eps, vb.pp("drug_a"))?;
        let encoder_b = GraphEncoder::new(&config.encoder, eps, vb.pp("drug_b"))?;
        let text = match text_input {
            Some(width) => Some(TextProjection::new(
                width,
                config.text_hidden,
                config.latent_dim,
                config.text_dropout,
                eps,
                compute,
                vb.pp("text"),
            )?),
            None => None,
        };
        let fusion = FusionBlock::new(
            schema.fusion_input_width(),
            &config.fusion_dims,
            &config.fusion_dropout,
            config.latent_dim,
            eps,
            compute,
            vb.pp("fusion"),
        )?;
        let attention = if config.use_attention {
            Some(CrossModalAttention::new(
                config.latent_dim,
                config.attention_heads,
                config.attention_dropout,
                compute,
                vb.pp("attention"),
            )?)
        } else {
            None
        };
        let classifier = ClassifierHead::new(
            config.latent_dim,
            config.classifier_hidden,
            config.classifier_dropout,
            eps,
            compute,
            vb.pp("classifier"),
        )?;

        info!(
            "Built {:?} model: {:?} encoders, fusion input {} ({}), attention {}, precision {:?}",
            config.variant,
            config.encoder.conv,
            schema.fusion_input_width(),
            schema,
            attention.is_some(),
            precision
        );

        Ok(Self {
            config: config.clone(),
            schema: *schema,
            precision,
            encoder_a,
            encoder_b,
            text,
            fusion,
            attention,
            classifier,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    pub fn uses_text(&self) -> bool {
        self.text.is_some()
    }

    /// `[N, 2]` f32 logits for a batch already on the model's device.
    /// `text` is the provider output `[N, provider_width]` when the text
    /// channel is enabled.
    pub fn forward_t(&self, batch: &Batch, text: Option<&Tensor>, train: bool) -> Result<Tensor> {
        let graph_a = self.encoder_a.forward_t(&batch.graph_a, train)?;
        let graph_b = self.encoder_b.forward_t(&batch.graph_b, train)?;

        let text = match (&self.text, text) {
            (Some(projection), Some(raw)) => Some(projection.forward_t(raw, train)?),
            (None, None) => None,
            (Some(_), None) => return Err(SynergyError::Data("model expects a text channel input".into())),
            (None, Some(_)) => return Err(SynergyError::Data("model has no text channel".into())),
        };

        let inputs = FusionInputs {
            graph_a: &graph_a,
            graph_b: &graph_b,
            target_a: &batch.target_a,
            target_b: &batch.target_b,
            physchem_a: &batch.physchem_a,
            physchem_b: &batch.physchem_b,
            cell: &batch.cell,
            text: text.as_ref(),
        };
        let mut latent = self.fusion.forward_t(&inputs, train)?;
        if let Some(attention) = &self.attention {
            latent = attention.refine(&latent, train)?;
        }
        Ok(self.classifier.forward_t(&latent, train)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConvKind;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;
    use synergyx_features::{collate, GraphTensors, Sample};
    use synergyx_molecules::{GraphBuilder, GraphBuilderConfig};

    fn sample(smiles_a: &str, smiles_b: &str, label: u32) -> Sample {
        let builder = GraphBuilder::new(GraphBuilderConfig::default());
        let graph = |s: &str| GraphTensors::from_graph(&builder.build(s), &Device::Cpu).unwrap();
        let vector = |w: usize| Tensor::ones(w, DType::F32, &Device::Cpu).unwrap();
        Sample {
            graph_a: graph(smiles_a),
            graph_b: graph(smiles_b),
            target_a: vector(5),
            target_b: vector(5),
            physchem_a: vector(3),
            physchem_b: vector(3),
            cell: vector(6),
            label,
            class_weight: 1.0,
            smiles_a: smiles_a.to_string(),
            smiles_b: smiles_b.to_string(),
        }
    }

    fn schema(text: Option<usize>) -> FeatureSchema {
        FeatureSchema {
            node_features: 64,
            graph_embedding: 16,
            target: 5,
            physchem: 3,
            expression: 6,
            text,
        }
    }

    #[test]
    fn test_baseline_forward_produces_two_logits_per_pair() {
        let batch = collate(&[sample("CCO", "c1ccccc1", 1), sample("CC(=O)O", "C", 0)]).unwrap();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let config = ModelConfig::baseline().with_widths(12, 16);
        let model = SynergyModel::new(&config, &schema(None), None, &Device::Cpu, vb).unwrap();
        assert_eq!(model.precision(), Precision::Full);

        let logits = model.forward_t(&batch, None, true).unwrap();
        assert_eq!(logits.dims(), &[2, 2]);
        assert_eq!(logits.dtype(), DType::F32);
    }

    #[test]
    fn test_enhanced_forward_with_text_channel() {
        let batch = collate(&[sample("CCO", "CCN", 1)]).unwrap();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let config = ModelConfig::enhanced().with_widths(8, 16);
        assert_eq!(config.encoder.conv, ConvKind::Gatv2);
        let model = SynergyModel::new(&config, &schema(Some(16)), Some(10), &Device::Cpu, vb).unwrap();

        let text = Tensor::zeros((1, 10), DType::F32, &Device::Cpu).unwrap();
        assert_eq!(model.forward_t(&batch, Some(&text), false).unwrap().dims(), &[1, 2]);
        assert!(model.forward_t(&batch, None, false).is_err());

        let data = varmap.data().lock().unwrap();
        assert!(data.keys().any(|k| k.starts_with("attention.q")));
        assert!(data.keys().any(|k| k.starts_with("text.hidden")));
    }

    #[test]
    fn test_encoders_do_not_share_parameters() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let config = ModelConfig::baseline().with_widths(8, 16);
        SynergyModel::new(&config, &schema(None), None, &Device::Cpu, vb).unwrap();
        let data = varmap.data().lock().unwrap();
        assert!(data.contains_key("drug_a.conv1.lin.weight"));
        assert!(data.contains_key("drug_b.conv1.lin.weight"));
    }

    #[test]
    fn test_schema_mismatch_fails_before_allocation() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let mut config = ModelConfig::baseline().with_widths(8, 16);
        config.fusion_input_width = Some(999);
        let err = SynergyModel::new(&config, &schema(None), None, &Device::Cpu, vb).err().unwrap();
        assert!(err.is_fatal());
        assert!(varmap.all_vars().is_empty());
    }
}
