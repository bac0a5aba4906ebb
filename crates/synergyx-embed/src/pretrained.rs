//! Pretrained BERT-family provider loaded with Candle.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{VarBuilder, VarMap};
use hf_hub::api::sync::ApiBuilder;
use hf_hub::{Repo, RepoType};
use tokenizers::models::wordpiece::WordPieceBuilder;
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use crate::adapter::{split_trainable, BertEncoder, SequenceEncoder};
use crate::pooling::l2_normalize;
use crate::provider::{batch_size, EmbeddingProvider};
use crate::{EmbedError, EmbeddingConfig, Result};

/// Where the tokenizer comes from.
#[derive(Debug, Clone)]
pub enum TokenizerSource {
    /// A `tokenizer.json`
    Json(PathBuf),
    /// A WordPiece `vocab.txt`, one token per line
    Vocab(PathBuf),
}

/// Local copies of everything a provider needs.
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub tokenizer: TokenizerSource,
    pub weights: PathBuf,
}

impl ModelFiles {
    /// Fetches the model from the Hugging Face Hub (or its local cache).
    pub fn download(config: &EmbeddingConfig) -> Result<Self> {
        let mut builder = ApiBuilder::new().with_progress(false);
        if let Some(dir) = &config.cache_dir {
            builder = builder.with_cache_dir(PathBuf::from(dir));
        }
        let api = builder
            .build()
            .map_err(|e| EmbedError::Download(format!("API init: {}", e)))?;
        let repo = api.repo(Repo::with_revision(
            config.model_id.clone(),
            RepoType::Model,
            config.revision.clone(),
        ));

        info!("Downloading config.json for {}", config.model_id);
        let config_path = repo
            .get("config.json")
            .map_err(|e| EmbedError::Download(format!("config.json: {}", e)))?;

        // tokenizer.json first; older BERT checkpoints only ship vocab.txt
        let tokenizer = match repo.get("tokenizer.json") {
            Ok(path) => TokenizerSource::Json(path),
            Err(_) => {
                info!("tokenizer.json not found, building from vocab.txt");
                let path = repo
                    .get("vocab.txt")
                    .map_err(|e| EmbedError::Download(format!("vocab.txt: {}", e)))?;
                TokenizerSource::Vocab(path)
            }
        };

        let weights = repo
            .get("model.safetensors")
            .or_else(|_| repo.get("pytorch_model.bin"))
            .map_err(|e| EmbedError::Download(format!("model weights: {}", e)))?;
        debug!("Weights at: {:?}", weights);

        Ok(Self {
            config: config_path,
            tokenizer,
            weights,
        })
    }
}

fn load_tokenizer(source: &TokenizerSource) -> Result<Tokenizer> {
    match source {
        TokenizerSource::Json(path) => Tokenizer::from_file(path).map_err(|e| EmbedError::Tokenizer(e.to_string())),
        TokenizerSource::Vocab(path) => {
            let content = std::fs::read_to_string(path)?;
            let wordpiece = WordPieceBuilder::new()
                .vocab(
                    content
                        .lines()
                        .enumerate()
                        .map(|(i, token)| (token.to_string(), i as u32))
                        .collect(),
                )
                .continuing_subword_prefix("##".to_string())
                .max_input_chars_per_word(100)
                .unk_token("[UNK]".to_string())
                .build()
                .map_err(|e| EmbedError::Tokenizer(format!("WordPiece build: {}", e)))?;
            Ok(Tokenizer::new(wordpiece))
        }
    }
}

/// Encoder parameter name as the Candle BERT loader expects it.
fn canonical_name(name: &str) -> Option<String> {
    let name = name.strip_prefix("bert.").unwrap_or(name);
    if !(name.starts_with("embeddings.") || name.starts_with("encoder.")) {
        return None;
    }
    let name = if let Some(stem) = name.strip_suffix("LayerNorm.gamma") {
        format!("{}LayerNorm.weight", stem)
    } else if let Some(stem) = name.strip_suffix("LayerNorm.beta") {
        format!("{}LayerNorm.bias", stem)
    } else {
        name.to_string()
    };
    Some(name)
}

fn load_weights(path: &Path, device: &Device) -> Result<HashMap<String, Tensor>> {
    let raw: Vec<(String, Tensor)> = if path.extension().is_some_and(|e| e == "safetensors") {
        candle_core::safetensors::load(path, device)?.into_iter().collect()
    } else {
        candle_core::pickle::read_all(path)?
    };
    let mut weights = HashMap::with_capacity(raw.len());
    let mut skipped = 0usize;
    for (name, tensor) in raw {
        match canonical_name(&name) {
            Some(name) => {
                weights.insert(name, tensor.to_dtype(DType::F32)?.to_device(device)?);
            }
            None => skipped += 1,
        }
    }
    debug!("Loaded {} encoder tensors, skipped {} head tensors", weights.len(), skipped);
    Ok(weights)
}

/// A pretrained encoder over the pair text `A [SEP] B`. The first
/// `freeze_layers` layer groups are held fixed; the rest train with the
/// model.
pub struct PretrainedProvider {
    name: String,
    encoder: Box<dyn SequenceEncoder>,
    tokenizer: Tokenizer,
    varmap: VarMap,
    trainable: Vec<(String, Var)>,
    config: EmbeddingConfig,
    device: Device,
}

impl PretrainedProvider {
    pub fn load(config: &EmbeddingConfig, device: &Device) -> Result<Self> {
        let files = ModelFiles::download(config)?;
        Self::from_files(&files, config, device)
    }

    pub fn from_files(files: &ModelFiles, config: &EmbeddingConfig, device: &Device) -> Result<Self> {
        let start = Instant::now();
        info!("Loading text encoder: {}", config.model_id);

        let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&files.config)?)?;
        let bert_config = BertEncoder::parse_config(&json);
        let tokenizer = load_tokenizer(&files.tokenizer)?;

        let weights = load_weights(&files.weights, device)?;
        let loaded = weights.len();
        let varmap = VarMap::new();
        {
            let mut data = varmap
                .data()
                .lock()
                .map_err(|_| EmbedError::ModelLoad("parameter store poisoned".into()))?;
            for (name, tensor) in weights {
                data.insert(name, Var::from_tensor(&tensor)?);
            }
        }

        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let encoder = BertEncoder::load(vb, bert_config)?;
        let created = varmap.all_vars().len().saturating_sub(loaded);
        if created > 0 {
            warn!("{} encoder parameters missing from checkpoint were freshly initialised", created);
        }

        let split = split_trainable(&encoder, &varmap, config.freeze_layers);
        info!(
            "Text encoder ready in {:.2}s: hidden {}, {} trainable / {} frozen tensors",
            start.elapsed().as_secs_f32(),
            encoder.hidden_size(),
            split.trainable.len(),
            split.frozen.len()
        );

        Ok(Self {
            name: config.model_id.clone(),
            encoder: Box::new(encoder),
            tokenizer,
            varmap,
            trainable: split.trainable,
            config: config.clone(),
            device: device.clone(),
        })
    }

    pub fn trainable_names(&self) -> Vec<&str> {
        self.trainable.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Token ids, type ids and mask, each `(batch, seq)`.
    fn tokenize(&self, smiles_a: &[String], smiles_b: &[String]) -> Result<(Tensor, Tensor, Tensor)> {
        let pairs: Vec<(String, String)> = smiles_a.iter().cloned().zip(smiles_b.iter().cloned()).collect();
        let encodings = self.tokenizer.encode_batch(pairs, true)?;

        let max_length = self.config.max_length.max(1);
        let mut ids = Vec::with_capacity(encodings.len());
        let mut type_ids = Vec::with_capacity(encodings.len());
        let mut mask = Vec::with_capacity(encodings.len());
        for encoding in &encodings {
            let len = encoding.get_ids().len().min(max_length);
            ids.push(encoding.get_ids()[..len].to_vec());
            type_ids.push(encoding.get_type_ids()[..len].to_vec());
            mask.push(encoding.get_attention_mask()[..len].to_vec());
        }

        let seq = ids.iter().map(Vec::len).max().unwrap_or(0).max(1);
        let pad = |rows: Vec<Vec<u32>>| -> Vec<u32> {
            rows.into_iter()
                .flat_map(|mut row| {
                    row.resize(seq, 0);
                    row
                })
                .collect()
        };
        let n = encodings.len();
        Ok((
            Tensor::from_vec(pad(ids), (n, seq), &self.device)?,
            Tensor::from_vec(pad(type_ids), (n, seq), &self.device)?,
            Tensor::from_vec(pad(mask), (n, seq), &self.device)?,
        ))
    }
}

impl EmbeddingProvider for PretrainedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn width(&self) -> usize {
        self.encoder.hidden_size()
    }

    /// The cell vector does not enter the text; only its batch size and
    /// device are used.
    fn embed(&self, smiles_a: &[String], smiles_b: &[String], cell: &Tensor) -> Result<Tensor> {
        let n = batch_size(smiles_a, smiles_b, cell)?;
        if n == 0 {
            return Ok(Tensor::zeros((0, self.width()), DType::F32, cell.device())?);
        }
        let (ids, type_ids, mask) = self.tokenize(smiles_a, smiles_b)?;
        let hidden = self.encoder.encode(&ids, &type_ids, &mask.to_dtype(DType::F32)?)?;
        let pooled = self.config.pooling.apply(&hidden, &mask)?;
        let pooled = if self.config.normalize {
            l2_normalize(&pooled)?
        } else {
            pooled
        };
        Ok(pooled.to_dtype(DType::F32)?.to_device(cell.device())?)
    }

    fn trainable_vars(&self) -> Vec<Var> {
        self.trainable.iter().map(|(_, var)| var.clone()).collect()
    }

    fn varmap(&self) -> Option<&VarMap> {
        Some(&self.varmap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::BertEncoder;

    const VOCAB: &[&str] = &[
        "[PAD]", "[UNK]", "[CLS]", "[SEP]", "C", "O", "N", "c", "1", "(", ")", "=", "##C", "##O", "##N", "##c", "##1",
        "##(", "##)", "##=",
    ];

    /// Writes a two-layer BERT with random weights and a WordPiece vocab.
    fn tiny_model(dir: &Path) -> ModelFiles {
        let json = serde_json::json!({
            "vocab_size": VOCAB.len(),
            "hidden_size": 8,
            "num_hidden_layers": 2,
            "num_attention_heads": 2,
            "intermediate_size": 16,
            "max_position_embeddings": 32,
        });
        let config_path = dir.join("config.json");
        std::fs::write(&config_path, json.to_string()).unwrap();

        let vocab_path = dir.join("vocab.txt");
        std::fs::write(&vocab_path, VOCAB.join("\n")).unwrap();

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        BertEncoder::load(vb, BertEncoder::parse_config(&json)).unwrap();
        let weights_path = dir.join("model.safetensors");
        varmap.save(&weights_path).unwrap();

        ModelFiles {
            config: config_path,
            tokenizer: TokenizerSource::Vocab(vocab_path),
            weights: weights_path,
        }
    }

    #[test]
    fn test_canonical_names() {
        assert_eq!(
            canonical_name("bert.embeddings.LayerNorm.gamma").as_deref(),
            Some("embeddings.LayerNorm.weight")
        );
        assert_eq!(
            canonical_name("encoder.layer.0.output.dense.bias").as_deref(),
            Some("encoder.layer.0.output.dense.bias")
        );
        assert_eq!(canonical_name("cls.predictions.bias"), None);
    }

    #[test]
    fn test_pretrained_provider_from_local_files() {
        let dir = tempfile::tempdir().unwrap();
        let files = tiny_model(dir.path());
        let config = EmbeddingConfig::pretrained("tiny").with_freeze_layers(2).cpu();
        let provider = PretrainedProvider::from_files(&files, &config, &Device::Cpu).unwrap();
        assert_eq!(provider.width(), 8);

        let names = provider.trainable_names();
        assert!(!names.is_empty());
        assert!(names.iter().all(|n| n.starts_with("encoder.layer.1.")));

        let a = vec!["CCO".to_string(), "c1ccccc1".to_string()];
        let b = vec!["N".to_string(), "CC(=O)O".to_string()];
        let cell = Tensor::zeros((2, 3), DType::F32, &Device::Cpu).unwrap();
        let out = provider.embed(&a, &b, &cell).unwrap();
        assert_eq!(out.dims(), &[2, 8]);
        assert_eq!(out.dtype(), DType::F32);
    }

    #[test]
    fn test_freezing_nothing_trains_everything() {
        let dir = tempfile::tempdir().unwrap();
        let files = tiny_model(dir.path());
        let config = EmbeddingConfig::pretrained("tiny").with_freeze_layers(0).cpu();
        let provider = PretrainedProvider::from_files(&files, &config, &Device::Cpu).unwrap();
        assert_eq!(provider.trainable_vars().len(), provider.varmap().unwrap().all_vars().len());
    }
}
