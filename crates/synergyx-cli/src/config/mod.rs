//! Configuration loading for synergyx.
//! Reads synergyx.toml from the current directory or the path in SYNERGYX_CONFIG.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use anyhow::Context;
use synergyx_embed::EmbeddingConfig;
use synergyx_features::{FeatureStoreConfig, LabelColumns, TableSpec};
use synergyx_model::ModelConfig;
use synergyx_molecules::{AugmentConfig, GraphBuilderConfig};
use synergyx_train::TrainingConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub data: DataConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Input tables. Every path is required.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub labels: PathBuf,
    #[serde(default)]
    pub label_columns: LabelColumns,
    /// Drug id to structure string.
    pub structures: TableSpec,
    pub targets: TableSpec,
    pub expression: TableSpec,
    #[serde(default)]
    pub physchem: Option<TableSpec>,
}

impl DataConfig {
    pub fn feature_store(&self) -> FeatureStoreConfig {
        FeatureStoreConfig {
            targets: self.targets.clone(),
            expression: self.expression.clone(),
            physchem: self.physchem.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    #[serde(default = "default_node_features")]
    pub node_features: usize,
    /// Graph cache bound; unbounded when absent.
    #[serde(default)]
    pub cache_capacity: Option<usize>,
    #[serde(default)]
    pub augment: AugmentConfig,
}

fn default_node_features() -> usize { 64 }

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            node_features: default_node_features(),
            cache_capacity: None,
            augment: AugmentConfig::default(),
        }
    }
}

impl GraphConfig {
    pub fn builder(&self) -> GraphBuilderConfig {
        let config = GraphBuilderConfig::default().with_node_features(self.node_features);
        match self.cache_capacity {
            Some(capacity) => config.with_cache_capacity(capacity),
            None => config,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String { "synergyx=debug,info".to_string() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { filter: default_log_filter() }
    }
}

impl Config {
    /// Load configuration from synergyx.toml.
    /// Checks SYNERGYX_CONFIG env var first, then current directory.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("SYNERGYX_CONFIG")
            .unwrap_or_else(|_| "synergyx.toml".to_string());

        if !Path::new(&path).exists() {
            anyhow::bail!(
                "Config file not found: {}\n\
                 Copy synergyx.example.toml to synergyx.toml and edit it.",
                path
            );
        }

        let content = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path))?;
        Self::parse(&content).with_context(|| format!("parsing {}", path))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.training.validate()?;
        config.model.validate()?;
        config.graph.augment.validate()?;
        Ok(config)
    }
}
