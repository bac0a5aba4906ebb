//! Fusion schema.
//!
//! The fusion block concatenates graph embeddings with every tabular feature
//! family, so its input width is a function of the loaded tables. The schema
//! is computed once after the feature store is built and checked against the
//! model configuration before any parameter is allocated.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Result, SynergyError};

/// A tabular feature family served by the feature store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureFamily {
    /// Drug → target-protein profile.
    Target,
    /// Drug → physicochemical descriptors.
    Physchem,
    /// Cell line → expression profile.
    Expression,
}

impl FeatureFamily {
    pub const ALL: [FeatureFamily; 3] = [
        FeatureFamily::Target,
        FeatureFamily::Physchem,
        FeatureFamily::Expression,
    ];

    /// Identifier column expected in the backing table.
    pub fn default_id_column(&self) -> &'static str {
        match self {
            FeatureFamily::Target | FeatureFamily::Physchem => "drug_id",
            FeatureFamily::Expression => "cell_line",
        }
    }
}

impl fmt::Display for FeatureFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FeatureFamily::Target => "target",
            FeatureFamily::Physchem => "physchem",
            FeatureFamily::Expression => "expression",
        };
        f.write_str(name)
    }
}

/// Widths of every input the fusion block sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    /// Per-atom feature width produced by the graph builder.
    pub node_features: usize,
    /// Output width of each graph encoder.
    pub graph_embedding: usize,
    pub target: usize,
    pub physchem: usize,
    pub expression: usize,
    /// Width of the text channel after projection, when enabled.
    pub text: Option<usize>,
}

impl FeatureSchema {
    pub fn width(&self, family: FeatureFamily) -> usize {
        match family {
            FeatureFamily::Target => self.target,
            FeatureFamily::Physchem => self.physchem,
            FeatureFamily::Expression => self.expression,
        }
    }

    /// Sum of all component widths: two graph embeddings, two target and two
    /// physchem vectors, one expression vector and the optional text vector.
    pub fn fusion_input_width(&self) -> usize {
        2 * self.graph_embedding
            + 2 * self.target
            + 2 * self.physchem
            + self.expression
            + self.text.unwrap_or(0)
    }

    /// Fails when a declared fusion input width disagrees with the tables.
    pub fn validate_fusion_input(&self, declared: Option<usize>) -> Result<()> {
        let actual = self.fusion_input_width();
        match declared {
            Some(declared) if declared != actual => Err(SynergyError::config(format!(
                "fusion input width {} does not match feature schema {} ({})",
                declared, actual, self
            ))),
            _ => Ok(()),
        }
    }

    /// Fails when the graph encoder expects a different per-atom width.
    pub fn validate_node_features(&self, encoder_input: usize) -> Result<()> {
        if encoder_input != self.node_features {
            return Err(SynergyError::config(format!(
                "graph encoder expects {} node features but graph builder emits {}",
                encoder_input, self.node_features
            )));
        }
        Ok(())
    }
}

impl fmt::Display for FeatureSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "graph=2x{} target=2x{} physchem=2x{} expression={} text={}",
            self.graph_embedding,
            self.target,
            self.physchem,
            self.expression,
            self.text.unwrap_or(0)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> FeatureSchema {
        FeatureSchema {
            node_features: 64,
            graph_embedding: 256,
            target: 10,
            physchem: 7,
            expression: 20,
            text: None,
        }
    }

    #[test]
    fn test_fusion_width_counts_pair_slots_twice() {
        assert_eq!(schema().fusion_input_width(), 512 + 20 + 14 + 20);
    }

    #[test]
    fn test_text_channel_extends_width() {
        let with_text = FeatureSchema { text: Some(256), ..schema() };
        assert_eq!(with_text.fusion_input_width(), schema().fusion_input_width() + 256);
    }

    #[test]
    fn test_mismatched_declared_width_is_config_error() {
        let err = schema().validate_fusion_input(Some(100)).unwrap_err();
        assert!(err.is_fatal());
        assert!(schema().validate_fusion_input(None).is_ok());
        assert!(schema().validate_fusion_input(Some(566)).is_ok());
    }

    #[test]
    fn test_node_feature_mismatch() {
        assert!(schema().validate_node_features(64).is_ok());
        assert!(schema().validate_node_features(32).is_err());
    }

    #[test]
    fn test_family_id_columns() {
        assert_eq!(FeatureFamily::Target.default_id_column(), "drug_id");
        assert_eq!(FeatureFamily::Expression.default_id_column(), "cell_line");
        assert_eq!(FeatureFamily::Physchem.to_string(), "physchem");
    }
}
