//! The feature store: every tabular input the model consumes, by family.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use synergyx_common::{FeatureFamily, FeatureSchema, Result, SynergyError};
use tracing::{info, warn};

use crate::table::{FeatureTable, TableSpec};

/// Structure assigned to drugs without a usable structure string.
pub const PLACEHOLDER_STRUCTURE: &str = "C";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureStoreConfig {
    pub targets: TableSpec,
    pub expression: TableSpec,
    #[serde(default)]
    pub physchem: Option<TableSpec>,
}

/// Lookup tables keyed by drug or cell-line id. Widths are fixed at
/// construction; absent keys resolve to zero vectors.
#[derive(Debug, Default)]
pub struct FeatureStore {
    tables: HashMap<FeatureFamily, FeatureTable>,
    warned: Mutex<HashSet<(FeatureFamily, String)>>,
}

impl FeatureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(config: &FeatureStoreConfig) -> Result<Self> {
        let mut store = Self::new()
            .with_table(FeatureTable::from_spec(FeatureFamily::Target, &config.targets)?)
            .with_table(FeatureTable::from_spec(FeatureFamily::Expression, &config.expression)?);
        if let Some(spec) = &config.physchem {
            store.insert(FeatureTable::from_spec(FeatureFamily::Physchem, spec)?);
        } else {
            info!("No physchem table configured; physchem features disabled");
        }
        Ok(store)
    }

    pub fn with_table(mut self, table: FeatureTable) -> Self {
        self.insert(table);
        self
    }

    pub fn insert(&mut self, table: FeatureTable) {
        self.tables.insert(table.family(), table);
    }

    pub fn table(&self, family: FeatureFamily) -> Option<&FeatureTable> {
        self.tables.get(&family)
    }

    /// Width of a family; zero when the family has no table.
    pub fn width(&self, family: FeatureFamily) -> usize {
        self.tables.get(&family).map(FeatureTable::width).unwrap_or(0)
    }

    /// Vector for `key`, or the family's zero vector. Each missing key is
    /// reported once.
    pub fn get(&self, family: FeatureFamily, key: &str) -> &[f32] {
        let Some(table) = self.tables.get(&family) else {
            return &[];
        };
        match table.get(key) {
            Some(row) => row,
            None => {
                self.warn_missing(family, key);
                table.zeros()
            }
        }
    }

    pub fn target_features(&self, drug_id: &str) -> &[f32] {
        self.get(FeatureFamily::Target, drug_id)
    }

    pub fn physchem_features(&self, drug_id: &str) -> &[f32] {
        self.get(FeatureFamily::Physchem, drug_id)
    }

    pub fn cell_line_features(&self, cell_line: &str) -> &[f32] {
        self.get(FeatureFamily::Expression, cell_line)
    }

    /// Fusion schema for these tables and the given model-side widths.
    pub fn schema(&self, node_features: usize, graph_embedding: usize, text: Option<usize>) -> FeatureSchema {
        FeatureSchema {
            node_features,
            graph_embedding,
            target: self.width(FeatureFamily::Target),
            physchem: self.width(FeatureFamily::Physchem),
            expression: self.width(FeatureFamily::Expression),
            text,
        }
    }

    fn warn_missing(&self, family: FeatureFamily, key: &str) {
        let mut warned = self.warned.lock().unwrap_or_else(|p| p.into_inner());
        if warned.insert((family, key.to_string())) {
            warn!("No {} features for '{}'; using zero vector", family, key);
        }
    }
}

/// Drug id to structure string.
#[derive(Debug, Clone, Default)]
pub struct StructureTable {
    structures: HashMap<String, String>,
}

impl StructureTable {
    pub fn from_spec<F>(spec: &TableSpec, is_valid: F) -> Result<Self>
    where
        F: Fn(&str) -> bool,
    {
        let file = File::open(&spec.path)
            .map_err(|e| SynergyError::config(format!("cannot open structure table {:?}: {}", spec.path, e)))?;
        let id_column = spec.id_column.as_deref().unwrap_or("drug_id");
        let table = Self::from_reader(file, id_column, "smiles", is_valid)?;
        info!("Loaded {} drug structures from {:?}", table.len(), spec.path);
        Ok(table)
    }

    /// Entries failing `is_valid` are dropped so the drug falls back to the
    /// placeholder structure.
    pub fn from_reader<R, F>(reader: R, id_column: &str, structure_column: &str, is_valid: F) -> Result<Self>
    where
        R: Read,
        F: Fn(&str) -> bool,
    {
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
        let position = |name: &str| {
            headers.iter().position(|h| h == name).ok_or_else(|| {
                SynergyError::config(format!("structure table is missing required column '{}'", name))
            })
        };
        let id_pos = position(id_column)?;
        let structure_pos = position(structure_column)?;

        let mut structures = HashMap::new();
        let mut invalid = 0usize;
        for record in reader.records() {
            let Ok(record) = record else { continue };
            let (Some(id), Some(structure)) = (record.get(id_pos), record.get(structure_pos)) else {
                continue;
            };
            let (id, structure) = (id.trim(), structure.trim());
            if id.is_empty() {
                continue;
            }
            if !is_valid(structure) {
                warn!("Invalid structure for {}: {:?}", id, structure);
                invalid += 1;
                continue;
            }
            structures.entry(id.to_string()).or_insert_with(|| structure.to_string());
        }
        if invalid > 0 {
            warn!("Dropped {} invalid structures", invalid);
        }
        Ok(Self { structures })
    }

    pub fn insert(&mut self, drug_id: impl Into<String>, structure: impl Into<String>) {
        self.structures.insert(drug_id.into(), structure.into());
    }

    pub fn get(&self, drug_id: &str) -> Option<&str> {
        self.structures.get(drug_id.trim()).map(String::as_str)
    }

    /// Structure for `drug_id`, or [`PLACEHOLDER_STRUCTURE`].
    pub fn resolve(&self, drug_id: &str) -> &str {
        self.get(drug_id).unwrap_or(PLACEHOLDER_STRUCTURE)
    }

    pub fn len(&self) -> usize {
        self.structures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.structures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> FeatureStore {
        let targets = "drug_id,T1,T2,T3,T4\nA,1,0,1,0\n";
        let expression = "cell_line,G1,G2\nMCF7,0.5,-1.5\n";
        FeatureStore::new()
            .with_table(FeatureTable::from_reader(FeatureFamily::Target, targets.as_bytes(), "drug_id", None).unwrap())
            .with_table(
                FeatureTable::from_reader(FeatureFamily::Expression, expression.as_bytes(), "cell_line", None).unwrap(),
            )
    }

    #[test]
    fn test_missing_key_yields_zero_vector_of_family_width() {
        let store = store();
        assert_eq!(store.target_features("unknown"), &[0.0; 4]);
        assert_eq!(store.cell_line_features("nowhere"), &[0.0; 2]);
        // repeated lookups stay well-defined
        assert_eq!(store.target_features("unknown").len(), 4);
    }

    #[test]
    fn test_absent_family_has_zero_width() {
        let store = store();
        assert_eq!(store.width(FeatureFamily::Physchem), 0);
        assert!(store.physchem_features("A").is_empty());
    }

    #[test]
    fn test_schema_reflects_tables() {
        let schema = store().schema(64, 256, None);
        assert_eq!(schema.target, 4);
        assert_eq!(schema.expression, 2);
        assert_eq!(schema.physchem, 0);
        assert_eq!(schema.fusion_input_width(), 512 + 8 + 2);
    }

    #[test]
    fn test_structure_table_validation_and_placeholder() {
        let csv = "drug_id,smiles\nA,CCO\nB,not-a-smiles\n";
        let table = StructureTable::from_reader(csv.as_bytes(), "drug_id", "smiles", |s| !s.contains('-')).unwrap();
        assert_eq!(table.resolve("A"), "CCO");
        assert_eq!(table.resolve("B"), PLACEHOLDER_STRUCTURE);
        assert_eq!(table.resolve("Z"), PLACEHOLDER_STRUCTURE);
    }

    #[test]
    fn test_structure_table_requires_columns() {
        let csv = "id,smiles\nA,CCO\n";
        let err = StructureTable::from_reader(csv.as_bytes(), "drug_id", "smiles", |_| true).unwrap_err();
        assert!(err.is_fatal());
    }
}
