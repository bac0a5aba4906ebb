//! CSV-backed numeric feature tables.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use synergyx_common::{FeatureFamily, Result, SynergyError};
use tracing::{debug, info, warn};

/// Where a feature table lives and how to read it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSpec {
    pub path: PathBuf,

    /// Entity key column; defaults to the family's conventional name.
    #[serde(default)]
    pub id_column: Option<String>,

    /// Value columns in order. When absent every non-id column is used.
    #[serde(default)]
    pub value_columns: Option<Vec<String>>,
}

impl TableSpec {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            id_column: None,
            value_columns: None,
        }
    }

    pub fn with_id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = Some(column.into());
        self
    }

    pub fn with_value_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.value_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }
}

/// Fixed-width vectors indexed by entity key. Rows are stored contiguously.
#[derive(Debug, Clone)]
pub struct FeatureTable {
    family: FeatureFamily,
    columns: Vec<String>,
    index: HashMap<String, usize>,
    values: Vec<f32>,
    zeros: Vec<f32>,
}

impl FeatureTable {
    pub fn from_spec(family: FeatureFamily, spec: &TableSpec) -> Result<Self> {
        let file = File::open(&spec.path).map_err(|e| {
            SynergyError::config(format!("cannot open {} table {:?}: {}", family, spec.path, e))
        })?;
        let id_column = spec
            .id_column
            .as_deref()
            .unwrap_or_else(|| family.default_id_column());
        let table = Self::from_reader(family, file, id_column, spec.value_columns.as_deref())?;
        info!(
            "Loaded {} table from {:?}: {} entities x {} features",
            family,
            spec.path,
            table.len(),
            table.width()
        );
        Ok(table)
    }

    /// Reads a headed CSV. A missing id or value column is a configuration
    /// error; rows with an empty key or any unparseable value are skipped.
    pub fn from_reader<R: Read>(
        family: FeatureFamily,
        reader: R,
        id_column: &str,
        value_columns: Option<&[String]>,
    ) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();

        let id_pos = headers.iter().position(|h| h == id_column).ok_or_else(|| {
            SynergyError::config(format!(
                "{} table is missing required column '{}' (found: {})",
                family,
                id_column,
                headers.join(", ")
            ))
        })?;

        let value_positions: Vec<usize> = match value_columns {
            Some(wanted) => wanted
                .iter()
                .map(|col| {
                    headers.iter().position(|h| h == col).ok_or_else(|| {
                        SynergyError::config(format!("{} table is missing required column '{}'", family, col))
                    })
                })
                .collect::<Result<_>>()?,
            None => (0..headers.len()).filter(|&i| i != id_pos).collect(),
        };
        let columns: Vec<String> = value_positions.iter().map(|&i| headers[i].clone()).collect();
        let width = columns.len();
        if width == 0 {
            warn!("{} table has no value columns", family);
        }

        let mut index = HashMap::new();
        let mut values = Vec::new();
        let mut skipped = 0usize;
        let mut duplicates = 0usize;

        for (line, record) in reader.records().enumerate() {
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    debug!("{} table row {}: {}", family, line + 2, e);
                    skipped += 1;
                    continue;
                }
            };
            let key = match record.get(id_pos).map(str::trim) {
                Some(k) if !k.is_empty() => k.to_string(),
                _ => {
                    skipped += 1;
                    continue;
                }
            };
            let row: Option<Vec<f32>> = value_positions
                .iter()
                .map(|&i| record.get(i).and_then(|v| v.trim().parse::<f32>().ok()))
                .collect();
            let Some(row) = row else {
                debug!("{} table row {} ({}) has unparseable values", family, line + 2, key);
                skipped += 1;
                continue;
            };
            if index.contains_key(&key) {
                duplicates += 1;
                continue;
            }
            index.insert(key, values.len() / width.max(1));
            values.extend(row);
        }

        if skipped > 0 {
            warn!("{} table: excluded {} unparseable rows", family, skipped);
        }
        if duplicates > 0 {
            warn!("{} table: ignored {} duplicate keys (first row kept)", family, duplicates);
        }

        Ok(Self {
            family,
            columns,
            index,
            values,
            zeros: vec![0.0; width],
        })
    }

    pub fn family(&self) -> FeatureFamily {
        self.family
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key.trim())
    }

    pub fn get(&self, key: &str) -> Option<&[f32]> {
        let row = *self.index.get(key.trim())?;
        let width = self.width();
        Some(&self.values[row * width..(row + 1) * width])
    }

    /// The all-zero vector of this table's width.
    pub fn zeros(&self) -> &[f32] {
        &self.zeros
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGETS: &str = "drug_id,EGFR,ERBB2,KRAS\n\
                           erlotinib,1,0,0\n\
                           lapatinib,1,1,0\n\
                           broken,1,x,0\n\
                           ,0,0,1\n\
                           erlotinib,0,0,0\n";

    #[test]
    fn test_width_from_column_count() {
        let table = FeatureTable::from_reader(FeatureFamily::Target, TARGETS.as_bytes(), "drug_id", None).unwrap();
        assert_eq!(table.width(), 3);
        assert_eq!(table.columns(), &["EGFR", "ERBB2", "KRAS"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("lapatinib"), Some(&[1.0, 1.0, 0.0][..]));
    }

    #[test]
    fn test_unparseable_rows_excluded_and_first_duplicate_wins() {
        let table = FeatureTable::from_reader(FeatureFamily::Target, TARGETS.as_bytes(), "drug_id", None).unwrap();
        assert!(!table.contains("broken"));
        assert_eq!(table.get("erlotinib"), Some(&[1.0, 0.0, 0.0][..]));
        assert_eq!(table.get(" erlotinib "), Some(&[1.0, 0.0, 0.0][..]));
    }

    #[test]
    fn test_missing_id_column_is_fatal() {
        let err = FeatureTable::from_reader(FeatureFamily::Expression, TARGETS.as_bytes(), "cell_line", None).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("cell_line"));
    }

    #[test]
    fn test_explicit_value_columns() {
        let csv = "drug_id,name,logP,TPSA\naspirin,Aspirin,1.2,63.6\nbad,Bad,,1\n";
        let cols = vec!["logP".to_string(), "TPSA".to_string()];
        let table = FeatureTable::from_reader(FeatureFamily::Physchem, csv.as_bytes(), "drug_id", Some(&cols)).unwrap();
        assert_eq!(table.width(), 2);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("aspirin"), Some(&[1.2, 63.6][..]));

        let missing = vec!["MW".to_string()];
        assert!(FeatureTable::from_reader(FeatureFamily::Physchem, csv.as_bytes(), "drug_id", Some(&missing)).is_err());
    }

    #[test]
    fn test_from_spec_reads_file_with_custom_id_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("expression.csv");
        std::fs::write(&path, "cell,G1,G2\nMCF7,0.5,-1.0\n").unwrap();

        let spec = TableSpec::new(&path).with_id_column("cell");
        let table = FeatureTable::from_spec(FeatureFamily::Expression, &spec).unwrap();
        assert_eq!(table.width(), 2);
        assert_eq!(table.get("MCF7"), Some(&[0.5, -1.0][..]));
    }

    #[test]
    fn test_from_spec_missing_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let spec = TableSpec::new(dir.path().join("absent.csv"));
        let err = FeatureTable::from_spec(FeatureFamily::Target, &spec).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("absent.csv"));
    }
}
