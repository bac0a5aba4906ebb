//! Drug-pair label table and the dataset built on it.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use synergyx_common::{Result, SynergyError};
use tracing::{info, warn};

use crate::sample::{Sample, SampleAssembler};

/// Header names of the label table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelColumns {
    #[serde(default = "default_drug_a")]
    pub drug_a: String,
    #[serde(default = "default_drug_b")]
    pub drug_b: String,
    #[serde(default = "default_cell_line")]
    pub cell_line: String,
    #[serde(default = "default_classification")]
    pub classification: String,
}

fn default_drug_a() -> String { "Drug1".to_string() }
fn default_drug_b() -> String { "Drug2".to_string() }
fn default_cell_line() -> String { "Cell_line".to_string() }
fn default_classification() -> String { "classification".to_string() }

impl Default for LabelColumns {
    fn default() -> Self {
        Self {
            drug_a: default_drug_a(),
            drug_b: default_drug_b(),
            cell_line: default_cell_line(),
            classification: default_classification(),
        }
    }
}

/// Case-insensitive label mapping: synergy = 1, antagonism = 0.
pub fn map_label(classification: &str) -> Option<u32> {
    match classification.trim().to_ascii_lowercase().as_str() {
        "synergy" => Some(1),
        "antagonism" => Some(0),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PairRecord {
    pub drug_a: String,
    pub drug_b: String,
    pub cell_line: String,
    pub classification: String,
    pub label: u32,
    /// False when the classification string was not recognised; such rows
    /// train as label 0 with weight 1.
    pub known_label: bool,
}

#[derive(Debug, Clone, Default)]
pub struct LabelTable {
    records: Vec<PairRecord>,
}

impl LabelTable {
    pub fn from_path(path: &Path, columns: &LabelColumns) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| SynergyError::config(format!("cannot open label table {:?}: {}", path, e)))?;
        let table = Self::from_reader(file, columns)?;
        info!("Loaded {} drug pairs from {:?}", table.len(), path);
        Ok(table)
    }

    pub fn from_reader<R: Read>(reader: R, columns: &LabelColumns) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
        let position = |name: &str| {
            headers.iter().position(|h| h == name).ok_or_else(|| {
                SynergyError::config(format!("label table is missing required column '{}'", name))
            })
        };
        let positions = [
            position(&columns.drug_a)?,
            position(&columns.drug_b)?,
            position(&columns.cell_line)?,
            position(&columns.classification)?,
        ];

        let mut records = Vec::new();
        let mut dropped = 0usize;
        let mut unknown = 0usize;
        for record in reader.records() {
            let Ok(record) = record else {
                dropped += 1;
                continue;
            };
            let fields: Option<Vec<&str>> = positions
                .iter()
                .map(|&i| record.get(i).map(str::trim).filter(|v| !v.is_empty()))
                .collect();
            let Some(fields) = fields else {
                dropped += 1;
                continue;
            };
            let (label, known_label) = match map_label(fields[3]) {
                Some(label) => (label, true),
                None => {
                    unknown += 1;
                    (0, false)
                }
            };
            records.push(PairRecord {
                drug_a: fields[0].to_string(),
                drug_b: fields[1].to_string(),
                cell_line: fields[2].to_string(),
                classification: fields[3].to_string(),
                label,
                known_label,
            });
        }

        if dropped > 0 {
            warn!("Label table: dropped {} rows with missing fields", dropped);
        }
        if unknown > 0 {
            warn!("Label table: {} rows have an unrecognised classification; treated as antagonism", unknown);
        }
        Ok(Self { records })
    }

    pub fn from_records(records: Vec<PairRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[PairRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Counts of [antagonism, synergy] among recognised labels in `indices`.
    pub fn class_counts(&self, indices: &[usize]) -> [usize; 2] {
        let mut counts = [0usize; 2];
        for record in indices.iter().filter_map(|&i| self.records.get(i)) {
            if record.known_label {
                counts[record.label as usize] += 1;
            }
        }
        counts
    }

    /// Inverse-frequency weights `total / (classes_present * count)`.
    pub fn class_weights(&self, indices: &[usize]) -> [f32; 2] {
        let counts = self.class_counts(indices);
        let total: usize = counts.iter().sum();
        let present = counts.iter().filter(|&&c| c > 0).count();
        let mut weights = [1.0f32; 2];
        for (weight, &count) in weights.iter_mut().zip(&counts) {
            if count > 0 {
                *weight = total as f32 / (present * count) as f32;
            }
        }
        weights
    }
}

/// Fractions of the data assigned to training and validation; the rest is
/// the test split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSplit {
    pub train: Vec<usize>,
    pub val: Vec<usize>,
    pub test: Vec<usize>,
}

/// Seeded shuffle split.
pub fn split_indices(len: usize, train_fraction: f64, val_fraction: f64, seed: u64) -> DatasetSplit {
    let mut order: Vec<usize> = (0..len).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));
    let train_len = ((len as f64) * train_fraction.clamp(0.0, 1.0)) as usize;
    let val_len = (((len as f64) * val_fraction.clamp(0.0, 1.0)) as usize).min(len - train_len);
    let test = order.split_off(train_len + val_len);
    let val = order.split_off(train_len);
    DatasetSplit { train: order, val, test }
}

/// The label table joined with everything needed to assemble a sample.
pub struct SynergyDataset {
    labels: LabelTable,
    assembler: SampleAssembler,
    class_weights: [f32; 2],
}

impl SynergyDataset {
    pub fn new(labels: LabelTable, assembler: SampleAssembler) -> Self {
        let all: Vec<usize> = (0..labels.len()).collect();
        let counts = labels.class_counts(&all);
        let class_weights = labels.class_weights(&all);
        info!(
            "Class distribution: antagonism={}, synergy={}; weights={:?}",
            counts[0], counts[1], class_weights
        );
        Self {
            labels,
            assembler,
            class_weights,
        }
    }

    /// Recomputes class weights from a subset (typically the training split).
    pub fn with_class_weights_from(mut self, indices: &[usize]) -> Self {
        self.class_weights = self.labels.class_weights(indices);
        info!("Class weights from {} training pairs: {:?}", indices.len(), self.class_weights);
        self
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    pub fn assembler(&self) -> &SampleAssembler {
        &self.assembler
    }

    pub fn class_weights(&self) -> [f32; 2] {
        self.class_weights
    }

    pub fn default_sample(&self) -> &Sample {
        self.assembler.default_sample()
    }

    /// Sample for dataset row `idx`; out-of-range rows yield the default.
    pub fn get<R: Rng + ?Sized>(&self, idx: usize, augment: bool, rng: &mut R) -> Sample {
        let Some(record) = self.labels.records().get(idx) else {
            warn!("Dataset index {} out of range ({} rows)", idx, self.len());
            return self.assembler.default_sample().clone();
        };
        let weight = if record.known_label {
            self.class_weights[record.label as usize]
        } else {
            1.0
        };
        self.assembler
            .assemble(&record.drug_a, &record.drug_b, &record.cell_line, augment, rng)
            .with_label(record.label, weight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_mapping_is_case_insensitive() {
        assert_eq!(map_label("synergy"), Some(1));
        assert_eq!(map_label("Synergy"), Some(1));
        assert_eq!(map_label(" ANTAGONISM "), Some(0));
        assert_eq!(map_label("additive"), None);
    }

    #[test]
    fn test_label_table_parsing() {
        let csv = "Drug1,Drug2,Cell_line,classification\n\
                   A,B,MCF7,synergy\n\
                   A,,MCF7,synergy\n\
                   B,A,MCF7,additive\n";
        let table = LabelTable::from_reader(csv.as_bytes(), &LabelColumns::default()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.records()[0].label, 1);
        assert!(!table.records()[1].known_label);
        assert_eq!(table.records()[1].label, 0);
    }

    #[test]
    fn test_missing_label_column_is_fatal() {
        let csv = "Drug1,Drug2,classification\nA,B,synergy\n";
        let err = LabelTable::from_reader(csv.as_bytes(), &LabelColumns::default()).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("Cell_line"));
    }

    #[test]
    fn test_inverse_frequency_weights() {
        let record = |label| PairRecord {
            drug_a: "A".into(),
            drug_b: "B".into(),
            cell_line: "C".into(),
            classification: String::new(),
            label,
            known_label: true,
        };
        let table = LabelTable::from_records(vec![record(1), record(0), record(0), record(0)]);
        let weights = table.class_weights(&[0, 1, 2, 3]);
        assert!((weights[0] - 4.0 / 6.0).abs() < 1e-6);
        assert!((weights[1] - 2.0).abs() < 1e-6);

        // single class present
        let weights = table.class_weights(&[1, 2]);
        assert_eq!(weights, [1.0, 1.0]);
    }

    #[test]
    fn test_split_is_seeded_and_disjoint() {
        let a = split_indices(100, 0.7, 0.15, 42);
        let b = split_indices(100, 0.7, 0.15, 42);
        assert_eq!(a, b);
        assert_eq!((a.train.len(), a.val.len(), a.test.len()), (70, 15, 15));
        let mut all: Vec<usize> = a.train.iter().chain(&a.val).chain(&a.test).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..100).collect::<Vec<_>>());
        assert_ne!(split_indices(100, 0.7, 0.15, 7).train, a.train);
    }
}
