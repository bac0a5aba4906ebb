//! Fixture tables for synergyx integration tests.
//!
//! Every fixture lives in its own temporary directory that is removed when
//! the fixture is dropped.

use std::path::{Path, PathBuf};

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

/// Drugs known to the fixture tables, with their structures.
pub const DRUGS: [(&str, &str); 4] = [
    ("ethanol", "CCO"),
    ("benzene", "c1ccccc1"),
    ("aspirin", "CC(=O)Oc1ccccc1C(=O)O"),
    ("caffeine", "Cn1cnc2c1c(=O)n(C)c(=O)n2C"),
];

/// Drug present in the structure table but deliberately absent from the
/// target table.
pub const UNTARGETED_DRUG: &str = "caffeine";

pub const CELL_LINES: [&str; 2] = ["MCF7", "A549"];

pub const TARGET_COLUMNS: [&str; 5] = ["EGFR", "ERBB2", "KRAS", "BRAF", "TP53"];
pub const EXPRESSION_COLUMNS: [&str; 6] = ["G1", "G2", "G3", "G4", "G5", "G6"];
pub const PHYSCHEM_COLUMNS: [&str; 3] = ["logP", "TPSA", "MW"];

/// Heavy-atom counts of [`DRUGS`], in the same order.
pub const ATOM_COUNTS: [usize; 4] = [3, 6, 13, 14];

pub fn atom_count(drug: &str) -> Option<usize> {
    DRUGS.iter().position(|(id, _)| *id == drug).map(|i| ATOM_COUNTS[i])
}

/// A temporary directory for CSV files.
pub struct FixtureDir {
    dir: TempDir,
}

impl FixtureDir {
    pub fn new() -> Result<Self> {
        Ok(Self { dir: tempfile::tempdir()? })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write_csv<I, R, S>(&self, name: &str, headers: &[&str], rows: I) -> Result<PathBuf>
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let path = self.dir.path().join(name);
        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(headers)?;
        for row in rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(path)
    }
}

/// The full set of input tables.
pub struct TableFixture {
    pub dir: FixtureDir,
    pub labels: PathBuf,
    pub structures: PathBuf,
    pub targets: PathBuf,
    pub expression: PathBuf,
    pub physchem: PathBuf,
}

impl TableFixture {
    /// Three ethanol/benzene pairs on MCF7 labelled synergy, antagonism,
    /// Synergy.
    pub fn standard() -> Result<Self> {
        Self::with_labels(&[
            ("ethanol", "benzene", "MCF7", "synergy"),
            ("benzene", "ethanol", "MCF7", "antagonism"),
            ("ethanol", "ethanol", "MCF7", "Synergy"),
        ])
    }

    /// `n` pairs over every fixture drug and cell line with random labels.
    pub fn random(n: usize, seed: u64) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        let rows: Vec<(String, String, String, String)> = (0..n)
            .map(|_| {
                let a = DRUGS[rng.gen_range(0..DRUGS.len())].0.to_string();
                let b = DRUGS[rng.gen_range(0..DRUGS.len())].0.to_string();
                let cell = CELL_LINES[rng.gen_range(0..CELL_LINES.len())].to_string();
                let label = if rng.gen_bool(0.4) { "synergy" } else { "antagonism" };
                (a, b, cell, label.to_string())
            })
            .collect();
        let borrowed: Vec<(&str, &str, &str, &str)> = rows
            .iter()
            .map(|(a, b, c, l)| (a.as_str(), b.as_str(), c.as_str(), l.as_str()))
            .collect();
        Self::with_labels(&borrowed)
    }

    pub fn with_labels(pairs: &[(&str, &str, &str, &str)]) -> Result<Self> {
        let dir = FixtureDir::new()?;

        let labels = dir.write_csv(
            "labels.csv",
            &["Drug1", "Drug2", "Cell_line", "classification"],
            pairs.iter().map(|(a, b, c, l)| vec![*a, *b, *c, *l]),
        )?;

        let structures = dir.write_csv(
            "structures.csv",
            &["drug_id", "smiles"],
            DRUGS.iter().map(|(id, smiles)| vec![*id, *smiles]),
        )?;

        let mut target_headers = vec!["drug_id"];
        target_headers.extend(TARGET_COLUMNS);
        let targets = dir.write_csv(
            "targets.csv",
            &target_headers,
            DRUGS
                .iter()
                .enumerate()
                .filter(|(_, (id, _))| *id != UNTARGETED_DRUG)
                .map(|(i, (id, _))| {
                    let mut row = vec![id.to_string()];
                    row.extend((0..TARGET_COLUMNS.len()).map(|j| ((i + j) % 2).to_string()));
                    row
                }),
        )?;

        let mut expression_headers = vec!["cell_line"];
        expression_headers.extend(EXPRESSION_COLUMNS);
        let expression = dir.write_csv(
            "expression.csv",
            &expression_headers,
            CELL_LINES.iter().enumerate().map(|(i, cell)| {
                let mut row = vec![cell.to_string()];
                row.extend((0..EXPRESSION_COLUMNS.len()).map(|j| format!("{:.2}", (i * 7 + j) as f32 * 0.25 - 1.0)));
                row
            }),
        )?;

        let mut physchem_headers = vec!["drug_id"];
        physchem_headers.extend(PHYSCHEM_COLUMNS);
        let physchem = dir.write_csv(
            "physchem.csv",
            &physchem_headers,
            DRUGS.iter().enumerate().map(|(i, (id, _))| {
                vec![
                    id.to_string(),
                    format!("{:.1}", i as f32 * 0.5 - 0.3),
                    format!("{:.1}", 20.0 + i as f32 * 15.0),
                    format!("{:.1}", 46.0 + i as f32 * 45.0),
                ]
            }),
        )?;

        Ok(Self {
            dir,
            labels,
            structures,
            targets,
            expression,
            physchem,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_fixture_writes_every_table() {
        let fixture = TableFixture::standard().unwrap();
        for path in [
            &fixture.labels,
            &fixture.structures,
            &fixture.targets,
            &fixture.expression,
            &fixture.physchem,
        ] {
            assert!(path.exists(), "{:?} missing", path);
        }
        let labels = std::fs::read_to_string(&fixture.labels).unwrap();
        assert_eq!(labels.lines().count(), 4);
        let targets = std::fs::read_to_string(&fixture.targets).unwrap();
        assert!(!targets.contains(UNTARGETED_DRUG));
    }

    #[test]
    fn test_random_fixture_is_seeded() {
        let a = TableFixture::random(20, 3).unwrap();
        let b = TableFixture::random(20, 3).unwrap();
        assert_eq!(
            std::fs::read_to_string(&a.labels).unwrap(),
            std::fs::read_to_string(&b.labels).unwrap()
        );
    }
}
