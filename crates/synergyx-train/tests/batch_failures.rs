use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use synergyx_common::{Result, SynergyError};
use synergyx_features::{
    Batch, BatchLoader, FeatureStore, FeatureStoreConfig, LabelColumns, LabelTable, LoaderConfig, SampleAssembler,
    StructureTable, SynergyDataset, TableSpec,
};
use synergyx_molecules::{AugmentConfig, GraphBuilder, GraphBuilderConfig};
use synergyx_test_utils::TableFixture;
use synergyx_train::{
    CheckpointRecord, CheckpointStore, RankingMetric, StepOutput, Trainer, TrainingConfig, TrainingEngine,
};

fn dataset(fixture: &TableFixture) -> Arc<SynergyDataset> {
    let store = FeatureStore::load(&FeatureStoreConfig {
        targets: TableSpec::new(&fixture.targets),
        expression: TableSpec::new(&fixture.expression),
        physchem: None,
    })
    .unwrap();
    let builder = Arc::new(GraphBuilder::new(GraphBuilderConfig::default()));
    let structures = StructureTable::from_spec(&TableSpec::new(&fixture.structures), |s| {
        builder.is_valid_structure(s)
    })
    .unwrap();
    let assembler = SampleAssembler::new(store, structures, builder, AugmentConfig::default()).unwrap();
    let labels = LabelTable::from_path(&fixture.labels, &LabelColumns::default()).unwrap();
    Arc::new(SynergyDataset::new(labels, assembler))
}

/// Seven pairs in unshuffled batches of two: sizes 2, 2, 2, 1.
fn loader(fixture: &TableFixture) -> BatchLoader {
    let dataset = dataset(fixture);
    let indices = (0..dataset.len()).collect();
    BatchLoader::new(dataset, indices, LoaderConfig::evaluation(2, 0)).unwrap()
}

/// Fails chosen train calls (1-based) with a recoverable error and reports
/// the call number as the loss of every successful one.
#[derive(Default)]
struct FlakyEngine {
    failing_train: HashSet<usize>,
    fatal_train: Option<usize>,
    fail_eval: bool,
    train_calls: usize,
}

impl TrainingEngine for FlakyEngine {
    fn train_step(&mut self, batch: &Batch) -> Result<StepOutput> {
        self.train_calls += 1;
        if self.fatal_train == Some(self.train_calls) {
            return Err(SynergyError::config("fusion width changed mid-run"));
        }
        if self.failing_train.contains(&self.train_calls) {
            return Err(SynergyError::Data(format!("corrupt batch {}", self.train_calls)));
        }
        Ok(StepOutput {
            loss: self.train_calls as f64,
            labels: batch.label_values.clone(),
            probabilities: vec![0.7; batch.len()],
        })
    }

    fn eval_step(&mut self, batch: &Batch) -> Result<StepOutput> {
        if self.fail_eval {
            return Err(SynergyError::Data("non-finite logits".into()));
        }
        Ok(StepOutput {
            loss: 0.25,
            labels: batch.label_values.clone(),
            probabilities: vec![0.3; batch.len()],
        })
    }

    fn learning_rate(&self) -> f64 {
        1e-3
    }

    fn save_checkpoint(&mut self, _store: &CheckpointStore, _record: &CheckpointRecord) -> Result<()> {
        Ok(())
    }

    fn restore_checkpoint(&mut self, _store: &CheckpointStore, _epoch: usize) -> Result<bool> {
        Ok(false)
    }
}

fn trainer(out: &std::path::Path, epochs: usize) -> Trainer {
    let config = TrainingConfig::default().with_epochs(epochs).with_output_dir(out);
    Trainer::new(config, RankingMetric::Auroc, Arc::new(AtomicBool::new(false))).unwrap()
}

#[test]
fn failed_batches_are_skipped_and_excluded_from_loss() {
    let fixture = TableFixture::random(7, 5).unwrap();
    let loader = loader(&fixture);
    assert_eq!(loader.num_batches(), 4);

    let out = tempfile::tempdir().unwrap();
    let mut engine = FlakyEngine {
        failing_train: HashSet::from([2, 4]),
        ..FlakyEngine::default()
    };
    let summary = trainer(out.path(), 1).run(&mut engine, &loader, &loader, &loader).unwrap();

    assert_eq!(engine.train_calls, 4);
    assert_eq!(summary.epochs_run, 1);
    let record = &summary.history[0];
    assert_eq!(record.failed_batches, 2);
    // Calls 1 and 3 succeeded with losses 1.0 and 3.0.
    assert!((record.train.loss - 2.0).abs() < 1e-12);
    assert_eq!(record.train.num_samples, 4);
    assert_eq!(record.val.num_samples, 7);
    assert!(summary.test.is_some());
}

#[test]
fn pass_with_no_successful_batch_reports_nan_loss() {
    let fixture = TableFixture::random(7, 5).unwrap();
    let loader = loader(&fixture);

    let out = tempfile::tempdir().unwrap();
    let mut engine = FlakyEngine {
        fail_eval: true,
        ..FlakyEngine::default()
    };
    let summary = trainer(out.path(), 2).run(&mut engine, &loader, &loader, &loader).unwrap();

    assert_eq!(summary.epochs_run, 2);
    for record in &summary.history {
        assert!(record.train.loss.is_finite());
        assert!(record.val.loss.is_nan());
        assert_eq!(record.val.num_samples, 0);
        assert_eq!(record.failed_batches, 4);
    }
    let test = summary.test.unwrap();
    assert!(test.loss.is_nan());
    assert_eq!(test.auroc, 0.5);
}

#[test]
fn fatal_step_error_aborts_the_run() {
    let fixture = TableFixture::random(7, 5).unwrap();
    let loader = loader(&fixture);

    let out = tempfile::tempdir().unwrap();
    let mut engine = FlakyEngine {
        fatal_train: Some(2),
        ..FlakyEngine::default()
    };
    let err = trainer(out.path(), 3).run(&mut engine, &loader, &loader, &loader).unwrap_err();

    assert!(err.is_fatal());
    assert_eq!(engine.train_calls, 2);
}
