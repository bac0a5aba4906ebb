//! Wires the configured tables, model and engine into one training run.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Context;
use candle_core::DType;
use candle_nn::{VarBuilder, VarMap};
use synergyx_embed::build_provider;
use synergyx_features::{
    split_indices, BatchLoader, FeatureStore, LabelTable, SampleAssembler, StructureTable, SynergyDataset,
};
use synergyx_model::{select_device, SynergyModel};
use synergyx_molecules::GraphBuilder;
use synergyx_train::{SynergyEngine, Trainer, TrainingSummary};
use tracing::info;

use crate::config::Config;

pub fn run(config: &Config, cancel: Arc<AtomicBool>) -> anyhow::Result<TrainingSummary> {
    let device = select_device(config.training.use_gpu);
    let data = &config.data;

    let builder = Arc::new(GraphBuilder::new(config.graph.builder()));
    let store = FeatureStore::load(&data.feature_store()).context("loading feature tables")?;
    let structures = StructureTable::from_spec(&data.structures, |s| builder.is_valid_structure(s))
        .with_context(|| format!("loading structures from {}", data.structures.path.display()))?;
    let assembler = SampleAssembler::new(store, structures, builder.clone(), config.graph.augment)?;
    let labels = LabelTable::from_path(&data.labels, &data.label_columns)
        .with_context(|| format!("loading labels from {}", data.labels.display()))?;

    let training = &config.training;
    let split = split_indices(labels.len(), training.train_fraction, training.val_fraction, training.seed);
    if split.train.is_empty() || split.val.is_empty() || split.test.is_empty() {
        anyhow::bail!(
            "{} labelled pairs give an empty split (train {}, val {}, test {})",
            labels.len(),
            split.train.len(),
            split.val.len(),
            split.test.len()
        );
    }
    info!(
        "Split {} pairs: {} train, {} val, {} test",
        labels.len(),
        split.train.len(),
        split.val.len(),
        split.test.len()
    );

    let dataset = Arc::new(SynergyDataset::new(labels, assembler).with_class_weights_from(&split.train));
    let train = BatchLoader::new(dataset.clone(), split.train, training.train_loader())?;
    let val = BatchLoader::new(dataset.clone(), split.val, training.eval_loader())?;
    let test = BatchLoader::new(dataset.clone(), split.test, training.eval_loader())?;

    let provider = build_provider(&config.embedding, &device)?;
    let text_input = provider.as_ref().map(|p| p.width());
    let schema = dataset.assembler().store().schema(
        builder.node_features(),
        config.model.encoder.out_dim,
        text_input.map(|_| config.model.latent_dim),
    );
    info!("Feature schema: {} (fusion input {})", schema, schema.fusion_input_width());

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = SynergyModel::new(&config.model, &schema, text_input, &device, vb)?;

    let steps = training.total_steps(train.num_batches());
    let mut engine = SynergyEngine::new(model, varmap, provider, training, steps, device)?;
    let metric = training.ranking_metric(config.model.variant);
    let mut trainer = Trainer::new(training.clone(), metric, cancel)?;

    let summary = trainer.run(&mut engine, &train, &val, &test)?;

    let path = training.output_dir.join("training_summary.json");
    let file = std::fs::File::create(&path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), &summary)?;
    info!("Summary written to {}", path.display());

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use synergyx_test_utils::TableFixture;

    fn fixture_config(fixture: &TableFixture, epochs: usize) -> Config {
        let content = format!(
            r#"
[data]
labels = '{labels}'

[data.structures]
path = '{structures}'

[data.targets]
path = '{targets}'

[data.expression]
path = '{expression}'

[data.physchem]
path = '{physchem}'

[model]
variant = "baseline"
fusion_dims = [32, 16]
latent_dim = 16
classifier_hidden = 8

[model.encoder]
hidden_dim = 8
out_dim = 16
num_layers = 2

[training]
epochs = {epochs}
batch_size = 4
eval_batch_size = 4
patience = 5
workers = 1
prefetch = 0
output_dir = '{out}'
"#,
            labels = fixture.labels.display(),
            structures = fixture.structures.display(),
            targets = fixture.targets.display(),
            expression = fixture.expression.display(),
            physchem = fixture.physchem.display(),
            out = fixture.path().join("out").display(),
            epochs = epochs,
        );
        Config::parse(&content).unwrap()
    }

    #[test]
    fn test_run_trains_and_writes_outputs() {
        let fixture = TableFixture::random(24, 11).unwrap();
        let config = fixture_config(&fixture, 2);

        let summary = run(&config, Arc::new(AtomicBool::new(false))).unwrap();
        assert!(!summary.interrupted);
        assert_eq!(summary.epochs_run, 2);
        assert_eq!(summary.history.len(), 2);
        let test = summary.test.as_ref().unwrap();
        assert_eq!(test.num_samples, 5);

        let out = fixture.path().join("out");
        assert!(out.join("training_summary.json").exists());
        assert!(out.join("training_metrics.csv").exists());
    }

    #[test]
    fn test_cancelled_run_reports_interruption() {
        let fixture = TableFixture::random(24, 11).unwrap();
        let config = fixture_config(&fixture, 3);

        let summary = run(&config, Arc::new(AtomicBool::new(true))).unwrap();
        assert!(summary.interrupted);
        assert_eq!(summary.epochs_run, 0);
        assert!(summary.test.is_none());
    }

    #[test]
    fn test_too_few_pairs_is_rejected() {
        let fixture = TableFixture::standard().unwrap();
        let config = fixture_config(&fixture, 1);
        assert!(run(&config, Arc::new(AtomicBool::new(false))).is_err());
    }
}
