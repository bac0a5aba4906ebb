//! Epoch iteration over a dataset split.
//!
//! Batch contents depend only on `(seed, epoch, dataset index)`: the epoch
//! order comes from a seeded shuffle and every sample draws its augmentation
//! randomness from its own RNG, so the worker count changes throughput and
//! nothing else.

use std::sync::mpsc::{sync_channel, Receiver};
use std::sync::Arc;
use std::thread::JoinHandle;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use synergyx_common::{Result, SynergyError};
use tracing::{debug, warn};

use crate::collate::{safe_collate, Batch};
use crate::dataset::SynergyDataset;
use crate::sample::Sample;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub shuffle: bool,
    #[serde(default)]
    pub augment: bool,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Threads used to assemble the samples of one batch.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Batches buffered ahead of the consumer; 0 assembles inline.
    #[serde(default = "default_prefetch")]
    pub prefetch: usize,
}

fn default_batch_size() -> usize { 16 }
fn default_seed() -> u64 { 42 }
fn default_workers() -> usize { 1 }
fn default_prefetch() -> usize { 2 }

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            shuffle: false,
            augment: false,
            seed: default_seed(),
            workers: default_workers(),
            prefetch: default_prefetch(),
        }
    }
}

impl LoaderConfig {
    /// Training flavour: shuffled and augmented.
    pub fn training(batch_size: usize, seed: u64) -> Self {
        Self {
            batch_size,
            shuffle: true,
            augment: true,
            seed,
            ..Self::default()
        }
    }

    /// Evaluation flavour: fixed order, no augmentation.
    pub fn evaluation(batch_size: usize, seed: u64) -> Self {
        Self {
            batch_size,
            seed,
            ..Self::default()
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = prefetch;
        self
    }
}

/// RNG seed for one sample of one epoch (splitmix64 finaliser).
pub fn sample_seed(seed: u64, epoch: usize, index: usize) -> u64 {
    let mut z = seed
        ^ (epoch as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (index as u64).wrapping_mul(0xD1B5_4A32_D192_ED03);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[derive(Clone)]
pub struct BatchLoader {
    dataset: Arc<SynergyDataset>,
    indices: Arc<Vec<usize>>,
    config: LoaderConfig,
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl BatchLoader {
    pub fn new(dataset: Arc<SynergyDataset>, indices: Vec<usize>, config: LoaderConfig) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(SynergyError::config("batch_size must be at least 1"));
        }
        let pool = if config.workers > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(config.workers)
                .thread_name(|i| format!("synergyx-loader-{}", i))
                .build()
                .map_err(|e| SynergyError::config(format!("cannot start loader pool: {}", e)))?;
            Some(Arc::new(pool))
        } else {
            None
        };
        Ok(Self {
            dataset,
            indices: Arc::new(indices),
            config,
            pool,
        })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn dataset(&self) -> &SynergyDataset {
        &self.dataset
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn num_batches(&self) -> usize {
        self.indices.len().div_ceil(self.config.batch_size)
    }

    /// Dataset indices in the order they are visited during `epoch`.
    pub fn order(&self, epoch: usize) -> Vec<usize> {
        let mut order = self.indices.as_ref().clone();
        if self.config.shuffle {
            let seed = self.config.seed.wrapping_add(epoch as u64);
            order.shuffle(&mut StdRng::seed_from_u64(seed));
        }
        order
    }

    fn sample(&self, epoch: usize, index: usize) -> Sample {
        let mut rng = StdRng::seed_from_u64(sample_seed(self.config.seed, epoch, index));
        self.dataset.get(index, self.config.augment, &mut rng)
    }

    /// Assembles and collates the batch made of `chunk`.
    pub fn load_batch(&self, epoch: usize, chunk: &[usize]) -> Result<Batch> {
        let samples: Vec<Sample> = match &self.pool {
            Some(pool) => pool.install(|| chunk.par_iter().map(|&i| self.sample(epoch, i)).collect()),
            None => chunk.iter().map(|&i| self.sample(epoch, i)).collect(),
        };
        safe_collate(samples, self.dataset.default_sample())
    }

    /// Batches of `epoch`. With a non-zero prefetch a producer thread keeps
    /// up to `prefetch` batches ready.
    pub fn epoch(&self, epoch: usize) -> EpochBatches {
        let order = self.order(epoch);
        if self.config.prefetch == 0 {
            return EpochBatches::Inline {
                loader: self.clone(),
                order,
                epoch,
                position: 0,
            };
        }

        let (sender, receiver) = sync_channel(self.config.prefetch);
        let loader = self.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("synergyx-prefetch-{}", epoch))
            .spawn(move || {
                for chunk in order.chunks(loader.config.batch_size) {
                    if sender.send(loader.load_batch(epoch, chunk)).is_err() {
                        debug!("Prefetch consumer dropped at epoch {}", epoch);
                        return;
                    }
                }
            });
        match spawned {
            Ok(handle) => EpochBatches::Prefetch {
                receiver: Some(receiver),
                handle: Some(handle),
            },
            Err(e) => {
                warn!("Cannot spawn prefetch thread ({}); loading inline", e);
                EpochBatches::Inline {
                    loader: self.clone(),
                    order: self.order(epoch),
                    epoch,
                    position: 0,
                }
            }
        }
    }
}

/// Iterator over one epoch's batches.
pub enum EpochBatches {
    Inline {
        loader: BatchLoader,
        order: Vec<usize>,
        epoch: usize,
        position: usize,
    },
    Prefetch {
        receiver: Option<Receiver<Result<Batch>>>,
        handle: Option<JoinHandle<()>>,
    },
}

impl Iterator for EpochBatches {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            EpochBatches::Inline {
                loader,
                order,
                epoch,
                position,
            } => {
                if *position >= order.len() {
                    return None;
                }
                let end = (*position + loader.config.batch_size).min(order.len());
                let batch = loader.load_batch(*epoch, &order[*position..end]);
                *position = end;
                Some(batch)
            }
            EpochBatches::Prefetch { receiver, .. } => receiver.as_ref()?.recv().ok(),
        }
    }
}

impl Drop for EpochBatches {
    fn drop(&mut self) {
        if let EpochBatches::Prefetch { receiver, handle } = self {
            // Unblocks a producer waiting on a full queue.
            drop(receiver.take());
            if let Some(handle) = handle.take() {
                if handle.join().is_err() {
                    warn!("Prefetch thread panicked");
                }
            }
        }
    }
}
