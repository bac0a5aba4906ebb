use synergyx_common::Result;
use synergyx_features::{Batch, BatchLoader};

/// Anything the loop controller can draw one epoch of batches from.
pub trait BatchSource {
    fn num_batches(&self) -> usize;

    fn batches(&self, epoch: usize) -> Box<dyn Iterator<Item = Result<Batch>> + '_>;
}

impl BatchSource for BatchLoader {
    fn num_batches(&self) -> usize {
        BatchLoader::num_batches(self)
    }

    fn batches(&self, epoch: usize) -> Box<dyn Iterator<Item = Result<Batch>> + '_> {
        Box::new(self.epoch(epoch))
    }
}
