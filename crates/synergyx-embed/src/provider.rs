//! The pluggable text channel.

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::VarMap;
use tracing::info;

use crate::config::{EmbeddingConfig, ProviderKind};
use crate::pretrained::PretrainedProvider;
use crate::{EmbedError, Result};

/// Source of one fixed-width vector per drug pair.
///
/// Implementations return an f32 `(batch, width)` tensor on the device of
/// `cell`. Nothing downstream depends on which implementation is in use
/// beyond [`EmbeddingProvider::width`].
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    fn width(&self) -> usize;

    fn embed(&self, smiles_a: &[String], smiles_b: &[String], cell: &Tensor) -> Result<Tensor>;

    /// Parameters the optimiser may update.
    fn trainable_vars(&self) -> Vec<Var> {
        Vec::new()
    }

    /// Every parameter of the provider, for checkpointing.
    fn varmap(&self) -> Option<&VarMap> {
        None
    }
}

/// Checks that a batch agrees on its size and returns it.
pub fn batch_size(smiles_a: &[String], smiles_b: &[String], cell: &Tensor) -> Result<usize> {
    let cells = cell.dims().first().copied().unwrap_or(0);
    if smiles_a.len() != smiles_b.len() || smiles_a.len() != cells {
        return Err(EmbedError::BatchMismatch {
            a: smiles_a.len(),
            b: smiles_b.len(),
            cells,
        });
    }
    Ok(cells)
}

/// Zero vectors of a declared width.
#[derive(Debug, Clone)]
pub struct NullProvider {
    width: usize,
}

impl NullProvider {
    pub fn new(width: usize) -> Self {
        Self { width }
    }
}

impl EmbeddingProvider for NullProvider {
    fn name(&self) -> &str {
        "null"
    }

    fn width(&self) -> usize {
        self.width
    }

    fn embed(&self, smiles_a: &[String], smiles_b: &[String], cell: &Tensor) -> Result<Tensor> {
        let n = batch_size(smiles_a, smiles_b, cell)?;
        Ok(Tensor::zeros((n, self.width), DType::F32, cell.device())?)
    }
}

/// The provider selected by `config`, or `None` when the channel is off.
pub fn build_provider(config: &EmbeddingConfig, device: &Device) -> Result<Option<Box<dyn EmbeddingProvider>>> {
    match config.provider {
        ProviderKind::None => {
            info!("Text channel disabled");
            Ok(None)
        }
        ProviderKind::Null => {
            info!("Text channel: null provider, width {}", config.null_width);
            Ok(Some(Box::new(NullProvider::new(config.null_width))))
        }
        ProviderKind::Pretrained => {
            let provider = PretrainedProvider::load(config, device)?;
            Ok(Some(Box::new(provider)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(n: usize) -> Vec<String> {
        vec!["CCO".to_string(); n]
    }

    #[test]
    fn test_null_provider_returns_zeros_of_declared_width() {
        let provider = NullProvider::new(16);
        let cell = Tensor::ones((3, 5), DType::F32, &Device::Cpu).unwrap();
        let out = provider.embed(&strings(3), &strings(3), &cell).unwrap();
        assert_eq!(out.dims(), &[3, 16]);
        assert_eq!(out.sum_all().unwrap().to_scalar::<f32>().unwrap(), 0.0);
        assert!(provider.trainable_vars().is_empty());
    }

    #[test]
    fn test_batch_mismatch_is_rejected() {
        let provider = NullProvider::new(4);
        let cell = Tensor::ones((2, 5), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(
            provider.embed(&strings(2), &strings(3), &cell),
            Err(EmbedError::BatchMismatch { a: 2, b: 3, cells: 2 })
        ));
    }

    #[test]
    fn test_build_provider_by_kind() {
        assert!(build_provider(&EmbeddingConfig::default(), &Device::Cpu).unwrap().is_none());
        let provider = build_provider(&EmbeddingConfig::null(32), &Device::Cpu).unwrap().unwrap();
        assert_eq!(provider.width(), 32);
        assert_eq!(provider.name(), "null");
    }
}
