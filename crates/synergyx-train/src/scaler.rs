//! Dynamic loss scaling for reduced-precision training.
//!
//! The loss is multiplied by the current scale before the backward pass and
//! gradients are divided by it afterwards. A non-finite gradient halves the
//! scale and skips the optimiser step; `growth_interval` consecutive finite
//! steps double it.

use candle_core::backprop::GradStore;
use candle_core::{DType, Result, Tensor, Var};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalerConfig {
    #[serde(default = "default_init_scale")]
    pub init_scale: f64,
    #[serde(default = "default_growth_factor")]
    pub growth_factor: f64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_growth_interval")]
    pub growth_interval: usize,
}

fn default_init_scale() -> f64 { 65536.0 }
fn default_growth_factor() -> f64 { 2.0 }
fn default_backoff_factor() -> f64 { 0.5 }
fn default_growth_interval() -> usize { 2000 }

impl Default for ScalerConfig {
    fn default() -> Self {
        Self {
            init_scale: default_init_scale(),
            growth_factor: default_growth_factor(),
            backoff_factor: default_backoff_factor(),
            growth_interval: default_growth_interval(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerState {
    pub scale: f64,
    pub growth_tracker: usize,
}

#[derive(Debug, Clone)]
pub struct LossScaler {
    config: ScalerConfig,
    enabled: bool,
    scale: f64,
    growth_tracker: usize,
}

impl LossScaler {
    pub fn new(config: ScalerConfig, enabled: bool) -> Self {
        let scale = config.init_scale;
        Self {
            config,
            enabled,
            scale,
            growth_tracker: 0,
        }
    }

    /// A scaler that never rescales and never skips.
    pub fn disabled() -> Self {
        Self::new(ScalerConfig::default(), false)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn scale(&self) -> f64 {
        if self.enabled {
            self.scale
        } else {
            1.0
        }
    }

    pub fn scale_loss(&self, loss: &Tensor) -> Result<Tensor> {
        if self.enabled {
            loss.affine(self.scale, 0.0)
        } else {
            Ok(loss.clone())
        }
    }

    /// Divides every gradient by the scale. Returns `false` when any of
    /// them is non-finite, in which case the step must be skipped.
    pub fn unscale(&self, grads: &mut GradStore, vars: &[Var]) -> Result<bool> {
        if !self.enabled {
            return Ok(true);
        }
        let inv = 1.0 / self.scale;
        let mut finite = true;
        for var in vars {
            let Some(grad) = grads.get(var.as_tensor()) else {
                continue;
            };
            let unscaled = grad.to_dtype(DType::F32)?.affine(inv, 0.0)?;
            let total = unscaled.abs()?.sum_all()?.to_scalar::<f32>()?;
            if !total.is_finite() {
                finite = false;
            }
            let unscaled = unscaled.to_dtype(grad.dtype())?;
            grads.insert(var.as_tensor(), unscaled);
        }
        Ok(finite)
    }

    /// Adjusts the scale after a step attempt.
    pub fn update(&mut self, found_inf: bool) {
        if !self.enabled {
            return;
        }
        if found_inf {
            self.scale *= self.config.backoff_factor;
            self.growth_tracker = 0;
            warn!("Non-finite gradients; step skipped, loss scale reduced to {}", self.scale);
        } else {
            self.growth_tracker += 1;
            if self.growth_tracker >= self.config.growth_interval {
                self.scale *= self.config.growth_factor;
                self.growth_tracker = 0;
                debug!("Loss scale grown to {}", self.scale);
            }
        }
    }

    pub fn state(&self) -> ScalerState {
        ScalerState {
            scale: self.scale,
            growth_tracker: self.growth_tracker,
        }
    }

    pub fn load_state(&mut self, state: &ScalerState) {
        self.scale = state.scale;
        self.growth_tracker = state.growth_tracker;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_disabled_scaler_is_identity() {
        let scaler = LossScaler::disabled();
        let loss = Tensor::new(3.0f32, &Device::Cpu).unwrap();
        assert_eq!(scaler.scale_loss(&loss).unwrap().to_scalar::<f32>().unwrap(), 3.0);
        assert_eq!(scaler.scale(), 1.0);
    }

    #[test]
    fn test_unscale_recovers_true_gradient() {
        let scaler = LossScaler::new(ScalerConfig::default(), true);
        let var = Var::new(&[2.0f32], &Device::Cpu).unwrap();
        let loss = var.as_tensor().sqr().unwrap().sum_all().unwrap();
        let mut grads = scaler.scale_loss(&loss).unwrap().backward().unwrap();
        assert!(scaler.unscale(&mut grads, &[var.clone()]).unwrap());
        let grad = grads.get(var.as_tensor()).unwrap().to_vec1::<f32>().unwrap();
        assert!((grad[0] - 4.0).abs() < 1e-3);
    }

    #[test]
    fn test_overflow_backs_off_and_growth_doubles() {
        let config = ScalerConfig {
            growth_interval: 3,
            ..ScalerConfig::default()
        };
        let mut scaler = LossScaler::new(config, true);
        scaler.update(true);
        assert_eq!(scaler.scale(), 32768.0);
        for _ in 0..3 {
            scaler.update(false);
        }
        assert_eq!(scaler.scale(), 65536.0);
        assert_eq!(scaler.state().growth_tracker, 0);
    }

    #[test]
    fn test_non_finite_gradient_detected() {
        let scaler = LossScaler::new(ScalerConfig::default(), true);
        let var = Var::new(&[0.0f32], &Device::Cpu).unwrap();
        let loss = var.as_tensor().sqrt().unwrap().sum_all().unwrap();
        let mut grads = loss.backward().unwrap();
        assert!(!scaler.unscale(&mut grads, &[var]).unwrap());
    }
}
