//! AdamW with decoupled weight decay and checkpointable state, plus global
//! gradient-norm clipping.
//!
//! The update rule matches `candle_nn::AdamW`; moments are kept per named
//! parameter so they can be written to and restored from safetensors.

use std::collections::HashMap;

use candle_core::backprop::GradStore;
use candle_core::{Result, Tensor, Var};
use candle_nn::{Optimizer, ParamsAdamW};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimConfig {
    #[serde(default = "default_lr")]
    pub lr: f64,
    #[serde(default = "default_beta1")]
    pub beta1: f64,
    #[serde(default = "default_beta2")]
    pub beta2: f64,
    #[serde(default = "default_eps")]
    pub eps: f64,
    #[serde(default = "default_weight_decay")]
    pub weight_decay: f64,
    /// Global gradient norm cap applied before every step.
    #[serde(default = "default_max_grad_norm")]
    pub max_grad_norm: f64,
}

fn default_lr() -> f64 { 1e-4 }
fn default_beta1() -> f64 { 0.9 }
fn default_beta2() -> f64 { 0.999 }
fn default_eps() -> f64 { 1e-8 }
fn default_weight_decay() -> f64 { 0.01 }
fn default_max_grad_norm() -> f64 { 1.0 }

impl Default for OptimConfig {
    fn default() -> Self {
        Self {
            lr: default_lr(),
            beta1: default_beta1(),
            beta2: default_beta2(),
            eps: default_eps(),
            weight_decay: default_weight_decay(),
            max_grad_norm: default_max_grad_norm(),
        }
    }
}

impl OptimConfig {
    pub fn params(&self) -> ParamsAdamW {
        ParamsAdamW {
            lr: self.lr,
            beta1: self.beta1,
            beta2: self.beta2,
            eps: self.eps,
            weight_decay: self.weight_decay,
        }
    }
}

#[derive(Debug)]
struct ParamState {
    name: String,
    var: Var,
    first_moment: Tensor,
    second_moment: Tensor,
}

#[derive(Debug)]
pub struct AdamW {
    params: Vec<ParamState>,
    config: ParamsAdamW,
    step: usize,
}

impl AdamW {
    /// Optimiser over named parameters. Names key the saved state.
    pub fn from_named(vars: Vec<(String, Var)>, config: ParamsAdamW) -> Result<Self> {
        let params = vars
            .into_iter()
            .map(|(name, var)| {
                Ok(ParamState {
                    first_moment: var.zeros_like()?,
                    second_moment: var.zeros_like()?,
                    name,
                    var,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { params, config, step: 0 })
    }

    pub fn step_count(&self) -> usize {
        self.step
    }

    pub fn vars(&self) -> Vec<Var> {
        self.params.iter().map(|p| p.var.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Moment tensors keyed `{name}.m` and `{name}.v`.
    pub fn state_tensors(&self) -> HashMap<String, Tensor> {
        let mut state = HashMap::with_capacity(self.params.len() * 2);
        for p in &self.params {
            state.insert(format!("{}.m", p.name), p.first_moment.clone());
            state.insert(format!("{}.v", p.name), p.second_moment.clone());
        }
        state
    }

    /// Restores moments and the step count. Parameters absent from `state`
    /// keep fresh moments.
    pub fn load_state(&mut self, state: &HashMap<String, Tensor>, step: usize) -> Result<usize> {
        let mut restored = 0;
        for p in &mut self.params {
            let m = state.get(&format!("{}.m", p.name));
            let v = state.get(&format!("{}.v", p.name));
            if let (Some(m), Some(v)) = (m, v) {
                p.first_moment = m.to_device(p.var.device())?.to_dtype(p.var.dtype())?;
                p.second_moment = v.to_device(p.var.device())?.to_dtype(p.var.dtype())?;
                restored += 1;
            }
        }
        self.step = step;
        debug!("Restored optimiser state for {}/{} parameters at step {}", restored, self.params.len(), step);
        Ok(restored)
    }
}

impl Optimizer for AdamW {
    type Config = ParamsAdamW;

    fn new(vars: Vec<Var>, config: ParamsAdamW) -> Result<Self> {
        let named = vars.into_iter().enumerate().map(|(i, v)| (format!("param.{}", i), v)).collect();
        Self::from_named(named, config)
    }

    fn step(&mut self, grads: &GradStore) -> Result<()> {
        self.step += 1;
        let c = &self.config;
        let t = self.step as i32;
        let lr = c.lr;
        let correction1 = 1.0 - c.beta1.powi(t);
        let correction2 = 1.0 - c.beta2.powi(t);

        for p in &mut self.params {
            let Some(grad) = grads.get(p.var.as_tensor()) else {
                continue;
            };
            let m = ((&p.first_moment * c.beta1)? + (grad * (1.0 - c.beta1))?)?;
            let v = ((&p.second_moment * c.beta2)? + (grad.sqr()? * (1.0 - c.beta2))?)?;
            let m_hat = (&m / correction1)?;
            let v_hat = (&v / correction2)?;
            let decayed = (p.var.as_tensor() * (1.0 - lr * c.weight_decay))?;
            let update = (m_hat / (v_hat.sqrt()? + c.eps)?)?;
            p.var.set(&(decayed - (update * lr)?)?)?;
            p.first_moment = m;
            p.second_moment = v;
        }
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.config.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.config.lr = lr;
    }
}

/// L2 norm over every gradient of `vars`.
pub fn global_grad_norm(grads: &GradStore, vars: &[Var]) -> Result<f64> {
    let mut total = 0f64;
    for var in vars {
        if let Some(grad) = grads.get(var.as_tensor()) {
            total += grad.to_dtype(candle_core::DType::F32)?.sqr()?.sum_all()?.to_scalar::<f32>()? as f64;
        }
    }
    Ok(total.sqrt())
}

/// Rescales gradients so their global norm is at most `max_norm`. Returns
/// the norm before clipping.
pub fn clip_grad_norm(grads: &mut GradStore, vars: &[Var], max_norm: f64) -> Result<f64> {
    let norm = global_grad_norm(grads, vars)?;
    if max_norm > 0.0 && norm > max_norm {
        let scale = max_norm / (norm + 1e-6);
        for var in vars {
            if let Some(grad) = grads.get(var.as_tensor()) {
                let clipped = (grad * scale)?;
                grads.insert(var.as_tensor(), clipped);
            }
        }
    }
    Ok(norm)
}
