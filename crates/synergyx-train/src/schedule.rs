//! One-cycle learning-rate policy (Smith & Topin 2019), stepped once per
//! optimiser step.
//!
//! ```text
//! initial = max_lr / div_factor
//! final   = initial / final_div_factor
//! warmup:  initial -> max_lr   over the first pct_start of steps (cosine)
//! anneal:  max_lr  -> final    over the rest (cosine)
//! ```

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneCycleConfig {
    /// Without the schedule the optimiser keeps its configured rate.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_max_lr")]
    pub max_lr: f64,
    #[serde(default = "default_pct_start")]
    pub pct_start: f64,
    #[serde(default = "default_div_factor")]
    pub div_factor: f64,
    #[serde(default = "default_final_div_factor")]
    pub final_div_factor: f64,
}

fn default_enabled() -> bool { true }
fn default_max_lr() -> f64 { 1e-3 }
fn default_pct_start() -> f64 { 0.1 }
fn default_div_factor() -> f64 { 10.0 }
fn default_final_div_factor() -> f64 { 100.0 }

impl Default for OneCycleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_lr: default_max_lr(),
            pct_start: default_pct_start(),
            div_factor: default_div_factor(),
            final_div_factor: default_final_div_factor(),
        }
    }
}

fn cosine_anneal(start: f64, end: f64, pct: f64) -> f64 {
    end + (start - end) / 2.0 * ((PI * pct).cos() + 1.0)
}

/// Schedule position, stored in checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneCycleState {
    pub step: usize,
    pub total_steps: usize,
}

#[derive(Debug, Clone)]
pub struct OneCycle {
    config: OneCycleConfig,
    total_steps: usize,
    step: usize,
}

impl OneCycle {
    pub fn new(config: OneCycleConfig, total_steps: usize) -> Self {
        Self {
            config,
            total_steps: total_steps.max(1),
            step: 0,
        }
    }

    pub fn initial_lr(&self) -> f64 {
        self.config.max_lr / self.config.div_factor
    }

    pub fn min_lr(&self) -> f64 {
        self.initial_lr() / self.config.final_div_factor
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    /// Last step of the warmup phase.
    fn warmup_end(&self) -> f64 {
        self.config.pct_start * self.total_steps as f64 - 1.0
    }

    pub fn lr_at(&self, step: usize) -> f64 {
        let step = step.min(self.total_steps - 1) as f64;
        let warmup_end = self.warmup_end();
        let anneal_end = (self.total_steps - 1) as f64;

        if warmup_end > 0.0 && step <= warmup_end {
            cosine_anneal(self.initial_lr(), self.config.max_lr, step / warmup_end)
        } else {
            let start = warmup_end.max(0.0);
            let span = anneal_end - start;
            let pct = if span > 0.0 { (step - start) / span } else { 1.0 };
            cosine_anneal(self.config.max_lr, self.min_lr(), pct.clamp(0.0, 1.0))
        }
    }

    pub fn current_lr(&self) -> f64 {
        self.lr_at(self.step)
    }

    /// Advances one optimiser step and returns the rate for the next one.
    pub fn step(&mut self) -> f64 {
        self.step += 1;
        self.current_lr()
    }

    pub fn steps_taken(&self) -> usize {
        self.step
    }

    pub fn state(&self) -> OneCycleState {
        OneCycleState {
            step: self.step,
            total_steps: self.total_steps,
        }
    }

    pub fn load_state(&mut self, state: &OneCycleState) {
        self.total_steps = state.total_steps.max(1);
        self.step = state.step;
    }
}
