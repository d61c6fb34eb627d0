//! Metric-driven learning rate schedules

use serde::{Deserialize, Serialize};

/// Trait for learning rate schedulers that react to a monitored metric
pub trait Scheduler: Send {
    /// Scheduler name
    fn name(&self) -> &str;

    /// Observe `metric` at the end of an epoch; returns the new learning rate if it changed
    fn step(&mut self, metric: f64, current_lr: f64) -> Option<f64>;

    /// Forget everything observed so far
    fn reset(&mut self);
}

/// Settings of [`PlateauScheduler`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlateauConfig {
    /// Epochs without improvement before reducing
    pub patience: usize,
    /// Multiplier applied on reduction
    pub factor: f64,
    /// Minimum decrease that counts as an improvement
    pub min_delta: f64,
    /// Epochs to wait after a reduction before counting again
    pub cooldown: usize,
    /// Floor for the learning rate
    pub min_lr: f64,
}

impl PlateauConfig {
    /// Defaults with the given patience
    pub fn with_patience(patience: usize) -> Self {
        Self {
            patience,
            factor: 0.1,
            min_delta: 1e-4,
            cooldown: 0,
            min_lr: 0.0,
        }
    }
}

/// Reduce the learning rate when a minimized metric stops improving
#[derive(Debug, Clone)]
pub struct PlateauScheduler {
    config: PlateauConfig,
    best: f64,
    wait: usize,
    cooldown_counter: usize,
}

impl PlateauScheduler {
    /// Create a new plateau scheduler
    pub fn new(config: PlateauConfig) -> Self {
        Self {
            config,
            best: f64::INFINITY,
            wait: 0,
            cooldown_counter: 0,
        }
    }

    /// Best metric seen so far
    pub fn best(&self) -> f64 {
        self.best
    }

    /// Consecutive epochs without improvement
    pub fn wait(&self) -> usize {
        self.wait
    }

    fn in_cooldown(&self) -> bool {
        self.cooldown_counter > 0
    }
}

impl Scheduler for PlateauScheduler {
    fn name(&self) -> &str {
        "reduce_lr_on_plateau"
    }

    fn step(&mut self, metric: f64, current_lr: f64) -> Option<f64> {
        if self.in_cooldown() {
            self.cooldown_counter -= 1;
            self.wait = 0;
        }

        if metric < self.best - self.config.min_delta {
            self.best = metric;
            self.wait = 0;
            return None;
        }
        if self.in_cooldown() {
            return None;
        }

        self.wait += 1;
        if self.wait < self.config.patience || current_lr <= self.config.min_lr {
            return None;
        }
        let new_lr = (current_lr * self.config.factor).max(self.config.min_lr);
        self.cooldown_counter = self.config.cooldown;
        self.wait = 0;
        Some(new_lr)
    }

    fn reset(&mut self) {
        self.best = f64::INFINITY;
        self.wait = 0;
        self.cooldown_counter = 0;
    }
}
