//! Training schedule and learning-rate scheduling.

use abllama_abstraction::ConfigError;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// How often a periodic action (evaluation, checkpointing, logging) fires.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "IntervalRepr", into = "IntervalRepr")]
pub enum Interval {
    /// At the end of every epoch.
    Epoch,
    /// Every `fraction` of an epoch's optimizer steps, in `(0, 1]`.
    Fraction(f64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum IntervalRepr {
    Keyword(String),
    Fraction(f64),
}

impl TryFrom<IntervalRepr> for Interval {
    type Error = String;

    fn try_from(repr: IntervalRepr) -> Result<Self, Self::Error> {
        match repr {
            IntervalRepr::Keyword(k) if k.eq_ignore_ascii_case("epoch") => Ok(Self::Epoch),
            IntervalRepr::Keyword(k) => Err(format!("unknown interval '{k}' (expected \"epoch\" or a fraction)")),
            IntervalRepr::Fraction(f) => Ok(Self::Fraction(f)),
        }
    }
}

impl From<Interval> for IntervalRepr {
    fn from(interval: Interval) -> Self {
        match interval {
            Interval::Epoch => Self::Keyword("epoch".to_string()),
            Interval::Fraction(f) => Self::Fraction(f),
        }
    }
}

impl Interval {
    fn validate(&self, field: &str) -> Result<(), ConfigError> {
        match self {
            Self::Epoch => Ok(()),
            Self::Fraction(f) if f.is_finite() && *f > 0.0 && *f <= 1.0 => Ok(()),
            Self::Fraction(_) => Err(ConfigError::invalid(field, "fraction must be in (0, 1]")),
        }
    }

    /// Optimizer steps between two firings for epochs of `steps_per_epoch` steps.
    pub fn every_steps(&self, steps_per_epoch: usize) -> usize {
        match self {
            Self::Epoch => steps_per_epoch.max(1),
            Self::Fraction(f) => ((f * steps_per_epoch as f64).ceil() as usize).max(1),
        }
    }

    /// Whether the action fires after optimizer step `global_step` (1-based).
    pub fn fires(&self, global_step: usize, steps_per_epoch: usize, epoch_end: bool) -> bool {
        match self {
            Self::Epoch => epoch_end,
            Self::Fraction(_) => global_step % self.every_steps(steps_per_epoch) == 0,
        }
    }
}

/// Shape of the learning-rate curve after warmup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LrScheduleKind {
    Constant,
    Linear,
    #[default]
    Cosine,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSchedule {
    pub epochs: u32,
    pub learning_rate: f64,
    pub lr_schedule: LrScheduleKind,
    /// Initial per-step mini-batch size.
    pub batch_size: usize,
    /// Halve `batch_size` on out-of-memory instead of failing.
    pub auto_find_batch_size: bool,
    pub eval_batch_size: usize,
    pub gradient_accumulation_steps: usize,
    pub warmup_ratio: f64,
    pub weight_decay: f64,
    pub max_grad_norm: f64,
    pub eval_every: Interval,
    pub save_every: Interval,
    pub log_every: Interval,
    pub save_total_limit: usize,
    pub seed: u64,
    /// Examples are truncated to this many tokens.
    pub max_seq_len: usize,
}

impl Default for TrainingSchedule {
    fn default() -> Self {
        Self {
            epochs: 2,
            learning_rate: 1e-5,
            lr_schedule: LrScheduleKind::Cosine,
            batch_size: 36,
            auto_find_batch_size: true,
            eval_batch_size: 36,
            gradient_accumulation_steps: 4,
            warmup_ratio: 0.03,
            weight_decay: 0.01,
            max_grad_norm: 0.3,
            eval_every: Interval::Epoch,
            save_every: Interval::Epoch,
            log_every: Interval::Fraction(0.1),
            save_total_limit: 3,
            seed: 42,
            max_seq_len: 256,
        }
    }
}

impl TrainingSchedule {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.epochs == 0 {
            return Err(ConfigError::invalid("training.epochs", "must be >= 1"));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(ConfigError::invalid("training.learning_rate", "must be > 0"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::invalid("training.batch_size", "must be >= 1"));
        }
        if self.eval_batch_size == 0 {
            return Err(ConfigError::invalid("training.eval_batch_size", "must be >= 1"));
        }
        if self.gradient_accumulation_steps == 0 {
            return Err(ConfigError::invalid("training.gradient_accumulation_steps", "must be >= 1"));
        }
        if !self.warmup_ratio.is_finite() || !(0.0..1.0).contains(&self.warmup_ratio) {
            return Err(ConfigError::invalid("training.warmup_ratio", "must be in [0, 1)"));
        }
        if !self.weight_decay.is_finite() || self.weight_decay < 0.0 {
            return Err(ConfigError::invalid("training.weight_decay", "must be >= 0"));
        }
        if !self.max_grad_norm.is_finite() || self.max_grad_norm <= 0.0 {
            return Err(ConfigError::invalid("training.max_grad_norm", "must be > 0"));
        }
        if self.save_total_limit == 0 {
            return Err(ConfigError::invalid("training.save_total_limit", "must be >= 1"));
        }
        if self.max_seq_len == 0 {
            return Err(ConfigError::invalid("training.max_seq_len", "must be >= 1"));
        }
        self.eval_every.validate("training.eval_every")?;
        self.save_every.validate("training.save_every")?;
        self.log_every.validate("training.log_every")?;
        Ok(())
    }

    /// Optimizer steps in one epoch over `examples` at mini-batch size `batch_size`.
    pub fn steps_per_epoch(&self, examples: usize, batch_size: usize) -> usize {
        let mini_batches = examples.div_ceil(batch_size.max(1));
        mini_batches.div_ceil(self.gradient_accumulation_steps).max(1)
    }
}

/// Linear warmup followed by a constant, linear or cosine decay to zero.
#[derive(Debug, Clone, PartialEq)]
pub struct LrScheduler {
    kind: LrScheduleKind,
    base_lr: f64,
    warmup_steps: usize,
    total_steps: usize,
}

impl LrScheduler {
    /// Warmup covers `ceil(warmup_ratio * total_steps)` steps.
    pub fn new(kind: LrScheduleKind, base_lr: f64, warmup_ratio: f64, total_steps: usize) -> Self {
        let warmup_steps = (warmup_ratio * total_steps as f64).ceil() as usize;
        Self { kind, base_lr, warmup_steps, total_steps }
    }

    pub fn warmup_steps(&self) -> usize {
        self.warmup_steps
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    /// Re-targets the decay after the step count changed (e.g. smaller batches).
    /// The warmup length is kept.
    pub fn set_total_steps(&mut self, total_steps: usize) {
        self.total_steps = total_steps.max(self.warmup_steps);
    }

    /// Learning rate for the optimizer step taken after `step` completed steps.
    pub fn lr_at(&self, step: usize) -> f64 {
        if step < self.warmup_steps {
            return self.base_lr * step as f64 / self.warmup_steps.max(1) as f64;
        }

        let decay_steps = self.total_steps.saturating_sub(self.warmup_steps).max(1) as f64;
        let progress = (step - self.warmup_steps) as f64 / decay_steps;

        let factor = match self.kind {
            LrScheduleKind::Constant => 1.0,
            LrScheduleKind::Linear => (1.0 - progress).max(0.0),
            LrScheduleKind::Cosine => (0.5 * (1.0 + (PI * progress.min(1.0)).cos())).max(0.0),
        };
        self.base_lr * factor
    }
}
