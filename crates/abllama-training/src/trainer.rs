use crate::adapter::AdapterPlan;
use crate::error::TrainingResult;
use abllama_abstraction::{BackendError, LanguageModel, TokenSequence};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lifecycle of a [`crate::TrainingOrchestrator`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TrainerStatus {
    Idle,
    AdapterAttached,
    Training { epoch: u32, step: usize },
    Checkpointed { epoch: u32, step: usize },
    Completed,
    Aborted { reason: String },
}

impl TrainerStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted { .. })
    }
}

/// Hyperparameters for one optimizer step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizerStep {
    pub learning_rate: f64,
    pub weight_decay: f64,
    /// Gradients are rescaled so their global norm does not exceed this.
    pub max_grad_norm: f64,
}

/// What the backend observed while applying an optimizer step.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StepStats {
    /// Global gradient norm before clipping.
    pub grad_norm: f64,
    pub clipped: bool,
}

/// Factor applied to gradients so that their norm does not exceed `max_norm`.
pub fn clip_coefficient(grad_norm: f64, max_norm: f64) -> f64 {
    if grad_norm > max_norm && grad_norm > 0.0 {
        max_norm / grad_norm
    } else {
        1.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorData {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// Named trainable tensors of an adapter (low-rank factors, fully trained
/// modules, trainable biases). Frozen base weights are never included.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AdapterWeights {
    pub tensors: BTreeMap<String, TensorData>,
}

impl AdapterWeights {
    pub fn parameter_count(&self) -> usize {
        self.tensors.values().map(|t| t.data.len()).sum()
    }
}

/// A model with an attached adapter, exposing the primitives the training
/// loop drives.
#[async_trait]
pub trait TrainableModel: Send + Sync {
    /// Runs forward and backward passes over `batch` and accumulates gradients,
    /// scaled by `loss_scale`. Returns the mean unscaled loss.
    async fn forward_backward(&mut self, batch: &[TokenSequence], loss_scale: f64) -> Result<f64, BackendError>;

    /// Clips accumulated gradients, updates trainable weights and zeroes gradients.
    async fn optimizer_step(&mut self, step: OptimizerStep) -> Result<StepStats, BackendError>;

    /// Drops accumulated gradients without updating weights.
    fn zero_grad(&mut self);

    /// Mean loss over `batch` without touching gradients or weights.
    async fn evaluate(&self, batch: &[TokenSequence]) -> Result<f64, BackendError>;

    /// Snapshot of the trainable weights.
    fn adapter_weights(&self) -> Result<AdapterWeights, BackendError>;
}

#[async_trait]
pub trait TrainingBackend: Send + Sync {
    fn id(&self) -> &'static str;

    /// Freezes the base model and injects the adapter described by `plan`.
    async fn attach_adapter(
        &self,
        model: Box<dyn LanguageModel>,
        plan: &AdapterPlan,
    ) -> TrainingResult<Box<dyn TrainableModel>>;
}
