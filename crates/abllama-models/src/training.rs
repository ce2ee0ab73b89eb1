//! Trainable adapter model for the mock backend.

use crate::mock::MockModel;
use abllama_abstraction::{BackendError, LanguageModel, TokenSequence};
use abllama_training::{
    trainer::clip_coefficient, AdapterPlan, AdapterWeights, OptimizerStep, StepStats, TensorData, TrainableModel,
    TrainingBackend, TrainingError, TrainingResult, WeightRole,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::debug;

/// Attaches adapters to models loaded by [`crate::MockBackend`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MockTrainingBackend;

#[async_trait]
impl TrainingBackend for MockTrainingBackend {
    fn id(&self) -> &'static str {
        "mock"
    }

    async fn attach_adapter(
        &self,
        model: Box<dyn LanguageModel>,
        plan: &AdapterPlan,
    ) -> TrainingResult<Box<dyn TrainableModel>> {
        let model = model
            .into_any()
            .downcast::<MockModel>()
            .map_err(|_| TrainingError::Backend(BackendError::Other("model was not loaded by the mock backend".into())))?;

        Ok(Box::new(MockTrainableModel::new(&model, plan)))
    }
}

/// Simulates a training step: the loss decays with the number of updates and
/// batches larger than the memory budget fail with out-of-memory.
#[derive(Debug)]
pub struct MockTrainableModel {
    memory_tokens: usize,
    tensors: BTreeMap<String, TensorData>,
    pending_grad: f64,
    updates: usize,
}

impl MockTrainableModel {
    fn new(model: &MockModel, plan: &AdapterPlan) -> Self {
        let rank = plan.config.rank;
        let mut tensors = BTreeMap::new();

        for planned in &plan.weights {
            let w = &planned.weight;
            match planned.role {
                WeightRole::LowRank => {
                    // A starts small and non-zero, B starts at zero so the delta is zero.
                    let a: Vec<f32> = (0..rank * w.cols).map(|i| ((i % 7) as f32 - 3.0) * 1e-3).collect();
                    tensors.insert(format!("{}.lora_A.weight", w.name), TensorData { shape: vec![rank, w.cols], data: a });
                    tensors.insert(
                        format!("{}.lora_B.weight", w.name),
                        TensorData { shape: vec![w.rows, rank], data: vec![0.0; w.rows * rank] },
                    );
                }
                WeightRole::FullyTrainable => {
                    tensors.insert(
                        format!("{}.weight", w.name),
                        TensorData { shape: vec![w.rows, w.cols], data: vec![0.0; w.rows * w.cols] },
                    );
                }
                WeightRole::Frozen => {}
            }
            let bias_trainable = planned.role == WeightRole::FullyTrainable
                || planned.trainable_parameters > planned.added_parameters;
            if w.bias.is_some() && bias_trainable {
                let len = w.bias_parameters();
                tensors.insert(format!("{}.bias", w.name), TensorData { shape: vec![len], data: vec![0.0; len] });
            }
        }

        debug!(model_id = model.model_id(), tensors = tensors.len(), "adapter tensors initialised");
        Self { memory_tokens: model.config().memory_tokens, tensors, pending_grad: 0.0, updates: 0 }
    }

    fn check_memory(&self, batch: &[TokenSequence]) -> Result<(), BackendError> {
        let tokens: usize = batch.iter().map(TokenSequence::len).sum();
        if tokens > self.memory_tokens {
            return Err(BackendError::ResourceExhausted(format!(
                "batch of {} sequences ({tokens} tokens) exceeds the device budget of {}",
                batch.len(),
                self.memory_tokens
            )));
        }
        Ok(())
    }

    fn current_loss(&self) -> f64 {
        0.5 + 3.0 / (1.0 + 0.25 * self.updates as f64)
    }
}

#[async_trait]
impl TrainableModel for MockTrainableModel {
    async fn forward_backward(&mut self, batch: &[TokenSequence], loss_scale: f64) -> Result<f64, BackendError> {
        self.check_memory(batch)?;
        let loss = self.current_loss();
        self.pending_grad += loss * loss_scale;
        Ok(loss)
    }

    async fn optimizer_step(&mut self, step: OptimizerStep) -> Result<StepStats, BackendError> {
        let grad_norm = self.pending_grad;
        let coefficient = clip_coefficient(grad_norm, step.max_grad_norm);
        let decay = (1.0 - step.learning_rate * step.weight_decay) as f32;
        let update = (step.learning_rate * grad_norm * coefficient) as f32;

        for (name, tensor) in &mut self.tensors {
            let is_b = name.contains(".lora_B.");
            for value in &mut tensor.data {
                *value = *value * decay + if is_b { update } else { 0.0 };
            }
        }

        self.pending_grad = 0.0;
        self.updates += 1;
        Ok(StepStats { grad_norm, clipped: coefficient < 1.0 })
    }

    fn zero_grad(&mut self) {
        self.pending_grad = 0.0;
    }

    async fn evaluate(&self, batch: &[TokenSequence]) -> Result<f64, BackendError> {
        self.check_memory(batch)?;
        Ok(self.current_loss() + 0.1)
    }

    fn adapter_weights(&self) -> Result<AdapterWeights, BackendError> {
        Ok(AdapterWeights { tensors: self.tensors.clone() })
    }
}
