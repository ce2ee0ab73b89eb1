//! Fine-tuning entry point.

use crate::config::AppConfig;
use crate::device::select_accelerator;
use abllama_abstraction::{CancellationToken, ConfigError, LoadOptions, ModelBackend};
use abllama_training::dataset::compute_dataset_id;
use abllama_training::{
    load_text_dataset, split_dataset, ModelSpec, ProgressSink, TrainingBackend, TrainingOrchestrator,
    TrainingOutcome, TrainingResult,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct FinetuneRequest {
    pub model_path: PathBuf,
    pub dataset_path: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
}

impl FinetuneRequest {
    /// Returns the dataset and output paths, both of which are required.
    pub fn validate(&self) -> Result<(&Path, &Path), ConfigError> {
        let dataset = self
            .dataset_path
            .as_deref()
            .ok_or_else(|| ConfigError::MissingPath("--input-file is required".to_string()))?;
        let output = self
            .output_dir
            .as_deref()
            .ok_or_else(|| ConfigError::MissingPath("--output-dir is required".to_string()))?;

        if !dataset.is_file() {
            return Err(ConfigError::MissingPath(format!("dataset not found: {}", dataset.display())));
        }
        Ok((dataset, output))
    }
}

/// Runs one fine-tuning job end to end.
///
/// Paths, configuration and the accelerator are checked before the dataset
/// or the model is loaded.
pub async fn run_finetune(
    backend: &dyn ModelBackend,
    training_backend: Arc<dyn TrainingBackend>,
    config: &AppConfig,
    request: &FinetuneRequest,
    progress: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
) -> TrainingResult<TrainingOutcome> {
    let (dataset_path, output_dir) = request.validate()?;
    config.adapter.validate()?;
    config.training.validate()?;
    let device = select_accelerator(backend, config.backend.device)?;

    let dataset = load_text_dataset(dataset_path, &config.dataset.text_field)?;
    let dataset_id = compute_dataset_id(&dataset)?;
    let split = split_dataset(&dataset, config.dataset.test_fraction, config.training.seed)?;
    info!(
        dataset = %dataset_path.display(),
        train = split.train.len(),
        eval = split.eval.len(),
        "dataset split"
    );

    let mut orchestrator = TrainingOrchestrator::new(
        config.adapter.clone(),
        config.training.clone(),
        output_dir.to_path_buf(),
        training_backend,
    )?
    .with_progress(progress)
    .with_cancellation(cancel);

    let options = LoadOptions { precision: config.backend.precision, device };
    let model = backend.load(&request.model_path, &options).await?;
    let tokenizer = backend.load_tokenizer(&request.model_path).await?;
    let base_model = ModelSpec {
        engine: backend.id().to_string(),
        model_id: model.model_id().to_string(),
        path: request.model_path.clone(),
    };
    info!(job_id = %orchestrator.job_id(), model_id = %base_model.model_id, "model loaded");

    orchestrator.attach_adapter(model).await?;
    let outcome = orchestrator.train(tokenizer.as_ref(), &split, base_model, dataset_id).await?;

    info!(output = %outcome.output_dir.display(), "adapter saved");
    Ok(outcome)
}
