//! Training command implementation.

use crate::config::{load_config, GlobalOptions};
use abllama_core::finetune::{run_finetune, FinetuneRequest};
use abllama_models::BackendFactory;
use abllama_training::TracingProgressSink;
use anyhow::Context;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;

/// Execute the train command.
pub async fn execute(
    options: &GlobalOptions,
    model: PathBuf,
    input_file: Option<PathBuf>,
    output_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let request = FinetuneRequest { model_path: model, dataset_path: input_file, output_dir };
    request.validate()?;

    let config = load_config(options)?;
    let backend = BackendFactory::create_from_str(&config.backend.engine)?;
    let training_backend = BackendFactory::create_training_from_str(&config.backend.engine)?;

    let outcome = run_finetune(
        backend.as_ref(),
        training_backend,
        &config,
        &request,
        Arc::new(TracingProgressSink),
        super::cancel_on_ctrl_c(),
    )
    .await
    .with_context(|| format!("Fine-tuning failed for model {}", request.model_path.display()))?;

    let manifest = &outcome.manifest;
    println!();
    println!("{}", "Fine-tuning complete".bold().green());
    println!("  Job: {}", manifest.job_id.to_string().cyan());
    println!("  {}", manifest.adapter_report.to_string().dimmed());
    if let Some(steps) = manifest.metrics.steps {
        println!("  Steps: {}", steps);
    }
    if let Some(loss) = manifest.metrics.train_loss {
        println!("  Train loss: {:.4}", loss);
    }
    if let Some(loss) = manifest.metrics.eval_loss {
        println!("  Eval loss: {:.4}", loss);
    }
    if let Some(batch_size) = manifest.metrics.final_batch_size {
        println!("  Batch size: {}", batch_size);
    }
    println!("  Checkpoints: {}", outcome.checkpoints.len());
    println!("  Adapter: {}", outcome.output_dir.display().to_string().cyan());
    println!();
    Ok(())
}
