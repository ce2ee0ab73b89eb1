//! Generate command implementation.

use crate::config::{load_config, GlobalOptions};
use abllama_core::generation::{BatchProgress, StdinLines};
use abllama_core::inference::{run_inference, InferenceMode, InferenceRequest};
use abllama_models::BackendFactory;
use anyhow::Context;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;

/// Renders batch progress as a processed/total bar on stderr.
struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::default_bar().template("{bar:40.cyan/blue} {pos}/{len} [{elapsed_precise}]") {
            bar.set_style(style);
        }
        Self { bar }
    }
}

impl BatchProgress for BarProgress {
    fn start(&self, total: usize) {
        self.bar.println("Start generating...");
        self.bar.set_length(total as u64);
    }

    fn advance(&self, processed: usize, _total: usize) {
        self.bar.set_position(processed as u64);
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

/// Execute the generate command.
pub async fn execute(
    options: &GlobalOptions,
    model: PathBuf,
    interactive: bool,
    input_file: Option<PathBuf>,
    output_file: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mode = InferenceMode::from_flags(interactive, input_file, output_file)?;
    let config = load_config(options)?;
    let backend = BackendFactory::create_from_str(&config.backend.engine)?;

    let request = InferenceRequest { model_path: model, mode };
    let progress = BarProgress::new();
    let cancel = super::cancel_on_ctrl_c();

    let stdout = std::io::stdout();
    let summary = run_inference(
        backend.as_ref(),
        &config,
        &request,
        (StdinLines::new(), stdout.lock()),
        &progress,
        cancel,
    )
    .await
    .with_context(|| format!("Generation failed for model {}", request.model_path.display()))?;

    if let Some(output) = summary.output {
        println!(
            "{} {} generations saved to {}",
            "✓".green(),
            summary.generations,
            output.display().to_string().cyan()
        );
    }
    Ok(())
}
