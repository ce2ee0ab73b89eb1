//! Inference entry point.

use crate::config::AppConfig;
use crate::device::select_accelerator;
use crate::error::GenerationResult;
use crate::generation::{read_prompts, BatchProgress, BatchWriter, GenerationDriver, LineSource};
use abllama_abstraction::{CancellationToken, ConfigError, LoadOptions, ModelBackend};
use std::io::Write;
use std::path::PathBuf;
use tracing::{info, warn};

/// Which generation mode an invocation runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InferenceMode {
    Interactive,
    Batch { input: PathBuf, output: PathBuf },
}

impl InferenceMode {
    /// Resolves the command-line flags into exactly one mode.
    pub fn from_flags(
        interactive: bool,
        input_file: Option<PathBuf>,
        output_file: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        match (interactive, input_file, output_file) {
            (true, Some(_), _) => Err(ConfigError::Conflict(
                "--interactive cannot be combined with --input-file".to_string(),
            )),
            (false, None, _) => Err(ConfigError::Conflict(
                "either --interactive or --input-file is required".to_string(),
            )),
            (false, Some(_), None) => Err(ConfigError::MissingPath(
                "--output-file is required with --input-file".to_string(),
            )),
            (false, Some(input), Some(output)) => Ok(Self::Batch { input, output }),
            (true, None, output) => {
                if let Some(output) = output {
                    warn!(output = %output.display(), "--output-file is ignored in interactive mode");
                }
                Ok(Self::Interactive)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub model_path: PathBuf,
    pub mode: InferenceMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceSummary {
    pub generations: usize,
    /// Where batch output was written.
    pub output: Option<PathBuf>,
}

/// Runs one inference invocation.
///
/// Configuration, accelerator and (in batch mode) the prompt file are checked
/// before the model is loaded. `terminal` is only read in interactive mode.
pub async fn run_inference<R: LineSource, W: Write>(
    backend: &dyn ModelBackend,
    config: &AppConfig,
    request: &InferenceRequest,
    terminal: (R, W),
    progress: &dyn BatchProgress,
    cancel: CancellationToken,
) -> GenerationResult<InferenceSummary> {
    config.generation.validate()?;
    let device = select_accelerator(backend, config.backend.device)?;

    let prompts = match &request.mode {
        InferenceMode::Batch { input, .. } => Some(read_prompts(input)?),
        InferenceMode::Interactive => None,
    };

    let options = LoadOptions { precision: config.backend.precision, device };
    let model = backend.load(&request.model_path, &options).await?;
    let tokenizer = backend.load_tokenizer(&request.model_path).await?;
    info!(
        model_id = model.model_id(),
        precision = %model.precision(),
        device = %model.device(),
        "model loaded"
    );

    let driver = GenerationDriver::new(model, tokenizer, config.generation)?.with_cancellation(cancel);

    match (&request.mode, prompts) {
        (InferenceMode::Batch { output, .. }, Some(prompts)) => {
            let mut writer = BatchWriter::create(output)?;
            let generations = driver.run_batch_to(&prompts, progress, &mut writer).await?;
            let output = writer.finish()?;
            info!(output = %output.display(), generations, "All the outputs have been saved");
            Ok(InferenceSummary { generations, output: Some(output) })
        }
        _ => {
            let (input, output) = terminal;
            let generations = driver.run_interactive(input, output).await?;
            Ok(InferenceSummary { generations, output: None })
        }
    }
}
