//! Generation driver: tokenize, generate, detokenize.
//!
//! Two modes run on top of [`GenerationDriver::generate_one`]:
//! - interactive: read a prompt, print the generation, repeat until a blank
//!   line, end of input or cancellation
//! - batch: a fixed list of prompts, one generation call per prompt, in order

pub mod input;
pub mod progress;
pub mod prompts;
pub mod writer;

pub use input::{LineSource, StdinLines};
pub use progress::{BatchProgress, TracingBatchProgress};
pub use prompts::{parse_prompts, read_prompts};
pub use writer::BatchWriter;

use crate::error::{GenerationError, GenerationResult};
use abllama_abstraction::{CancellationToken, DecodingConfig, LanguageModel, Tokenizer};
use std::io::Write;
use tracing::debug;

/// Text shown before each interactive read.
pub const INTERACTIVE_PROMPT: &str = "Input:";

/// Owns a loaded model and its tokenizer for the duration of a session.
pub struct GenerationDriver {
    model: Box<dyn LanguageModel>,
    tokenizer: Box<dyn Tokenizer>,
    config: DecodingConfig,
    cancel: CancellationToken,
}

impl GenerationDriver {
    pub fn new(
        model: Box<dyn LanguageModel>,
        tokenizer: Box<dyn Tokenizer>,
        config: DecodingConfig,
    ) -> GenerationResult<Self> {
        config.validate()?;
        Ok(Self { model, tokenizer, config, cancel: CancellationToken::new() })
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Generates for a single prompt and returns the decoded sequence,
    /// prompt included, with special tokens removed.
    pub async fn generate_one(&self, prompt: &str) -> GenerationResult<String> {
        if prompt.trim().is_empty() {
            return Err(GenerationError::Data("prompt is blank".to_string()));
        }
        if self.cancel.is_cancelled() {
            return Err(GenerationError::Cancelled);
        }

        let input = self.tokenizer.tokenize(prompt)?;
        let output = self.model.generate(&input, self.config, &self.cancel).await?;
        debug!(
            model_id = self.model.model_id(),
            prompt_tokens = input.len(),
            new_tokens = output.len().saturating_sub(input.len()),
            "generated"
        );

        Ok(self.tokenizer.detokenize(&output, true)?)
    }

    /// Reads prompts from `input` until a blank line or end of input, writing
    /// each generation to `output`. Returns the number of generations.
    ///
    /// Cancellation interrupts a pending read and fails the session with
    /// [`GenerationError::Cancelled`].
    pub async fn run_interactive<R: LineSource, W: Write>(&self, mut input: R, mut output: W) -> GenerationResult<usize> {
        let mut generated = 0;

        loop {
            write!(output, "{INTERACTIVE_PROMPT}")?;
            output.flush()?;

            let line = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(GenerationError::Cancelled),
                line = input.next_line() => line?,
            };
            // A terminal interrupt can close stdin before the token is observed.
            let Some(line) = line else {
                if self.cancel.is_cancelled() {
                    return Err(GenerationError::Cancelled);
                }
                break;
            };
            if line.trim().is_empty() {
                break;
            }

            let text = self.generate_one(&line).await?;
            writeln!(output, "{text}")?;
            output.flush()?;
            generated += 1;
        }

        debug!(generated, "interactive session ended");
        Ok(generated)
    }

    /// Generates for every prompt in order. Each result is handed to
    /// `on_result` as soon as it is available and progress is reported after
    /// every prompt.
    pub async fn run_batch<F>(
        &self,
        prompts: &[String],
        progress: &dyn BatchProgress,
        mut on_result: F,
    ) -> GenerationResult<Vec<String>>
    where
        F: FnMut(usize, &str) -> GenerationResult<()>,
    {
        let total = prompts.len();
        progress.start(total);

        let mut results = Vec::with_capacity(total);
        for (index, prompt) in prompts.iter().enumerate() {
            let text = self.generate_one(prompt).await?;
            on_result(index, &text)?;
            results.push(text);
            progress.advance(index + 1, total);
        }

        progress.finish();
        Ok(results)
    }

    /// Runs [`Self::run_batch`], streaming results into `writer`.
    pub async fn run_batch_to(
        &self,
        prompts: &[String],
        progress: &dyn BatchProgress,
        writer: &mut BatchWriter,
    ) -> GenerationResult<usize> {
        let results = self.run_batch(prompts, progress, |_, text| Ok(writer.write_line(text)?)).await?;
        Ok(results.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abllama_abstraction::{
        Accelerator, BackendError, LoadOptions, ModelBackend, Precision, TokenSequence, WeightInfo,
    };
    use abllama_models::{MockBackend, MockModelConfig};
    use async_trait::async_trait;
    use std::any::Any;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    fn lines(text: &'static str) -> tokio::io::Lines<&'static [u8]> {
        text.as_bytes().lines()
    }

    async fn driver() -> (TempDir, GenerationDriver) {
        let temp = TempDir::new().unwrap();
        MockModelConfig::llama_like("tiny", 1, 8, 16).write_to(temp.path()).unwrap();

        let backend = MockBackend::with_accelerators(1);
        let options = LoadOptions { precision: Precision::Bf16, device: Accelerator { ordinal: 0, name: "mock".into() } };
        let model = backend.load(temp.path(), &options).await.unwrap();
        let tokenizer = backend.load_tokenizer(temp.path()).await.unwrap();

        let driver = GenerationDriver::new(model, tokenizer, DecodingConfig::default()).unwrap();
        (temp, driver)
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(usize, usize)>>);

    impl BatchProgress for Recorder {
        fn start(&self, _total: usize) {}

        fn advance(&self, processed: usize, total: usize) {
            self.0.lock().unwrap().push((processed, total));
        }

        fn finish(&self) {}
    }

    #[tokio::test]
    async fn test_interactive_stops_at_blank_line() {
        let (_temp, driver) = driver().await;
        let mut output = Vec::new();

        let generated = driver.run_interactive(lines("hello\n\nignored\n"), &mut output).await.unwrap();
        assert_eq!(generated, 1);

        let text = String::from_utf8(output).unwrap();
        assert_eq!(text, "Input:helloolleh\nInput:");
        assert!(!text.contains("ignored"));
    }

    #[tokio::test]
    async fn test_interactive_stops_at_end_of_input() {
        let (_temp, driver) = driver().await;
        let mut output = Vec::new();
        let generated = driver.run_interactive(lines("ab\ncd"), &mut output).await.unwrap();
        assert_eq!(generated, 2);
    }

    #[tokio::test]
    async fn test_interactive_cancelled_while_waiting_for_input() {
        let (_temp, driver) = driver().await;
        let cancel = CancellationToken::new();
        let driver = driver.with_cancellation(cancel.clone());

        // The terminal stays open and silent after the first prompt.
        let (terminal, mut keyboard) = tokio::io::duplex(64);
        keyboard.write_all(b"hi\n").await.unwrap();
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let mut output = Vec::new();
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            driver.run_interactive(BufReader::new(terminal).lines(), &mut output),
        )
        .await
        .expect("session must return once cancelled");

        assert!(matches!(result, Err(GenerationError::Cancelled)));
        assert_eq!(String::from_utf8(output).unwrap(), "Input:hiih\nInput:");
        canceller.await.unwrap();
        drop(keyboard);
    }

    #[tokio::test]
    async fn test_interactive_end_of_input_after_cancel_is_cancelled() {
        let (_temp, driver) = driver().await;
        let cancel = CancellationToken::new();
        let driver = driver.with_cancellation(cancel.clone());
        cancel.cancel();

        let mut output = Vec::new();
        let result = driver.run_interactive(lines(""), &mut output).await;
        assert!(matches!(result, Err(GenerationError::Cancelled)));
    }

    /// Emits one token per decoding step and checks for cancellation between steps.
    struct SteppingModel {
        device: Accelerator,
        steps: usize,
        emitted: AtomicUsize,
        on_first_token: CancellationToken,
    }

    #[async_trait]
    impl LanguageModel for SteppingModel {
        async fn generate(
            &self,
            input: &TokenSequence,
            _config: DecodingConfig,
            cancel: &CancellationToken,
        ) -> Result<TokenSequence, BackendError> {
            let mut tokens = input.as_slice().to_vec();
            for step in 0..self.steps {
                if cancel.is_cancelled() {
                    return Err(BackendError::Cancelled);
                }
                tokens.push(u32::from(b'x') + 3);
                self.emitted.fetch_add(1, Ordering::SeqCst);
                if step == 0 {
                    self.on_first_token.cancel();
                }
                tokio::task::yield_now().await;
            }
            Ok(TokenSequence::new(tokens))
        }

        fn weights(&self) -> Vec<WeightInfo> {
            Vec::new()
        }

        fn model_id(&self) -> &str {
            "stepping"
        }

        fn precision(&self) -> Precision {
            Precision::F32
        }

        fn device(&self) -> &Accelerator {
            &self.device
        }

        fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
            self
        }
    }

    #[tokio::test]
    async fn test_cancelled_mid_generation() {
        let (_temp, mock) = driver().await;
        let GenerationDriver { tokenizer, .. } = mock;
        let cancel = CancellationToken::new();
        let model = SteppingModel {
            device: Accelerator { ordinal: 0, name: "stepping".into() },
            steps: 16,
            emitted: AtomicUsize::new(0),
            on_first_token: cancel.clone(),
        };
        let driver = GenerationDriver::new(Box::new(model), tokenizer, DecodingConfig::default())
            .unwrap()
            .with_cancellation(cancel);

        assert!(matches!(driver.generate_one("hello").await, Err(GenerationError::Cancelled)));

        let GenerationDriver { model, .. } = driver;
        let model = model.into_any().downcast::<SteppingModel>().unwrap();
        assert_eq!(model.emitted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_batch_preserves_order_and_reports_progress() {
        let (_temp, driver) = driver().await;
        let prompts: Vec<String> = ["one", "two", "three"].iter().map(ToString::to_string).collect();
        let recorder = Recorder::default();
        let mut seen = Vec::new();

        let results = driver
            .run_batch(&prompts, &recorder, |index, _| {
                seen.push(index);
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(results, vec!["oneeno", "twoowt", "threeeerht"]);
        assert_eq!(seen, vec![0, 1, 2]);
        assert_eq!(*recorder.0.lock().unwrap(), vec![(1, 3), (2, 3), (3, 3)]);
    }

    #[tokio::test]
    async fn test_batch_to_file_has_one_line_per_prompt() {
        let (temp, driver) = driver().await;
        let prompts: Vec<String> = (0..5).map(|i| format!("prompt {i}")).collect();
        let target = temp.path().join("out.txt");

        let mut writer = BatchWriter::create(&target).unwrap();
        let written = driver.run_batch_to(&prompts, &TracingBatchProgress, &mut writer).await.unwrap();
        writer.finish().unwrap();

        assert_eq!(written, 5);
        let lines: Vec<String> = std::fs::read_to_string(&target).unwrap().lines().map(String::from).collect();
        assert_eq!(lines.len(), 5);
        for (i, line) in lines.iter().enumerate() {
            assert!(line.starts_with(&format!("prompt {i}")));
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_generation() {
        let (_temp, driver) = driver().await;
        let cancel = CancellationToken::new();
        let driver = driver.with_cancellation(cancel.clone());
        cancel.cancel();

        assert!(matches!(driver.generate_one("hello").await, Err(GenerationError::Cancelled)));
    }

    #[tokio::test]
    async fn test_out_of_memory_is_fatal() {
        let temp = TempDir::new().unwrap();
        MockModelConfig::llama_like("tiny", 1, 8, 16).with_memory_tokens(4).write_to(temp.path()).unwrap();
        let backend = MockBackend::with_accelerators(1);
        let options = LoadOptions { precision: Precision::Bf16, device: Accelerator { ordinal: 0, name: "mock".into() } };
        let model = backend.load(temp.path(), &options).await.unwrap();
        let tokenizer = backend.load_tokenizer(temp.path()).await.unwrap();
        let driver = GenerationDriver::new(model, tokenizer, DecodingConfig::default()).unwrap();

        assert!(matches!(driver.generate_one("hello").await, Err(GenerationError::ResourceExhaustion(_))));
    }

    #[tokio::test]
    async fn test_invalid_decoding_config_rejected() {
        let (_temp, driver) = driver().await;
        let GenerationDriver { model, tokenizer, .. } = driver;
        let config = DecodingConfig { num_beams: 0, ..DecodingConfig::default() };
        assert!(matches!(GenerationDriver::new(model, tokenizer, config), Err(GenerationError::Config(_))));
    }
}
