//! Mock backend for testing and development.
//!
//! A model directory holds a single `config.json` ([`MockModelConfig`])
//! describing the weight matrices and a simulated device memory budget. The
//! decoder is greedy and deterministic: it answers a prompt with the prompt's
//! bytes reversed, followed by EOS.

use crate::tokenizer::{ByteTokenizer, BYTE_VOCAB_SIZE};
use abllama_abstraction::{
    Accelerator, BackendError, CancellationToken, DecodingConfig, LanguageModel, LoadOptions, ModelBackend, Precision,
    TokenSequence, Tokenizer, WeightInfo,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::path::Path;
use tracing::debug;

/// File inside a model directory describing a mock model.
pub const MOCK_CONFIG_FILE: &str = "config.json";

/// Number of simulated accelerators; overrides the default of one.
pub const MOCK_ACCELERATORS_ENV: &str = "ABLLAMA_MOCK_ACCELERATORS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockModelConfig {
    pub model_id: String,
    pub weights: Vec<WeightInfo>,
    /// Tokens that fit on the simulated device in a single call. Generation
    /// counts the growing sequence; training counts every token of a batch.
    pub memory_tokens: usize,
}

impl MockModelConfig {
    /// A decoder-only layout with llama-style module names.
    pub fn llama_like(model_id: &str, layers: usize, hidden: usize, intermediate: usize) -> Self {
        let mut weights = vec![WeightInfo {
            name: "model.embed_tokens".to_string(),
            rows: BYTE_VOCAB_SIZE,
            cols: hidden,
            bias: None,
        }];

        for layer in 0..layers {
            let attn = format!("model.layers.{layer}.self_attn");
            let mlp = format!("model.layers.{layer}.mlp");
            for proj in ["q_proj", "k_proj", "v_proj", "o_proj"] {
                weights.push(WeightInfo { name: format!("{attn}.{proj}"), rows: hidden, cols: hidden, bias: None });
            }
            for proj in ["gate_proj", "up_proj"] {
                weights.push(WeightInfo { name: format!("{mlp}.{proj}"), rows: intermediate, cols: hidden, bias: None });
            }
            weights.push(WeightInfo { name: format!("{mlp}.down_proj"), rows: hidden, cols: intermediate, bias: None });
        }

        weights.push(WeightInfo { name: "lm_head".to_string(), rows: BYTE_VOCAB_SIZE, cols: hidden, bias: None });

        Self { model_id: model_id.to_string(), weights, memory_tokens: 1 << 16 }
    }

    #[must_use]
    pub fn with_memory_tokens(mut self, memory_tokens: usize) -> Self {
        self.memory_tokens = memory_tokens;
        self
    }

    /// Writes `config.json` into `dir`, creating it if needed.
    pub fn write_to(&self, dir: &Path) -> std::io::Result<()> {
        std::fs::create_dir_all(dir)?;
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(dir.join(MOCK_CONFIG_FILE), json)
    }

    fn read_from(dir: &Path) -> Result<Self, BackendError> {
        let path = dir.join(MOCK_CONFIG_FILE);
        let bytes = std::fs::read(&path)
            .map_err(|e| BackendError::ModelLoad(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_slice(&bytes).map_err(|e| BackendError::ModelLoad(format!("invalid {}: {e}", path.display())))
    }
}

/// Backend that simulates accelerators and a memory budget.
#[derive(Debug, Clone)]
pub struct MockBackend {
    accelerators: usize,
}

impl MockBackend {
    /// Reads the accelerator count from `ABLLAMA_MOCK_ACCELERATORS` (default 1).
    pub fn new() -> Self {
        let accelerators = std::env::var(MOCK_ACCELERATORS_ENV)
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(1);
        Self { accelerators }
    }

    pub fn with_accelerators(accelerators: usize) -> Self {
        Self { accelerators }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelBackend for MockBackend {
    fn id(&self) -> &'static str {
        "mock"
    }

    fn accelerators(&self) -> Vec<Accelerator> {
        (0..self.accelerators).map(|ordinal| Accelerator { ordinal, name: "mock".to_string() }).collect()
    }

    async fn load(&self, path: &Path, options: &LoadOptions) -> Result<Box<dyn LanguageModel>, BackendError> {
        if options.device.ordinal >= self.accelerators {
            return Err(BackendError::ModelLoad(format!("device {} is not available", options.device)));
        }

        let config = MockModelConfig::read_from(path)?;
        debug!(
            model_id = %config.model_id,
            weights = config.weights.len(),
            precision = %options.precision,
            device = %options.device,
            "loaded mock model"
        );

        Ok(Box::new(MockModel { config, precision: options.precision, device: options.device.clone() }))
    }

    async fn load_tokenizer(&self, path: &Path) -> Result<Box<dyn Tokenizer>, BackendError> {
        if !path.is_dir() {
            return Err(BackendError::ModelLoad(format!("model directory not found: {}", path.display())));
        }
        Ok(Box::new(ByteTokenizer::new()))
    }
}

#[derive(Debug, Clone)]
pub struct MockModel {
    config: MockModelConfig,
    precision: Precision,
    device: Accelerator,
}

impl MockModel {
    pub fn config(&self) -> &MockModelConfig {
        &self.config
    }
}

#[async_trait]
impl LanguageModel for MockModel {
    async fn generate(
        &self,
        input: &TokenSequence,
        config: DecodingConfig,
        cancel: &CancellationToken,
    ) -> Result<TokenSequence, BackendError> {
        let special = ByteTokenizer.special_tokens();
        let mut reply: Vec<_> = input.as_slice().iter().rev().copied().filter(|&t| !special.contains(t)).collect();
        reply.push(special.eos);

        let mut output = input.0.clone();
        for token in reply.into_iter().take(config.max_new_tokens as usize) {
            if cancel.is_cancelled() {
                return Err(BackendError::Cancelled);
            }
            if output.len() >= self.config.memory_tokens {
                return Err(BackendError::ResourceExhausted(format!(
                    "sequence of {} tokens exceeds the device budget of {}",
                    output.len() + 1,
                    self.config.memory_tokens
                )));
            }
            output.push(token);
            if token == special.eos {
                break;
            }
        }

        Ok(TokenSequence::new(output))
    }

    fn weights(&self) -> Vec<WeightInfo> {
        self.config.weights.clone()
    }

    fn model_id(&self) -> &str {
        &self.config.model_id
    }

    fn precision(&self) -> Precision {
        self.precision
    }

    fn device(&self) -> &Accelerator {
        &self.device
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn options() -> LoadOptions {
        LoadOptions { precision: Precision::Bf16, device: Accelerator { ordinal: 0, name: "mock".to_string() } }
    }

    async fn load(config: &MockModelConfig) -> (TempDir, Box<dyn LanguageModel>) {
        let temp = TempDir::new().unwrap();
        config.write_to(temp.path()).unwrap();
        let model = MockBackend::with_accelerators(1).load(temp.path(), &options()).await.unwrap();
        (temp, model)
    }

    #[test]
    fn test_llama_like_layout() {
        let config = MockModelConfig::llama_like("tiny", 2, 8, 16);
        assert_eq!(config.weights.len(), 2 + 2 * 7);
        assert!(config.weights.iter().any(|w| w.name == "model.layers.1.mlp.down_proj" && w.cols == 16));
    }

    #[tokio::test]
    async fn test_generate_reverses_prompt() {
        let (_temp, model) = load(&MockModelConfig::llama_like("tiny", 1, 8, 16)).await;
        let tokenizer = ByteTokenizer;

        let input = tokenizer.tokenize("abc").unwrap();
        let output = model.generate(&input, DecodingConfig::default(), &CancellationToken::new()).await.unwrap();

        assert!(output.as_slice().starts_with(input.as_slice()));
        assert_eq!(tokenizer.detokenize(&output, true).unwrap(), "abccba");
    }

    #[tokio::test]
    async fn test_generate_honours_max_new_tokens() {
        let (_temp, model) = load(&MockModelConfig::llama_like("tiny", 1, 8, 16)).await;
        let config = DecodingConfig { max_new_tokens: 2, ..DecodingConfig::default() };

        let input = ByteTokenizer.tokenize("abcdef").unwrap();
        let output = model.generate(&input, config, &CancellationToken::new()).await.unwrap();
        assert_eq!(output.len(), input.len() + 2);
    }

    #[tokio::test]
    async fn test_generate_cancelled() {
        let (_temp, model) = load(&MockModelConfig::llama_like("tiny", 1, 8, 16)).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let input = ByteTokenizer.tokenize("abc").unwrap();
        let result = model.generate(&input, DecodingConfig::default(), &cancel).await;
        assert_eq!(result.unwrap_err(), BackendError::Cancelled);
    }

    #[tokio::test]
    async fn test_generate_out_of_memory() {
        let (_temp, model) = load(&MockModelConfig::llama_like("tiny", 1, 8, 16).with_memory_tokens(6)).await;

        let input = ByteTokenizer.tokenize("abcd").unwrap();
        let result = model.generate(&input, DecodingConfig::default(), &CancellationToken::new()).await;
        assert!(result.unwrap_err().is_out_of_memory());
    }

    #[tokio::test]
    async fn test_load_errors() {
        let backend = MockBackend::with_accelerators(1);
        let temp = TempDir::new().unwrap();

        let missing = backend.load(temp.path(), &options()).await;
        assert!(matches!(missing, Err(BackendError::ModelLoad(_))));

        MockModelConfig::llama_like("tiny", 1, 8, 16).write_to(temp.path()).unwrap();
        let mut far = options();
        far.device.ordinal = 3;
        assert!(matches!(backend.load(temp.path(), &far).await, Err(BackendError::ModelLoad(_))));
    }

    #[test]
    fn test_accelerators() {
        assert!(MockBackend::with_accelerators(0).accelerators().is_empty());
        assert_eq!(MockBackend::with_accelerators(2).accelerators()[1].to_string(), "mock:1");
    }
}
