//! Model backend abstraction layer for abllama.
//!
//! This crate defines the traits a model backend implements (loading, tokenizing,
//! decoding) together with the value types that cross the backend boundary.

pub mod decoding;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

pub use decoding::DecodingConfig;
pub use tokio_util::sync::CancellationToken;

/// Invalid or contradictory configuration.
///
/// Always fatal and always raised before any model is loaded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A single parameter is outside its allowed range.
    #[error("invalid value for `{field}`: {reason}")]
    InvalidField {
        /// The offending parameter name.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// Flags that select mutually exclusive behaviour were combined, or none was given.
    #[error("conflicting options: {0}")]
    Conflict(String),

    /// A required path argument was not supplied.
    #[error("missing required path: {0}")]
    MissingPath(String),

    /// No accelerator is available for the requested device strategy.
    #[error("no accelerator available: {0}")]
    NoAccelerator(String),

    /// The requested engine is not known.
    #[error("unsupported engine: {0}")]
    UnsupportedEngine(String),
}

impl ConfigError {
    /// Shorthand for [`ConfigError::InvalidField`].
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField { field: field.into(), reason: reason.into() }
    }
}

/// Errors raised by a model backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The backend could not materialize the model or tokenizer.
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// The accelerator ran out of memory.
    #[error("out of memory: {0}")]
    ResourceExhausted(String),

    /// Tokenization or detokenization failed.
    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// Any other backend failure.
    #[error("backend error: {0}")]
    Other(String),
}

impl BackendError {
    /// Returns true if the error signals memory exhaustion.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::ResourceExhausted(_))
    }
}

/// Identifier of a single token in the model vocabulary.
pub type TokenId = u32;

/// An ordered sequence of token ids.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenSequence(pub Vec<TokenId>);

impl TokenSequence {
    #[must_use]
    pub fn new(tokens: Vec<TokenId>) -> Self {
        Self(tokens)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[TokenId] {
        &self.0
    }

    /// Keeps at most `max_len` leading tokens.
    pub fn truncate(&mut self, max_len: usize) {
        self.0.truncate(max_len);
    }
}

impl From<Vec<TokenId>> for TokenSequence {
    fn from(tokens: Vec<TokenId>) -> Self {
        Self(tokens)
    }
}

/// Ids of the special tokens a tokenizer reserves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialTokens {
    pub bos: TokenId,
    pub eos: TokenId,
    pub pad: TokenId,
}

impl SpecialTokens {
    pub fn contains(&self, token: TokenId) -> bool {
        token == self.bos || token == self.eos || token == self.pad
    }
}

/// Numeric precision the weights are loaded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    #[default]
    Bf16,
    F16,
    F32,
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Bf16 => "bf16",
            Self::F16 => "f16",
            Self::F32 => "f32",
        };
        f.write_str(s)
    }
}

impl FromStr for Precision {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bf16" | "bfloat16" => Ok(Self::Bf16),
            "f16" | "fp16" | "float16" => Ok(Self::F16),
            "f32" | "fp32" | "float32" => Ok(Self::F32),
            other => Err(ConfigError::invalid("precision", format!("unknown precision '{other}'"))),
        }
    }
}

/// How to place the model on the available accelerators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStrategy {
    /// Use the first available accelerator.
    #[default]
    Auto,
    /// Use the accelerator with this ordinal.
    Ordinal(usize),
}

/// An accelerator reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accelerator {
    pub ordinal: usize,
    pub name: String,
}

impl fmt::Display for Accelerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.ordinal)
    }
}

/// Options passed to [`ModelBackend::load`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    pub precision: Precision,
    pub device: Accelerator,
}

/// Shape description of one named weight matrix of a loaded model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightInfo {
    /// Fully qualified module name, e.g. `model.layers.0.self_attn.q_proj`.
    pub name: String,
    pub rows: usize,
    pub cols: usize,
    /// Length of the bias vector, if the module has one.
    #[serde(default)]
    pub bias: Option<usize>,
}

impl WeightInfo {
    /// Number of parameters in the weight matrix, excluding bias.
    pub fn matrix_parameters(&self) -> usize {
        self.rows * self.cols
    }

    pub fn bias_parameters(&self) -> usize {
        self.bias.unwrap_or(0)
    }

    /// Last dotted component of the module name.
    pub fn leaf_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }
}

/// Converts between text and token sequences.
pub trait Tokenizer: Send + Sync {
    /// Encodes text, prepending the BOS token.
    fn tokenize(&self, text: &str) -> Result<TokenSequence, BackendError>;

    /// Decodes tokens back to text.
    fn detokenize(&self, tokens: &TokenSequence, skip_special_tokens: bool) -> Result<String, BackendError>;

    fn special_tokens(&self) -> SpecialTokens;
}

/// A loaded causal language model.
///
/// Owned exclusively by whichever driver acquired it.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generates a continuation of `input`.
    ///
    /// The returned sequence contains the input followed by the new tokens.
    /// Implementations must check `cancel` between decoding steps and return
    /// [`BackendError::Cancelled`] once it fires.
    async fn generate(
        &self,
        input: &TokenSequence,
        config: DecodingConfig,
        cancel: &CancellationToken,
    ) -> Result<TokenSequence, BackendError>;

    /// Named weight matrices, in model order.
    fn weights(&self) -> Vec<WeightInfo>;

    fn model_id(&self) -> &str;

    fn precision(&self) -> Precision;

    fn device(&self) -> &Accelerator;

    /// Hands ownership to a backend that needs the concrete type, e.g. to
    /// attach trainable adapters.
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

/// Entry point of a model backend.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Short engine identifier, e.g. `mock`.
    fn id(&self) -> &'static str;

    /// Accelerators usable by this backend. An empty list means none.
    fn accelerators(&self) -> Vec<Accelerator>;

    /// Loads model weights from `path`.
    async fn load(&self, path: &Path, options: &LoadOptions) -> Result<Box<dyn LanguageModel>, BackendError>;

    /// Loads the tokenizer stored alongside the model at `path`.
    async fn load_tokenizer(&self, path: &Path) -> Result<Box<dyn Tokenizer>, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precision_parse() {
        assert_eq!("bf16".parse::<Precision>().unwrap(), Precision::Bf16);
        assert_eq!("FP32".parse::<Precision>().unwrap(), Precision::F32);
        assert!("int4".parse::<Precision>().is_err());
    }

    #[test]
    fn test_weight_info_leaf_name() {
        let w = WeightInfo {
            name: "model.layers.3.self_attn.q_proj".to_string(),
            rows: 8,
            cols: 4,
            bias: Some(8),
        };
        assert_eq!(w.leaf_name(), "q_proj");
        assert_eq!(w.matrix_parameters(), 32);
        assert_eq!(w.bias_parameters(), 8);
    }

    #[test]
    fn test_out_of_memory_detection() {
        assert!(BackendError::ResourceExhausted("cuda".to_string()).is_out_of_memory());
        assert!(!BackendError::Cancelled.is_out_of_memory());
    }
}
