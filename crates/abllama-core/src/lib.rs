//! abllama core - generation and fine-tuning entry points.
//!
//! This crate provides:
//! - The generation driver (interactive and batch modes)
//! - Layered TOML configuration
//! - Accelerator selection
//! - `run_inference` and `run_finetune`, the two operations the CLI exposes
//!
//! # Example
//!
//! ```rust,no_run
//! use abllama_abstraction::CancellationToken;
//! use abllama_core::config::AppConfig;
//! use abllama_core::generation::{StdinLines, TracingBatchProgress};
//! use abllama_core::inference::{run_inference, InferenceMode, InferenceRequest};
//! use abllama_models::MockBackend;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::discover_and_load(None)?;
//! let request = InferenceRequest {
//!     model_path: "models/tiny".into(),
//!     mode: InferenceMode::from_flags(false, Some("prompts.txt".into()), Some("out.txt".into()))?,
//! };
//! run_inference(
//!     &MockBackend::new(),
//!     &config,
//!     &request,
//!     (StdinLines::new(), std::io::stdout()),
//!     &TracingBatchProgress,
//!     CancellationToken::new(),
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod finetune;
pub mod generation;
pub mod inference;

pub use config::{AppConfig, BackendConfig, ConfigFileError, DatasetConfig};
pub use device::select_accelerator;
pub use error::{GenerationError, GenerationResult};
pub use finetune::{run_finetune, FinetuneRequest};
pub use generation::{BatchProgress, BatchWriter, GenerationDriver, TracingBatchProgress};
pub use inference::{run_inference, InferenceMode, InferenceRequest, InferenceSummary};
