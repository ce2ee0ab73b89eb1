//! Backend implementations for abllama.
//!
//! This crate provides concrete implementations of the `ModelBackend` and
//! `TrainingBackend` traits.
//!
//! # Supported Engines
//!
//! - **Mock**: byte-level tokenizer, deterministic decoder and a simulated
//!   accelerator memory budget, for testing and development

pub mod factory;
pub mod mock;
pub mod tokenizer;
pub mod training;

pub use factory::{BackendFactory, EngineType};
pub use mock::{MockBackend, MockModel, MockModelConfig, MOCK_ACCELERATORS_ENV, MOCK_CONFIG_FILE};
pub use tokenizer::ByteTokenizer;
pub use training::{MockTrainableModel, MockTrainingBackend};
