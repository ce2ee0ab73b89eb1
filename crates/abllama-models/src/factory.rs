//! Backend factory for creating engine instances from configuration.

use crate::{MockBackend, MockTrainingBackend};
use abllama_abstraction::{ConfigError, ModelBackend};
use abllama_training::TrainingBackend;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error};

/// Engine type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineType {
    /// Deterministic in-process engine for testing.
    Mock,
}

impl FromStr for EngineType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mock" => Ok(Self::Mock),
            _ => Err(()),
        }
    }
}

/// Factory for creating backend instances.
pub struct BackendFactory;

impl BackendFactory {
    pub fn create(engine: EngineType) -> Arc<dyn ModelBackend> {
        debug!(engine = ?engine, "Creating model backend");
        match engine {
            EngineType::Mock => Arc::new(MockBackend::new()),
        }
    }

    pub fn create_training(engine: EngineType) -> Arc<dyn TrainingBackend> {
        debug!(engine = ?engine, "Creating training backend");
        match engine {
            EngineType::Mock => Arc::new(MockTrainingBackend),
        }
    }

    fn parse(engine: &str) -> Result<EngineType, ConfigError> {
        EngineType::from_str(engine).map_err(|()| {
            error!(engine = %engine, "Unrecognized engine");
            ConfigError::UnsupportedEngine(engine.to_string())
        })
    }

    /// Creates a model backend from an engine name.
    pub fn create_from_str(engine: &str) -> Result<Arc<dyn ModelBackend>, ConfigError> {
        Self::parse(engine).map(Self::create)
    }

    /// Creates a training backend from an engine name.
    pub fn create_training_from_str(engine: &str) -> Result<Arc<dyn TrainingBackend>, ConfigError> {
        Self::parse(engine).map(Self::create_training)
    }
}
