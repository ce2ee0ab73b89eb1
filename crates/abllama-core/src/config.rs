//! Configuration file support.
//!
//! Every section is optional; missing keys keep their defaults. Files are
//! layered key by key, so a local file only needs to name what it changes.

use abllama_abstraction::{ConfigError, DecodingConfig, DeviceStrategy, Precision};
use abllama_training::{AdapterConfig, TrainingSchedule, DEFAULT_TEST_FRACTION};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Engine name passed to the backend factory.
    pub engine: String,
    pub precision: Precision,
    pub device: DeviceStrategy,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self { engine: "mock".to_string(), precision: Precision::Bf16, device: DeviceStrategy::Auto }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Column (CSV) or key (JSONL) holding the example text.
    pub text_field: String,
    /// Share of examples held out for evaluation.
    pub test_fraction: f64,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self { text_field: "text".to_string(), test_fraction: DEFAULT_TEST_FRACTION }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub generation: DecodingConfig,
    pub training: TrainingSchedule,
    pub adapter: AdapterConfig,
    pub dataset: DatasetConfig,
}

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    #[error("Failed to read configuration file: {0}")]
    Read(String),

    #[error("Failed to parse configuration file: {0}")]
    Parse(String),
}

pub type ConfigFileResult<T> = std::result::Result<T, ConfigFileError>;

impl AppConfig {
    /// Load configuration from a single TOML file.
    pub fn load_from_file(path: &Path) -> ConfigFileResult<Self> {
        Self::from_table(read_table(path)?, path)
    }

    /// Get default global configuration file path.
    pub fn default_global_path() -> PathBuf {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(".abllama")
            .join("config.toml")
    }

    /// Get default local configuration file path.
    pub fn default_local_path() -> PathBuf {
        PathBuf::from("abllama.toml")
    }

    /// Discover and load configuration files.
    ///
    /// Layers, lowest precedence first:
    /// 1. Global config (~/.abllama/config.toml)
    /// 2. Local config (./abllama.toml)
    /// 3. `explicit`, which must exist when given
    pub fn discover_and_load(explicit: Option<&Path>) -> ConfigFileResult<Self> {
        let mut layers = Vec::new();
        for path in [Self::default_global_path(), Self::default_local_path()] {
            if path.is_file() {
                layers.push(path);
            }
        }
        if let Some(path) = explicit {
            layers.push(path.to_path_buf());
        }
        Self::load_layers(&layers)
    }

    /// Merges `paths` in order, later files overriding earlier ones.
    pub fn load_layers(paths: &[PathBuf]) -> ConfigFileResult<Self> {
        let mut merged = toml::Table::new();
        for path in paths {
            merge_tables(&mut merged, read_table(path)?);
            tracing::debug!(path = %path.display(), "loaded configuration layer");
        }
        let origin = paths.last().map_or_else(|| PathBuf::from("<defaults>"), Clone::clone);
        Self::from_table(merged, &origin)
    }

    fn from_table(table: toml::Table, origin: &Path) -> ConfigFileResult<Self> {
        toml::Value::Table(table)
            .try_into()
            .map_err(|e| ConfigFileError::Parse(format!("{}: {}", origin.display(), e)))
    }

    /// Checks every section; nothing is loaded before this passes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend.engine.trim().is_empty() {
            return Err(ConfigError::invalid("backend.engine", "must not be empty"));
        }
        self.generation.validate()?;
        self.training.validate()?;
        self.adapter.validate()?;
        if self.dataset.text_field.trim().is_empty() {
            return Err(ConfigError::invalid("dataset.text_field", "must not be empty"));
        }
        let fraction = self.dataset.test_fraction;
        if !fraction.is_finite() || fraction <= 0.0 || fraction >= 1.0 {
            return Err(ConfigError::invalid("dataset.test_fraction", "must be in (0, 1)"));
        }
        Ok(())
    }
}

fn read_table(path: &Path) -> ConfigFileResult<toml::Table> {
    if !path.exists() {
        return Err(ConfigFileError::NotFound(path.display().to_string()));
    }

    let content =
        std::fs::read_to_string(path).map_err(|e| ConfigFileError::Read(format!("{}: {}", path.display(), e)))?;

    content.parse::<toml::Table>().map_err(|e| ConfigFileError::Parse(format!("{}: {}", path.display(), e)))
}

fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.remove(&key), value) {
            (Some(toml::Value::Table(mut existing)), toml::Value::Table(incoming)) => {
                merge_tables(&mut existing, incoming);
                base.insert(key, toml::Value::Table(existing));
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abllama_training::Interval;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let path = write(
            &temp,
            "abllama.toml",
            r#"
[backend]
precision = "f32"
device = { ordinal = 1 }

[generation]
temperature = 0.7
max_new_tokens = 64

[training]
epochs = 3
eval_every = 0.5
save_every = "epoch"

[adapter]
rank = 8
target_modules = ["q_proj", "v_proj"]

[dataset]
text_field = "body"
"#,
        );

        let config = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(config.backend.engine, "mock");
        assert_eq!(config.backend.precision, Precision::F32);
        assert_eq!(config.backend.device, DeviceStrategy::Ordinal(1));
        assert!((config.generation.temperature - 0.7).abs() < 1e-6);
        assert_eq!(config.generation.max_new_tokens, 64);
        assert_eq!(config.generation.top_k, 40);
        assert_eq!(config.training.epochs, 3);
        assert_eq!(config.training.eval_every, Interval::Fraction(0.5));
        assert_eq!(config.training.save_every, Interval::Epoch);
        assert_eq!(config.training.gradient_accumulation_steps, 4);
        assert_eq!(config.adapter.rank, 8);
        assert_eq!(config.adapter.target_matrices.len(), 2);
        assert_eq!(config.dataset.text_field, "body");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_layers_merge_key_by_key() {
        let temp = TempDir::new().unwrap();
        let global = write(&temp, "global.toml", "[training]\nepochs = 5\nseed = 7\n");
        let local = write(&temp, "local.toml", "[training]\nseed = 9\n");

        let config = AppConfig::load_layers(&[global, local]).unwrap();
        assert_eq!(config.training.epochs, 5);
        assert_eq!(config.training.seed, 9);
    }

    #[test]
    fn test_defaults_without_files() {
        let config = AppConfig::load_layers(&[]).unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_explicit_file() {
        let result = AppConfig::discover_and_load(Some(Path::new("/nonexistent/abllama.toml")));
        assert!(matches!(result, Err(ConfigFileError::NotFound(_))));
    }

    #[test]
    fn test_parse_error() {
        let temp = TempDir::new().unwrap();
        let bad_syntax = write(&temp, "bad.toml", "[training\nepochs = 1");
        assert!(matches!(AppConfig::load_from_file(&bad_syntax), Err(ConfigFileError::Parse(_))));

        let bad_type = write(&temp, "type.toml", "[training]\nepochs = \"two\"");
        assert!(matches!(AppConfig::load_from_file(&bad_type), Err(ConfigFileError::Parse(_))));
    }

    #[test]
    fn test_validate_rejects_bad_sections() {
        let mut config = AppConfig::default();
        config.generation.top_p = 0.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.dataset.test_fraction = 1.0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidField { .. })));
    }
}
