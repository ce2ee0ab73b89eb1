//! CLI configuration loading.

use abllama_core::AppConfig;
use anyhow::Context;
use std::path::PathBuf;

/// Flags shared by every subcommand.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    pub config: Option<PathBuf>,
    pub engine: Option<String>,
}

/// Load and merge configuration.
///
/// Configuration precedence:
/// 1. CLI arguments (`--engine`)
/// 2. Explicit config file (`--config`)
/// 3. Local config file (./abllama.toml)
/// 4. Global config file (~/.abllama/config.toml)
/// 5. Defaults
pub fn load_config(options: &GlobalOptions) -> anyhow::Result<AppConfig> {
    let mut config =
        AppConfig::discover_and_load(options.config.as_deref()).context("Failed to load configuration")?;

    if let Some(engine) = &options.engine {
        config.backend.engine.clone_from(engine);
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}
