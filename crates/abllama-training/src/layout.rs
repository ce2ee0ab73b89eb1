use crate::error::TrainingResult;
use std::path::{Path, PathBuf};

pub const ADAPTER_WEIGHTS_FILE: &str = "adapter_model.json";
pub const ADAPTER_CONFIG_FILE: &str = "adapter_config.json";
pub const TRAINER_STATE_FILE: &str = "trainer_state.json";
pub const MANIFEST_FILE: &str = "training_manifest.json";

/// Filesystem layout of a fine-tuning output directory.
///
/// ```text
/// <output>/
///   adapter_model.json
///   adapter_config.json
///   training_manifest.json
///   checkpoints/checkpoint-<step>/...
/// ```
#[derive(Debug, Clone)]
pub struct TrainingLayout {
    root: PathBuf,
}

impl TrainingLayout {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn adapter_weights_path(&self) -> PathBuf {
        self.root.join(ADAPTER_WEIGHTS_FILE)
    }

    #[must_use]
    pub fn adapter_config_path(&self) -> PathBuf {
        self.root.join(ADAPTER_CONFIG_FILE)
    }

    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    #[must_use]
    pub fn checkpoints_dir(&self) -> PathBuf {
        self.root.join("checkpoints")
    }

    pub fn ensure_dirs(&self) -> TrainingResult<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.checkpoints_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_paths() {
        let temp = TempDir::new().unwrap();
        let layout = TrainingLayout::new(temp.path().join("adapter"));
        layout.ensure_dirs().unwrap();

        assert!(layout.checkpoints_dir().is_dir());
        assert!(layout.adapter_weights_path().ends_with("adapter_model.json"));
        assert!(layout.manifest_path().starts_with(layout.root()));
    }
}
