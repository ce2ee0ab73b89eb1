//! Periodic checkpoints with bounded retention.

use crate::adapter::AdapterConfig;
use crate::artifacts::{read_json, write_json_atomic};
use crate::error::{TrainingError, TrainingResult};
use crate::layout::{ADAPTER_CONFIG_FILE, ADAPTER_WEIGHTS_FILE, TRAINER_STATE_FILE};
use crate::trainer::AdapterWeights;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CHECKPOINT_PREFIX: &str = "checkpoint-";

/// Loop position and metrics recorded next to each checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerState {
    pub global_step: usize,
    pub epoch: u32,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub train_loss: Option<f64>,
    pub eval_loss: Option<f64>,
    /// Write order within the checkpoint directory, assigned by
    /// [`CheckpointManager::save`].
    #[serde(default)]
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub step: usize,
    pub sequence: u64,
    pub path: PathBuf,
}

/// Writes `checkpoint-<step>` directories under one parent and keeps at most
/// `limit` of them, evicting the earliest written first.
///
/// Retention follows write order rather than step number: a restarted run
/// writing into the same directory starts again from low steps, and its
/// checkpoints must outlive those left behind by the previous run.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
    limit: usize,
}

impl CheckpointManager {
    pub fn new(dir: PathBuf, limit: usize) -> TrainingResult<Self> {
        if limit == 0 {
            return Err(TrainingError::Checkpoint("retention limit must be >= 1".to_string()));
        }
        Ok(Self { dir, limit })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Persists a checkpoint for `state.global_step`, then prunes.
    ///
    /// The files are staged in a temporary directory and renamed into place,
    /// so a `checkpoint-<step>` directory is either complete or absent.
    pub fn save(
        &self,
        weights: &AdapterWeights,
        adapter: &AdapterConfig,
        state: &TrainerState,
    ) -> TrainingResult<Checkpoint> {
        std::fs::create_dir_all(&self.dir)?;
        let sequence = self.list()?.last().map_or(0, |c| c.sequence + 1);
        let state = TrainerState { sequence, ..state.clone() };

        let staging = tempfile::Builder::new().prefix(".staging-").tempdir_in(&self.dir)?;
        write_json_atomic(&staging.path().join(ADAPTER_WEIGHTS_FILE), weights)?;
        write_json_atomic(&staging.path().join(ADAPTER_CONFIG_FILE), adapter)?;
        write_json_atomic(&staging.path().join(TRAINER_STATE_FILE), &state)?;

        let target = self.dir.join(format!("{CHECKPOINT_PREFIX}{}", state.global_step));
        if target.exists() {
            std::fs::remove_dir_all(&target)?;
        }
        std::fs::rename(staging.path(), &target)?;
        drop(staging);

        self.prune()?;
        Ok(Checkpoint { step: state.global_step, sequence, path: target })
    }

    /// Existing checkpoints in write order, earliest first.
    ///
    /// A directory without a readable trainer state sorts before every
    /// checkpoint written by this manager.
    pub fn list(&self) -> TrainingResult<Vec<Checkpoint>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut checkpoints = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(step) = name
                .to_str()
                .and_then(|n| n.strip_prefix(CHECKPOINT_PREFIX))
                .and_then(|s| s.parse::<usize>().ok())
            else {
                continue;
            };
            let path = entry.path();
            let sequence = Self::load_state_at(&path).map_or(0, |s| s.sequence);
            checkpoints.push(Checkpoint { step, sequence, path });
        }
        checkpoints.sort_by_key(|c| (c.sequence, c.step));
        Ok(checkpoints)
    }

    pub fn load_state(checkpoint: &Checkpoint) -> TrainingResult<TrainerState> {
        Self::load_state_at(&checkpoint.path)
    }

    fn load_state_at(dir: &Path) -> TrainingResult<TrainerState> {
        read_json(&dir.join(TRAINER_STATE_FILE))
    }

    fn prune(&self) -> TrainingResult<()> {
        let checkpoints = self.list()?;
        let excess = checkpoints.len().saturating_sub(self.limit);
        for old in checkpoints.into_iter().take(excess) {
            tracing::debug!(step = old.step, path = %old.path.display(), "removing old checkpoint");
            std::fs::remove_dir_all(&old.path)?;
        }
        Ok(())
    }
}
