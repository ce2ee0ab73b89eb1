use crate::adapter::AdapterReport;
use crate::job::TrainingJobId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started { job_id: TrainingJobId },
    AdapterAttached { job_id: TrainingJobId, report: AdapterReport },
    Step { job_id: TrainingJobId, epoch: u32, step: usize, total: usize, loss: f64, learning_rate: f64 },
    Evaluated { job_id: TrainingJobId, step: usize, eval_loss: f64 },
    Checkpointed { job_id: TrainingJobId, step: usize, path: PathBuf },
    BatchSizeReduced { job_id: TrainingJobId, from: usize, to: usize },
    Finished { job_id: TrainingJobId },
    Aborted { job_id: TrainingJobId, reason: String },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

/// Forwards progress events to `tracing`.
#[derive(Debug, Default)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { job_id } => tracing::info!(%job_id, "training started"),
            ProgressEvent::AdapterAttached { job_id, report } => tracing::info!(%job_id, "{report}"),
            ProgressEvent::Step { job_id, epoch, step, total, loss, learning_rate } => tracing::info!(
                %job_id,
                epoch,
                step,
                total,
                loss = format_args!("{loss:.4}"),
                learning_rate = format_args!("{learning_rate:.3e}"),
                "train step"
            ),
            ProgressEvent::Evaluated { job_id, step, eval_loss } => {
                tracing::info!(%job_id, step, eval_loss = format_args!("{eval_loss:.4}"), "evaluation");
            }
            ProgressEvent::Checkpointed { job_id, step, path } => {
                tracing::info!(%job_id, step, path = %path.display(), "checkpoint saved");
            }
            ProgressEvent::BatchSizeReduced { job_id, from, to } => {
                tracing::warn!(%job_id, from, to, "out of memory, reducing batch size");
            }
            ProgressEvent::Finished { job_id } => tracing::info!(%job_id, "training finished"),
            ProgressEvent::Aborted { job_id, reason } => tracing::error!(%job_id, %reason, "training aborted"),
        }
    }
}
