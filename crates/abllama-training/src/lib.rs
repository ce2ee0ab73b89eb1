//! abllama training
//!
//! Backend-agnostic fine-tuning primitives:
//! - Loading and splitting text datasets
//! - Placing a low-rank adapter on a model's weights (`AdapterPlan`)
//! - Training schedules, learning-rate scheduling and batch-size discovery
//! - Checkpointing with bounded retention
//! - Driving a `TrainingBackend` through the fit loop (`TrainingOrchestrator`)

pub mod adapter;
pub mod artifacts;
pub mod batch_size;
pub mod checkpoint;
pub mod dataset;
pub mod error;
pub mod job;
pub mod layout;
pub mod orchestrator;
pub mod progress;
pub mod schedule;
pub mod split;
pub mod trainer;

pub use adapter::{AdapterConfig, AdapterPlan, AdapterReport, BiasMode, PlannedWeight, WeightRole};
pub use artifacts::{ArtifactKind, TrainingArtifact, TrainingManifest, TrainingMetrics};
pub use batch_size::BatchSizePolicy;
pub use checkpoint::{Checkpoint, CheckpointManager, TrainerState};
pub use dataset::{load_text_dataset, Dataset, DatasetFormat, DatasetId, TrainingExample};
pub use error::{TrainingError, TrainingResult};
pub use job::{ModelSpec, TrainingJobId};
pub use layout::TrainingLayout;
pub use orchestrator::{TrainingOrchestrator, TrainingOutcome};
pub use progress::{ProgressEvent, ProgressSink, TracingProgressSink};
pub use schedule::{Interval, LrScheduleKind, LrScheduler, TrainingSchedule};
pub use split::{split_dataset, split_file, DatasetSplit, DEFAULT_TEST_FRACTION};
pub use trainer::{
    AdapterWeights, OptimizerStep, StepStats, TensorData, TrainableModel, TrainerStatus, TrainingBackend,
};
