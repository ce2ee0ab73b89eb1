//! Fine-tuning orchestration: adapter attachment and the fit loop.

use crate::adapter::{AdapterConfig, AdapterPlan, AdapterReport};
use crate::artifacts::{make_artifact, write_json_atomic, ArtifactKind, TrainingManifest, TrainingMetrics};
use crate::batch_size::BatchSizePolicy;
use crate::checkpoint::{Checkpoint, CheckpointManager, TrainerState};
use crate::dataset::{DatasetId, TrainingExample};
use crate::error::{TrainingError, TrainingResult};
use crate::job::{ModelSpec, TrainingJobId};
use crate::layout::{TrainingLayout, ADAPTER_WEIGHTS_FILE};
use crate::progress::{ProgressEvent, ProgressSink, TracingProgressSink};
use crate::schedule::{LrScheduler, TrainingSchedule};
use crate::split::DatasetSplit;
use crate::trainer::{OptimizerStep, TrainableModel, TrainerStatus, TrainingBackend};
use abllama_abstraction::{BackendError, CancellationToken, LanguageModel, TokenSequence, Tokenizer};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::PathBuf;
use std::sync::Arc;

/// Result of a completed training run.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub manifest: TrainingManifest,
    pub output_dir: PathBuf,
    /// Checkpoints still on disk, oldest first.
    pub checkpoints: Vec<Checkpoint>,
}

#[derive(Debug, Default)]
struct FitSummary {
    global_step: usize,
    epochs: u32,
    final_batch_size: usize,
    train_loss: Option<f64>,
    eval_loss: Option<f64>,
    /// Checkpoints written by this run, in write order.
    checkpoints: Vec<Checkpoint>,
}

/// Drives one fine-tuning job through
/// `Idle -> AdapterAttached -> Training -> {Checkpointed -> Training | Completed | Aborted}`.
pub struct TrainingOrchestrator {
    job_id: TrainingJobId,
    adapter: AdapterConfig,
    schedule: TrainingSchedule,
    layout: TrainingLayout,
    backend: Arc<dyn TrainingBackend>,
    progress: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
    status: TrainerStatus,
    attached: Option<(Box<dyn TrainableModel>, AdapterPlan)>,
}

impl TrainingOrchestrator {
    /// Validates both configurations up front; no model work happens here.
    pub fn new(
        adapter: AdapterConfig,
        schedule: TrainingSchedule,
        output_dir: PathBuf,
        backend: Arc<dyn TrainingBackend>,
    ) -> TrainingResult<Self> {
        adapter.validate()?;
        schedule.validate()?;

        Ok(Self {
            job_id: TrainingJobId::new(),
            adapter,
            schedule,
            layout: TrainingLayout::new(output_dir),
            backend,
            progress: Arc::new(TracingProgressSink),
            cancel: CancellationToken::new(),
            status: TrainerStatus::Idle,
            attached: None,
        })
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn job_id(&self) -> &TrainingJobId {
        &self.job_id
    }

    pub fn state(&self) -> &TrainerStatus {
        &self.status
    }

    pub fn layout(&self) -> &TrainingLayout {
        &self.layout
    }

    /// Freezes `model`, attaches the configured adapter and reports the
    /// trainable parameter count.
    pub async fn attach_adapter(&mut self, model: Box<dyn LanguageModel>) -> TrainingResult<AdapterReport> {
        if self.status != TrainerStatus::Idle {
            return Err(TrainingError::State(format!("cannot attach adapter in state {:?}", self.status)));
        }

        let plan = AdapterPlan::build(&self.adapter, &model.weights())?;
        let report = plan.report();
        tracing::debug!(
            backend = self.backend.id(),
            low_rank = report.low_rank_matrices,
            full = report.full_modules,
            "attaching adapter"
        );

        let trainable = self.backend.attach_adapter(model, &plan).await?;
        self.attached = Some((trainable, plan));
        self.status = TrainerStatus::AdapterAttached;
        self.emit(ProgressEvent::AdapterAttached { job_id: self.job_id.clone(), report });
        Ok(report)
    }

    /// Runs the fit loop over `split` and persists the final adapter.
    ///
    /// On failure the orchestrator ends in `Aborted`; checkpoints already on
    /// disk are left in place.
    pub async fn train(
        &mut self,
        tokenizer: &dyn Tokenizer,
        split: &DatasetSplit,
        base_model: ModelSpec,
        dataset_id: DatasetId,
    ) -> TrainingResult<TrainingOutcome> {
        if self.status != TrainerStatus::AdapterAttached {
            return Err(TrainingError::State(format!("cannot train in state {:?}", self.status)));
        }
        let Some((mut model, plan)) = self.attached.take() else {
            return Err(TrainingError::State("no adapter attached".to_string()));
        };

        let created_at = Utc::now();
        self.emit(ProgressEvent::Started { job_id: self.job_id.clone() });

        let result = self.run(model.as_mut(), &plan, tokenizer, split).await;
        let outcome = match result {
            Ok(summary) => self.finish(model.as_ref(), &plan, split, summary, base_model, dataset_id, created_at),
            Err(err) => Err(err),
        };
        self.attached = Some((model, plan));

        match outcome {
            Ok(outcome) => {
                self.status = TrainerStatus::Completed;
                self.emit(ProgressEvent::Finished { job_id: self.job_id.clone() });
                Ok(outcome)
            }
            Err(err) => {
                let reason = err.to_string();
                self.status = TrainerStatus::Aborted { reason: reason.clone() };
                self.emit(ProgressEvent::Aborted { job_id: self.job_id.clone(), reason });
                Err(err)
            }
        }
    }

    async fn run(
        &mut self,
        model: &mut dyn TrainableModel,
        plan: &AdapterPlan,
        tokenizer: &dyn Tokenizer,
        split: &DatasetSplit,
    ) -> TrainingResult<FitSummary> {
        let max_len = self.schedule.max_seq_len;
        let train = encode(tokenizer, &split.train, max_len, "train")?;
        let eval = encode(tokenizer, &split.eval, max_len, "eval")?;
        if train.is_empty() {
            return Err(TrainingError::Data("training split is empty".to_string()));
        }

        self.layout.ensure_dirs()?;
        let checkpoints = CheckpointManager::new(self.layout.checkpoints_dir(), self.schedule.save_total_limit)?;
        self.fit(model, plan, &train, &eval, &checkpoints).await
    }

    async fn fit(
        &mut self,
        model: &mut dyn TrainableModel,
        plan: &AdapterPlan,
        train: &[TokenSequence],
        eval: &[TokenSequence],
        checkpoints: &CheckpointManager,
    ) -> TrainingResult<FitSummary> {
        let schedule = self.schedule.clone();
        let n = train.len();
        let accum = schedule.gradient_accumulation_steps;
        let epochs = schedule.epochs as usize;

        let mut policy = BatchSizePolicy::new(schedule.batch_size, schedule.auto_find_batch_size);
        let mut steps_per_epoch = schedule.steps_per_epoch(n, policy.current());
        let mut scheduler = LrScheduler::new(
            schedule.lr_schedule,
            schedule.learning_rate,
            schedule.warmup_ratio,
            steps_per_epoch * epochs,
        );
        tracing::info!(
            examples = n,
            eval_examples = eval.len(),
            batch_size = policy.current(),
            steps_per_epoch,
            total_steps = scheduler.total_steps(),
            "starting fit loop"
        );

        let mut summary = FitSummary::default();
        let mut loss_total = 0.0;

        for epoch in 0..schedule.epochs {
            let mut order: Vec<usize> = (0..n).collect();
            let mut rng = StdRng::seed_from_u64(schedule.seed.wrapping_add(u64::from(epoch)));
            order.shuffle(&mut rng);

            let mut cursor = 0;
            while cursor < n {
                let batch_size = policy.current();
                let window_len = (batch_size * accum).min(n - cursor);
                let window = &order[cursor..cursor + window_len];

                let loss = match self.accumulate(model, train, window, batch_size).await {
                    Ok(loss) => loss,
                    Err(err) if err.is_out_of_memory() => {
                        model.zero_grad();
                        let reduced = policy.on_out_of_memory(&err.to_string())?;
                        self.emit(ProgressEvent::BatchSizeReduced {
                            job_id: self.job_id.clone(),
                            from: batch_size,
                            to: reduced,
                        });

                        // The window is retried from the same position; only the
                        // remaining steps are re-planned.
                        steps_per_epoch = schedule.steps_per_epoch(n, reduced);
                        let remaining = schedule.steps_per_epoch(n - cursor, reduced);
                        let later_epochs = epochs - epoch as usize - 1;
                        scheduler.set_total_steps(summary.global_step + remaining + later_epochs * steps_per_epoch);
                        continue;
                    }
                    Err(err) => return Err(err.into()),
                };

                let learning_rate = scheduler.lr_at(summary.global_step);
                let stats = model
                    .optimizer_step(OptimizerStep {
                        learning_rate,
                        weight_decay: schedule.weight_decay,
                        max_grad_norm: schedule.max_grad_norm,
                    })
                    .await
                    .map_err(|e| exhausted(batch_size, e))?;

                summary.global_step += 1;
                cursor += window_len;
                loss_total += loss;
                summary.train_loss = Some(loss_total / summary.global_step as f64);

                let step = summary.global_step;
                let epoch_end = cursor >= n;
                self.status = TrainerStatus::Training { epoch, step };
                tracing::debug!(epoch, step, loss, grad_norm = stats.grad_norm, clipped = stats.clipped, "optimizer step");

                if schedule.log_every.fires(step, steps_per_epoch, epoch_end) {
                    self.emit(ProgressEvent::Step {
                        job_id: self.job_id.clone(),
                        epoch,
                        step,
                        total: scheduler.total_steps(),
                        loss,
                        learning_rate,
                    });
                }

                if schedule.eval_every.fires(step, steps_per_epoch, epoch_end) {
                    let eval_batch = schedule.eval_batch_size.min(policy.current());
                    if let Some(eval_loss) = self.evaluate(model, eval, eval_batch).await? {
                        summary.eval_loss = Some(eval_loss);
                        self.emit(ProgressEvent::Evaluated { job_id: self.job_id.clone(), step, eval_loss });
                    }
                }

                if schedule.save_every.fires(step, steps_per_epoch, epoch_end) {
                    let state = TrainerState {
                        global_step: step,
                        epoch,
                        batch_size: policy.current(),
                        learning_rate,
                        train_loss: Some(loss),
                        eval_loss: summary.eval_loss,
                        sequence: 0,
                    };
                    let weights = model.adapter_weights()?;
                    let saved = checkpoints.save(&weights, &plan.config, &state)?;
                    self.status = TrainerStatus::Checkpointed { epoch, step };
                    self.emit(ProgressEvent::Checkpointed { job_id: self.job_id.clone(), step, path: saved.path.clone() });
                    summary.checkpoints.push(saved);
                }
            }
            summary.epochs = epoch + 1;
        }

        summary.final_batch_size = policy.current();
        if policy.current() != policy.initial() {
            tracing::info!(initial = policy.initial(), discovered = policy.current(), "batch size discovered");
        }
        Ok(summary)
    }

    /// One accumulation window: forward/backward over each mini-batch of
    /// `window`, with the loss scaled by the number of mini-batches.
    async fn accumulate(
        &self,
        model: &mut dyn TrainableModel,
        data: &[TokenSequence],
        window: &[usize],
        batch_size: usize,
    ) -> Result<f64, BackendError> {
        let scale = 1.0 / window.len().div_ceil(batch_size) as f64;
        let mut loss = 0.0;
        for chunk in window.chunks(batch_size) {
            if self.cancel.is_cancelled() {
                return Err(BackendError::Cancelled);
            }
            let batch: Vec<TokenSequence> = chunk.iter().map(|&i| data[i].clone()).collect();
            loss += model.forward_backward(&batch, scale).await? * scale;
        }
        Ok(loss)
    }

    /// Mean eval loss weighted by example, or `None` for an empty eval split.
    async fn evaluate(
        &self,
        model: &dyn TrainableModel,
        eval: &[TokenSequence],
        batch_size: usize,
    ) -> TrainingResult<Option<f64>> {
        if eval.is_empty() {
            return Ok(None);
        }

        let mut weighted = 0.0;
        for chunk in eval.chunks(batch_size.max(1)) {
            if self.cancel.is_cancelled() {
                return Err(TrainingError::Cancelled);
            }
            let loss = model.evaluate(chunk).await.map_err(|e| exhausted(batch_size, e))?;
            weighted += loss * chunk.len() as f64;
        }
        Ok(Some(weighted / eval.len() as f64))
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        model: &dyn TrainableModel,
        plan: &AdapterPlan,
        split: &DatasetSplit,
        summary: FitSummary,
        base_model: ModelSpec,
        dataset_id: DatasetId,
        created_at: chrono::DateTime<Utc>,
    ) -> TrainingResult<TrainingOutcome> {
        let weights = model.adapter_weights()?;
        write_json_atomic(&self.layout.adapter_weights_path(), &weights)?;
        write_json_atomic(&self.layout.adapter_config_path(), &self.adapter)?;

        // Checkpoints left by an earlier run in the same directory are not part of this job.
        let checkpoints: Vec<Checkpoint> = summary.checkpoints.into_iter().filter(|c| c.path.is_dir()).collect();

        let mut artifacts = vec![
            make_artifact(ArtifactKind::Adapter, self.layout.adapter_weights_path())?,
            make_artifact(ArtifactKind::AdapterConfig, self.layout.adapter_config_path())?,
        ];
        for checkpoint in &checkpoints {
            artifacts.push(make_artifact(ArtifactKind::Checkpoint, checkpoint.path.join(ADAPTER_WEIGHTS_FILE))?);
        }

        let manifest = TrainingManifest {
            job_id: self.job_id.clone(),
            created_at,
            finished_at: Utc::now(),
            base_model,
            dataset_id,
            train_examples: split.train.len(),
            eval_examples: split.eval.len(),
            adapter: self.adapter.clone(),
            adapter_report: plan.report(),
            schedule: self.schedule.clone(),
            metrics: TrainingMetrics {
                train_loss: summary.train_loss,
                eval_loss: summary.eval_loss,
                steps: Some(summary.global_step as u64),
                epochs: Some(summary.epochs),
                final_batch_size: Some(summary.final_batch_size),
            },
            artifacts,
        };
        write_json_atomic(&self.layout.manifest_path(), &manifest)?;
        tracing::info!(
            output = %self.layout.root().display(),
            steps = summary.global_step,
            "adapter saved"
        );

        Ok(TrainingOutcome { manifest, output_dir: self.layout.root().to_path_buf(), checkpoints })
    }

    fn emit(&self, event: ProgressEvent) {
        self.progress.on_event(event);
    }
}

fn exhausted(batch_size: usize, err: BackendError) -> TrainingError {
    match err {
        BackendError::ResourceExhausted(message) => TrainingError::ResourceExhaustion { batch_size, message },
        other => other.into(),
    }
}

/// Tokenizes every example and truncates it to `max_len` tokens.
fn encode(
    tokenizer: &dyn Tokenizer,
    examples: &[TrainingExample],
    max_len: usize,
    split: &str,
) -> TrainingResult<Vec<TokenSequence>> {
    examples
        .iter()
        .enumerate()
        .map(|(index, example)| {
            let mut tokens = tokenizer
                .tokenize(&example.text)
                .map_err(|e| TrainingError::Data(format!("{split} example {index}: {e}")))?;
            if tokens.is_empty() {
                return Err(TrainingError::Data(format!("{split} example {index} produced no tokens")));
            }
            tokens.truncate(max_len);
            Ok(tokens)
        })
        .collect()
}
