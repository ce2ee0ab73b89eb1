/// Receives batch generation progress after each prompt.
pub trait BatchProgress: Send + Sync {
    fn start(&self, total: usize);

    fn advance(&self, processed: usize, total: usize);

    fn finish(&self);
}

/// Logs progress through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingBatchProgress;

impl BatchProgress for TracingBatchProgress {
    fn start(&self, total: usize) {
        tracing::info!(total, "Start generating...");
    }

    fn advance(&self, processed: usize, total: usize) {
        tracing::debug!(processed, total, "prompt generated");
    }

    fn finish(&self) {}
}
