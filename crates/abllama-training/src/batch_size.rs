//! Out-of-memory driven batch size discovery.

use crate::error::{TrainingError, TrainingResult};

/// Bounded halving policy for the training mini-batch size.
///
/// Starting from the configured size, every out-of-memory report halves the
/// batch size, down to a floor of 1. At most `floor(log2(initial))` retries are
/// granted; once exhausted (or when discovery is disabled) the next
/// out-of-memory report is fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSizePolicy {
    initial: usize,
    current: usize,
    retries_left: u32,
}

impl BatchSizePolicy {
    pub fn new(initial: usize, auto_discover: bool) -> Self {
        let initial = initial.max(1);
        let retries_left = if auto_discover { initial.ilog2() } else { 0 };
        Self { initial, current: initial, retries_left }
    }

    pub fn initial(&self) -> usize {
        self.initial
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn retries_left(&self) -> u32 {
        self.retries_left
    }

    /// Consumes one retry and halves the batch size.
    ///
    /// Returns the new batch size, or [`TrainingError::ResourceExhaustion`]
    /// when no retry is left.
    pub fn on_out_of_memory(&mut self, message: &str) -> TrainingResult<usize> {
        if self.retries_left == 0 || self.current <= 1 {
            return Err(TrainingError::ResourceExhaustion {
                batch_size: self.current,
                message: message.to_string(),
            });
        }
        self.retries_left -= 1;
        self.current = (self.current / 2).max(1);
        Ok(self.current)
    }
}
