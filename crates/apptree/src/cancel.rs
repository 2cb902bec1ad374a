//! Cooperative cancellation for long-running codec calls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{CodecError, Result};

/// A shared flag that asks an in-flight operation to stop.
///
/// The codec checks it before starting each section and each top-level
/// instance. Files written by already completed instances stay on disk.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Every clone observes it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Returns `Err(CodecError::Cancelled)` once cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            log::info!("Cancellation requested, stopping before next unit of work");
            return Err(CodecError::Cancelled);
        }
        Ok(())
    }
}
