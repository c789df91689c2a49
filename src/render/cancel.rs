//! Cooperative cancellation for in-flight renders
//!
//! The scheduler hands a token to every render task. Cancelling the task flips
//! the shared flag; the worker and the rendering engine poll it at their
//! resumption points and give up early.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared cancel flag for one render task
///
/// Clones observe the same flag, so the scheduler keeps one copy and the
/// worker thread receives another.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the task. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
