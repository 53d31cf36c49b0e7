//! Progress reporting and cooperative cancellation
//!
//! Both are consulted between chunks only. A command that has been sent is
//! always driven to its acknowledgement so the wire framing stays in sync.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Observer notified after each completed chunk
pub trait ProgressSink {
    fn update(&mut self, done: usize, total: usize);
}

impl<F> ProgressSink for F
where
    F: FnMut(usize, usize),
{
    fn update(&mut self, done: usize, total: usize) {
        self(done, total)
    }
}

/// [`ProgressSink`] that ignores all updates
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn update(&mut self, _done: usize, _total: usize) {}
}

/// Shared cancellation flag with an optional deadline
///
/// Clones share the flag, so a token can be handed to a worker thread and
/// cancelled from the caller.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that also expires at `deadline`
    pub fn with_deadline(deadline: Instant) -> Self {
        Self { cancelled: Arc::new(AtomicBool::new(false)), deadline: Some(deadline) }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.cancelled.load(Ordering::SeqCst) {
            return true;
        }
        matches!(self.deadline, Some(d) if Instant::now() >= d)
    }
}
