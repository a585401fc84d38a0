//! Task Executors
//!
//! Implementations of the task executor interface used to run modulation tasks.

use interfaces::{Task, TaskExecutor};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::trace;

/// Runs tasks on the blocking thread pool of a tokio runtime
///
/// At most `max_pending` tasks may be queued or running at once; further tasks are refused.
pub struct TokioTaskExecutor {
    handle: Handle,
    pending: Arc<AtomicUsize>,
    max_pending: usize,
}

impl TokioTaskExecutor {
    /// Create an executor backed by the runtime behind `handle`
    pub fn new(handle: Handle, max_pending: usize) -> Self {
        Self {
            handle,
            pending: Arc::new(AtomicUsize::new(0)),
            max_pending,
        }
    }

    /// Number of tasks queued or running
    pub fn nof_pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

impl TaskExecutor for TokioTaskExecutor {
    fn defer(&self, task: Task) -> bool {
        let reserved = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pending| {
                (pending < self.max_pending).then_some(pending + 1)
            })
            .is_ok();
        if !reserved {
            trace!("Executor queue full, refusing task");
            return false;
        }

        let slot = PendingSlot(Arc::clone(&self.pending));
        self.handle.spawn_blocking(move || {
            let _slot = slot;
            task();
        });
        true
    }
}

/// Reservation of one pending task, returned when the task finishes, panics or is
/// discarded by the runtime
struct PendingSlot(Arc<AtomicUsize>);

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Runs every task immediately on the calling thread
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineTaskExecutor;

impl TaskExecutor for InlineTaskExecutor {
    fn defer(&self, task: Task) -> bool {
        task();
        true
    }
}
