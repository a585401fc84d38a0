//! Task Executor Interface

/// Unit of work handed to an executor
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Non-blocking task submission
pub trait TaskExecutor: Send + Sync {
    /// Submit a task. Returns false if the executor refused it; the task is then dropped
    /// without running.
    fn defer(&self, task: Task) -> bool;
}
