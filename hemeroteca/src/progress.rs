//! Build progress reporting

/// Receives progress from long-running work. Implementations must tolerate calls
/// from several worker threads.
pub trait ProgressObserver: Send + Sync {
    /// A unit of work named `name` with `total` steps started.
    fn task_started(&self, name: &str, total: u64);
    fn advance(&self, name: &str, steps: u64);
    fn task_finished(&self, name: &str);
}

/// Discards all progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn task_started(&self, _name: &str, _total: u64) {}
    fn advance(&self, _name: &str, _steps: u64) {}
    fn task_finished(&self, _name: &str) {}
}
