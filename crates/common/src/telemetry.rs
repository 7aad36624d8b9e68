use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Monotonic action counter for one pipeline stage.
///
/// Workers increment it once per unit of work; the supervisor reads it for
/// status logs and health snapshots. Increments come from one worker at a
/// time, so relaxed atomics are enough and reads take no lock.
#[derive(Clone, Debug, Default)]
pub struct StageTelemetry {
    actions: Arc<AtomicU64>,
}

impl StageTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed unit of work.
    pub fn record(&self) {
        self.actions.fetch_add(1, Ordering::Relaxed);
    }

    /// Total units of work recorded over the process lifetime.
    pub fn count(&self) -> u64 {
        self.actions.load(Ordering::Relaxed)
    }
}
