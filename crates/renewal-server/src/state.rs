use renewal_core::runtime::WorkflowRuntime;
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};

/// Runs driven at the same time by the scheduler.
pub const MAX_CONCURRENT_DRIVES: usize = 8;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<WorkflowRuntime>,
    /// Signalled after a trigger or cancel so the scheduler ticks right away
    /// instead of waiting out its interval.
    pub wake: Arc<Notify>,
    /// Bounds how many runs the scheduler drives at once.
    pub drives: Arc<Semaphore>,
}

impl AppState {
    pub fn new(runtime: WorkflowRuntime) -> Self {
        Self {
            runtime: Arc::new(runtime),
            wake: Arc::new(Notify::new()),
            drives: Arc::new(Semaphore::new(MAX_CONCURRENT_DRIVES)),
        }
    }
}
