use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::error;

use crate::primitives::concurrency::DEFAULT_WAIT_POLL;
use crate::types::PipelineError;

/// Run-wide state shared by an executer and every operation it prepares.
///
/// Any recorded fault, whether in an operation or the executer itself, flips
/// [`ExecutionContext::has_errors`], which transactional sinks consult before
/// committing.
#[derive(Debug)]
pub struct ExecutionContext {
    faulted: AtomicBool,
    errors: Mutex<Vec<PipelineError>>,
    wait_poll: Duration,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::with_wait_poll(DEFAULT_WAIT_POLL)
    }
}

impl ExecutionContext {
    /// Creates a context with no recorded faults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context whose blocking waits re-check cancellation every
    /// `wait_poll`.
    pub fn with_wait_poll(wait_poll: Duration) -> Self {
        Self {
            faulted: AtomicBool::new(false),
            errors: Mutex::new(Vec::new()),
            wait_poll,
        }
    }

    /// Poll interval for handoff queues and gates created during the run.
    pub fn wait_poll(&self) -> Duration {
        self.wait_poll
    }

    /// Returns true once any fault has been recorded during the run.
    pub fn has_errors(&self) -> bool {
        self.faulted.load(Ordering::SeqCst)
    }

    /// Notes that a fault was recorded elsewhere (e.g. in an operation).
    pub fn mark_faulted(&self) {
        self.faulted.store(true, Ordering::SeqCst);
    }

    /// Records a fault owned by the executer.
    pub fn record(&self, err: PipelineError) {
        error!(error = %err, "pipeline.executer.fault");
        self.errors.lock().push(err);
        self.mark_faulted();
    }

    /// Faults recorded by the executer itself.
    pub fn errors(&self) -> Vec<PipelineError> {
        self.errors.lock().clone()
    }
}
