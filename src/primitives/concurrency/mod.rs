//! Stream adapters that let pipeline stages share or hand off rows across
//! workers: a replay cache, a blocking handoff queue and a lock-step gate.

pub mod gate;
mod handoff;
mod replay;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::types::{PipelineError, Result};

pub use gate::GateView;
pub use handoff::{HandoffQueue, HandoffSender, HandoffStream};
pub use replay::{ReplayCache, ReplayStream};

/// How long a blocked consumer sleeps before re-checking cancellation.
pub const DEFAULT_WAIT_POLL: Duration = Duration::from_millis(10);

/// Cooperative cancellation signal threaded through every execution call and
/// every blocking wait.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a token that has not fired.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the token. All clones observe it.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns true once [`CancelToken::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Returns [`PipelineError::Cancelled`] once the token fired.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }
}
