//! Lock-step barrier over one shared stream.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use super::{CancelToken, DEFAULT_WAIT_POLL};
use crate::row::Row;
use crate::stream::{BoxRowStream, RowStream};
use crate::types::{PipelineError, Result};

struct GateShared {
    state: Mutex<GateState>,
    turn: Condvar,
    poll: Duration,
}

struct GateState {
    inner: Option<BoxRowStream>,
    consumers_left: usize,
    arrived: usize,
    generation: u64,
    outcome: Result<Option<Row>>,
    done: bool,
}

/// Splits `inner` into `consumers` lock-stepped views.
pub fn split(consumers: usize, inner: BoxRowStream, cancel: &CancelToken) -> Vec<GateView> {
    split_with_poll(consumers, inner, cancel, DEFAULT_WAIT_POLL)
}

/// Like [`split`], re-checking cancellation every `poll` while waiting for
/// sibling consumers.
pub fn split_with_poll(
    consumers: usize,
    inner: BoxRowStream,
    cancel: &CancelToken,
    poll: Duration,
) -> Vec<GateView> {
    let shared = Arc::new(GateShared {
        state: Mutex::new(GateState {
            inner: (consumers > 0).then_some(inner),
            consumers_left: consumers,
            arrived: 0,
            generation: 0,
            outcome: Ok(None),
            done: false,
        }),
        turn: Condvar::new(),
        poll,
    });
    (0..consumers)
        .map(|_| GateView {
            shared: Arc::clone(&shared),
            cancel: cancel.clone(),
        })
        .collect()
}

impl GateShared {
    /// Pulls the inner stream once and releases every waiter with the outcome.
    fn advance(&self, state: &mut GateState) {
        state.arrived = 0;
        let outcome = match state.inner.as_mut() {
            Some(inner) => inner.try_next(),
            None => Ok(None),
        };
        match &outcome {
            Ok(Some(_)) => {}
            Ok(None) => {
                state.done = true;
                trace!("gate.inner_exhausted");
            }
            Err(err) => {
                state.done = true;
                debug!(error = %err, "gate.inner_fault_broadcast");
            }
        }
        state.outcome = outcome;
        state.generation = state.generation.wrapping_add(1);
        self.turn.notify_all();
    }
}

/// One consumer's view of a lock-step barrier that feeds one inner stream to
/// a fixed set of consumers, created by [`split`].
///
/// Each advance blocks until every live consumer has asked for the next row.
/// The last consumer to arrive pulls the inner stream exactly once and the
/// outcome (row, exhaustion or fault) is handed to all of them. The inner
/// stream is dropped once every view has been dropped.
///
/// A view that is dropped before the end leaves the quorum, so the remaining
/// consumers keep advancing instead of waiting on it forever.
pub struct GateView {
    shared: Arc<GateShared>,
    cancel: CancelToken,
}

impl GateView {
    /// Consumers that have not dropped their view yet.
    pub fn consumers_left(&self) -> usize {
        self.shared.state.lock().consumers_left
    }
}

impl RowStream for GateView {
    fn try_next(&mut self) -> Result<Option<Row>> {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        if state.done {
            return state.outcome.clone();
        }
        state.arrived += 1;
        if state.arrived >= state.consumers_left {
            shared.advance(&mut state);
            return state.outcome.clone();
        }
        let generation = state.generation;
        while state.generation == generation {
            if self.cancel.is_cancelled() {
                state.arrived -= 1;
                return Err(PipelineError::Cancelled);
            }
            shared.turn.wait_for(&mut state, shared.poll);
        }
        state.outcome.clone()
    }
}

impl Drop for GateView {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        state.consumers_left = state.consumers_left.saturating_sub(1);
        if state.consumers_left == 0 {
            debug!("gate.dispose_inner");
            state.inner = None;
            return;
        }
        if !state.done && state.arrived > 0 && state.arrived >= state.consumers_left {
            self.shared.advance(&mut state);
        }
    }
}
