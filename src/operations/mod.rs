//! Pipeline operations.
//!
//! An operation consumes one input stream (optional for sources) and produces
//! one output stream. Plain operations form linear chains; joins and branches
//! own nested chains of their own.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

pub mod aggregate;
pub mod basic;
pub mod branch;
pub mod command;
pub mod events;
pub mod join;
pub mod partial;
pub mod statistics;

pub use events::{run, EventRaisingStream, FinishListener, RowListener};
pub use statistics::{OperationStatistics, StatisticsSnapshot};

use crate::pipeline::ExecutionContext;
use crate::primitives::concurrency::{CancelToken, DEFAULT_WAIT_POLL};
use crate::row::Row;
use crate::stream::BoxRowStream;
use crate::types::{PipelineError, Result};

/// Lifecycle of an operation instance. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationState {
    /// Constructed and registered.
    Created,
    /// Attached to an executer.
    Prepared,
    /// Output stream handed out.
    Executing,
    /// Output exhausted, faulted or abandoned.
    Finished,
    /// Resources released.
    Disposed,
}

impl OperationState {
    fn as_str(self) -> &'static str {
        match self {
            OperationState::Created => "created",
            OperationState::Prepared => "prepared",
            OperationState::Executing => "executing",
            OperationState::Finished => "finished",
            OperationState::Disposed => "disposed",
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bookkeeping every operation embeds: name, lifecycle, statistics, errors and
/// listeners.
pub struct OperationCore {
    name: String,
    state: Mutex<OperationState>,
    statistics: OperationStatistics,
    errors: Mutex<Vec<PipelineError>>,
    context: Mutex<Option<Arc<ExecutionContext>>>,
    row_listeners: RwLock<Vec<RowListener>>,
    finish_listeners: RwLock<Vec<FinishListener>>,
}

impl OperationCore {
    /// Creates the core for an operation called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(OperationState::Created),
            statistics: OperationStatistics::default(),
            errors: Mutex::new(Vec::new()),
            context: Mutex::new(None),
            row_listeners: RwLock::new(Vec::new()),
            finish_listeners: RwLock::new(Vec::new()),
        }
    }

    /// Operation name used in logs and error attribution.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> OperationState {
        *self.state.lock()
    }

    /// Running counters.
    pub fn statistics(&self) -> &OperationStatistics {
        &self.statistics
    }

    /// Run context attached by the executer, if any.
    pub fn context(&self) -> Option<Arc<ExecutionContext>> {
        self.context.lock().clone()
    }

    /// Poll interval for blocking waits, taken from the run context.
    pub fn wait_poll(&self) -> Duration {
        self.context
            .lock()
            .as_ref()
            .map(|ctx| ctx.wait_poll())
            .unwrap_or(DEFAULT_WAIT_POLL)
    }

    /// Returns true when any fault has been recorded in this run so far.
    pub fn has_errors(&self) -> bool {
        let in_run = self
            .context
            .lock()
            .as_ref()
            .map(|ctx| ctx.has_errors())
            .unwrap_or(false);
        in_run || !self.errors.lock().is_empty()
    }

    /// Faults recorded on this operation.
    pub fn errors(&self) -> Vec<PipelineError> {
        self.errors.lock().clone()
    }

    /// Attributes `err` to this operation, records it and flags the run.
    pub fn record_error(&self, err: PipelineError) -> PipelineError {
        let err = err.attribute(&self.name);
        warn!(operation = %self.name, error = %err, "operation.fault");
        self.errors.lock().push(err.clone());
        if let Some(ctx) = self.context.lock().as_ref() {
            ctx.mark_faulted();
        }
        err
    }

    pub(crate) fn prepare(&self, context: &Arc<ExecutionContext>) -> Result<()> {
        self.transition(
            &[OperationState::Created, OperationState::Prepared],
            OperationState::Prepared,
        )?;
        *self.context.lock() = Some(Arc::clone(context));
        Ok(())
    }

    pub(crate) fn begin(&self) -> Result<()> {
        self.transition(
            &[OperationState::Created, OperationState::Prepared],
            OperationState::Executing,
        )
    }

    /// Moves to `Finished` and fires finish listeners, once.
    pub(crate) fn finish(&self, op: &dyn Operation) {
        {
            let mut state = self.state.lock();
            if matches!(*state, OperationState::Finished | OperationState::Disposed) {
                return;
            }
            *state = OperationState::Finished;
        }
        self.statistics.mark_finished();
        debug!(
            operation = %self.name,
            statistics = ?self.statistics.snapshot(),
            "operation.finished"
        );
        let listeners = self.finish_listeners.read().clone();
        for listener in listeners {
            listener(op);
        }
    }

    /// Moves to `Disposed`. Returns false if it was already disposed.
    pub(crate) fn dispose(&self) -> bool {
        let mut state = self.state.lock();
        if *state == OperationState::Disposed {
            return false;
        }
        *state = OperationState::Disposed;
        true
    }

    pub(crate) fn notify_row(&self, op: &dyn Operation, row: &Row) {
        self.statistics.add_written();
        let listeners = self.row_listeners.read().clone();
        for listener in listeners {
            listener(op, row);
        }
    }

    fn add_row_listener(&self, listener: RowListener) {
        self.row_listeners.write().push(listener);
    }

    fn add_finish_listener(&self, listener: FinishListener) {
        self.finish_listeners.write().push(listener);
    }

    fn transition(&self, from: &[OperationState], to: OperationState) -> Result<()> {
        let mut state = self.state.lock();
        if !from.contains(&*state) {
            return Err(PipelineError::InvalidState {
                operation: self.name.clone(),
                from: state.as_str(),
                to: to.as_str(),
            });
        }
        *state = to;
        Ok(())
    }
}

impl fmt::Debug for OperationCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationCore")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("statistics", &self.statistics.snapshot())
            .finish()
    }
}

/// A pipeline stage.
///
/// Implementors provide [`Operation::core`] and [`Operation::open`]; the
/// remaining methods have defaults that walk nested children.
pub trait Operation: Send + Sync + 'static {
    /// Shared bookkeeping.
    fn core(&self) -> &OperationCore;

    /// Builds the lazy output stream. No rows may be pulled here.
    fn open(self: Arc<Self>, input: Option<BoxRowStream>, cancel: &CancelToken)
        -> Result<BoxRowStream>;

    /// Nested operations owned by this one.
    fn children(&self) -> Vec<Arc<dyn Operation>> {
        Vec::new()
    }

    /// Releases resources held by the operation. Called once from
    /// [`Operation::dispose`].
    fn release(&self) {}

    /// Operation name.
    fn name(&self) -> &str {
        self.core().name()
    }

    /// Counters snapshot.
    fn statistics(&self) -> StatisticsSnapshot {
        self.core().statistics().snapshot()
    }

    /// Attaches the run context to this operation and its children.
    fn prepare(&self, context: &Arc<ExecutionContext>) -> Result<()> {
        for child in self.children() {
            child.prepare(context)?;
        }
        self.core().prepare(context)
    }

    /// Starts execution and returns the lazy output stream.
    ///
    /// Executing an operation that already ran returns
    /// [`PipelineError::InvalidState`].
    fn execute(
        self: Arc<Self>,
        input: Option<BoxRowStream>,
        cancel: &CancelToken,
    ) -> Result<BoxRowStream> {
        self.core().begin()?;
        self.open(input, cancel)
    }

    /// Faults recorded on this operation and every nested child.
    fn all_errors(&self) -> Vec<PipelineError> {
        let mut errors = Vec::new();
        for child in self.children() {
            errors.extend(child.all_errors());
        }
        errors.extend(self.core().errors());
        errors
    }

    /// Subscribes to rows emitted by this operation and its children.
    fn on_row_processed(&self, listener: RowListener) {
        for child in self.children() {
            child.on_row_processed(Arc::clone(&listener));
        }
        self.core().add_row_listener(listener);
    }

    /// Subscribes to completion of this operation and its children.
    fn on_finished_processing(&self, listener: FinishListener) {
        for child in self.children() {
            child.on_finished_processing(Arc::clone(&listener));
        }
        self.core().add_finish_listener(listener);
    }

    /// Disposes this operation and its children. Safe to call repeatedly;
    /// only the first call releases anything.
    fn dispose(&self) {
        if !self.core().dispose() {
            return;
        }
        for child in self.children() {
            child.dispose();
        }
        self.release();
    }
}

/// Returns the input or a [`PipelineError::MissingInput`] naming `op`.
pub(crate) fn require_input(op: &OperationCore, input: Option<BoxRowStream>) -> Result<BoxRowStream> {
    input.ok_or_else(|| PipelineError::MissingInput {
        operation: op.name().to_owned(),
    })
}
