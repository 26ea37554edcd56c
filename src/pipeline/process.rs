use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, trace, warn};

use super::{ExecutionContext, PipelineExecuter, PipelineOptions, TranslateFn};
use crate::operations::{FinishListener, Operation, RowListener, StatisticsSnapshot};
use crate::primitives::concurrency::CancelToken;
use crate::row::Row;
use crate::stream::BoxRowStream;
use crate::types::{PipelineError, Result};

type PostProcessFn = dyn Fn(&PipelineProcess) -> Result<()> + Send + Sync;

/// A fully constructed operation chain plus the executer that will run it.
///
/// Operations registered with [`PipelineProcess::register_last`] run after
/// every operation registered with [`PipelineProcess::register`].
///
/// ```no_run
/// use rowflow::operations::basic::{CollectRows, RowSource};
/// use rowflow::pipeline::PipelineProcess;
/// use rowflow::{CancelToken, Row};
///
/// let sink = CollectRows::new("sink");
/// let process = PipelineProcess::new("demo")
///     .register(RowSource::from_rows("source", vec![Row::new().with("id", 1)]))
///     .register(sink.clone());
/// process.execute(&CancelToken::new());
/// assert!(process.all_errors().is_empty());
/// assert_eq!(sink.len(), 1);
/// ```
pub struct PipelineProcess {
    name: String,
    options: PipelineOptions,
    executer: Arc<dyn PipelineExecuter>,
    operations: Vec<Arc<dyn Operation>>,
    last_operations: Vec<Arc<dyn Operation>>,
    translate: Option<Box<TranslateFn>>,
    post_process: Option<Box<PostProcessFn>>,
    row_listeners: Vec<RowListener>,
    finish_listeners: Vec<FinishListener>,
    context: Mutex<Option<Arc<ExecutionContext>>>,
    errors: Mutex<Vec<PipelineError>>,
}

impl PipelineProcess {
    /// Creates a process with default options.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_options(name, PipelineOptions::default())
    }

    /// Creates a process whose executer is picked by `options`.
    pub fn with_options(name: impl Into<String>, options: PipelineOptions) -> Self {
        let executer = options.executer.build();
        Self {
            name: name.into(),
            options,
            executer,
            operations: Vec::new(),
            last_operations: Vec::new(),
            translate: None,
            post_process: None,
            row_listeners: Vec::new(),
            finish_listeners: Vec::new(),
            context: Mutex::new(None),
            errors: Mutex::new(Vec::new()),
        }
    }

    /// Replaces the executer chosen from the options.
    pub fn with_executer(mut self, executer: Arc<dyn PipelineExecuter>) -> Self {
        self.executer = executer;
        self
    }

    /// Appends an operation to the main chain.
    pub fn register(mut self, op: Arc<dyn Operation>) -> Self {
        self.operations.push(op);
        self
    }

    /// Appends an operation that runs after the whole main chain.
    pub fn register_last(mut self, op: Arc<dyn Operation>) -> Self {
        self.last_operations.push(op);
        self
    }

    /// Rewrites each stage's output stream before the next stage sees it.
    pub fn translate_rows<F>(mut self, translate: F) -> Self
    where
        F: Fn(BoxRowStream) -> BoxRowStream + Send + Sync + 'static,
    {
        self.translate = Some(Box::new(translate));
        self
    }

    /// Runs after execution, before [`PipelineProcess::execute`] returns. A
    /// failure is kept in [`PipelineProcess::all_errors`].
    pub fn post_process<F>(mut self, hook: F) -> Self
    where
        F: Fn(&PipelineProcess) -> Result<()> + Send + Sync + 'static,
    {
        self.post_process = Some(Box::new(hook));
        self
    }

    /// Subscribes to every row emitted by every operation, nested ones
    /// included.
    pub fn on_row_processed(mut self, listener: RowListener) -> Self {
        self.row_listeners.push(listener);
        self
    }

    /// Subscribes to completion of every operation.
    pub fn on_finished_processing(mut self, listener: FinishListener) -> Self {
        self.finish_listeners.push(listener);
        self
    }

    /// Process name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Options the process was built with.
    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Executer driving the process.
    pub fn executer(&self) -> &Arc<dyn PipelineExecuter> {
        &self.executer
    }

    /// Every registered operation, main chain first.
    pub fn operations(&self) -> Vec<Arc<dyn Operation>> {
        self.operations
            .iter()
            .chain(&self.last_operations)
            .cloned()
            .collect()
    }

    /// Context of the last run, if any.
    pub fn context(&self) -> Option<Arc<ExecutionContext>> {
        self.context.lock().clone()
    }

    /// Runs the process to completion. Faults do not stop the run; inspect
    /// [`PipelineProcess::all_errors`] afterwards.
    pub fn execute(&self, cancel: &CancelToken) {
        let context = Arc::new(ExecutionContext::with_wait_poll(self.options.wait_poll()));
        *self.context.lock() = Some(Arc::clone(&context));
        let pipeline = self.operations();
        self.subscribe(&pipeline);

        self.executer.execute(
            &self.name,
            &pipeline,
            &context,
            self.translate.as_deref(),
            cancel,
        );

        if let Some(hook) = &self.post_process {
            if let Err(err) = hook(self) {
                warn!(process = %self.name, error = %err, "process.post_process_failed");
                self.errors.lock().push(err);
            }
        }
        let errors = self.all_errors();
        if errors.is_empty() {
            info!(process = %self.name, "process.completed");
        } else {
            warn!(process = %self.name, errors = errors.len(), "process.completed_with_errors");
        }
    }

    /// Every fault from the process, the executer and every operation,
    /// including nested ones. Empty after a successful run.
    pub fn all_errors(&self) -> Vec<PipelineError> {
        let mut errors = self.errors.lock().clone();
        if let Some(context) = self.context.lock().as_ref() {
            errors.extend(context.errors());
        }
        for op in self.operations() {
            errors.extend(op.all_errors());
        }
        errors
    }

    /// Snapshot of every operation's statistics and the errors so far.
    pub fn report(&self) -> ProcessReport {
        ProcessReport {
            process: self.name.clone(),
            executer: self.executer.kind().to_string(),
            operations: self.operations().iter().map(|op| OperationReport::of(op.as_ref())).collect(),
            errors: self.all_errors().iter().map(ToString::to_string).collect(),
        }
    }

    fn subscribe(&self, pipeline: &[Arc<dyn Operation>]) {
        let interval = self.options.progress_interval.max(1);
        let progress: RowListener = Arc::new(move |op: &dyn Operation, _row: &Row| {
            let written = op.core().statistics().rows_written();
            if written % interval == 0 {
                info!(operation = op.name(), rows = written, "operation.progress");
            } else {
                trace!(operation = op.name(), rows = written, "operation.row");
            }
        });
        let finished: FinishListener = Arc::new(|op: &dyn Operation| {
            let stats = op.statistics();
            info!(
                operation = op.name(),
                rows_read = stats.rows_read,
                rows_written = stats.rows_written,
                duration = ?stats.duration,
                "operation.completed"
            );
        });
        for op in pipeline {
            op.on_row_processed(Arc::clone(&progress));
            op.on_finished_processing(Arc::clone(&finished));
            for listener in &self.row_listeners {
                op.on_row_processed(Arc::clone(listener));
            }
            for listener in &self.finish_listeners {
                op.on_finished_processing(Arc::clone(listener));
            }
        }
    }
}

/// Serializable summary of a run, for telemetry sinks.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessReport {
    /// Process name.
    pub process: String,
    /// Executer strategy.
    pub executer: String,
    /// Registered operations in execution order.
    pub operations: Vec<OperationReport>,
    /// Rendered errors; empty after a clean run.
    pub errors: Vec<String>,
}

impl ProcessReport {
    /// Renders the report as JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Statistics of one operation and the operations nested in it.
#[derive(Debug, Clone, Serialize)]
pub struct OperationReport {
    /// Operation name.
    pub name: String,
    /// Lifecycle state when the report was taken.
    pub state: String,
    /// Counters.
    #[serde(flatten)]
    pub statistics: StatisticsSnapshot,
    /// Nested operations (join sides, branch children, chain members).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub nested: Vec<OperationReport>,
}

impl OperationReport {
    fn of(op: &dyn Operation) -> Self {
        Self {
            name: op.name().to_owned(),
            state: op.core().state().to_string(),
            statistics: op.statistics(),
            nested: op.children().iter().map(|child| Self::of(child.as_ref())).collect(),
        }
    }
}
