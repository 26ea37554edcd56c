use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::RwLock;
use tracing::{error, info, warn};

use super::{ExecuterKind, ExecutionContext};
use crate::operations::{run, Operation};
use crate::primitives::concurrency::CancelToken;
use crate::stream::{drain, empty, BoxRowStream};
use crate::types::{PipelineError, Result};

/// Hook applied to every stage's output before it is wired to the next stage.
pub type TranslateFn = dyn Fn(BoxRowStream) -> BoxRowStream + Send + Sync;

/// Callback fired when an executer starts or completes a run.
pub type ExecuterListener = Arc<dyn Fn(&dyn PipelineExecuter) + Send + Sync>;

/// Listener lists every executer carries.
#[derive(Default)]
pub struct ExecuterEvents {
    starting: RwLock<Vec<ExecuterListener>>,
    completing: RwLock<Vec<ExecuterListener>>,
}

impl ExecuterEvents {
    fn fire(listeners: &RwLock<Vec<ExecuterListener>>, executer: &dyn PipelineExecuter) {
        let listeners = listeners.read().clone();
        for listener in listeners {
            listener(executer);
        }
    }
}

/// Background workers started while wiring a run. Joined after the final
/// stream has been drained and dropped.
#[derive(Default)]
pub struct StageWorkers {
    handles: Vec<(String, JoinHandle<()>)>,
}

impl StageWorkers {
    /// Spawns a named worker for `stage`.
    pub fn spawn<F>(&mut self, stage: &str, work: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(format!("rowflow-stage-{stage}"))
            .spawn(work)
            .map_err(|err| PipelineError::execution(format!("failed to spawn worker for {stage}: {err}")))?;
        self.handles.push((stage.to_owned(), handle));
        Ok(())
    }

    /// Number of workers still to be joined.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Returns true when no worker was spawned.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    fn join_all(&mut self, context: &ExecutionContext) {
        for (stage, handle) in self.handles.drain(..) {
            if let Err(payload) = handle.join() {
                context.record(PipelineError::panicked(&format!("worker for {stage}"), &*payload));
            }
        }
    }
}

/// Strategy that wires a linear chain of operations together and drives it.
///
/// Implementors only decide how one stage's output becomes the next stage's
/// input ([`PipelineExecuter::decorate`]); `execute` on `dyn PipelineExecuter`
/// provides preparation, draining, notifications and disposal.
pub trait PipelineExecuter: Send + Sync {
    /// Strategy identifier.
    fn kind(&self) -> ExecuterKind;

    /// Starting/completing listeners.
    fn events(&self) -> &ExecuterEvents;

    /// Turns the output of `op` into the input of the next stage.
    fn decorate(
        &self,
        op: &Arc<dyn Operation>,
        output: BoxRowStream,
        context: &Arc<ExecutionContext>,
        cancel: &CancelToken,
        workers: &mut StageWorkers,
    ) -> Result<BoxRowStream>;

    /// Subscribes to the start of every run.
    fn on_execution_starting(&self, listener: ExecuterListener) {
        self.events().starting.write().push(listener);
    }

    /// Subscribes to the end of every run, fired before operations are
    /// disposed.
    fn on_execution_completing(&self, listener: ExecuterListener) {
        self.events().completing.write().push(listener);
    }
}

impl dyn PipelineExecuter {
    /// Runs `pipeline` to completion.
    ///
    /// Never fails: every fault ends up in an operation's error list or in
    /// `context`. Every operation is disposed before this returns.
    pub fn execute(
        &self,
        name: &str,
        pipeline: &[Arc<dyn Operation>],
        context: &Arc<ExecutionContext>,
        translate: Option<&TranslateFn>,
        cancel: &CancelToken,
    ) {
        let started = Instant::now();
        info!(
            pipeline = name,
            executer = %self.kind(),
            stages = pipeline.len(),
            "pipeline.execute.start"
        );
        let mut workers = StageWorkers::default();
        let wired = contain(name, || wire(self, pipeline, context, translate, cancel, &mut workers));
        match wired {
            Ok(rows) => {
                ExecuterEvents::fire(&self.events().starting, self);
                let drained = contain(name, move || {
                    let mut rows = rows;
                    drain(&mut rows)
                });
                if let Err(err) = drained {
                    report(context, err);
                }
                ExecuterEvents::fire(&self.events().completing, self);
            }
            Err(err) => {
                error!(pipeline = name, error = %err, "pipeline.create_failed");
                report(context, err);
            }
        }
        workers.join_all(context);
        for op in pipeline {
            op.dispose();
        }
        info!(
            pipeline = name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            has_errors = context.has_errors(),
            "pipeline.execute.complete"
        );
    }
}

/// Prepares and executes each stage, feeding the first one an empty stream.
fn wire(
    executer: &dyn PipelineExecuter,
    pipeline: &[Arc<dyn Operation>],
    context: &Arc<ExecutionContext>,
    translate: Option<&TranslateFn>,
    cancel: &CancelToken,
    workers: &mut StageWorkers,
) -> Result<BoxRowStream> {
    let mut rows = empty();
    for op in pipeline {
        op.prepare(context)?;
        let output = run(op, Some(rows), cancel)?;
        let output = match translate {
            Some(translate) => translate(output),
            None => output,
        };
        rows = executer.decorate(op, output, context, cancel, workers)?;
    }
    Ok(rows)
}

/// Runs `work`, turning a panic in operation code into an execution error so
/// the run still completes and disposes every operation. The unwound streams
/// are dropped inside the guard.
fn contain<T>(pipeline: &str, work: impl FnOnce() -> Result<T>) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(work)).unwrap_or_else(|payload| {
        error!(pipeline, "pipeline.panic");
        Err(PipelineError::panicked(&format!("pipeline {pipeline}"), &*payload))
    })
}

/// Faults attributed to an operation are already in its error list; anything
/// else belongs to the executer.
pub(crate) fn report(context: &ExecutionContext, err: PipelineError) {
    if err.is_attributed() {
        warn!(error = %err, "pipeline.stage.fault");
        context.mark_faulted();
    } else {
        context.record(err);
    }
}
