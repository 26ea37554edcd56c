use std::sync::Arc;

use tracing::trace;

use super::executer::report;
use super::{ExecuterEvents, ExecuterKind, ExecutionContext, PipelineExecuter, StageWorkers};
use crate::operations::Operation;
use crate::primitives::concurrency::{CancelToken, HandoffQueue};
use crate::row::Row;
use crate::stream::BoxRowStream;
use crate::types::Result;

/// Runs every stage on its own worker thread.
///
/// A stage's worker drains the stage output into a [`HandoffQueue`] whose
/// receiving end is the next stage's input. When a stage faults, the fault is
/// recorded, its queue is finished, and downstream stages see a clean end
/// after the rows produced so far.
#[derive(Default)]
pub struct WorkerPoolExecuter {
    events: ExecuterEvents,
}

impl WorkerPoolExecuter {
    /// Creates the executer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl PipelineExecuter for WorkerPoolExecuter {
    fn kind(&self) -> ExecuterKind {
        ExecuterKind::WorkerPool
    }

    fn events(&self) -> &ExecuterEvents {
        &self.events
    }

    fn decorate(
        &self,
        op: &Arc<dyn Operation>,
        mut output: BoxRowStream,
        context: &Arc<ExecutionContext>,
        cancel: &CancelToken,
        workers: &mut StageWorkers,
    ) -> Result<BoxRowStream> {
        let queue = HandoffQueue::<Row>::with_poll_interval(context.wait_poll());
        let sender = queue.sender();
        let stage = op.name().to_owned();
        let worker_context = Arc::clone(context);
        workers.spawn(op.name(), move || {
            loop {
                match output.try_next() {
                    Ok(Some(row)) => sender.send(row),
                    Ok(None) => break,
                    Err(err) => {
                        report(&worker_context, err);
                        break;
                    }
                }
            }
            trace!(stage = %stage, "pipeline.stage.drained");
        })?;
        Ok(Box::new(queue.receiver(cancel.clone())))
    }
}
