//! Fan-out operations that feed one input stream to several child operations.
//!
//! A branch has no output of its own: its stream drives the children to
//! completion on the first pull and then reports exhaustion.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use tracing::{debug, warn};

use super::{require_input, run, Operation, OperationCore};
use crate::primitives::concurrency::{gate, CancelToken, ReplayCache};
use crate::row::Row;
use crate::stream::{drain, BoxRowStream, RowStream};
use crate::types::{PipelineError, Result};

/// How a [`Branch`] hands its input to the children.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BranchMode {
    /// Input is buffered in a replay cache and each child runs to completion
    /// in registration order over its own copy.
    Sequential,
    /// Input is split through a lock-step gate and every child runs on its own
    /// thread; all children see each row at the same logical step.
    Parallel,
}

/// Terminal fan-out over N registered children.
pub struct Branch {
    core: OperationCore,
    mode: BranchMode,
    children: Vec<Arc<dyn Operation>>,
}

impl Branch {
    /// Sequential branch.
    pub fn sequential(name: impl Into<String>) -> Self {
        Self::new(name, BranchMode::Sequential)
    }

    /// Parallel branch.
    pub fn parallel(name: impl Into<String>) -> Self {
        Self::new(name, BranchMode::Parallel)
    }

    fn new(name: impl Into<String>, mode: BranchMode) -> Self {
        Self {
            core: OperationCore::new(name),
            mode,
            children: Vec::new(),
        }
    }

    /// Registers a child. Use a [`super::partial::PartialProcess`] to give a
    /// child more than one stage.
    pub fn add(mut self, child: Arc<dyn Operation>) -> Self {
        self.children.push(child);
        self
    }

    /// Finishes construction.
    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Fan-out strategy.
    pub fn mode(&self) -> BranchMode {
        self.mode
    }

    fn fan_out(&self, input: BoxRowStream, cancel: &CancelToken) -> Result<()> {
        match self.mode {
            BranchMode::Sequential => self.fan_out_sequential(input, cancel),
            BranchMode::Parallel => self.fan_out_parallel(input, cancel),
        }
    }

    fn fan_out_sequential(&self, input: BoxRowStream, cancel: &CancelToken) -> Result<()> {
        // A cached upstream hands over its buffer; reads through it bypass
        // the input counter.
        let reused = input.shared_cache().is_some();
        let cache = ReplayCache::over(input);
        for child in &self.children {
            cancel.check()?;
            let copy: BoxRowStream = Box::new(cache.stream());
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                run(child, Some(copy), cancel).and_then(|mut out| drain(&mut out))
            }))
            .unwrap_or_else(|payload| Err(child_panicked(child.as_ref(), &*payload)));
            self.report(child.as_ref(), outcome);
        }
        if reused {
            self.core.statistics().add_reads(cache.buffered() as u64);
        }
        Ok(())
    }

    fn fan_out_parallel(&self, input: BoxRowStream, cancel: &CancelToken) -> Result<()> {
        if self.children.is_empty() {
            return Ok(());
        }
        let views = gate::split_with_poll(self.children.len(), input, cancel, self.core.wait_poll());
        thread::scope(|scope| {
            let mut workers = Vec::with_capacity(self.children.len());
            for (child, view) in self.children.iter().zip(views) {
                let spawned = thread::Builder::new()
                    .name(format!("rowflow-branch-{}", child.name()))
                    .spawn_scoped(scope, move || {
                        let view: BoxRowStream = Box::new(view);
                        run(child, Some(view), cancel).and_then(|mut out| drain(&mut out))
                    });
                match spawned {
                    Ok(handle) => workers.push((child, handle)),
                    Err(err) => {
                        let err = child
                            .core()
                            .record_error(PipelineError::execution(format!("spawn failed: {err}")));
                        self.report(child.as_ref(), Err(err));
                    }
                }
            }
            for (child, handle) in workers {
                let outcome = handle
                    .join()
                    .unwrap_or_else(|payload| Err(child_panicked(child.as_ref(), &*payload)));
                self.report(child.as_ref(), outcome);
            }
        });
        Ok(())
    }

    /// Child faults are already recorded on the child; they are logged here
    /// and the remaining children still run.
    fn report(&self, child: &dyn Operation, outcome: Result<u64>) {
        match outcome {
            Ok(rows) => debug!(
                branch = %self.core.name(),
                child = child.name(),
                rows,
                "branch.child.complete"
            ),
            Err(err) => warn!(
                branch = %self.core.name(),
                child = child.name(),
                error = %err,
                "branch.child.fault"
            ),
        }
    }
}

/// Records a panic raised while driving `child` on the child itself.
fn child_panicked(child: &dyn Operation, payload: &(dyn Any + Send)) -> PipelineError {
    child
        .core()
        .record_error(PipelineError::panicked("branch child", payload))
}

impl Operation for Branch {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn children(&self) -> Vec<Arc<dyn Operation>> {
        self.children.clone()
    }

    fn open(
        self: Arc<Self>,
        input: Option<BoxRowStream>,
        cancel: &CancelToken,
    ) -> Result<BoxRowStream> {
        let input = require_input(&self.core, input)?;
        Ok(Box::new(BranchStream {
            op: self,
            input: Some(input),
            cancel: cancel.clone(),
        }))
    }
}

struct BranchStream {
    op: Arc<Branch>,
    input: Option<BoxRowStream>,
    cancel: CancelToken,
}

impl RowStream for BranchStream {
    fn try_next(&mut self) -> Result<Option<Row>> {
        if let Some(input) = self.input.take() {
            self.op.fan_out(input, &self.cancel)?;
        }
        Ok(None)
    }
}
