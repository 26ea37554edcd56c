use std::sync::Arc;

use super::{ExecuterEvents, ExecuterKind, ExecutionContext, PipelineExecuter, StageWorkers};
use crate::operations::Operation;
use crate::primitives::concurrency::{CancelToken, ReplayCache};
use crate::stream::BoxRowStream;
use crate::types::Result;

/// Drives the whole chain on the calling thread.
///
/// Without caching each stage's output goes straight to the next stage, so a
/// stage consumed twice would run its upstream twice. The cached variant puts
/// every stage's output behind a [`ReplayCache`]; multi-pass consumers such as
/// sequential branches reuse that buffer instead of making their own.
#[derive(Default)]
pub struct SingleThreadedExecuter {
    cached: bool,
    events: ExecuterEvents,
}

impl SingleThreadedExecuter {
    /// Executer without replay caches.
    pub fn new() -> Self {
        Self::default()
    }

    /// Executer that caches every stage's output.
    pub fn cached() -> Self {
        Self {
            cached: true,
            events: ExecuterEvents::default(),
        }
    }
}

impl PipelineExecuter for SingleThreadedExecuter {
    fn kind(&self) -> ExecuterKind {
        if self.cached {
            ExecuterKind::SingleThreadedCached
        } else {
            ExecuterKind::SingleThreaded
        }
    }

    fn events(&self) -> &ExecuterEvents {
        &self.events
    }

    fn decorate(
        &self,
        _op: &Arc<dyn Operation>,
        output: BoxRowStream,
        _context: &Arc<ExecutionContext>,
        _cancel: &CancelToken,
        _workers: &mut StageWorkers,
    ) -> Result<BoxRowStream> {
        if self.cached {
            return Ok(Box::new(ReplayCache::new(output).stream()));
        }
        Ok(output)
    }
}
