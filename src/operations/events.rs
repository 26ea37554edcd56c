//! Per-row and completion notifications, and the adapters that raise them.

use std::sync::Arc;

use tracing::warn;

use super::Operation;
use crate::primitives::concurrency::CancelToken;
use crate::row::Row;
use crate::stream::{BoxRowStream, RowStream};
use crate::types::Result;

/// Callback fired for every row an operation emits.
pub type RowListener = Arc<dyn Fn(&dyn Operation, &Row) + Send + Sync>;

/// Callback fired once when an operation finishes processing.
pub type FinishListener = Arc<dyn Fn(&dyn Operation) + Send + Sync>;

/// Executes `op` over `input` and wraps the output so statistics,
/// notifications and fault attribution happen as rows flow.
///
/// A failure to start the operation is recorded on it and returned
/// attributed; failures already attributed to a nested operation pass through.
pub fn run(
    op: &Arc<dyn Operation>,
    input: Option<BoxRowStream>,
    cancel: &CancelToken,
) -> Result<BoxRowStream> {
    let input = input.map(|inner| {
        Box::new(CountingInput {
            op: Arc::clone(op),
            inner,
        }) as BoxRowStream
    });
    match Arc::clone(op).execute(input, cancel) {
        Ok(output) => Ok(Box::new(EventRaisingStream::new(
            Arc::clone(op),
            output,
            cancel.clone(),
        ))),
        Err(err) => {
            let err = if err.is_attributed() {
                err
            } else {
                op.core().record_error(err)
            };
            op.core().finish(op.as_ref());
            Err(err)
        }
    }
}

/// Wraps an operation's output stream and raises its events.
///
/// Every emitted row bumps `rows_written` and fires row listeners before it is
/// handed downstream. Exhaustion, a fault, or being dropped early fires the
/// finished notification exactly once, before downstream sees the end. Faults
/// not yet attributed are recorded on the operation.
pub struct EventRaisingStream {
    op: Arc<dyn Operation>,
    inner: BoxRowStream,
    cancel: CancelToken,
    finished: bool,
}

impl EventRaisingStream {
    /// Wraps `inner`, the output of `op`.
    pub fn new(op: Arc<dyn Operation>, inner: BoxRowStream, cancel: CancelToken) -> Self {
        Self {
            op,
            inner,
            cancel,
            finished: false,
        }
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.op.core().finish(self.op.as_ref());
        }
    }
}

impl RowStream for EventRaisingStream {
    fn try_next(&mut self) -> Result<Option<Row>> {
        if self.finished {
            return Ok(None);
        }
        self.op.core().statistics().mark_started();
        let next = self.cancel.check().and_then(|_| self.inner.try_next());
        match next {
            Ok(Some(row)) => {
                self.op.core().notify_row(self.op.as_ref(), &row);
                Ok(Some(row))
            }
            Ok(None) => {
                self.finish();
                Ok(None)
            }
            Err(err) => {
                let err = if err.is_attributed() {
                    warn!(operation = self.op.name(), error = %err, "operation.upstream_fault");
                    err
                } else {
                    self.op.core().record_error(err)
                };
                self.finish();
                Err(err)
            }
        }
    }
}

impl Drop for EventRaisingStream {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Counts rows an operation pulls from its input.
struct CountingInput {
    op: Arc<dyn Operation>,
    inner: BoxRowStream,
}

impl RowStream for CountingInput {
    fn try_next(&mut self) -> Result<Option<Row>> {
        let row = self.inner.try_next()?;
        if row.is_some() {
            self.op.core().statistics().add_read();
        }
        Ok(row)
    }

    fn shared_cache(&self) -> Option<crate::primitives::concurrency::ReplayCache> {
        self.inner.shared_cache()
    }
}
