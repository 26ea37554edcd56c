//! Transactional output to an external store.
//!
//! The store itself is abstracted behind [`CommandTarget`]; this module owns
//! the unit-of-work policy: commit when the run is clean, roll back as soon as
//! any fault has been recorded anywhere in it.

use std::sync::Arc;

use tracing::{debug, warn};

use super::{require_input, Operation, OperationCore};
use crate::primitives::concurrency::CancelToken;
use crate::row::Row;
use crate::stream::{BoxRowStream, RowStream};
use crate::types::{PipelineError, Result};

/// Connection-like resource that opens units of work.
pub trait CommandTarget: Send + Sync + 'static {
    /// Opens a new unit of work.
    fn begin(&self) -> Result<Box<dyn CommandTransaction>>;
}

/// One open unit of work.
pub trait CommandTransaction: Send {
    /// Applies `row`.
    fn execute(&mut self, row: &Row) -> Result<()>;
    /// Makes the applied rows durable.
    fn commit(self: Box<Self>) -> Result<()>;
    /// Discards the applied rows.
    fn rollback(self: Box<Self>) -> Result<()>;
}

/// Writes every input row through a [`CommandTarget`] and passes it on.
///
/// Rows are grouped into units of `batch_size`. Each unit gets its own
/// transaction; a unit still open when the stream is dropped is rolled back.
pub struct OutputCommand {
    core: OperationCore,
    target: Box<dyn CommandTarget>,
    batch_size: usize,
}

impl OutputCommand {
    /// One transaction per row.
    pub fn new(name: impl Into<String>, target: impl CommandTarget) -> Self {
        Self {
            core: OperationCore::new(name),
            target: Box::new(target),
            batch_size: 1,
        }
    }

    /// Rows per transaction. Zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Finishes construction.
    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl Operation for OutputCommand {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn open(
        self: Arc<Self>,
        input: Option<BoxRowStream>,
        _cancel: &CancelToken,
    ) -> Result<BoxRowStream> {
        let input = require_input(&self.core, input)?;
        Ok(Box::new(OutputCommandStream {
            op: self,
            input,
            unit: None,
            in_unit: 0,
        }))
    }
}

struct OutputCommandStream {
    op: Arc<OutputCommand>,
    input: BoxRowStream,
    unit: Option<Box<dyn CommandTransaction>>,
    in_unit: usize,
}

impl OutputCommandStream {
    fn apply(&mut self, row: &Row) -> Result<()> {
        if self.unit.is_none() {
            self.unit = Some(self.op.target.begin()?);
        }
        if let Some(unit) = self.unit.as_mut() {
            unit.execute(row)?;
        }
        self.in_unit += 1;
        if self.in_unit >= self.op.batch_size {
            self.complete_unit()?;
        }
        Ok(())
    }

    fn complete_unit(&mut self) -> Result<()> {
        let Some(unit) = self.unit.take() else {
            return Ok(());
        };
        let rows = std::mem::take(&mut self.in_unit);
        let name = self.op.core.name();
        let outcome = if self.op.core.has_errors() {
            warn!(operation = %name, rows, "command.rollback");
            unit.rollback()
        } else {
            debug!(operation = %name, rows, "command.commit");
            unit.commit()
        };
        outcome.map_err(|err| PipelineError::Transaction {
            operation: name.to_owned(),
            reason: err.to_string(),
        })
    }

    fn abandon(&mut self) {
        if let Some(unit) = self.unit.take() {
            let name = self.op.core.name();
            warn!(operation = %name, rows = self.in_unit, "command.rollback");
            self.in_unit = 0;
            if let Err(err) = unit.rollback() {
                warn!(operation = %name, error = %err, "command.rollback_failed");
            }
        }
    }
}

impl RowStream for OutputCommandStream {
    fn try_next(&mut self) -> Result<Option<Row>> {
        let next = match self.input.try_next() {
            Ok(next) => next,
            Err(err) => {
                self.abandon();
                return Err(err);
            }
        };
        match next {
            Some(row) => {
                if let Err(err) = self.apply(&row) {
                    self.abandon();
                    return Err(err);
                }
                Ok(Some(row))
            }
            None => {
                self.complete_unit()?;
                Ok(None)
            }
        }
    }
}

impl Drop for OutputCommandStream {
    fn drop(&mut self) {
        self.abandon();
    }
}
