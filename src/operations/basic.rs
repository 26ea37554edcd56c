//! General-purpose operations: sources, per-row transforms and a collecting
//! pass-through sink.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{require_input, Operation, OperationCore};
use crate::primitives::concurrency::CancelToken;
use crate::row::Row;
use crate::stream::{from_rows, BoxRowStream, RowStream};
use crate::types::Result;

type OpenFn = dyn Fn() -> Result<BoxRowStream> + Send + Sync;
type ProcessFn = dyn Fn(Row, &mut Vec<Row>) -> Result<()> + Send + Sync;

/// Operation that produces rows from an external reader and ignores its input.
///
/// The reader is opened on the first pull, not when the operation executes,
/// and is dropped (closed) when the output stream is.
pub struct RowSource {
    core: OperationCore,
    open: Box<OpenFn>,
}

impl RowSource {
    /// Source that opens a reader through `open` on first pull.
    pub fn from_fn<F>(name: impl Into<String>, open: F) -> Arc<Self>
    where
        F: Fn() -> Result<BoxRowStream> + Send + Sync + 'static,
    {
        Arc::new(Self {
            core: OperationCore::new(name),
            open: Box::new(open),
        })
    }

    /// Source that yields copies of `rows`.
    pub fn from_rows(name: impl Into<String>, rows: Vec<Row>) -> Arc<Self> {
        Self::from_fn(name, move || Ok(from_rows(rows.clone())))
    }
}

impl Operation for RowSource {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn open(
        self: Arc<Self>,
        _input: Option<BoxRowStream>,
        _cancel: &CancelToken,
    ) -> Result<BoxRowStream> {
        Ok(Box::new(SourceStream {
            op: self,
            reader: None,
        }))
    }
}

struct SourceStream {
    op: Arc<RowSource>,
    reader: Option<BoxRowStream>,
}

impl RowStream for SourceStream {
    fn try_next(&mut self) -> Result<Option<Row>> {
        if self.reader.is_none() {
            self.reader = Some((self.op.open)()?);
        }
        match self.reader.as_mut() {
            Some(reader) => reader.try_next(),
            None => Ok(None),
        }
    }
}

/// Per-row processing: each input row yields zero or more output rows.
pub struct RowTransform {
    core: OperationCore,
    process: Box<ProcessFn>,
}

impl RowTransform {
    /// Emits `f(row)` for every input row.
    pub fn map<F>(name: impl Into<String>, f: F) -> Arc<Self>
    where
        F: Fn(Row) -> Result<Row> + Send + Sync + 'static,
    {
        Self::flat_map(name, move |row, out| {
            out.push(f(row)?);
            Ok(())
        })
    }

    /// Emits the rows `f` returns `Some` for.
    pub fn filter_map<F>(name: impl Into<String>, f: F) -> Arc<Self>
    where
        F: Fn(Row) -> Result<Option<Row>> + Send + Sync + 'static,
    {
        Self::flat_map(name, move |row, out| {
            out.extend(f(row)?);
            Ok(())
        })
    }

    /// Lets `f` push any number of rows per input row.
    pub fn flat_map<F>(name: impl Into<String>, f: F) -> Arc<Self>
    where
        F: Fn(Row, &mut Vec<Row>) -> Result<()> + Send + Sync + 'static,
    {
        Arc::new(Self {
            core: OperationCore::new(name),
            process: Box::new(f),
        })
    }
}

impl Operation for RowTransform {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn open(
        self: Arc<Self>,
        input: Option<BoxRowStream>,
        _cancel: &CancelToken,
    ) -> Result<BoxRowStream> {
        let input = require_input(&self.core, input)?;
        Ok(Box::new(TransformStream {
            op: self,
            input,
            scratch: Vec::new(),
            pending: VecDeque::new(),
        }))
    }
}

struct TransformStream {
    op: Arc<RowTransform>,
    input: BoxRowStream,
    scratch: Vec<Row>,
    pending: VecDeque<Row>,
}

impl RowStream for TransformStream {
    fn try_next(&mut self) -> Result<Option<Row>> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Ok(Some(row));
            }
            let Some(row) = self.input.try_next()? else {
                return Ok(None);
            };
            (self.op.process)(row, &mut self.scratch)?;
            self.pending.extend(self.scratch.drain(..));
        }
    }
}

/// Pass-through operation that keeps a copy of every row it sees.
pub struct CollectRows {
    core: OperationCore,
    rows: Arc<Mutex<Vec<Row>>>,
}

impl CollectRows {
    /// Creates a collector.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            core: OperationCore::new(name),
            rows: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Rows collected so far.
    pub fn rows(&self) -> Vec<Row> {
        self.rows.lock().clone()
    }

    /// Number of rows collected so far.
    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    /// Returns true when nothing was collected.
    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }
}

impl Operation for CollectRows {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn open(
        self: Arc<Self>,
        input: Option<BoxRowStream>,
        _cancel: &CancelToken,
    ) -> Result<BoxRowStream> {
        let input = require_input(&self.core, input)?;
        Ok(Box::new(CollectStream {
            rows: Arc::clone(&self.rows),
            input,
        }))
    }
}

struct CollectStream {
    rows: Arc<Mutex<Vec<Row>>>,
    input: BoxRowStream,
}

impl RowStream for CollectStream {
    fn try_next(&mut self) -> Result<Option<Row>> {
        let row = self.input.try_next()?;
        if let Some(row) = &row {
            self.rows.lock().push(row.clone());
        }
        Ok(row)
    }
}
