//! Pull-based row streams.
//!
//! Every stage of a pipeline consumes and produces a [`RowStream`]. Streams are
//! lazy: no work happens until [`RowStream::try_next`] is called, and dropping a
//! stream releases whatever it holds.

use std::collections::VecDeque;

use crate::primitives::concurrency::ReplayCache;
use crate::row::Row;
use crate::types::Result;

/// A fallible, single-pass sequence of rows.
pub trait RowStream: Send {
    /// Advances the stream. `Ok(None)` marks exhaustion.
    fn try_next(&mut self) -> Result<Option<Row>>;

    /// Returns the replay cache backing this stream, if any, so consumers that
    /// need several passes can share it instead of buffering again.
    fn shared_cache(&self) -> Option<ReplayCache> {
        None
    }
}

/// Owned, type-erased row stream.
pub type BoxRowStream = Box<dyn RowStream>;

impl<S: RowStream + ?Sized> RowStream for Box<S> {
    fn try_next(&mut self) -> Result<Option<Row>> {
        (**self).try_next()
    }

    fn shared_cache(&self) -> Option<ReplayCache> {
        (**self).shared_cache()
    }
}

/// Stream over rows already held in memory.
pub struct VecRowStream {
    rows: VecDeque<Row>,
}

impl VecRowStream {
    /// Creates a stream yielding `rows` in order.
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows: rows.into() }
    }
}

impl RowStream for VecRowStream {
    fn try_next(&mut self) -> Result<Option<Row>> {
        Ok(self.rows.pop_front())
    }
}

/// Stream that yields nothing. Fed to the first operation of a pipeline.
pub struct EmptyRowStream;

impl RowStream for EmptyRowStream {
    fn try_next(&mut self) -> Result<Option<Row>> {
        Ok(None)
    }
}

/// Adapts a fallible iterator into a stream.
pub struct IterRowStream<I> {
    iter: I,
}

impl<I> IterRowStream<I>
where
    I: Iterator<Item = Result<Row>> + Send,
{
    /// Wraps `iter`.
    pub fn new(iter: I) -> Self {
        Self { iter }
    }
}

impl<I> RowStream for IterRowStream<I>
where
    I: Iterator<Item = Result<Row>> + Send,
{
    fn try_next(&mut self) -> Result<Option<Row>> {
        self.iter.next().transpose()
    }
}

/// Boxes in-memory rows as a stream.
pub fn from_rows(rows: Vec<Row>) -> BoxRowStream {
    Box::new(VecRowStream::new(rows))
}

/// Boxes the empty stream.
pub fn empty() -> BoxRowStream {
    Box::new(EmptyRowStream)
}

/// Drains `stream` into memory.
pub fn collect_rows(stream: &mut dyn RowStream) -> Result<Vec<Row>> {
    let mut rows = Vec::new();
    while let Some(row) = stream.try_next()? {
        rows.push(row);
    }
    Ok(rows)
}

/// Drains `stream`, discarding rows. Returns how many rows were pulled.
pub fn drain(stream: &mut dyn RowStream) -> Result<u64> {
    let mut count = 0u64;
    while stream.try_next()?.is_some() {
        count += 1;
    }
    Ok(count)
}
