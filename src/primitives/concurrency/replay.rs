use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::row::Row;
use crate::stream::{BoxRowStream, RowStream};
use crate::types::{PipelineError, Result};

/// Lets a single-pass stream be traversed any number of times.
///
/// The first traversal to reach a position pulls it from the inner stream and
/// records it; every other traversal replays the recorded rows. The inner
/// stream is therefore consumed at most once and is dropped as soon as it is
/// exhausted. Traversals are serialized on an internal lock, so overlapping
/// traversals (even from different threads) are safe: whichever reaches the
/// frontier first pulls, the rest wait for the lock and replay.
#[derive(Clone)]
pub struct ReplayCache {
    state: Arc<Mutex<ReplayState>>,
}

struct ReplayState {
    buffer: Vec<Row>,
    source: Source,
    traversals: u64,
}

enum Source {
    Live(BoxRowStream),
    Exhausted,
    Faulted(PipelineError),
}

impl ReplayCache {
    /// Wraps `inner`. Nothing is pulled until a traversal advances.
    pub fn new(inner: BoxRowStream) -> Self {
        Self {
            state: Arc::new(Mutex::new(ReplayState {
                buffer: Vec::new(),
                source: Source::Live(inner),
                traversals: 0,
            })),
        }
    }

    /// Reuses the cache already backing `stream`, or wraps it in a new one.
    pub fn over(stream: BoxRowStream) -> Self {
        match stream.shared_cache() {
            Some(cache) => cache,
            None => Self::new(stream),
        }
    }

    /// Starts a new traversal from the first row.
    pub fn stream(&self) -> ReplayStream {
        self.state.lock().traversals += 1;
        ReplayStream {
            cache: self.clone(),
            position: 0,
        }
    }

    /// Rows recorded so far.
    pub fn buffered(&self) -> usize {
        self.state.lock().buffer.len()
    }

    /// Returns true once the inner stream has been fully consumed.
    pub fn is_complete(&self) -> bool {
        matches!(self.state.lock().source, Source::Exhausted)
    }

    /// Number of traversals started over this cache.
    pub fn traversals(&self) -> u64 {
        self.state.lock().traversals
    }

    /// Pulls the inner stream to exhaustion so every row is buffered.
    pub fn fill(&self) -> Result<usize> {
        let mut position = 0;
        while self.row_at(position)?.is_some() {
            position += 1;
        }
        Ok(position)
    }

    /// Buffers the whole inner stream, then lends every row to `f` without
    /// copying. The cache stays locked while `f` runs.
    pub fn with_rows<R>(&self, f: impl FnOnce(&[Row]) -> Result<R>) -> Result<R> {
        let mut state = self.state.lock();
        loop {
            let pulled = match &mut state.source {
                Source::Live(inner) => inner.try_next(),
                Source::Exhausted => break,
                Source::Faulted(err) => return Err(err.clone()),
            };
            match pulled {
                Ok(Some(row)) => state.buffer.push(row),
                Ok(None) => {
                    trace!(rows = state.buffer.len(), "replay.inner_exhausted");
                    state.source = Source::Exhausted;
                }
                Err(err) => {
                    state.source = Source::Faulted(err.clone());
                    return Err(err);
                }
            }
        }
        f(&state.buffer)
    }

    /// Returns a copy of the row at `position`, pulling the inner stream as
    /// needed.
    pub fn row_at(&self, position: usize) -> Result<Option<Row>> {
        let mut state = self.state.lock();
        loop {
            if let Some(row) = state.buffer.get(position) {
                return Ok(Some(row.clone()));
            }
            let pulled = match &mut state.source {
                Source::Live(inner) => inner.try_next(),
                Source::Exhausted => return Ok(None),
                Source::Faulted(err) => return Err(err.clone()),
            };
            match pulled {
                Ok(Some(row)) => state.buffer.push(row),
                Ok(None) => {
                    trace!(rows = state.buffer.len(), "replay.inner_exhausted");
                    state.source = Source::Exhausted;
                    return Ok(None);
                }
                Err(err) => {
                    state.source = Source::Faulted(err.clone());
                    return Err(err);
                }
            }
        }
    }
}

/// One traversal over a [`ReplayCache`].
pub struct ReplayStream {
    cache: ReplayCache,
    position: usize,
}

impl RowStream for ReplayStream {
    fn try_next(&mut self) -> Result<Option<Row>> {
        let row = self.cache.row_at(self.position)?;
        if row.is_some() {
            self.position += 1;
        }
        Ok(row)
    }

    fn shared_cache(&self) -> Option<ReplayCache> {
        Some(self.cache.clone())
    }
}
