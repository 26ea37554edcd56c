use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::{CancelToken, DEFAULT_WAIT_POLL};
use crate::row::Row;
use crate::stream::RowStream;
use crate::types::Result;

/// Unbounded queue moving items from one producer worker to one consumer.
///
/// Pushing never blocks. The consumer blocks while the queue is empty and
/// the producer has not marked it finished; once finished and drained it
/// reports exhaustion.
pub struct HandoffQueue<T = Row> {
    state: Mutex<HandoffState<T>>,
    ready: Condvar,
    poll: Duration,
}

struct HandoffState<T> {
    items: VecDeque<T>,
    finished: bool,
}

impl<T: Send> HandoffQueue<T> {
    /// Creates an empty queue.
    pub fn new() -> Arc<Self> {
        Self::with_poll_interval(DEFAULT_WAIT_POLL)
    }

    /// Creates an empty queue whose consumer re-checks cancellation every
    /// `poll` while blocked.
    pub fn with_poll_interval(poll: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(HandoffState {
                items: VecDeque::new(),
                finished: false,
            }),
            ready: Condvar::new(),
            poll,
        })
    }

    /// Appends an item and wakes the consumer.
    pub fn push(&self, item: T) {
        let mut state = self.state.lock();
        state.items.push_back(item);
        self.ready.notify_one();
    }

    /// Signals that no more items will arrive.
    pub fn mark_finished(&self) {
        let mut state = self.state.lock();
        state.finished = true;
        self.ready.notify_all();
    }

    /// Returns true once [`HandoffQueue::mark_finished`] was called.
    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    /// Items waiting to be consumed.
    pub fn pending(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Blocks until an item is available or the queue is finished and empty.
    pub fn pop(&self, cancel: &CancelToken) -> Result<Option<T>> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Ok(Some(item));
            }
            if state.finished {
                return Ok(None);
            }
            cancel.check()?;
            self.ready.wait_for(&mut state, self.poll);
        }
    }

    /// Producer handle that marks the queue finished when dropped.
    pub fn sender(self: &Arc<Self>) -> HandoffSender<T> {
        HandoffSender {
            queue: Arc::clone(self),
        }
    }

    /// Consumer view usable as a stream.
    pub fn receiver(self: &Arc<Self>, cancel: CancelToken) -> HandoffStream<T> {
        HandoffStream {
            queue: Arc::clone(self),
            cancel,
        }
    }
}

/// Producer side of a [`HandoffQueue`].
///
/// Dropping the sender finishes the queue, so a producer that unwinds early
/// never leaves its consumer waiting.
pub struct HandoffSender<T = Row> {
    queue: Arc<HandoffQueue<T>>,
}

impl<T: Send> HandoffSender<T> {
    /// Pushes one item.
    pub fn send(&self, item: T) {
        self.queue.push(item);
    }
}

impl<T> Drop for HandoffSender<T> {
    fn drop(&mut self) {
        let mut state = self.queue.state.lock();
        state.finished = true;
        self.queue.ready.notify_all();
    }
}

/// Consumer side of a [`HandoffQueue`].
pub struct HandoffStream<T = Row> {
    queue: Arc<HandoffQueue<T>>,
    cancel: CancelToken,
}

impl<T: Send> HandoffStream<T> {
    /// Blocks for the next item.
    pub fn recv(&mut self) -> Result<Option<T>> {
        self.queue.pop(&self.cancel)
    }
}

impl RowStream for HandoffStream<Row> {
    fn try_next(&mut self) -> Result<Option<Row>> {
        self.queue.pop(&self.cancel)
    }
}
