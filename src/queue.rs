//! Order-preserving work queues shared by the multiplexer and the workers.
//!
//! [`WorkQueue`] is an unbounded FIFO. Producers never wait; each push wakes
//! one consumer parked in [`WorkQueue::pop`]. Two instances connect the
//! router's stages: a [`ReadQueue`] of connections with data waiting, and a
//! [`WriteQueue`] of payloads bound for a destination connection.
//!
//! Both queues are unbounded. A burst of readiness events or a slow
//! destination grows them without limit; no shedding policy is applied.

use std::{
    collections::VecDeque,
    pin::pin,
    sync::{Mutex, MutexGuard, PoisonError},
};

use bytes::Bytes;
use tokio::sync::Notify;

use crate::session::ConnectionId;

/// Unbounded multi-producer, multi-consumer FIFO.
#[derive(Debug)]
pub struct WorkQueue<T> {
    items: Mutex<VecDeque<T>>,
    available: Notify,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self { Self::new() }
}

impl<T> WorkQueue<T> {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Notify::new(),
        }
    }

    fn items(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `item` and wake one waiting consumer.
    pub fn push(&self, item: T) {
        self.items().push_back(item);
        self.available.notify_one();
    }

    /// Wait for the oldest item and remove it.
    pub async fn pop(&self) -> T {
        loop {
            // Register as a waiter before looking, so a push between the
            // check and the await still wakes this consumer.
            let mut notified = pin!(self.available.notified());
            notified.as_mut().enable();
            if let Some(item) = self.try_pop() {
                return item;
            }
            notified.await;
        }
    }

    /// Remove the oldest item without waiting.
    pub fn try_pop(&self) -> Option<T> { self.items().pop_front() }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize { self.items().len() }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.items().is_empty() }
}

impl<T: PartialEq> WorkQueue<T> {
    /// Append `item` unless it equals the current tail.
    ///
    /// Returns `true` if the item was queued.
    pub fn push_coalescing(&self, item: T) -> bool {
        let mut items = self.items();
        if items.back() == Some(&item) {
            return false;
        }
        items.push_back(item);
        drop(items);
        self.available.notify_one();
        true
    }
}

/// A payload waiting to be sent to a destination connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteJob {
    /// Connection the payload is addressed to.
    pub destination: ConnectionId,
    /// Bytes to send verbatim.
    pub payload: Bytes,
}

/// Connections with readable data, pushed with [`WorkQueue::push_coalescing`].
pub type ReadQueue = WorkQueue<ConnectionId>;

/// Payloads awaiting delivery, pushed with [`WorkQueue::push`].
pub type WriteQueue = WorkQueue<WriteJob>;
