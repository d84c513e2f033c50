//! Bounded record queue feeding a single writer task.
//!
//! Producers are request and connection tasks; the consumer is the stream's
//! writer. The mutex is only held to move records in or out, never across an
//! await point.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;

use crate::config::schema::OverflowPolicy;

/// Log stream failures. None of them ever fail a request.
#[derive(Debug, Error)]
pub enum LogSinkError {
    /// A record was discarded: the oldest under `drop_oldest`, the new one under `backpressure`.
    #[error("log record dropped, queue full")]
    Dropped,

    #[error("log stream closed")]
    Closed,

    #[error("cannot open log destination {destination}: {source}")]
    Open {
        destination: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// A bounded FIFO with a configurable overflow policy.
#[derive(Debug)]
pub struct LogQueue<T> {
    state: Mutex<QueueState<T>>,
    capacity: usize,
    policy: OverflowPolicy,
    backpressure_timeout: Duration,
    item_ready: Notify,
    space_ready: Notify,
    dropped: AtomicU64,
}

impl<T> LogQueue<T> {
    pub fn new(capacity: usize, policy: OverflowPolicy, backpressure_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity.min(1024)),
                closed: false,
            }),
            capacity: capacity.max(1),
            policy,
            backpressure_timeout,
            item_ready: Notify::new(),
            space_ready: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue a record according to the overflow policy.
    pub async fn push(&self, item: T) -> Result<(), LogSinkError> {
        match self.policy {
            OverflowPolicy::DropOldest => self.push_evicting(item),
            OverflowPolicy::Backpressure => self.push_waiting(item).await,
        }
    }

    fn push_evicting(&self, item: T) -> Result<(), LogSinkError> {
        let evicted = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(LogSinkError::Closed);
            }
            let evicted = if state.items.len() >= self.capacity {
                state.items.pop_front().is_some()
            } else {
                false
            };
            state.items.push_back(item);
            evicted
        };
        self.item_ready.notify_one();

        if evicted {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(LogSinkError::Dropped);
        }
        Ok(())
    }

    async fn push_waiting(&self, item: T) -> Result<(), LogSinkError> {
        let deadline = tokio::time::Instant::now() + self.backpressure_timeout;
        loop {
            let space = self.space_ready.notified();
            tokio::pin!(space);
            space.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(LogSinkError::Closed);
                }
                if state.items.len() < self.capacity {
                    state.items.push_back(item);
                    drop(state);
                    self.item_ready.notify_one();
                    return Ok(());
                }
            }

            if tokio::time::timeout_at(deadline, space).await.is_err() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return Err(LogSinkError::Dropped);
            }
        }
    }

    /// Take up to `max` records, waiting until at least one is available.
    ///
    /// Returns `None` once the queue is closed and empty.
    pub async fn pop_batch(&self, max: usize) -> Option<Vec<T>> {
        loop {
            let ready = self.item_ready.notified();
            tokio::pin!(ready);
            ready.as_mut().enable();

            {
                let mut state = self.state.lock();
                if !state.items.is_empty() {
                    let take = state.items.len().min(max.max(1));
                    let batch: Vec<T> = state.items.drain(..take).collect();
                    drop(state);
                    self.space_ready.notify_waiters();
                    return Some(batch);
                }
                if state.closed {
                    return None;
                }
            }

            ready.await;
        }
    }

    /// Refuse new records; the writer drains what is left.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.item_ready.notify_one();
        self.space_ready.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records discarded so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
