use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
};

use log::debug;

/// Bounded hand-off of PGN batches from the input reader to the extraction
/// workers.
///
/// The producer is paused once `high` batches are pending and only resumed
/// when workers have drained the queue down to `low`, so the input stream
/// stops and starts in large steps instead of per batch.
pub struct BatchQueue<T> {
    inner: Mutex<QueueInner<T>>,
    not_empty: Condvar,
    resumed: Condvar,
    high: usize,
    low: usize,
}

struct QueueInner<T> {
    items: VecDeque<T>,
    paused: bool,
    closed: bool,
    pauses: u64,
}

impl<T> BatchQueue<T> {
    /// Queue pausing at `max_pending` and resuming at half of it.
    pub fn new(max_pending: usize) -> Self {
        let high = max_pending.max(1);
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                paused: false,
                closed: false,
                pauses: 0,
            }),
            not_empty: Condvar::new(),
            resumed: Condvar::new(),
            high,
            low: high / 2,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a batch, blocking while the producer is paused.
    ///
    /// Returns the batch back if the queue was closed.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut inner = self.lock();
        while inner.paused && !inner.closed {
            inner = self.resumed.wait(inner).unwrap_or_else(PoisonError::into_inner);
        }
        if inner.closed {
            return Err(item);
        }

        inner.items.push_back(item);
        if inner.items.len() >= self.high {
            inner.paused = true;
            inner.pauses += 1;
            debug!("Input paused with {} batches pending", inner.items.len());
        }
        self.not_empty.notify_one();
        Ok(())
    }

    /// Take the next batch, blocking while empty. `None` once the queue is
    /// closed and drained.
    pub fn pull(&self) -> Option<T> {
        let mut inner = self.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                if inner.paused && inner.items.len() <= self.low {
                    inner.paused = false;
                    debug!("Input resumed with {} batches pending", inner.items.len());
                    self.resumed.notify_all();
                }
                return Some(item);
            }
            if inner.closed {
                return None;
            }
            inner = self.not_empty.wait(inner).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Stop accepting batches. Pending batches are still handed out.
    pub fn close(&self) {
        self.lock().closed = true;
        self.not_empty.notify_all();
        self.resumed.notify_all();
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    /// Times the producer has been paused.
    pub fn pauses(&self) -> u64 {
        self.lock().pauses
    }
}
