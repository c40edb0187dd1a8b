use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Semaphore;

/// Fixed-capacity FIFO channel between the enrichment producer and the
/// persistence worker. `put` blocks while the queue is full, `get` blocks
/// while it is empty; items are held by value and never dropped.
///
/// The implementation is safe under concurrent producers and consumers, but
/// this crate only ever runs one of each; the queue is never closed.
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    free: Semaphore,
    ready: Semaphore,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            free: Semaphore::new(capacity),
            ready: Semaphore::new(0),
            capacity,
        }
    }

    /// Enqueues at the tail, waiting for a slot if the queue is at capacity.
    pub async fn put(&self, item: T) {
        let permit = self
            .free
            .acquire()
            .await
            .expect("queue semaphore is never closed");
        permit.forget();
        self.items.lock().push_back(item);
        self.ready.add_permits(1);
    }

    /// Dequeues from the head, waiting for an item if the queue is empty.
    pub async fn get(&self) -> T {
        let permit = self
            .ready
            .acquire()
            .await
            .expect("queue semaphore is never closed");
        permit.forget();
        let item = {
            let mut items = self.items.lock();
            // A ready permit guarantees a queued item.
            items.pop_front().expect("ready permit without queued item")
        };
        self.free.add_permits(1);
        item
    }

    /// Non-blocking variant of `get`, used by the consumer's shutdown drain.
    pub fn try_get(&self) -> Option<T> {
        let permit = self.ready.try_acquire().ok()?;
        permit.forget();
        let item = {
            let mut items = self.items.lock();
            items.pop_front().expect("ready permit without queued item")
        };
        self.free.add_permits(1);
        Some(item)
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
