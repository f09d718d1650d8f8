//! Bounded, drop-oldest queue used by the upstream subscribers (C7, §5
//! "Bounded resources"). A full queue sheds its oldest entry rather than
//! blocking the producer — the subscriber socket must keep draining even
//! when the ingest side falls behind.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

pub struct DropOldestQueue<T> {
    capacity: usize,
    items: Mutex<VecDeque<T>>,
    notify: Notify,
    dropped: AtomicU64,
}

impl<T> DropOldestQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Push one item. If the queue is already at capacity, the oldest
    /// queued item is discarded and the drop counter bumped.
    pub fn push(&self, item: T) {
        {
            let mut items = self.items.lock().unwrap();
            if items.len() >= self.capacity {
                items.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            items.push_back(item);
        }
        self.notify.notify_one();
    }

    /// Wait for and remove the oldest item.
    pub async fn pop(&self) -> T {
        loop {
            {
                let mut items = self.items.lock().unwrap();
                if let Some(item) = items.pop_front() {
                    return item;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_beyond_capacity_drops_oldest() {
        let q: DropOldestQueue<i32> = DropOldestQueue::new(2);
        q.push(1);
        q.push(2);
        q.push(3);
        assert_eq!(q.dropped_count(), 1);
        assert_eq!(q.len(), 2);
    }

    #[tokio::test]
    async fn pop_returns_items_in_fifo_order() {
        let q: DropOldestQueue<i32> = DropOldestQueue::new(4);
        q.push(1);
        q.push(2);
        assert_eq!(q.pop().await, 1);
        assert_eq!(q.pop().await, 2);
    }
}
