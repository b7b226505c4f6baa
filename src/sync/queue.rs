//! A thread-safe FIFO used for cache-eviction notifications between CM
//! ports: enqueue at head, dequeue at tail.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

pub struct Queue<T> {
    items: Mutex<VecDeque<T>>,
    available: Condvar,
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Queue::new()
    }
}

impl<T> Queue<T> {
    pub fn new() -> Queue<T> {
        Queue {
            items: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    pub fn enqueue(&self, item: T) {
        let mut items = self.items.lock().unwrap();
        items.push_back(item);
        self.available.notify_one();
    }

    /// Blocks until an item is available.
    pub fn dequeue(&self) -> T {
        let mut items = self.items.lock().unwrap();
        loop {
            if let Some(item) = items.pop_front() {
                return item;
            }
            items = self.available.wait(items).unwrap();
        }
    }

    /// Returns an item without blocking if the queue lock is free and
    /// non-empty; `None` otherwise (including when the lock is contended).
    pub fn try_dequeue(&self) -> Option<T> {
        self.items.try_lock().ok().and_then(|mut items| items.pop_front())
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().unwrap().is_empty()
    }
}
