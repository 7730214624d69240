//! Bounded FIFO of job identifiers.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use scenecraft_core::JobId;

/// Many producers, one consumer. Holds identifiers only; job state lives in
/// the registry.
#[derive(Debug)]
pub struct JobQueue {
    items: Mutex<VecDeque<JobId>>,
    capacity: usize,
    not_empty: Condvar,
    not_full: Condvar,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Append `id`, waiting at most `timeout` for space. Returns false when
    /// the queue stayed full.
    pub fn enqueue(&self, id: JobId, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock();
        while items.len() >= self.capacity {
            if self.not_full.wait_until(&mut items, deadline).timed_out()
                && items.len() >= self.capacity
            {
                return false;
            }
        }
        items.push_back(id);
        self.not_empty.notify_one();
        true
    }

    /// Take the oldest id, waiting at most `timeout` for one to arrive.
    pub fn dequeue(&self, timeout: Duration) -> Option<JobId> {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock();
        loop {
            if let Some(id) = items.pop_front() {
                self.not_full.notify_one();
                return Some(id);
            }
            if self.not_empty.wait_until(&mut items, deadline).timed_out() {
                let id = items.pop_front();
                if id.is_some() {
                    self.not_full.notify_one();
                }
                return id;
            }
        }
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
