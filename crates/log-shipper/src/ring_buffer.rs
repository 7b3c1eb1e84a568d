// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fixed-capacity FIFO that evicts its oldest entry on overflow.
//!
//! Backs both diagnostics feeds. Writers and readers share a single short
//! critical section: an enqueue is one `pop_front` plus one `push_back`, a
//! snapshot is one clone of the deque.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::warn;

#[derive(Debug)]
pub struct BoundedRingBuffer<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
}

impl<T> BoundedRingBuffer<T> {
    /// Creates an empty buffer. A capacity of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            warn!("ring buffer capacity is 0, using 1");
            1
        } else {
            capacity
        };

        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1_024))),
            capacity,
        }
    }

    /// Appends `item`, evicting the oldest entry first when full.
    ///
    /// Returns the evicted entry, if any.
    pub fn enqueue(&self, item: T) -> Option<T> {
        self.enqueue_with(|| item)
    }

    /// Like [`enqueue`](Self::enqueue), but builds the item while holding the
    /// lock so that values derived from a counter land in counter order.
    pub fn enqueue_with<F>(&self, make: F) -> Option<T>
    where
        F: FnOnce() -> T,
    {
        let mut items = self.lock();
        let evicted = if items.len() >= self.capacity {
            items.pop_front()
        } else {
            None
        };
        items.push_back(make());
        evicted
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        // A panic while holding the lock cannot leave the deque half-updated.
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> BoundedRingBuffer<T> {
    /// Point-in-time copy of every entry, most recently enqueued first.
    #[must_use]
    pub fn snapshot_newest_first(&self) -> Vec<T> {
        self.lock().iter().rev().cloned().collect()
    }
}
