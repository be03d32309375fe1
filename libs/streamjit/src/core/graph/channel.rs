// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Boundary channels.
//!
//! A `Channel` is the FIFO conduit at a blob boundary: the upper layer
//! pushes overall input into it, blobs exchange items through it, and the
//! overall output is read from it. Handles are cheap clones sharing one
//! queue.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

pub struct Channel<T> {
    queue: Arc<Mutex<VecDeque<T>>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
        }
    }
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Channel<T> {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn push(&self, item: T) {
        self.queue.lock().push_back(item);
    }

    pub fn pop(&self) -> Option<T> {
        self.queue.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Pop up to `count` items, in FIFO order.
    pub fn pop_many(&self, count: usize) -> Vec<T> {
        let mut queue = self.queue.lock();
        let take = count.min(queue.len());
        queue.drain(..take).collect()
    }

    /// Drain the whole queue, in FIFO order.
    pub fn drain_all(&self) -> Vec<T> {
        self.queue.lock().drain(..).collect()
    }

    pub fn extend(&self, items: impl IntoIterator<Item = T>) {
        self.queue.lock().extend(items);
    }
}
