// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The blob contract exposed to the outer runtime.

use crate::core::error::{Result, StreamJitError};
use crate::core::graph::{Channel, Token, WorkerId};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Invoked exactly once when a drain completes.
pub type DrainCallback = Box<dyn FnOnce() + Send + 'static>;

/// Lifecycle of a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobState {
    Ready,
    Running,
    Draining,
    Drained,
}

/// A compiled or interpreted section of the stream graph.
///
/// Channels are unfilled on construction; the upper layer wires the same
/// channel handle to both sides of each inter-blob edge. `core_code` is an
/// idempotent getter; the returned handle is meant to be run on that core's
/// thread and loops until the blob drains.
pub trait Blob<T>: Send + Sync {
    fn workers(&self) -> BTreeSet<WorkerId>;

    fn input_channels(&self) -> BTreeMap<Token, Channel<T>>;

    fn output_channels(&self) -> BTreeMap<Token, Channel<T>>;

    fn wire_input(&self, token: Token, channel: Channel<T>) -> Result<()>;

    fn wire_output(&self, token: Token, channel: Channel<T>) -> Result<()>;

    fn core_count(&self) -> usize;

    fn core_code(&self, core: usize) -> CoreCode;

    /// Request a cooperative drain. Only the first call is accepted; the
    /// callback runs exactly once, after in-flight work is flushed.
    fn drain(&self, callback: DrainCallback) -> Result<()>;

    fn is_drained(&self) -> bool;

    fn state(&self) -> BlobState;
}

pub(crate) trait CoreRunner: Send + Sync {
    fn run_core(&self, core: usize);
}

/// Handle for one core's step loop. Cheap to clone; safe to fetch from
/// any thread and run on the target core.
#[derive(Clone)]
pub struct CoreCode {
    runner: Arc<dyn CoreRunner>,
    core: usize,
}

impl CoreCode {
    pub(crate) fn new(runner: Arc<dyn CoreRunner>, core: usize) -> Self {
        Self { runner, core }
    }

    pub fn core(&self) -> usize {
        self.core
    }

    /// Run this core's step loop until the blob halts or drains.
    pub fn run(&self) {
        self.runner.run_core(self.core);
    }
}

/// Shared drain/lifecycle state: a monotonic stop flag, the one-shot
/// callback container, and the state machine.
pub(crate) struct DrainControl {
    state: Mutex<BlobState>,
    stop: AtomicBool,
    drain_requested: AtomicBool,
    drained: AtomicBool,
    callback: Mutex<Option<DrainCallback>>,
}

impl DrainControl {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BlobState::Ready),
            stop: AtomicBool::new(false),
            drain_requested: AtomicBool::new(false),
            drained: AtomicBool::new(false),
            callback: Mutex::new(None),
        }
    }

    pub fn mark_running(&self) {
        let mut state = self.state.lock();
        if *state == BlobState::Ready {
            *state = BlobState::Running;
        }
    }

    pub fn state(&self) -> BlobState {
        *self.state.lock()
    }

    /// Accept the first drain request; reject every later one.
    pub fn request_drain(&self, callback: DrainCallback) -> Result<()> {
        if self.drain_requested.swap(true, Ordering::SeqCst) {
            return Err(StreamJitError::DrainMisuse(
                "drain() called more than once".into(),
            ));
        }
        *self.callback.lock() = Some(callback);
        let mut state = self.state.lock();
        if !matches!(*state, BlobState::Drained) {
            *state = BlobState::Draining;
        }
        drop(state);
        self.stop.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Invoke the callback and mark the blob drained.
    pub fn finish_drain(&self) {
        let callback = self.callback.lock().take();
        if let Some(callback) = callback {
            callback();
        }
        self.drained.store(true, Ordering::SeqCst);
        *self.state.lock() = BlobState::Drained;
    }

    pub fn is_drained(&self) -> bool {
        self.drained.load(Ordering::SeqCst)
    }
}
