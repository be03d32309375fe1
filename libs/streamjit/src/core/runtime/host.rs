// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Thread host: one OS thread per core slot of every blob.

use crate::core::compiler::CompiledStream;
use crate::core::error::{Result, StreamJitError};
use crate::core::runtime::Blob;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs a compiled stream's blobs on dedicated threads and coordinates
/// the drain sequence.
pub struct StreamHost<T> {
    blobs: Vec<Arc<dyn Blob<T>>>,
    threads: Vec<JoinHandle<()>>,
}

impl<T: Clone + Send + 'static> StreamHost<T> {
    /// Spawn one named thread per core slot of every blob.
    pub fn start(stream: &CompiledStream<T>) -> Self {
        let blobs: Vec<Arc<dyn Blob<T>>> = stream.blobs().to_vec();
        let mut threads = Vec::new();
        for (blob_index, blob) in blobs.iter().enumerate() {
            for core in 0..blob.core_count() {
                let code = blob.core_code(core);
                let name = format!("blob{}-core{}", blob_index, core);
                let handle = std::thread::Builder::new()
                    .name(name.clone())
                    .spawn(move || {
                        tracing::debug!("[{}] thread started", name);
                        code.run();
                        tracing::debug!("[{}] thread finished", name);
                    })
                    .expect("thread spawn");
                threads.push(handle);
            }
        }
        Self { blobs, threads }
    }

    /// Drain every blob in data-flow order, waiting for each callback
    /// before moving downstream, then join all threads.
    pub fn drain_and_join(mut self) -> Result<()> {
        for (index, blob) in self.blobs.iter().enumerate() {
            let (sender, receiver) = crossbeam_channel::bounded(1);
            blob.drain(Box::new(move || {
                let _ = sender.send(());
            }))?;
            receiver.recv_timeout(DRAIN_TIMEOUT).map_err(|_| {
                StreamJitError::IllegalStreamGraph(format!(
                    "blob {} did not finish draining",
                    index
                ))
            })?;
            tracing::info!("blob {} drained", index);
        }
        for handle in self.threads.drain(..) {
            if let Err(payload) = handle.join() {
                std::panic::resume_unwind(payload);
            }
        }
        Ok(())
    }
}

impl<T> Drop for StreamHost<T> {
    fn drop(&mut self) {
        // Threads left running are detached; the blobs keep their own
        // state alive through the Arcs inside each CoreCode.
        if !self.threads.is_empty() {
            tracing::warn!("stream host dropped with {} live threads", self.threads.len());
        }
    }
}
