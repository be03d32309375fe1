// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Partitioning of the worker graph into per-machine blobs.

mod blob_graph;
mod partitioner;

pub use blob_graph::{BlobGraph, BlobNode};
pub use partitioner::machine_worker_map;
