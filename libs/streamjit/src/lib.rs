// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! # streamjit - Synchronous-Dataflow Stream Graph Compiler & Runtime
//!
//! streamjit compiles stream graphs built from filters, splitters and
//! joiners (composed into pipelines and splitjoins) into sets of fused
//! *blobs*, each with a steady-state schedule, an initialization schedule
//! and pre-sized double buffers that together guarantee deadlock-free
//! multi-core execution.
//!
//! ## Architecture
//!
//! ```text
//! streamjit
//!   └─ core/
//!       ├─ elements/   - user-facing composite tree + visitor
//!       ├─ workers/    - Filter/Splitter/Joiner traits, standard workers
//!       ├─ graph/      - connected worker graph, tokens, validation
//!       ├─ schedule/   - SDF balance solver (steady + init)
//!       ├─ partition/  - worker→machine→blob partitioning, blob graph
//!       ├─ compiler/   - per-blob back-end (schedules, buffers, cores)
//!       ├─ runtime/    - compiled blob, per-core steps, drain protocol
//!       └─ interp/     - pull-driven reference interpreter
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use streamjit::{StreamElement, Identity, Configuration, compile};
//!
//! let graph = StreamElement::pipeline(vec![
//!     StreamElement::filter(Identity::new()),
//!     StreamElement::filter(Identity::new()),
//! ]);
//! let workers = streamjit::core::graph::WorkerGraph::connect(graph)?;
//! let config = Configuration::default_for(&workers);
//! let stream = compile(workers, &config)?;
//! ```

pub mod core;

pub use crate::core::compiler::{compile, BlobSummary, CompiledStream};
pub use crate::core::config::{Configuration, IntParameter, PartitionParameter, SwitchParameter};
pub use crate::core::elements::{StreamElement, StreamVisitor};
pub use crate::core::error::{Result, StreamJitError};
pub use crate::core::graph::{Channel, IOInfo, Token, WorkerGraph, WorkerId};
pub use crate::core::interp::InterpreterBlob;
pub use crate::core::messages::MessageConstraint;
pub use crate::core::rates::Rate;
pub use crate::core::runtime::{Blob, BlobState, CoreCode, DrainCallback, StreamHost};
pub use crate::core::workers::{
    BlackHole, DuplicateSplitter, Filter, Identity, Joiner, PortCount, RoundrobinJoiner,
    RoundrobinSplitter, Splitter,
};
