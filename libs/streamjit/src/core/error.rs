// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Error types for streamjit.
//!
//! All compile-time errors are fatal and never retried; variants carry the
//! offending worker ids, tokens or assignment dumps as text so callers can
//! surface them directly.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamJitError {
    /// Duplicate element, arity mismatch, or unbalanced splitjoin.
    #[error("invalid stream graph: {reason}")]
    InvalidGraph {
        reason: String,
        /// Element path through pipelines/splitjoins, when available.
        trace: Option<String>,
    },

    /// SDF balance equations are inconsistent, or no positive integer
    /// steady state exists.
    #[error("unschedulable: {0}")]
    Unschedulable(String),

    /// The worker→machine assignment induced a cycle among blobs.
    #[error("cycles found in the worker->blob assignment:\n{assignment}")]
    CyclicBlobs { assignment: String },

    /// Dynamic rate on an internal port, messaging across a blob boundary,
    /// or another construct the compiled back-end does not handle.
    #[error("unsupported construct: {0}")]
    UnsupportedConstruct(String),

    /// `drain` called more than once on the same blob.
    #[error("drain misuse: {0}")]
    DrainMisuse(String),

    /// The interpreter detected an unsatisfiable message/data cycle at
    /// runtime. Unreachable under a valid compile.
    #[error("illegal stream graph: {0}")]
    IllegalStreamGraph(String),

    /// Missing or malformed configuration parameter.
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl StreamJitError {
    /// Shorthand for an `InvalidGraph` without an element trace.
    pub fn invalid_graph(reason: impl Into<String>) -> Self {
        Self::InvalidGraph {
            reason: reason.into(),
            trace: None,
        }
    }
}

/// Result type that uses StreamJitError.
pub type Result<T> = std::result::Result<T, StreamJitError>;
