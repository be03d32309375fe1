// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Buffer metadata computed per edge of a compiled blob.

use crate::core::graph::Token;
use serde::{Deserialize, Serialize};

/// Sizing of one edge's double buffers.
///
/// The reader buffer is the one initially filled with items for peeking;
/// the writer buffer receives the steady state's production and the pair
/// is swapped at the handoff. The overall-input buffer has no writer; the
/// overall-output buffer has no reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferData {
    pub token: Token,
    pub reader_buffer: Option<String>,
    pub writer_buffer: Option<String>,
    /// Steady-state capacity: one blob steady state of consumption plus
    /// the excess peeks.
    pub capacity: u64,
    /// Fill level before the first steady state. Equals `capacity` except
    /// on the overall-output buffer, which starts empty.
    pub initial_size: u64,
    /// Items peeked at but not popped per steady state; copied to the
    /// front of the writer buffer when flipping.
    pub excess_peeks: u64,
}

impl BufferData {
    pub(crate) fn new(
        token: Token,
        capacity: u64,
        initial_size: u64,
        excess_peeks: u64,
    ) -> Self {
        let upstream = token
            .upstream()
            .map(|w| w.to_string())
            .unwrap_or_else(|| "input".into());
        let downstream = token
            .downstream()
            .map(|w| w.to_string())
            .unwrap_or_else(|| "output".into());
        let field = format!("buf_{}_{}", upstream, downstream);
        debug_assert!(initial_size <= capacity);
        debug_assert!(excess_peeks <= capacity);
        Self {
            token,
            reader_buffer: (!token.is_overall_output()).then(|| format!("{}r", field)),
            writer_buffer: (!token.is_overall_input()).then(|| format!("{}w", field)),
            capacity,
            initial_size,
            excess_peeks,
        }
    }
}

impl std::fmt::Display for BufferData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}: r: {}, w: {}, init: {}, max: {}, peeks: {}]",
            self.token,
            self.reader_buffer.as_deref().unwrap_or("-"),
            self.writer_buffer.as_deref().unwrap_or("-"),
            self.initial_size,
            self.capacity,
            self.excess_peeks
        )
    }
}
