// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Edge identifiers.

use serde::{Deserialize, Serialize};

/// Stable identifier of a connected worker, assigned by the connect pass.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct WorkerId(pub usize);

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Names an edge as the pair (producer, consumer).
///
/// The overall-input token has no producer; the overall-output token has
/// no consumer. Tokens order by upstream id then downstream id, with the
/// sentinels sorting first/last respectively.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Token {
    upstream: Option<WorkerId>,
    downstream: Option<WorkerId>,
}

impl Token {
    pub fn new(upstream: WorkerId, downstream: WorkerId) -> Self {
        Self {
            upstream: Some(upstream),
            downstream: Some(downstream),
        }
    }

    /// The edge through which the overall stream input enters `downstream`.
    pub fn overall_input(downstream: WorkerId) -> Self {
        Self {
            upstream: None,
            downstream: Some(downstream),
        }
    }

    /// The edge through which the overall stream output leaves `upstream`.
    pub fn overall_output(upstream: WorkerId) -> Self {
        Self {
            upstream: Some(upstream),
            downstream: None,
        }
    }

    pub fn upstream(&self) -> Option<WorkerId> {
        self.upstream
    }

    pub fn downstream(&self) -> Option<WorkerId> {
        self.downstream
    }

    pub fn is_overall_input(&self) -> bool {
        self.upstream.is_none()
    }

    pub fn is_overall_output(&self) -> bool {
        self.downstream.is_none()
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.upstream, self.downstream) {
            (Some(u), Some(d)) => write!(f, "[{}, {}]", u, d),
            (None, Some(d)) => write!(f, "[input, {}]", d),
            (Some(u), None) => write!(f, "[{}, output]", u),
            (None, None) => write!(f, "[input, output]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels() {
        let input = Token::overall_input(WorkerId(0));
        assert!(input.is_overall_input());
        assert!(!input.is_overall_output());
        let output = Token::overall_output(WorkerId(3));
        assert!(output.is_overall_output());
        assert_eq!(output.upstream(), Some(WorkerId(3)));
    }

    #[test]
    fn test_display() {
        assert_eq!(Token::new(WorkerId(1), WorkerId(2)).to_string(), "[1, 2]");
        assert_eq!(Token::overall_input(WorkerId(0)).to_string(), "[input, 0]");
    }
}
