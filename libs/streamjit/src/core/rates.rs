// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Per-port data rates.

use serde::{Deserialize, Serialize};

/// A declared per-firing rate on one port.
///
/// Rates are either a fixed non-negative item count or `Dynamic`
/// (data-dependent). Dynamic rates are only legal on the overall-output
/// port of a compiled blob; everywhere else they are rejected at compile
/// time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rate {
    Fixed(u64),
    Dynamic,
}

impl Rate {
    pub fn is_fixed(&self) -> bool {
        matches!(self, Rate::Fixed(_))
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, Rate::Dynamic)
    }

    /// The fixed value, if any.
    pub fn fixed(&self) -> Option<u64> {
        match self {
            Rate::Fixed(n) => Some(*n),
            Rate::Dynamic => None,
        }
    }
}

impl std::fmt::Display for Rate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rate::Fixed(n) => write!(f, "{}", n),
            Rate::Dynamic => write!(f, "*"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_accessors() {
        assert!(Rate::Fixed(3).is_fixed());
        assert_eq!(Rate::Fixed(3).fixed(), Some(3));
        assert!(Rate::Dynamic.is_dynamic());
        assert_eq!(Rate::Dynamic.fixed(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Rate::Fixed(7).to_string(), "7");
        assert_eq!(Rate::Dynamic.to_string(), "*");
    }
}
