// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Exact rational arithmetic for rate propagation.

use num_integer::Integer;
use std::cmp::Ordering;

/// A reduced fraction with a strictly positive denominator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fraction {
    numerator: i64,
    denominator: i64,
}

impl Fraction {
    pub const ZERO: Fraction = Fraction {
        numerator: 0,
        denominator: 1,
    };
    pub const ONE: Fraction = Fraction {
        numerator: 1,
        denominator: 1,
    };

    /// Create a reduced fraction. Panics on a zero denominator.
    pub fn new(numerator: i64, denominator: i64) -> Self {
        assert!(denominator != 0, "fraction with zero denominator");
        let sign = if denominator < 0 { -1 } else { 1 };
        let g = numerator.abs().gcd(&denominator.abs()).max(1);
        Fraction {
            numerator: sign * numerator / g,
            denominator: denominator.abs() / g,
        }
    }

    pub fn numerator(&self) -> i64 {
        self.numerator
    }

    pub fn denominator(&self) -> i64 {
        self.denominator
    }

    pub fn mul(&self, other: Fraction) -> Fraction {
        // Cross-reduce before multiplying to keep intermediates small.
        let g1 = self.numerator.abs().gcd(&other.denominator).max(1);
        let g2 = other.numerator.abs().gcd(&self.denominator).max(1);
        Fraction::new(
            (self.numerator / g1) * (other.numerator / g2),
            (self.denominator / g2) * (other.denominator / g1),
        )
    }

    pub fn is_zero(&self) -> bool {
        self.numerator == 0
    }
}

impl PartialOrd for Fraction {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Fraction {
    fn cmp(&self, other: &Self) -> Ordering {
        // Denominators are positive, so cross-multiplication preserves order.
        (self.numerator as i128 * other.denominator as i128)
            .cmp(&(other.numerator as i128 * self.denominator as i128))
    }
}

impl std::fmt::Display for Fraction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.denominator == 1 {
            write!(f, "{}", self.numerator)
        } else {
            write!(f, "{}/{}", self.numerator, self.denominator)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduction() {
        let f = Fraction::new(4, 6);
        assert_eq!(f.numerator(), 2);
        assert_eq!(f.denominator(), 3);
    }

    #[test]
    fn test_negative_denominator_normalized() {
        let f = Fraction::new(1, -2);
        assert_eq!(f.numerator(), -1);
        assert_eq!(f.denominator(), 2);
    }

    #[test]
    fn test_mul() {
        let f = Fraction::new(2, 3).mul(Fraction::new(3, 4));
        assert_eq!(f, Fraction::new(1, 2));
    }

    #[test]
    fn test_ordering() {
        assert!(Fraction::new(1, 3) < Fraction::new(1, 2));
        assert!(Fraction::new(2, 1) > Fraction::ONE);
        assert_eq!(Fraction::new(2, 4), Fraction::new(1, 2));
    }
}
