// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Validation passes over the composite tree.
//!
//! Three checks run in order: structural (no empty composites, no bare
//! splitters/joiners), splitter/joiner arity against the branch count, and
//! splitjoin rate balance. All failures are fatal and carry the element
//! path at which they were detected. A second pass over a valid tree is a
//! no-op.

use crate::core::elements::{StreamElement, StreamVisitor};
use crate::core::error::{Result, StreamJitError};
use crate::core::rates::Rate;
use crate::core::schedule::Fraction;
use crate::core::workers::{Filter, Joiner, Splitter, SplitterRates};

/// Validate a composite tree. Does not connect the graph.
pub fn check<T: 'static>(element: &StreamElement<T>) -> Result<()> {
    element.accept(&mut ArityVisitor::new())?;
    element.accept(&mut RateBalanceVisitor::new())?;
    Ok(())
}

/// Element path maintained while walking, for error reports.
struct Trace(Vec<String>);

impl Trace {
    fn new() -> Self {
        Trace(vec!["stream".into()])
    }

    fn push(&mut self, segment: String) {
        self.0.push(segment);
    }

    fn pop(&mut self) {
        self.0.pop();
    }

    fn render(&self) -> String {
        self.0.join(" > ")
    }
}

/// Checks composite shape and splitter/joiner arity.
struct ArityVisitor {
    trace: Trace,
}

impl ArityVisitor {
    fn new() -> Self {
        Self {
            trace: Trace::new(),
        }
    }
}

impl<T: 'static> StreamVisitor<T> for ArityVisitor {
    fn enter_pipeline(&mut self, children: usize) -> Result<()> {
        if children == 0 {
            return Err(StreamJitError::InvalidGraph {
                reason: "empty pipeline".into(),
                trace: Some(self.trace.render()),
            });
        }
        self.trace.push("pipeline".into());
        Ok(())
    }

    fn exit_pipeline(&mut self) -> Result<()> {
        self.trace.pop();
        Ok(())
    }

    fn enter_splitjoin(&mut self, branches: usize) -> Result<()> {
        if branches == 0 {
            return Err(StreamJitError::InvalidGraph {
                reason: "splitjoin with no branches".into(),
                trace: Some(self.trace.render()),
            });
        }
        self.trace.push("splitjoin".into());
        Ok(())
    }

    fn visit_splitter(&mut self, splitter: &dyn Splitter<T>, branches: usize) -> Result<()> {
        let supported = splitter.supported_outputs();
        if !supported.admits(branches) {
            return Err(StreamJitError::InvalidGraph {
                reason: format!(
                    "splitter supports {:?} outputs, but the splitjoin has {} branches",
                    supported, branches
                ),
                trace: Some(self.trace.render()),
            });
        }
        Ok(())
    }

    fn enter_splitjoin_branch(&mut self, index: usize) -> Result<()> {
        self.trace.push(format!("branch {}", index));
        Ok(())
    }

    fn exit_splitjoin_branch(&mut self, _index: usize) -> Result<()> {
        self.trace.pop();
        Ok(())
    }

    fn visit_joiner(&mut self, joiner: &dyn Joiner<T>, branches: usize) -> Result<()> {
        let supported = joiner.supported_inputs();
        if !supported.admits(branches) {
            return Err(StreamJitError::InvalidGraph {
                reason: format!(
                    "joiner supports {:?} inputs, but the splitjoin has {} branches",
                    supported, branches
                ),
                trace: Some(self.trace.render()),
            });
        }
        Ok(())
    }

    fn exit_splitjoin(&mut self) -> Result<()> {
        self.trace.pop();
        Ok(())
    }
}

/// A closed interval of rational rate ratios. `upper == None` is an open
/// unbounded end, produced by dynamic rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RateRange {
    lower: Fraction,
    upper: Option<Fraction>,
}

impl RateRange {
    const UNIT: RateRange = RateRange {
        lower: Fraction::ONE,
        upper: Some(Fraction::ONE),
    };

    /// The output:input ratio interval of one (pop, push) rate pair.
    fn from_rates(pop: Rate, push: Rate) -> Self {
        let pop = match pop {
            // A non-popping or dynamic consumer matches any ratio.
            Rate::Dynamic | Rate::Fixed(0) => {
                return RateRange {
                    lower: Fraction::ZERO,
                    upper: None,
                }
            }
            Rate::Fixed(n) => n as i64,
        };
        let lower = Fraction::new(push.fixed().unwrap_or(0) as i64, pop);
        let upper = push.fixed().map(|n| Fraction::new(n as i64, pop));
        RateRange { lower, upper }
    }

    fn mul(&self, other: RateRange) -> RateRange {
        RateRange {
            lower: self.lower.mul(other.lower),
            upper: match (self.upper, other.upper) {
                (Some(a), Some(b)) => Some(a.mul(b)),
                _ => None,
            },
        }
    }

    /// None when the ranges do not intersect.
    fn intersect(&self, other: RateRange) -> Option<RateRange> {
        let lower = self.lower.max(other.lower);
        let upper = match (self.upper, other.upper) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) | (None, Some(a)) => Some(a),
            (None, None) => None,
        };
        match upper {
            Some(u) if u < lower => None,
            _ => Some(RateRange { lower, upper }),
        }
    }
}

struct SplitjoinContext {
    rate_at_entry: RateRange,
    splitter_rates: Option<SplitterRates>,
    branch_rates: Vec<RateRange>,
}

/// Checks that every splitjoin's branches agree on a common rate ratio.
struct RateBalanceVisitor {
    trace: Trace,
    current: RateRange,
    splitjoins: Vec<SplitjoinContext>,
}

impl RateBalanceVisitor {
    fn new() -> Self {
        Self {
            trace: Trace::new(),
            current: RateRange::UNIT,
            splitjoins: Vec::new(),
        }
    }

    fn context(&mut self) -> &mut SplitjoinContext {
        self.splitjoins
            .last_mut()
            .expect("rate balance outside a splitjoin")
    }
}

impl<T: 'static> StreamVisitor<T> for RateBalanceVisitor {
    fn visit_filter(&mut self, filter: &dyn Filter<T>) -> Result<()> {
        let rates = filter.rates();
        self.current = self
            .current
            .mul(RateRange::from_rates(rates.pop, rates.push));
        Ok(())
    }

    fn enter_pipeline(&mut self, _children: usize) -> Result<()> {
        self.trace.push("pipeline".into());
        Ok(())
    }

    fn exit_pipeline(&mut self) -> Result<()> {
        self.trace.pop();
        Ok(())
    }

    fn enter_splitjoin(&mut self, _branches: usize) -> Result<()> {
        self.trace.push("splitjoin".into());
        self.splitjoins.push(SplitjoinContext {
            rate_at_entry: self.current,
            splitter_rates: None,
            branch_rates: Vec::new(),
        });
        Ok(())
    }

    fn visit_splitter(&mut self, splitter: &dyn Splitter<T>, branches: usize) -> Result<()> {
        self.context().splitter_rates = Some(splitter.rates(branches));
        Ok(())
    }

    fn enter_splitjoin_branch(&mut self, index: usize) -> Result<()> {
        self.trace.push(format!("branch {}", index));
        let context = self.context();
        let rates = context
            .splitter_rates
            .as_ref()
            .expect("splitter visited before branches");
        let range = RateRange::from_rates(rates.pop, rates.pushes[index]);
        self.current = range;
        Ok(())
    }

    fn exit_splitjoin_branch(&mut self, _index: usize) -> Result<()> {
        self.trace.pop();
        let current = self.current;
        self.context().branch_rates.push(current);
        Ok(())
    }

    fn visit_joiner(&mut self, joiner: &dyn Joiner<T>, branches: usize) -> Result<()> {
        let rates = joiner.rates(branches);
        let context = self.context();
        for (index, branch_rate) in context.branch_rates.iter_mut().enumerate() {
            let joiner_range = RateRange::from_rates(rates.pops[index], rates.push);
            *branch_rate = branch_rate.mul(joiner_range);
        }
        Ok(())
    }

    fn exit_splitjoin(&mut self) -> Result<()> {
        let context = self.splitjoins.pop().expect("matched enter/exit");
        let mut combined = context.branch_rates[0];
        for branch_rate in &context.branch_rates[1..] {
            combined = combined.intersect(*branch_rate).ok_or_else(|| {
                StreamJitError::InvalidGraph {
                    reason: "unbalanced splitjoin".into(),
                    trace: Some(self.trace.render()),
                }
            })?;
        }
        self.current = context.rate_at_entry.mul(combined);
        self.trace.pop();
        Ok(())
    }
}
