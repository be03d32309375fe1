// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Solves SDF balance equations over a set of scheduler channels.
//!
//! Nodes are generic: workers for a blob's internal schedule, blobs for the
//! external schedule. The steady-state solver returns the unique minimum
//! positive integer multiplicity vector; the init solver returns the
//! minimum firing counts that leave every channel holding at least its
//! required token count.

use super::Fraction;
use crate::core::error::{Result, StreamJitError};
use num_integer::Integer;
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use petgraph::unionfind::UnionFind;
use std::collections::BTreeMap;
use std::fmt::Debug;

/// One edge as seen by the scheduler: producer, consumer, their rates, and
/// (for init scheduling) the token count the channel must end up holding.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerChannel<N> {
    pub upstream: N,
    pub downstream: N,
    pub push: u64,
    pub pop: u64,
    pub initial_tokens: u64,
}

impl<N> SchedulerChannel<N> {
    pub fn new(upstream: N, downstream: N, push: u64, pop: u64) -> Self {
        Self {
            upstream,
            downstream,
            push,
            pop,
            initial_tokens: 0,
        }
    }

    pub fn with_initial_tokens(mut self, initial_tokens: u64) -> Self {
        self.initial_tokens = initial_tokens;
        self
    }

    /// A channel with both rates zero carries no balance constraint.
    fn is_constraining(&self) -> bool {
        self.push != 0 || self.pop != 0
    }
}

/// Compute the minimum positive steady-state multiplicity for every node.
///
/// Nodes absent from every channel are trivially balanced with
/// multiplicity 1. Channels where exactly one of push/pop is zero admit no
/// positive solution.
pub fn schedule<N>(nodes: &[N], channels: &[SchedulerChannel<N>]) -> Result<BTreeMap<N, u64>>
where
    N: Copy + Ord + Debug,
{
    let index: BTreeMap<N, usize> = nodes.iter().enumerate().map(|(i, &n)| (n, i)).collect();
    for c in channels {
        if !index.contains_key(&c.upstream) || !index.contains_key(&c.downstream) {
            return Err(StreamJitError::Unschedulable(format!(
                "channel {:?}->{:?} references a node outside the scheduled set",
                c.upstream, c.downstream
            )));
        }
        if c.is_constraining() && (c.push == 0 || c.pop == 0) {
            return Err(StreamJitError::Unschedulable(format!(
                "channel {:?}->{:?} has rates {}:{}; no positive steady state exists",
                c.upstream, c.downstream, c.push, c.pop
            )));
        }
    }

    // Weakly connected components over constraining channels.
    let mut union = UnionFind::<usize>::new(nodes.len());
    for c in channels.iter().filter(|c| c.is_constraining()) {
        union.union(index[&c.upstream], index[&c.downstream]);
    }

    // Propagation adjacency: (neighbor, multiplicity ratio neighbor/self).
    let mut adjacency: Vec<Vec<(usize, Fraction)>> = vec![Vec::new(); nodes.len()];
    for c in channels.iter().filter(|c| c.is_constraining()) {
        let u = index[&c.upstream];
        let d = index[&c.downstream];
        adjacency[u].push((d, Fraction::new(c.push as i64, c.pop as i64)));
        adjacency[d].push((u, Fraction::new(c.pop as i64, c.push as i64)));
    }

    // Propagate rational multiplicities from a seed per component.
    let mut rational: Vec<Option<Fraction>> = vec![None; nodes.len()];
    for seed in 0..nodes.len() {
        if rational[seed].is_some() {
            continue;
        }
        rational[seed] = Some(Fraction::ONE);
        let mut frontier = vec![seed];
        while let Some(current) = frontier.pop() {
            let current_mult = rational[current].expect("frontier nodes are assigned");
            for &(next, ratio) in &adjacency[current] {
                let derived = current_mult.mul(ratio);
                match rational[next] {
                    None => {
                        rational[next] = Some(derived);
                        frontier.push(next);
                    }
                    Some(existing) if existing != derived => {
                        return Err(StreamJitError::Unschedulable(format!(
                            "inconsistent balance equations at {:?}: {} vs {}",
                            nodes[next], existing, derived
                        )));
                    }
                    Some(_) => {}
                }
            }
        }
    }

    // Lift each component to the minimum integral solution: multiply by the
    // LCM of denominators, then divide by the gcd of numerators.
    let mut lcm_by_root: BTreeMap<usize, i64> = BTreeMap::new();
    for i in 0..nodes.len() {
        let root = union.find(i);
        let den = rational[i].expect("all nodes assigned").denominator();
        let entry = lcm_by_root.entry(root).or_insert(1);
        *entry = entry.lcm(&den);
    }
    let mut scaled: Vec<i64> = Vec::with_capacity(nodes.len());
    for i in 0..nodes.len() {
        let f = rational[i].expect("all nodes assigned");
        let lcm = lcm_by_root[&union.find(i)];
        scaled.push(f.numerator() * (lcm / f.denominator()));
    }
    let mut gcd_by_root: BTreeMap<usize, i64> = BTreeMap::new();
    for i in 0..nodes.len() {
        let entry = gcd_by_root.entry(union.find(i)).or_insert(0);
        *entry = entry.gcd(&scaled[i]);
    }

    let mut result = BTreeMap::new();
    for (i, &node) in nodes.iter().enumerate() {
        let gcd = gcd_by_root[&union.find(i)].max(1);
        let mult = scaled[i] / gcd;
        debug_assert!(mult > 0, "steady-state multiplicity must be positive");
        result.insert(node, mult as u64);
    }
    Ok(result)
}

/// Compute the minimum non-negative init firing counts such that every
/// channel ends up holding at least `initial_tokens` items:
/// `init(u)·push − init(d)·pop ≥ initial_tokens` for each channel.
///
/// Solved by a reverse-topological recurrence; a cycle among the channels
/// or a zero push rate against a positive requirement is unschedulable.
pub fn init_schedule<N>(nodes: &[N], channels: &[SchedulerChannel<N>]) -> Result<BTreeMap<N, u64>>
where
    N: Copy + Ord + Debug,
{
    let index: BTreeMap<N, usize> = nodes.iter().enumerate().map(|(i, &n)| (n, i)).collect();

    let mut graph = DiGraph::<usize, ()>::new();
    let petgraph_index: Vec<_> = (0..nodes.len()).map(|i| graph.add_node(i)).collect();
    let mut out_channels: Vec<Vec<&SchedulerChannel<N>>> = vec![Vec::new(); nodes.len()];
    for c in channels {
        let u = index[&c.upstream];
        let d = index[&c.downstream];
        graph.add_edge(petgraph_index[u], petgraph_index[d], ());
        out_channels[u].push(c);
    }

    let order = toposort(&graph, None).map_err(|_| {
        StreamJitError::Unschedulable(
            "initialization schedule requires an acyclic channel set".into(),
        )
    })?;

    let mut firings = vec![0u64; nodes.len()];
    for node_index in order.into_iter().rev() {
        let i = graph[node_index];
        let mut required = 0u64;
        for c in &out_channels[i] {
            let downstream_firings = firings[index[&c.downstream]];
            let needed = c.initial_tokens + downstream_firings * c.pop;
            if needed == 0 {
                continue;
            }
            if c.push == 0 {
                return Err(StreamJitError::Unschedulable(format!(
                    "channel {:?}->{:?} needs {} initial tokens but its producer never pushes",
                    c.upstream, c.downstream, needed
                )));
            }
            required = required.max(needed.div_ceil(c.push));
        }
        firings[i] = required;
    }

    Ok(nodes
        .iter()
        .enumerate()
        .map(|(i, &n)| (n, firings[i]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_node_is_trivially_balanced() {
        let schedule = schedule(&[7usize], &[]).unwrap();
        assert_eq!(schedule[&7], 1);
    }

    #[test]
    fn test_identity_chain() {
        let channels = [
            SchedulerChannel::new(0usize, 1, 1, 1),
            SchedulerChannel::new(1, 2, 1, 1),
        ];
        let schedule = schedule(&[0, 1, 2], &channels).unwrap();
        assert_eq!(schedule[&0], 1);
        assert_eq!(schedule[&1], 1);
        assert_eq!(schedule[&2], 1);
    }

    #[test]
    fn test_compressor_expander() {
        // 0 pushes 1, 1 pops 2 and pushes 1, 2 pops 1 and pushes 2.
        let channels = [
            SchedulerChannel::new(0usize, 1, 1, 2),
            SchedulerChannel::new(1, 2, 1, 1),
        ];
        let schedule = schedule(&[0, 1, 2], &channels).unwrap();
        assert_eq!(schedule[&0], 2);
        assert_eq!(schedule[&1], 1);
        assert_eq!(schedule[&2], 1);
    }

    #[test]
    fn test_balance_invariant() {
        let channels = [
            SchedulerChannel::new(0usize, 1, 3, 2),
            SchedulerChannel::new(1, 2, 5, 4),
        ];
        let schedule = schedule(&[0, 1, 2], &channels).unwrap();
        for c in &channels {
            assert_eq!(
                schedule[&c.upstream] * c.push,
                schedule[&c.downstream] * c.pop
            );
        }
    }

    #[test]
    fn test_normalization_gcd_is_one() {
        let channels = [SchedulerChannel::new(0usize, 1, 4, 6)];
        let schedule = schedule(&[0, 1], &channels).unwrap();
        assert_eq!(schedule[&0], 3);
        assert_eq!(schedule[&1], 2);
    }

    #[test]
    fn test_independent_components_normalized_separately() {
        let channels = [
            SchedulerChannel::new(0usize, 1, 2, 1),
            SchedulerChannel::new(2, 3, 1, 3),
        ];
        let schedule = schedule(&[0, 1, 2, 3], &channels).unwrap();
        assert_eq!(schedule[&0], 1);
        assert_eq!(schedule[&1], 2);
        assert_eq!(schedule[&2], 3);
        assert_eq!(schedule[&3], 1);
    }

    #[test]
    fn test_inconsistent_cycle_rejected() {
        // A diamond whose reconvergent rates disagree.
        let channels = [
            SchedulerChannel::new(0usize, 1, 1, 1),
            SchedulerChannel::new(0, 2, 1, 1),
            SchedulerChannel::new(1, 3, 2, 1),
            SchedulerChannel::new(2, 3, 3, 1),
        ];
        let err = schedule(&[0, 1, 2, 3], &channels).unwrap_err();
        assert!(matches!(err, StreamJitError::Unschedulable(_)));
    }

    #[test]
    fn test_half_zero_rate_rejected() {
        let channels = [SchedulerChannel::new(0usize, 1, 0, 1)];
        let err = schedule(&[0, 1], &channels).unwrap_err();
        assert!(matches!(err, StreamJitError::Unschedulable(_)));
    }

    #[test]
    fn test_schedule_of_balanced_rates_is_all_ones() {
        // Applying the scheduler to rates already scaled by the
        // multiplicities returns the unit vector.
        let channels = [SchedulerChannel::new(0usize, 1, 4, 6)];
        let schedule1 = schedule(&[0, 1], &channels).unwrap();
        let scaled = [SchedulerChannel::new(
            0usize,
            1,
            4 * schedule1[&0],
            6 * schedule1[&1],
        )];
        let schedule2 = schedule(&[0, 1], &scaled).unwrap();
        assert_eq!(schedule2[&0], 1);
        assert_eq!(schedule2[&1], 1);
    }

    #[test]
    fn test_init_schedule_fills_requirements() {
        // 0 -> 1 -> 2, each edge must end holding 2 tokens; unit rates.
        let channels = [
            SchedulerChannel::new(0usize, 1, 1, 1).with_initial_tokens(2),
            SchedulerChannel::new(1, 2, 1, 1).with_initial_tokens(2),
        ];
        let init = init_schedule(&[0, 1, 2], &channels).unwrap();
        assert_eq!(init[&2], 0);
        assert_eq!(init[&1], 2);
        assert_eq!(init[&0], 4);
        for c in &channels {
            let held = init[&c.upstream] * c.push - init[&c.downstream] * c.pop;
            assert!(held >= c.initial_tokens);
        }
    }

    #[test]
    fn test_init_schedule_zero_requirement_means_no_firings() {
        let channels = [SchedulerChannel::new(0usize, 1, 1, 1)];
        let init = init_schedule(&[0, 1], &channels).unwrap();
        assert_eq!(init[&0], 0);
        assert_eq!(init[&1], 0);
    }

    #[test]
    fn test_init_schedule_zero_push_with_requirement_rejected() {
        let channels = [SchedulerChannel::new(0usize, 1, 0, 1).with_initial_tokens(1)];
        let err = init_schedule(&[0, 1], &channels).unwrap_err();
        assert!(matches!(err, StreamJitError::Unschedulable(_)));
    }
}
