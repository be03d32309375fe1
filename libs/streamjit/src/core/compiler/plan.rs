// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Per-blob compilation: rate legality, node grouping, internal and
//! group-level schedules, buffer sizing, init schedule and core
//! allocation. The resulting plan is pure metadata; the runtime assembles
//! step functions from it.

use crate::core::compiler::buffers::BufferData;
use crate::core::compiler::cores::{split_multiples, GroupRun};
use crate::core::config::Configuration;
use crate::core::error::{Result, StreamJitError};
use crate::core::graph::{Token, WorkerGraph, WorkerId};
use crate::core::schedule::{init_schedule, schedule, SchedulerChannel};
use std::collections::{BTreeMap, BTreeSet};

/// Which side of the blob an edge touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EdgeKind {
    Internal,
    /// Data enters the blob on this edge (inter-blob or overall input).
    Input,
    /// Data leaves the blob on this edge (inter-blob or overall output).
    Output,
}

/// Everything the runtime needs to know about one edge.
#[derive(Debug, Clone)]
pub(crate) struct EdgePlan {
    pub token: Token,
    pub kind: EdgeKind,
    pub pop: u64,
    pub peek: u64,
    pub push: u64,
    pub excess_peeks: u64,
    /// Items consumed (= produced) per blob steady state.
    pub steady_items: u64,
    /// Standing stock carried across steady states. At least
    /// `excess_peeks`; larger when the init solution overshoots.
    pub carry: u64,
    /// Allocation length of each side's buffer.
    pub buffer_len: u64,
}

/// A fused node group. The default fusion strategy keeps one worker per
/// group.
#[derive(Debug, Clone)]
pub(crate) struct GroupPlan {
    pub id: usize,
    /// Workers in intra-group topological order.
    pub workers: Vec<WorkerId>,
    /// Worker firings per group execution.
    pub execs: BTreeMap<WorkerId, u64>,
    /// Group executions per blob basic steady state.
    pub schedule: u64,
    /// Core slots this group's multiples are distributed over.
    pub cores: Vec<usize>,
}

#[derive(Debug, Clone)]
pub(crate) struct WorkerPlan {
    pub group: usize,
    /// Input edge tokens in port order.
    pub input_edges: Vec<Token>,
    /// Output edge tokens in port order.
    pub output_edges: Vec<Token>,
}

/// The compiled metadata for one blob.
#[derive(Debug, Clone)]
pub(crate) struct BlobPlan {
    pub machine: i64,
    pub members: BTreeSet<WorkerId>,
    /// Members in topological order.
    pub worker_order: Vec<WorkerId>,
    pub workers: BTreeMap<WorkerId, WorkerPlan>,
    pub groups: Vec<GroupPlan>,
    pub edges: BTreeMap<Token, EdgePlan>,
    pub buffers: BTreeMap<Token, BufferData>,
    pub init_schedule: BTreeMap<WorkerId, u64>,
    /// Worker firings per blob basic steady state
    /// (`execs · group schedule`).
    pub worker_totals: BTreeMap<WorkerId, u64>,
    /// Per core slot: the group multiples it executes.
    pub core_runs: Vec<Vec<GroupRun>>,
    pub multiplier: u64,
}

impl BlobPlan {
    pub fn core_count(&self) -> usize {
        self.core_runs.len()
    }

    /// Compile the metadata for the blob holding `members`.
    pub fn compute<T: 'static>(
        graph: &WorkerGraph<T>,
        members: &BTreeSet<WorkerId>,
        machine: i64,
        config: &Configuration,
    ) -> Result<BlobPlan> {
        let multiplier = config.multiplier()?;
        check_io_shape(graph, members)?;
        check_rate_legality(graph, members)?;
        check_no_messaging(graph, members)?;

        let worker_order: Vec<WorkerId> = graph
            .topological_order()
            .into_iter()
            .filter(|id| members.contains(id))
            .collect();

        // Default fusion strategy: one worker per node group.
        let mut groups: Vec<GroupPlan> = worker_order
            .iter()
            .enumerate()
            .map(|(index, &id)| GroupPlan {
                id: index,
                workers: vec![id],
                execs: BTreeMap::from([(id, 1)]),
                schedule: 0,
                cores: vec![0],
            })
            .collect();
        let group_of: BTreeMap<WorkerId, usize> = worker_order
            .iter()
            .enumerate()
            .map(|(index, &id)| (id, index))
            .collect();

        // Group-level schedule over inter-group channels, rates scaled by
        // the internal multiplicities of the endpoints.
        let internal = graph.internal_edges(members);
        let mut group_channels = Vec::new();
        for &token in &internal {
            let upstream = token.upstream().expect("internal edge");
            let downstream = token.downstream().expect("internal edge");
            let push = fixed_rate(graph.push_rate_on(token), token, "push")?;
            let pop = fixed_rate(graph.pop_rate_on(token), token, "pop")?;
            let up_group = group_of[&upstream];
            let down_group = group_of[&downstream];
            if up_group == down_group {
                continue;
            }
            group_channels.push(SchedulerChannel::new(
                up_group,
                down_group,
                push * groups[up_group].execs[&upstream],
                pop * groups[down_group].execs[&downstream],
            ));
        }
        let group_ids: Vec<usize> = (0..groups.len()).collect();
        let group_schedule = schedule(&group_ids, &group_channels)?;
        for group in &mut groups {
            group.schedule = group_schedule[&group.id];
        }

        let worker_totals: BTreeMap<WorkerId, u64> = worker_order
            .iter()
            .map(|&id| {
                let group = &groups[group_of[&id]];
                (id, group.execs[&id] * group.schedule)
            })
            .collect();
        tracing::debug!("internal schedule: {:?}", worker_totals);

        // Buffer sizing.
        let mut buffers = BTreeMap::new();
        let io = graph.boundary_io(members);
        let boundary_tokens: Vec<Token> = io.iter().map(|info| info.token).collect();
        for &token in internal.iter().chain(boundary_tokens.iter()) {
            buffers.insert(
                token,
                size_buffer(graph, token, &worker_totals, multiplier)?,
            );
        }

        // Init schedule over the intra-blob channels, requiring each to
        // reach its initial fill.
        let mut init_channels = Vec::new();
        for &token in &internal {
            let upstream = token.upstream().expect("internal edge");
            let downstream = token.downstream().expect("internal edge");
            let push = fixed_rate(graph.push_rate_on(token), token, "push")?;
            let pop = fixed_rate(graph.pop_rate_on(token), token, "pop")?;
            init_channels.push(
                SchedulerChannel::new(upstream, downstream, push, pop)
                    .with_initial_tokens(buffers[&token].initial_size),
            );
        }
        let members_vec: Vec<WorkerId> = worker_order.clone();
        let init = init_schedule(&members_vec, &init_channels)?;
        tracing::debug!("init schedule: {:?}", init);

        // Edge plans.
        let mut edges = BTreeMap::new();
        for &token in &internal {
            let upstream = token.upstream().expect("internal edge");
            let downstream = token.downstream().expect("internal edge");
            let data = &buffers[&token];
            let pop = fixed_rate(graph.pop_rate_on(token), token, "pop")?;
            let peek = fixed_rate(graph.peek_rate_on(token), token, "peek")?;
            let push = fixed_rate(graph.push_rate_on(token), token, "push")?;
            let steady_items = worker_totals[&downstream] * multiplier * pop;
            let initial_fill = init[&upstream] * push - init[&downstream] * pop;
            debug_assert!(initial_fill >= data.initial_size);
            edges.insert(
                token,
                EdgePlan {
                    token,
                    kind: EdgeKind::Internal,
                    pop,
                    peek,
                    push,
                    excess_peeks: data.excess_peeks,
                    steady_items,
                    carry: initial_fill - steady_items,
                    buffer_len: initial_fill,
                },
            );
        }
        for info in &io {
            let token = info.token;
            let data = &buffers[&token];
            if info.is_input {
                let downstream = token.downstream().expect("input edge has a consumer");
                let pop = fixed_rate(graph.pop_rate_on(token), token, "pop")?;
                let peek = fixed_rate(graph.peek_rate_on(token), token, "peek")?;
                let steady_items = worker_totals[&downstream] * multiplier * pop;
                edges.insert(
                    token,
                    EdgePlan {
                        token,
                        kind: EdgeKind::Input,
                        pop,
                        peek,
                        push: 0,
                        excess_peeks: data.excess_peeks,
                        steady_items,
                        carry: data.excess_peeks,
                        buffer_len: data.capacity,
                    },
                );
            } else {
                let upstream = token.upstream().expect("output edge has a producer");
                let push = fixed_rate(graph.push_rate_on(token), token, "push")?;
                let steady_items = worker_totals[&upstream] * multiplier * push;
                edges.insert(
                    token,
                    EdgePlan {
                        token,
                        kind: EdgeKind::Output,
                        pop: 0,
                        peek: 0,
                        push,
                        excess_peeks: 0,
                        steady_items,
                        carry: 0,
                        buffer_len: steady_items,
                    },
                );
            }
        }

        // Worker plans: port-ordered edge tokens.
        let mut workers = BTreeMap::new();
        for &id in &worker_order {
            let input_edges = if graph.predecessors(id).is_empty() {
                vec![Token::overall_input(id)]
            } else {
                graph
                    .predecessors(id)
                    .iter()
                    .map(|&pred| Token::new(pred, id))
                    .collect()
            };
            let output_edges = if graph.successors(id).is_empty() {
                vec![Token::overall_output(id)]
            } else {
                graph
                    .successors(id)
                    .iter()
                    .map(|&succ| Token::new(id, succ))
                    .collect()
            };
            workers.insert(
                id,
                WorkerPlan {
                    group: group_of[&id],
                    input_edges,
                    output_edges,
                },
            );
        }

        // Core allocation. The default places every group on core 0; an
        // explicit PARTITION slot, the machine's core count, or a global
        // maxNumCores above 1 spreads fissile groups.
        let max_cores = config.blob_core_cap(machine, members).unwrap_or(1).max(1) as usize;
        if max_cores > 1 {
            for group in &mut groups {
                let fissile = group.workers.iter().all(|&id| {
                    let worker = graph.worker(id);
                    !worker.is_stateful() && worker.imp.fission_copy().is_some()
                });
                if fissile {
                    group.cores = (0..max_cores).collect();
                }
            }
        }
        let core_count = groups
            .iter()
            .flat_map(|g| g.cores.iter().copied())
            .max()
            .map_or(1, |max| max + 1);
        let mut core_runs: Vec<Vec<GroupRun>> = vec![Vec::new(); core_count];
        for group in &groups {
            let total = group.schedule * multiplier;
            for (core, multiples) in split_multiples(total, &group.cores) {
                if multiples.is_empty() {
                    continue;
                }
                core_runs[core].push(GroupRun {
                    group: group.id,
                    multiples,
                });
            }
        }

        Ok(BlobPlan {
            machine,
            members: members.clone(),
            worker_order,
            workers,
            groups,
            edges,
            buffers,
            init_schedule: init,
            worker_totals,
            core_runs,
            multiplier,
        })
    }
}

fn fixed_rate(rate: crate::core::rates::Rate, token: Token, which: &str) -> Result<u64> {
    rate.fixed().ok_or_else(|| {
        StreamJitError::UnsupportedConstruct(format!(
            "dynamic {} rate on channel {} inside a compiled blob",
            which, token
        ))
    })
}

/// A compiled blob has exactly one worker receiving boundary input and
/// exactly one producing boundary output.
fn check_io_shape<T>(graph: &WorkerGraph<T>, members: &BTreeSet<WorkerId>) -> Result<()> {
    let io = graph.boundary_io(members);
    let mut input_workers = BTreeSet::new();
    let mut output_workers = BTreeSet::new();
    for info in &io {
        if info.is_input {
            input_workers.insert(info.token.downstream().expect("input edge"));
        } else {
            output_workers.insert(info.token.upstream().expect("output edge"));
        }
    }
    if input_workers.len() > 1 {
        return Err(StreamJitError::UnsupportedConstruct(format!(
            "blob has {} input workers; the compiled back-end supports one",
            input_workers.len()
        )));
    }
    if output_workers.len() > 1 {
        return Err(StreamJitError::UnsupportedConstruct(format!(
            "blob has {} output workers; the compiled back-end supports one",
            output_workers.len()
        )));
    }
    Ok(())
}

/// Peek and pop rates must be fixed everywhere; push rates must be fixed
/// on every edge the compiled buffers cover (a dynamic overall-output
/// push falls back to the interpreter).
fn check_rate_legality<T: 'static>(graph: &WorkerGraph<T>, members: &BTreeSet<WorkerId>) -> Result<()> {
    for &id in members {
        let worker = graph.worker(id);
        for rate in worker.peek_rates().iter().chain(worker.pop_rates()) {
            if rate.is_dynamic() {
                return Err(StreamJitError::UnsupportedConstruct(format!(
                    "dynamic input rate on worker {}",
                    id
                )));
            }
        }
        for rate in worker.push_rates() {
            if rate.is_dynamic() {
                return Err(StreamJitError::UnsupportedConstruct(format!(
                    "dynamic push rate on worker {}",
                    id
                )));
            }
        }
    }
    Ok(())
}

/// The compiled back-end supports no messaging at all; any constraint
/// touching a member worker rejects the blob.
fn check_no_messaging<T>(graph: &WorkerGraph<T>, members: &BTreeSet<WorkerId>) -> Result<()> {
    for constraint in graph.constraints() {
        if members.contains(&constraint.sender) || members.contains(&constraint.recipient) {
            return Err(StreamJitError::UnsupportedConstruct(format!(
                "message constraint {} -> {} touches a compiled blob",
                constraint.sender, constraint.recipient
            )));
        }
    }
    Ok(())
}

fn size_buffer<T>(
    graph: &WorkerGraph<T>,
    token: Token,
    worker_totals: &BTreeMap<WorkerId, u64>,
    multiplier: u64,
) -> Result<BufferData> {
    if token.is_overall_output() || !token
        .downstream()
        .map(|d| worker_totals.contains_key(&d))
        .unwrap_or(false)
    {
        // Data leaves the blob here: capacity is one steady state of
        // production, starting empty.
        let upstream = token.upstream().expect("output edge has a producer");
        let push = fixed_rate(graph.push_rate_on(token), token, "push")?;
        let capacity = worker_totals[&upstream] * multiplier * push;
        Ok(BufferData::new(token, capacity, 0, 0))
    } else {
        let downstream = token.downstream().expect("edge has a consumer");
        let pop = fixed_rate(graph.pop_rate_on(token), token, "pop")?;
        let peek = fixed_rate(graph.peek_rate_on(token), token, "peek")?;
        let excess_peeks = peek.saturating_sub(pop);
        let capacity = worker_totals[&downstream] * multiplier * pop + excess_peeks;
        Ok(BufferData::new(token, capacity, capacity, excess_peeks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::elements::StreamElement;
    use crate::core::rates::Rate;
    use crate::core::workers::{FilterRates, Identity, InputPort, OutputPort};

    fn identity_pipeline(length: usize) -> WorkerGraph<i32> {
        let children = (0..length)
            .map(|_| StreamElement::filter(Identity::new()))
            .collect();
        WorkerGraph::connect(StreamElement::pipeline(children)).unwrap()
    }

    fn whole_graph_plan(graph: &WorkerGraph<i32>, config: &Configuration) -> BlobPlan {
        let members: BTreeSet<WorkerId> = graph.worker_ids().collect();
        BlobPlan::compute(graph, &members, 0, config).unwrap()
    }

    #[test]
    fn test_identity_pipeline_schedule_and_buffers() {
        let graph = identity_pipeline(2);
        let config = Configuration::default_for(&graph);
        let plan = whole_graph_plan(&graph, &config);
        assert_eq!(plan.worker_totals[&WorkerId(0)], 1);
        assert_eq!(plan.worker_totals[&WorkerId(1)], 1);
        let internal = &plan.buffers[&Token::new(WorkerId(0), WorkerId(1))];
        assert_eq!(internal.capacity, 1);
        assert_eq!(internal.initial_size, 1);
        assert_eq!(internal.excess_peeks, 0);
        let output = &plan.buffers[&Token::overall_output(WorkerId(1))];
        assert_eq!(output.capacity, 1);
        assert_eq!(output.initial_size, 0);
    }

    #[test]
    fn test_multiplier_scales_capacity() {
        let graph = identity_pipeline(2);
        let config = Configuration::default_for(&graph)
            .replace_parameter(crate::core::config::Parameter::Int(
                crate::core::config::IntParameter::new("multiplier", 1, 1 << 20, 4),
            ))
            .unwrap();
        let plan = whole_graph_plan(&graph, &config);
        let internal = &plan.buffers[&Token::new(WorkerId(0), WorkerId(1))];
        assert_eq!(internal.capacity, 4);
        assert_eq!(plan.edges[&Token::new(WorkerId(0), WorkerId(1))].steady_items, 4);
    }

    struct Peeker;

    impl crate::core::workers::Filter<i32> for Peeker {
        fn rates(&self) -> FilterRates {
            FilterRates::new(1, 1).with_peek(3)
        }
        fn work(&mut self, input: &mut dyn InputPort<i32>, output: &mut dyn OutputPort<i32>) {
            let ahead = *input.peek(2);
            output.push(input.pop() + ahead);
        }
    }

    #[test]
    fn test_excess_peeks_in_capacity() {
        let graph = WorkerGraph::connect(StreamElement::pipeline(vec![
            StreamElement::filter(Identity::new()),
            StreamElement::filter(Peeker),
        ]))
        .unwrap();
        let config = Configuration::default_for(&graph);
        let plan = whole_graph_plan(&graph, &config);
        let internal = &plan.buffers[&Token::new(WorkerId(0), WorkerId(1))];
        assert_eq!(internal.excess_peeks, 2);
        assert_eq!(internal.capacity, 1 + 2);
        assert_eq!(internal.initial_size, internal.capacity);
        // The plan's carry covers the lookahead.
        assert!(plan.edges[&Token::new(WorkerId(0), WorkerId(1))].carry >= 2);
    }

    #[test]
    fn test_peek_equals_pop_means_no_excess() {
        let graph = identity_pipeline(2);
        let config = Configuration::default_for(&graph);
        let plan = whole_graph_plan(&graph, &config);
        let data = &plan.buffers[&Token::new(WorkerId(0), WorkerId(1))];
        assert_eq!(data.excess_peeks, 0);
        assert_eq!(data.initial_size, data.capacity);
    }

    #[test]
    fn test_init_schedule_fills_internal_buffers() {
        let graph = identity_pipeline(3);
        let config = Configuration::default_for(&graph);
        let plan = whole_graph_plan(&graph, &config);
        // The sink never fires during init; upstream workers fire just
        // enough to leave each edge at its initial fill.
        assert_eq!(plan.init_schedule[&WorkerId(2)], 0);
        assert_eq!(plan.init_schedule[&WorkerId(1)], 1);
        assert_eq!(plan.init_schedule[&WorkerId(0)], 2);
    }

    #[test]
    fn test_core_conservation() {
        let graph = identity_pipeline(2);
        let mut builder = Configuration::builder();
        for id in graph.worker_ids() {
            builder = builder
                .add_int(crate::core::config::worker_to_machine_name(id), 0, 0, 0)
                .unwrap();
        }
        let config = builder
            .add_int("multiplier", 1, 100, 5)
            .unwrap()
            .add_int("maxNumCores", 1, 16, 3)
            .unwrap()
            .build();
        let members: BTreeSet<WorkerId> = graph.worker_ids().collect();
        let plan = BlobPlan::compute(&graph, &members, 0, &config).unwrap();
        assert_eq!(plan.core_count(), 3);
        for group in &plan.groups {
            let assigned: u64 = plan
                .core_runs
                .iter()
                .flatten()
                .filter(|run| run.group == group.id)
                .map(|run| run.multiples.end - run.multiples.start)
                .sum();
            assert_eq!(assigned, group.schedule * plan.multiplier);
        }
    }

    #[test]
    fn test_single_worker_blob_is_trivially_balanced() {
        let graph = identity_pipeline(1);
        let config = Configuration::default_for(&graph);
        let plan = whole_graph_plan(&graph, &config);
        assert_eq!(plan.worker_totals[&WorkerId(0)], 1);
    }

    struct DynamicPop;

    impl crate::core::workers::Filter<i32> for DynamicPop {
        fn rates(&self) -> FilterRates {
            FilterRates {
                pop: Rate::Dynamic,
                peek: Rate::Dynamic,
                push: Rate::Fixed(1),
            }
        }
        fn work(&mut self, _input: &mut dyn InputPort<i32>, _output: &mut dyn OutputPort<i32>) {}
    }

    #[test]
    fn test_dynamic_internal_rate_rejected() {
        let graph = WorkerGraph::connect(StreamElement::pipeline(vec![
            StreamElement::filter(Identity::new()),
            StreamElement::filter(DynamicPop),
        ]))
        .unwrap();
        let config = Configuration::default_for(&graph);
        let members: BTreeSet<WorkerId> = graph.worker_ids().collect();
        let err = BlobPlan::compute(&graph, &members, 0, &config).unwrap_err();
        assert!(matches!(err, StreamJitError::UnsupportedConstruct(_)));
    }

    #[test]
    fn test_messaging_rejected_by_compiled_backend() {
        let mut graph = identity_pipeline(2);
        graph
            .add_constraint(crate::core::messages::MessageConstraint::new(
                WorkerId(0),
                WorkerId(1),
                1,
            ))
            .unwrap();
        let config = Configuration::default_for(&graph);
        let members: BTreeSet<WorkerId> = graph.worker_ids().collect();
        let err = BlobPlan::compute(&graph, &members, 0, &config).unwrap_err();
        assert!(matches!(err, StreamJitError::UnsupportedConstruct(_)));
    }
}
