// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Arena of connected workers.
//!
//! Workers are stored by stable integer id; predecessor and successor
//! lists are vectors of ids whose order *is* the port order. A petgraph
//! view is kept alongside for topological sorting and cycle detection.

use crate::core::error::{Result, StreamJitError};
use crate::core::messages::MessageConstraint;
use crate::core::rates::Rate;
use crate::core::workers::{Filter, InputPort, InputPorts, Joiner, OutputPort, OutputPorts, Splitter};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeSet, HashSet};

use super::token::{Token, WorkerId};

/// The implementation behind a connected worker.
pub enum WorkerImpl<T> {
    Filter(Box<dyn Filter<T>>),
    Splitter(Box<dyn Splitter<T>>),
    Joiner(Box<dyn Joiner<T>>),
}

impl<T: 'static> WorkerImpl<T> {
    pub fn kind_name(&self) -> &'static str {
        match self {
            WorkerImpl::Filter(_) => "filter",
            WorkerImpl::Splitter(_) => "splitter",
            WorkerImpl::Joiner(_) => "joiner",
        }
    }

    pub fn is_stateful(&self) -> bool {
        match self {
            WorkerImpl::Filter(f) => f.is_stateful(),
            // Splitters and joiners synchronize their ports and are pinned
            // to one core regardless.
            WorkerImpl::Splitter(_) | WorkerImpl::Joiner(_) => true,
        }
    }

    /// A per-core copy for data-parallel fission, when supported.
    pub fn fission_copy(&self) -> Option<WorkerImpl<T>> {
        match self {
            WorkerImpl::Filter(f) => f.fission_copy().map(WorkerImpl::Filter),
            WorkerImpl::Splitter(_) | WorkerImpl::Joiner(_) => None,
        }
    }

    /// Execute one firing through indexed port handles.
    pub fn fire(&mut self, inputs: &mut dyn InputPorts<T>, outputs: &mut dyn OutputPorts<T>) {
        match self {
            WorkerImpl::Filter(f) => {
                let mut input = SinglePortInput { ports: inputs };
                let mut output = SinglePortOutput { ports: outputs };
                f.work(&mut input, &mut output);
            }
            WorkerImpl::Splitter(s) => {
                let mut input = SinglePortInput { ports: inputs };
                s.work(&mut input, outputs);
            }
            WorkerImpl::Joiner(j) => {
                let mut output = SinglePortOutput { ports: outputs };
                j.work(inputs, &mut output);
            }
        }
    }
}

struct SinglePortInput<'a, T> {
    ports: &'a mut dyn InputPorts<T>,
}

impl<T> InputPort<T> for SinglePortInput<'_, T> {
    fn pop(&mut self) -> T {
        self.ports.pop(0)
    }
    fn peek(&self, index: usize) -> &T {
        self.ports.peek(0, index)
    }
}

struct SinglePortOutput<'a, T> {
    ports: &'a mut dyn OutputPorts<T>,
}

impl<T> OutputPort<T> for SinglePortOutput<'_, T> {
    fn push(&mut self, item: T) {
        self.ports.push(0, item);
    }
}

/// A connected worker: implementation, declared rates, firing counter.
pub struct WorkerNode<T> {
    pub(crate) id: WorkerId,
    pub(crate) imp: WorkerImpl<T>,
    pub(crate) pop_rates: Vec<Rate>,
    pub(crate) peek_rates: Vec<Rate>,
    pub(crate) push_rates: Vec<Rate>,
    pub(crate) executions: u64,
}

impl<T: 'static> WorkerNode<T> {
    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn pop_rates(&self) -> &[Rate] {
        &self.pop_rates
    }

    pub fn peek_rates(&self) -> &[Rate] {
        &self.peek_rates
    }

    pub fn push_rates(&self) -> &[Rate] {
        &self.push_rates
    }

    /// Completed firings. Mutated only by the core that owns this worker.
    pub fn executions(&self) -> u64 {
        self.executions
    }

    pub fn is_stateful(&self) -> bool {
        self.imp.is_stateful()
    }
}

/// One boundary edge of a worker set: its token and which side is inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IOInfo {
    pub token: Token,
    /// True when data flows into the set (the consumer is inside).
    pub is_input: bool,
}

impl IOInfo {
    pub fn is_output(&self) -> bool {
        !self.is_input
    }
}

/// The connected worker graph.
pub struct WorkerGraph<T> {
    workers: Vec<WorkerNode<T>>,
    predecessors: Vec<Vec<WorkerId>>,
    successors: Vec<Vec<WorkerId>>,
    graph: DiGraph<WorkerId, Token>,
    constraints: Vec<MessageConstraint>,
}

impl<T> std::fmt::Debug for WorkerGraph<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerGraph")
            .field("workers", &self.workers.len())
            .field("predecessors", &self.predecessors)
            .field("successors", &self.successors)
            .field("graph", &self.graph)
            .field("constraints", &self.constraints)
            .finish()
    }
}

impl<T> WorkerGraph<T> {
    pub(crate) fn from_parts(
        workers: Vec<WorkerNode<T>>,
        predecessors: Vec<Vec<WorkerId>>,
        successors: Vec<Vec<WorkerId>>,
    ) -> Result<Self> {
        debug_assert!(workers.iter().enumerate().all(|(i, w)| w.id.0 == i));
        let mut graph = DiGraph::new();
        let node_index: Vec<NodeIndex> = workers.iter().map(|w| graph.add_node(w.id)).collect();
        for (from, successor_list) in successors.iter().enumerate() {
            for &to in successor_list {
                graph.add_edge(
                    node_index[from],
                    node_index[to.0],
                    Token::new(WorkerId(from), to),
                );
            }
        }
        let built = Self {
            workers,
            predecessors,
            successors,
            graph,
            constraints: Vec::new(),
        };
        built.validate()?;
        Ok(built)
    }

    /// Structural validation: port/rate arity agreement, no duplicate
    /// edges, no data cycles. Idempotent on valid graphs.
    pub fn validate(&self) -> Result<()> {
        for worker in &self.workers {
            let id = worker.id;
            let inputs = self.predecessors[id.0].len().max(1);
            let outputs = self.successors[id.0].len().max(1);
            if worker.pop_rates.len() != inputs || worker.peek_rates.len() != inputs {
                return Err(StreamJitError::invalid_graph(format!(
                    "worker {} declares {} input rates for {} input ports",
                    id,
                    worker.pop_rates.len(),
                    inputs
                )));
            }
            if worker.push_rates.len() != outputs {
                return Err(StreamJitError::invalid_graph(format!(
                    "worker {} declares {} push rates for {} output ports",
                    id,
                    worker.push_rates.len(),
                    outputs
                )));
            }
        }

        let mut seen = HashSet::new();
        for (from, successor_list) in self.successors.iter().enumerate() {
            for &to in successor_list {
                if !seen.insert((from, to)) {
                    return Err(StreamJitError::invalid_graph(format!(
                        "edge {} appears more than once in the stream graph",
                        Token::new(WorkerId(from), to)
                    )));
                }
            }
        }

        toposort(&self.graph, None)
            .map_err(|cycle| {
                StreamJitError::invalid_graph(format!(
                    "data cycle through worker {}",
                    self.graph[cycle.node_id()]
                ))
            })
            .map(|_| ())
    }

    pub fn worker(&self, id: WorkerId) -> &WorkerNode<T> {
        &self.workers[id.0]
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn worker_ids(&self) -> impl Iterator<Item = WorkerId> + '_ {
        self.workers.iter().map(|w| w.id)
    }

    /// Input port order of `of` is the order of this list.
    pub fn predecessors(&self, of: WorkerId) -> &[WorkerId] {
        &self.predecessors[of.0]
    }

    /// Output port order of `of` is the order of this list.
    pub fn successors(&self, of: WorkerId) -> &[WorkerId] {
        &self.successors[of.0]
    }

    /// The input port index of `downstream` fed by `upstream`.
    pub fn input_port(&self, downstream: WorkerId, upstream: WorkerId) -> Option<usize> {
        self.predecessors[downstream.0]
            .iter()
            .position(|&p| p == upstream)
    }

    /// The output port index of `upstream` feeding `downstream`.
    pub fn output_port(&self, upstream: WorkerId, downstream: WorkerId) -> Option<usize> {
        self.successors[upstream.0]
            .iter()
            .position(|&s| s == downstream)
    }

    /// The unique worker with no predecessors.
    pub fn source(&self) -> WorkerId {
        self.workers
            .iter()
            .find(|w| self.predecessors[w.id.0].is_empty())
            .map(|w| w.id)
            .expect("a connected graph has a source")
    }

    /// The unique worker with no successors.
    pub fn sink(&self) -> WorkerId {
        self.workers
            .iter()
            .find(|w| self.successors[w.id.0].is_empty())
            .map(|w| w.id)
            .expect("a connected graph has a sink")
    }

    pub fn topological_order(&self) -> Vec<WorkerId> {
        toposort(&self.graph, None)
            .expect("validated graphs are acyclic")
            .into_iter()
            .map(|index| self.graph[index])
            .collect()
    }

    pub fn add_constraint(&mut self, constraint: MessageConstraint) -> Result<()> {
        for endpoint in [constraint.sender, constraint.recipient] {
            if endpoint.0 >= self.workers.len() {
                return Err(StreamJitError::invalid_graph(format!(
                    "message constraint references unknown worker {}",
                    endpoint
                )));
            }
        }
        self.constraints.push(constraint);
        Ok(())
    }

    pub fn constraints(&self) -> &[MessageConstraint] {
        &self.constraints
    }

    /// The boundary edges of a worker set, sorted by token. Workers with
    /// no predecessors contribute the overall-input token; workers with no
    /// successors contribute the overall-output token.
    pub fn boundary_io(&self, set: &BTreeSet<WorkerId>) -> Vec<IOInfo> {
        let mut io = Vec::new();
        for &id in set {
            let preds = &self.predecessors[id.0];
            if preds.is_empty() {
                io.push(IOInfo {
                    token: Token::overall_input(id),
                    is_input: true,
                });
            }
            for &pred in preds {
                if !set.contains(&pred) {
                    io.push(IOInfo {
                        token: Token::new(pred, id),
                        is_input: true,
                    });
                }
            }
            let succs = &self.successors[id.0];
            if succs.is_empty() {
                io.push(IOInfo {
                    token: Token::overall_output(id),
                    is_input: false,
                });
            }
            for &succ in succs {
                if !set.contains(&succ) {
                    io.push(IOInfo {
                        token: Token::new(id, succ),
                        is_input: false,
                    });
                }
            }
        }
        io.sort_by_key(|info| info.token);
        io
    }

    /// All edges with both endpoints inside the set, sorted by token.
    pub fn internal_edges(&self, set: &BTreeSet<WorkerId>) -> Vec<Token> {
        let mut edges = Vec::new();
        for &id in set {
            for &succ in &self.successors[id.0] {
                if set.contains(&succ) {
                    edges.push(Token::new(id, succ));
                }
            }
        }
        edges.sort();
        edges
    }

    /// Pop rate of `downstream` on the channel named by `token`. The
    /// overall-input channel is the consumer's port 0.
    pub fn pop_rate_on(&self, token: Token) -> Rate {
        let downstream = token.downstream().expect("channel has a consumer");
        let port = token
            .upstream()
            .and_then(|up| self.input_port(downstream, up))
            .unwrap_or(0);
        self.workers[downstream.0].pop_rates[port]
    }

    /// Peek rate of `downstream` on the channel named by `token`.
    pub fn peek_rate_on(&self, token: Token) -> Rate {
        let downstream = token.downstream().expect("channel has a consumer");
        let port = token
            .upstream()
            .and_then(|up| self.input_port(downstream, up))
            .unwrap_or(0);
        self.workers[downstream.0].peek_rates[port]
    }

    /// Push rate of `upstream` on the channel named by `token`. The
    /// overall-output channel is the producer's port 0.
    pub fn push_rate_on(&self, token: Token) -> Rate {
        let upstream = token.upstream().expect("channel has a producer");
        let port = token
            .downstream()
            .and_then(|down| self.output_port(upstream, down))
            .unwrap_or(0);
        self.workers[upstream.0].push_rates[port]
    }

    /// Tear the arena apart, handing each worker to its blob.
    pub(crate) fn into_workers(self) -> Vec<WorkerNode<T>> {
        self.workers
    }
}
