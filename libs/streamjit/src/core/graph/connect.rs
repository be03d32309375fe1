// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The connect pass: lowers a validated composite tree into a connected
//! worker graph, assigning ids and wiring predecessor/successor lists in
//! port order.

use crate::core::elements::StreamElement;
use crate::core::error::{Result, StreamJitError};
use crate::core::rates::Rate;
use crate::core::workers::{JoinerRates, SplitterRates};

use super::token::WorkerId;
use super::validation;
use super::worker_graph::{WorkerGraph, WorkerImpl, WorkerNode};

impl<T: 'static> WorkerGraph<T> {
    /// Validate the composite tree and lower it into a connected graph.
    pub fn connect(element: StreamElement<T>) -> Result<Self> {
        validation::check(&element)?;
        let mut builder = ConnectBuilder::new();
        let (_first, _last) = builder.lower(element)?;
        tracing::debug!("connected {} workers", builder.workers.len());
        WorkerGraph::from_parts(builder.workers, builder.predecessors, builder.successors)
    }
}

struct ConnectBuilder<T> {
    workers: Vec<WorkerNode<T>>,
    predecessors: Vec<Vec<WorkerId>>,
    successors: Vec<Vec<WorkerId>>,
}

impl<T: 'static> ConnectBuilder<T> {
    fn new() -> Self {
        Self {
            workers: Vec::new(),
            predecessors: Vec::new(),
            successors: Vec::new(),
        }
    }

    fn add_worker(
        &mut self,
        imp: WorkerImpl<T>,
        pop_rates: Vec<Rate>,
        peek_rates: Vec<Rate>,
        push_rates: Vec<Rate>,
    ) -> WorkerId {
        let id = WorkerId(self.workers.len());
        self.workers.push(WorkerNode {
            id,
            imp,
            pop_rates,
            peek_rates,
            push_rates,
            executions: 0,
        });
        self.predecessors.push(Vec::new());
        self.successors.push(Vec::new());
        id
    }

    fn add_edge(&mut self, upstream: WorkerId, downstream: WorkerId) {
        self.successors[upstream.0].push(downstream);
        self.predecessors[downstream.0].push(upstream);
    }

    /// Lower one element, returning its entry and exit workers.
    fn lower(&mut self, element: StreamElement<T>) -> Result<(WorkerId, WorkerId)> {
        match element {
            StreamElement::Filter(filter) => {
                let rates = filter.rates();
                let id = self.add_worker(
                    WorkerImpl::Filter(filter),
                    vec![rates.pop],
                    vec![rates.peek],
                    vec![rates.push],
                );
                Ok((id, id))
            }
            StreamElement::Pipeline(children) => {
                let mut first = None;
                let mut last: Option<WorkerId> = None;
                for child in children {
                    let (entry, exit) = self.lower(child)?;
                    if let Some(previous) = last {
                        self.add_edge(previous, entry);
                    }
                    first.get_or_insert(entry);
                    last = Some(exit);
                }
                match (first, last) {
                    (Some(first), Some(last)) => Ok((first, last)),
                    // check() already rejected empty pipelines.
                    _ => Err(StreamJitError::invalid_graph("empty pipeline")),
                }
            }
            StreamElement::Splitjoin {
                splitter,
                joiner,
                branches,
            } => {
                let branch_count = branches.len();
                let SplitterRates { pop, peek, pushes } = splitter.rates(branch_count);
                let splitter_id = self.add_worker(
                    WorkerImpl::Splitter(splitter),
                    vec![pop],
                    vec![peek],
                    pushes,
                );
                let JoinerRates { pops, peeks, push } = joiner.rates(branch_count);
                let joiner_id =
                    self.add_worker(WorkerImpl::Joiner(joiner), pops, peeks, vec![push]);
                for branch in branches {
                    let (entry, exit) = self.lower(branch)?;
                    self.add_edge(splitter_id, entry);
                    self.add_edge(exit, joiner_id);
                }
                Ok((splitter_id, joiner_id))
            }
            StreamElement::Splitter(_) | StreamElement::Joiner(_) => Err(
                StreamJitError::invalid_graph("splitter or joiner used outside a splitjoin"),
            ),
        }
    }
}
