// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The compiler back-end: partitions a validated graph into blobs and
//! compiles each into per-core step metadata. Blobs using constructs the
//! compiled back-end rejects (dynamic rates, messaging, multiple boundary
//! workers) fall back to the interpreter.

mod buffers;
mod cores;
mod plan;

pub use buffers::BufferData;
pub(crate) use plan::{BlobPlan, EdgeKind, EdgePlan};

use crate::core::config::Configuration;
use crate::core::error::{Result, StreamJitError};
use crate::core::graph::{Channel, Token, WorkerGraph, WorkerId, WorkerNode};
use crate::core::interp::pull::PullTopology;
use crate::core::interp::InterpreterBlob;
use crate::core::partition::{machine_worker_map, BlobGraph};
use crate::core::runtime::{Blob, CompiledBlob};
use crate::core::schedule::{schedule, SchedulerChannel};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counter giving each compiled stream a unique namespace for logs.
static BLOB_NUMBER: AtomicU64 = AtomicU64::new(0);

/// Public per-blob compile results, for diagnostics and tests.
#[derive(Debug, Clone)]
pub struct BlobSummary {
    pub machine: i64,
    pub workers: BTreeSet<WorkerId>,
    /// True when the blob fell back to the interpreter.
    pub interpreted: bool,
    pub buffers: BTreeMap<Token, BufferData>,
    /// Worker firings per basic steady state.
    pub internal_schedule: BTreeMap<WorkerId, u64>,
    pub init_schedule: BTreeMap<WorkerId, u64>,
    pub core_count: usize,
    /// Per core: (group id, multiples) shares.
    pub core_multiples: Vec<Vec<(usize, u64)>>,
}

/// A fully compiled stream: blobs in data-flow order, wired together by
/// shared boundary channels.
pub struct CompiledStream<T> {
    blobs: Vec<Arc<dyn Blob<T>>>,
    summaries: Vec<BlobSummary>,
    blob_graph: BlobGraph,
    external_schedule: BTreeMap<usize, u64>,
    input: Channel<T>,
    output: Channel<T>,
}

impl<T> CompiledStream<T> {
    /// Blobs in blob-graph topological order.
    pub fn blobs(&self) -> &[Arc<dyn Blob<T>>] {
        &self.blobs
    }

    /// Summaries parallel to [`blobs`](Self::blobs).
    pub fn summaries(&self) -> &[BlobSummary] {
        &self.summaries
    }

    pub fn blob_graph(&self) -> &BlobGraph {
        &self.blob_graph
    }

    /// Per-blob multiplicities of the inter-blob schedule, keyed by the
    /// blob-graph index.
    pub fn external_schedule(&self) -> &BTreeMap<usize, u64> {
        &self.external_schedule
    }

    /// The overall stream input channel.
    pub fn input(&self) -> Channel<T> {
        self.input.clone()
    }

    /// The overall stream output channel.
    pub fn output(&self) -> Channel<T> {
        self.output.clone()
    }
}

/// Compile a validated worker graph under a configuration.
pub fn compile<T: Clone + Send + 'static>(
    graph: WorkerGraph<T>,
    config: &Configuration,
) -> Result<CompiledStream<T>> {
    let stream_id = BLOB_NUMBER.fetch_add(1, Ordering::SeqCst);
    graph.validate()?;
    let machine_map = machine_worker_map(config, &graph)?;
    let blob_graph = BlobGraph::new(&graph, &machine_map)?;

    // Messaging across a blob boundary is never supported.
    for constraint in graph.constraints() {
        if blob_graph.blob_of(constraint.sender) != blob_graph.blob_of(constraint.recipient) {
            return Err(StreamJitError::UnsupportedConstruct(format!(
                "message constraint {} -> {} crosses a blob boundary",
                constraint.sender, constraint.recipient
            )));
        }
    }

    // Plan each blob; unsupported constructs fall back to the interpreter.
    let blob_count = blob_graph.blob_count();
    let mut plans: Vec<Option<BlobPlan>> = Vec::with_capacity(blob_count);
    let mut topologies: Vec<PullTopology> = Vec::with_capacity(blob_count);
    for node in blob_graph.blobs() {
        topologies.push(PullTopology::capture(&graph, &node.workers)?);
        match BlobPlan::compute(&graph, &node.workers, node.machine, config) {
            Ok(plan) => plans.push(Some(plan)),
            Err(StreamJitError::UnsupportedConstruct(reason)) => {
                tracing::warn!(
                    "stream {}: blob falls back to the interpreter: {}",
                    stream_id,
                    reason
                );
                plans.push(None);
            }
            Err(error) => return Err(error),
        }
    }

    // Worker totals feed the external (inter-blob) schedule.
    let mut worker_totals: BTreeMap<WorkerId, u64> = BTreeMap::new();
    for (index, node) in blob_graph.blobs().iter().enumerate() {
        match &plans[index] {
            Some(plan) => worker_totals.extend(plan.worker_totals.clone()),
            None => match interpreted_blob_totals(&graph, &node.workers) {
                Ok(totals) => worker_totals.extend(totals),
                Err(error) => {
                    tracing::debug!(
                        "stream {}: no internal schedule for interpreted blob: {}",
                        stream_id,
                        error
                    );
                    worker_totals.extend(node.workers.iter().map(|&w| (w, 1)));
                }
            },
        }
    }
    let external_schedule = match blob_graph.external_schedule(&graph, &worker_totals) {
        Ok(schedule) => schedule,
        Err(error) => {
            tracing::debug!("stream {}: no external schedule: {}", stream_id, error);
            (0..blob_count).map(|index| (index, 1)).collect()
        }
    };
    tracing::info!(
        "stream {}: {} blob(s), external schedule {:?}",
        stream_id,
        blob_count,
        external_schedule
    );

    let source = graph.source();
    let sink = graph.sink();

    // Dismantle the graph and hand each worker to its blob.
    let mut slots: Vec<Option<WorkerNode<T>>> =
        graph.into_workers().into_iter().map(Some).collect();
    let mut built: Vec<Option<Arc<dyn Blob<T>>>> = (0..blob_count).map(|_| None).collect();
    let mut summaries_by_index: Vec<Option<BlobSummary>> = (0..blob_count).map(|_| None).collect();
    let mut topologies: Vec<Option<PullTopology>> = topologies.into_iter().map(Some).collect();
    for (index, node) in blob_graph.blobs().iter().enumerate() {
        let taken: Vec<WorkerNode<T>> = node
            .workers
            .iter()
            .map(|&id| slots[id.0].take().expect("every worker is in exactly one blob"))
            .collect();
        let topology = topologies[index].take().expect("one topology per blob");
        match plans[index].take() {
            Some(plan) => {
                let summary = BlobSummary {
                    machine: plan.machine,
                    workers: node.workers.clone(),
                    interpreted: false,
                    buffers: plan.buffers.clone(),
                    internal_schedule: plan.worker_totals.clone(),
                    init_schedule: plan.init_schedule.clone(),
                    core_count: plan.core_count(),
                    core_multiples: plan
                        .core_runs
                        .iter()
                        .map(|runs| {
                            runs.iter()
                                .map(|run| (run.group, run.multiples.end - run.multiples.start))
                                .collect()
                        })
                        .collect(),
                };
                let blob = CompiledBlob::new(plan, topology, taken)?;
                summaries_by_index[index] = Some(summary);
                built[index] = Some(Arc::new(blob));
            }
            None => {
                let workers_map: BTreeMap<WorkerId, WorkerNode<T>> =
                    taken.into_iter().map(|w| (w.id, w)).collect();
                summaries_by_index[index] = Some(BlobSummary {
                    machine: node.machine,
                    workers: node.workers.clone(),
                    interpreted: true,
                    buffers: BTreeMap::new(),
                    internal_schedule: BTreeMap::new(),
                    init_schedule: BTreeMap::new(),
                    core_count: 1,
                    core_multiples: Vec::new(),
                });
                built[index] = Some(Arc::new(InterpreterBlob::from_parts(topology, workers_map)));
            }
        }
    }

    // Wire the boundary channels: one shared channel per token.
    let input = Channel::new();
    let output = Channel::new();
    let mut shared: BTreeMap<Token, Channel<T>> = BTreeMap::new();
    shared.insert(Token::overall_input(source), input.clone());
    shared.insert(Token::overall_output(sink), output.clone());
    for blob in built.iter().flatten() {
        for token in blob.input_channels().keys() {
            let channel = shared.entry(*token).or_insert_with(Channel::new).clone();
            blob.wire_input(*token, channel)?;
        }
        for token in blob.output_channels().keys() {
            let channel = shared.entry(*token).or_insert_with(Channel::new).clone();
            blob.wire_output(*token, channel)?;
        }
    }

    // Order blobs and summaries by data flow.
    let mut blobs = Vec::with_capacity(blob_count);
    let mut summaries = Vec::with_capacity(blob_count);
    let order = blob_graph.topological_order().to_vec();
    for &index in &order {
        blobs.push(built[index].take().expect("blob built"));
        summaries.push(summaries_by_index[index].take().expect("summary built"));
    }

    Ok(CompiledStream {
        blobs,
        summaries,
        blob_graph,
        external_schedule,
        input,
        output,
    })
}

/// Internal schedule for a blob run under the interpreter, when its rates
/// permit one.
fn interpreted_blob_totals<T>(
    graph: &WorkerGraph<T>,
    members: &BTreeSet<WorkerId>,
) -> Result<BTreeMap<WorkerId, u64>> {
    let mut channels = Vec::new();
    for token in graph.internal_edges(members) {
        let upstream = token.upstream().expect("internal edge");
        let downstream = token.downstream().expect("internal edge");
        let push = graph.push_rate_on(token).fixed().ok_or_else(|| {
            StreamJitError::UnsupportedConstruct(format!("dynamic push on {}", token))
        })?;
        let pop = graph.pop_rate_on(token).fixed().ok_or_else(|| {
            StreamJitError::UnsupportedConstruct(format!("dynamic pop on {}", token))
        })?;
        channels.push(SchedulerChannel::new(upstream, downstream, push, pop));
    }
    let nodes: Vec<WorkerId> = members.iter().copied().collect();
    schedule(&nodes, &channels)
}
