// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The compiled blob: per-core step functions over pre-sized double
//! buffers.
//!
//! Execution is fully pipelined: within one steady state every worker
//! reads data produced in earlier steady states, so cores never contend.
//! All synchronization happens at the inter-steady-state barrier, where
//! the leader (core 0) flips buffers, copies carries, flushes the overall
//! output and refills the overall input.

use crate::core::compiler::{BlobPlan, BufferData, EdgeKind, EdgePlan};
use crate::core::error::{Result, StreamJitError};
use crate::core::graph::{Channel, Token, WorkerId, WorkerNode};
use crate::core::interp::pull::{self, PullTopology};
use crate::core::runtime::blob::{Blob, BlobState, CoreCode, CoreRunner, DrainCallback, DrainControl};
use crate::core::runtime::shared::{SharedSlots, WorkerCell};
use crate::core::workers::{InputPorts, OutputPorts};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_micros(100);

/// One edge's runtime storage.
struct EdgeState<T> {
    plan: EdgePlan,
    primary: SharedSlots<T>,
    /// Internal edges double-buffer; boundary edges have one side only.
    secondary: Option<SharedSlots<T>>,
    primary_is_reader: AtomicBool,
}

impl<T> EdgeState<T> {
    fn new(plan: EdgePlan) -> Self {
        debug_assert!(plan.carry >= plan.excess_peeks);
        debug_assert!(plan.excess_peeks == plan.peek.saturating_sub(plan.pop) || plan.peek == 0);
        tracing::trace!(
            "edge {}: len {}, steady {}, carry {}",
            plan.token,
            plan.buffer_len,
            plan.steady_items,
            plan.carry
        );
        let len = plan.buffer_len as usize;
        let secondary = matches!(plan.kind, EdgeKind::Internal).then(|| SharedSlots::new(len));
        Self {
            plan,
            primary: SharedSlots::new(len),
            secondary,
            primary_is_reader: AtomicBool::new(true),
        }
    }

    fn reader(&self) -> &SharedSlots<T> {
        match self.plan.kind {
            EdgeKind::Input => &self.primary,
            EdgeKind::Internal => {
                if self.primary_is_reader.load(Ordering::Acquire) {
                    &self.primary
                } else {
                    self.secondary.as_ref().expect("internal edges double-buffer")
                }
            }
            EdgeKind::Output => unreachable!("output edges have no reader"),
        }
    }

    fn writer(&self) -> &SharedSlots<T> {
        match self.plan.kind {
            EdgeKind::Output => &self.primary,
            EdgeKind::Internal => {
                if self.primary_is_reader.load(Ordering::Acquire) {
                    self.secondary.as_ref().expect("internal edges double-buffer")
                } else {
                    &self.primary
                }
            }
            EdgeKind::Input => unreachable!("input edges have no writer"),
        }
    }

    fn flip(&self) {
        let was = self.primary_is_reader.load(Ordering::Acquire);
        self.primary_is_reader.store(!was, Ordering::Release);
    }
}

/// Where the blob stands in the init/steady-state protocol. Owned by the
/// leader.
enum Phase {
    /// Init schedule not yet committed; data lives in `staging`.
    Fresh,
    /// Buffers loaded, ready to run a steady state.
    Loaded,
    /// A steady state just completed; flip pending.
    Ran,
}

struct LeaderState<T> {
    phase: Phase,
    /// Init staging queues, preserved for drain if init is interrupted.
    staging: BTreeMap<Token, VecDeque<T>>,
    /// Current fill of each overall/inter-blob input reader buffer.
    input_fill: BTreeMap<Token, u64>,
}

struct CompiledInner<T> {
    plan: BlobPlan,
    topology: PullTopology,
    workers: BTreeMap<WorkerId, WorkerCell<T>>,
    /// Per-core copies of fissed workers, keyed by (worker, core). The
    /// group's first core uses the primary instance.
    fission: BTreeMap<(WorkerId, usize), WorkerCell<T>>,
    edges: BTreeMap<Token, EdgeState<T>>,
    inputs: Mutex<BTreeMap<Token, Channel<T>>>,
    outputs: Mutex<BTreeMap<Token, Channel<T>>>,
    barrier: Barrier,
    control: DrainControl,
    leader: Mutex<LeaderState<T>>,
    halt: AtomicBool,
    failed: AtomicBool,
    error: Mutex<Option<String>>,
}

/// A blob compiled to per-core step functions.
pub struct CompiledBlob<T> {
    inner: Arc<CompiledInner<T>>,
}

impl<T: Clone + Send + 'static> CompiledBlob<T> {
    pub(crate) fn new(
        plan: BlobPlan,
        topology: PullTopology,
        nodes: Vec<WorkerNode<T>>,
    ) -> Result<Self> {
        let mut fission = BTreeMap::new();
        for group in &plan.groups {
            if group.cores.len() < 2 {
                continue;
            }
            for &id in &group.workers {
                let original = nodes
                    .iter()
                    .find(|node| node.id == id)
                    .expect("blob owns its workers");
                for &core in &group.cores[1..] {
                    let imp = original.imp.fission_copy().ok_or_else(|| {
                        StreamJitError::UnsupportedConstruct(format!(
                            "worker {} cannot be fissed across cores",
                            id
                        ))
                    })?;
                    fission.insert(
                        (id, core),
                        WorkerCell::new(WorkerNode {
                            id,
                            imp,
                            pop_rates: original.pop_rates.clone(),
                            peek_rates: original.peek_rates.clone(),
                            push_rates: original.push_rates.clone(),
                            executions: 0,
                        }),
                    );
                }
            }
        }

        let workers = nodes
            .into_iter()
            .map(|node| (node.id, WorkerCell::new(node)))
            .collect();

        let mut edges = BTreeMap::new();
        let mut inputs = BTreeMap::new();
        let mut outputs = BTreeMap::new();
        for (token, edge_plan) in &plan.edges {
            match edge_plan.kind {
                EdgeKind::Input => {
                    inputs.insert(*token, Channel::new());
                }
                EdgeKind::Output => {
                    outputs.insert(*token, Channel::new());
                }
                EdgeKind::Internal => {}
            }
            edges.insert(*token, EdgeState::new(edge_plan.clone()));
        }

        let core_count = plan.core_count();
        Ok(Self {
            inner: Arc::new(CompiledInner {
                plan,
                topology,
                workers,
                fission,
                edges,
                inputs: Mutex::new(inputs),
                outputs: Mutex::new(outputs),
                barrier: Barrier::new(core_count),
                control: DrainControl::new(),
                leader: Mutex::new(LeaderState {
                    phase: Phase::Fresh,
                    staging: BTreeMap::new(),
                    input_fill: BTreeMap::new(),
                }),
                halt: AtomicBool::new(false),
                failed: AtomicBool::new(false),
                error: Mutex::new(None),
            }),
        })
    }

    /// Buffer metadata per edge.
    pub fn buffers(&self) -> BTreeMap<Token, BufferData> {
        self.inner.plan.buffers.clone()
    }

    /// Worker firings per basic steady state.
    pub fn internal_schedule(&self) -> BTreeMap<WorkerId, u64> {
        self.inner.plan.worker_totals.clone()
    }

    pub fn init_schedule(&self) -> BTreeMap<WorkerId, u64> {
        self.inner.plan.init_schedule.clone()
    }

    /// Per core: (group id, multiples executed) pairs.
    pub fn core_multiples(&self) -> Vec<Vec<(usize, u64)>> {
        self.inner
            .plan
            .core_runs
            .iter()
            .map(|runs| {
                runs.iter()
                    .map(|run| (run.group, run.multiples.end - run.multiples.start))
                    .collect()
            })
            .collect()
    }

    pub fn multiplier(&self) -> u64 {
        self.inner.plan.multiplier
    }
}

impl<T: Clone + Send + 'static> CompiledInner<T> {
    fn leader_turn(&self) {
        if self.failed.load(Ordering::SeqCst) {
            tracing::error!("[blob] a core failed; halting without draining");
            self.halt.store(true, Ordering::SeqCst);
            return;
        }
        let mut leader = self.leader.lock();
        if matches!(leader.phase, Phase::Loaded) {
            // The steady state between the previous handoff and this one
            // has completed.
            leader.phase = Phase::Ran;
        }
        if self.control.stop_requested() {
            self.drain_now(&mut leader);
            self.halt.store(true, Ordering::SeqCst);
            return;
        }

        let prepared = match leader.phase {
            Phase::Fresh => self.run_init(&mut leader),
            Phase::Ran => self.flip(&mut leader).map(|()| true),
            Phase::Loaded => unreachable!("normalized above"),
        };
        let prepared = prepared.and_then(|ok| {
            if !ok {
                return Ok(false);
            }
            leader.phase = Phase::Loaded;
            self.fill_inputs(&mut leader)
        });
        match prepared {
            Ok(true) => {}
            Ok(false) => {
                // Stop requested while waiting for input.
                self.drain_now(&mut leader);
                self.halt.store(true, Ordering::SeqCst);
            }
            Err(error) => {
                tracing::error!("[blob] {}", error);
                *self.error.lock() = Some(error.to_string());
                self.halt.store(true, Ordering::SeqCst);
            }
        }
    }

    /// Execute the init schedule through staging queues, then commit the
    /// staged data into the reader buffers. Returns Ok(false) if a stop
    /// request arrived while waiting for overall input.
    fn run_init(&self, leader: &mut LeaderState<T>) -> Result<bool> {
        let inputs = self.inputs.lock().clone();
        let outputs = self.outputs.lock().clone();
        for index in 0..self.plan.worker_order.len() {
            let id = self.plan.worker_order[index];
            let firings = self.plan.init_schedule[&id];
            let worker_plan = &self.plan.workers[&id];
            for _ in 0..firings {
                loop {
                    if self.init_inputs_ready(id, leader, &inputs)? {
                        break;
                    }
                    if self.control.stop_requested() {
                        return Ok(false);
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                // SAFETY: leader-exclusive between barriers.
                let node = unsafe { self.workers[&id].borrow_mut() };
                pull::fire_worker(
                    node,
                    &worker_plan.input_edges,
                    &worker_plan.output_edges,
                    &mut leader.staging,
                    &outputs,
                );
            }
        }

        // Commit staging into the reader buffers.
        for (token, edge) in &self.edges {
            match edge.plan.kind {
                EdgeKind::Internal => {
                    let queue = leader.staging.remove(token).unwrap_or_default();
                    if queue.len() as u64 != edge.plan.buffer_len {
                        return Err(StreamJitError::Unschedulable(format!(
                            "init schedule left {} items on {}, expected {}",
                            queue.len(),
                            token,
                            edge.plan.buffer_len
                        )));
                    }
                    let reader = edge.reader();
                    for (index, item) in queue.into_iter().enumerate() {
                        reader.set(index, item);
                    }
                }
                EdgeKind::Input => {
                    let queue = leader.staging.remove(token).unwrap_or_default();
                    let reader = edge.reader();
                    let mut fill = 0u64;
                    for item in queue {
                        reader.set(fill as usize, item);
                        fill += 1;
                    }
                    leader.input_fill.insert(*token, fill);
                }
                EdgeKind::Output => {}
            }
        }
        tracing::debug!("[blob] init schedule committed");
        Ok(true)
    }

    /// Top up boundary staging for one init firing; true when every input
    /// port holds enough items.
    fn init_inputs_ready(
        &self,
        id: WorkerId,
        leader: &mut LeaderState<T>,
        inputs: &BTreeMap<Token, Channel<T>>,
    ) -> Result<bool> {
        // SAFETY: leader-exclusive between barriers.
        let node = unsafe { self.workers[&id].borrow_mut() };
        let worker_plan = &self.plan.workers[&id];
        for (port, token) in worker_plan.input_edges.iter().enumerate() {
            let required = pull::required_items(node, port)? as usize;
            let staging = leader.staging.entry(*token).or_default();
            if let Some(shared) = inputs.get(token) {
                while staging.len() < required {
                    match shared.pop() {
                        Some(item) => staging.push_back(item),
                        None => break,
                    }
                }
                if staging.len() < required {
                    return Ok(false);
                }
            } else if staging.len() < required {
                // Internal edges are satisfied by construction; anything
                // less is an init-schedule defect.
                return Err(StreamJitError::Unschedulable(format!(
                    "init underflow on {}: {} of {} items",
                    token,
                    staging.len(),
                    required
                )));
            }
        }
        Ok(true)
    }

    /// The steady-state handoff: copy carries behind the fresh data, swap
    /// reader and writer, flush the output buffers downstream.
    fn flip(&self, leader: &mut LeaderState<T>) -> Result<()> {
        let outputs = self.outputs.lock().clone();
        for (token, edge) in &self.edges {
            let steady = edge.plan.steady_items as usize;
            let carry = edge.plan.carry as usize;
            match edge.plan.kind {
                EdgeKind::Internal => {
                    let reader = edge.reader();
                    let writer = edge.writer();
                    let mut carried = Vec::with_capacity(carry);
                    for index in 0..carry {
                        carried.push(reader.take(steady + index).ok_or_else(|| {
                            StreamJitError::Unschedulable(format!(
                                "missing carry item {} on {}",
                                index, token
                            ))
                        })?);
                    }
                    for (index, item) in carried.into_iter().enumerate() {
                        writer.set(index, item);
                    }
                    // Release the consumed prefix of the old reader; the
                    // next steady state overwrites these slots anyway.
                    for index in 0..steady {
                        let _ = reader.take(index);
                    }
                    edge.flip();
                }
                EdgeKind::Output => {
                    let shared = outputs.get(token).cloned().ok_or_else(|| {
                        StreamJitError::invalid_graph(format!("output {} not wired", token))
                    })?;
                    let writer = edge.writer();
                    for index in 0..steady {
                        let item = writer.take(index).ok_or_else(|| {
                            StreamJitError::Unschedulable(format!(
                                "missing output item {} on {}",
                                index, token
                            ))
                        })?;
                        shared.push(item);
                    }
                }
                EdgeKind::Input => {
                    let reader = edge.reader();
                    let mut carried = Vec::with_capacity(carry);
                    for index in 0..carry {
                        carried.push(reader.take(steady + index).ok_or_else(|| {
                            StreamJitError::Unschedulable(format!(
                                "missing input carry item {} on {}",
                                index, token
                            ))
                        })?);
                    }
                    for (index, item) in carried.into_iter().enumerate() {
                        reader.set(index, item);
                    }
                    leader.input_fill.insert(*token, carry as u64);
                }
            }
        }
        Ok(())
    }

    /// Pull fresh overall input until every input buffer is full. Returns
    /// Ok(false) if a stop request arrived while waiting.
    fn fill_inputs(&self, leader: &mut LeaderState<T>) -> Result<bool> {
        let inputs = self.inputs.lock().clone();
        for (token, edge) in &self.edges {
            if !matches!(edge.plan.kind, EdgeKind::Input) {
                continue;
            }
            let shared = inputs.get(token).cloned().ok_or_else(|| {
                StreamJitError::invalid_graph(format!("input {} not wired", token))
            })?;
            let target = edge.plan.buffer_len;
            let reader = edge.reader();
            let mut fill = leader.input_fill.get(token).copied().unwrap_or(0);
            while fill < target {
                match shared.pop() {
                    Some(item) => {
                        reader.set(fill as usize, item);
                        fill += 1;
                        leader.input_fill.insert(*token, fill);
                    }
                    None => {
                        if self.control.stop_requested() {
                            return Ok(false);
                        }
                        std::thread::sleep(POLL_INTERVAL);
                    }
                }
            }
        }
        Ok(true)
    }

    /// Terminal drain: flush pending output, reconstruct the logical
    /// channel contents from the buffers, run the pull schedule to
    /// exhaustion and invoke the callback.
    fn drain_now(&self, leader: &mut LeaderState<T>) {
        tracing::info!("[blob] draining");
        let inputs = self.inputs.lock().clone();
        let outputs = self.outputs.lock().clone();

        let mut channels: BTreeMap<Token, VecDeque<T>> = std::mem::take(&mut leader.staging);
        match leader.phase {
            Phase::Fresh => {}
            Phase::Loaded => {
                for (token, edge) in &self.edges {
                    let queue: &mut VecDeque<T> = channels.entry(*token).or_default();
                    match edge.plan.kind {
                        EdgeKind::Internal => {
                            let reader = edge.reader();
                            for index in 0..edge.plan.buffer_len as usize {
                                queue.extend(reader.take(index));
                            }
                        }
                        EdgeKind::Input => {
                            let fill = leader.input_fill.get(token).copied().unwrap_or(0);
                            let reader = edge.reader();
                            for index in 0..fill as usize {
                                queue.extend(reader.take(index));
                            }
                        }
                        EdgeKind::Output => {}
                    }
                }
            }
            Phase::Ran => {
                for (token, edge) in &self.edges {
                    let steady = edge.plan.steady_items as usize;
                    let carry = edge.plan.carry as usize;
                    let queue: &mut VecDeque<T> = channels.entry(*token).or_default();
                    match edge.plan.kind {
                        EdgeKind::Internal => {
                            let reader = edge.reader();
                            for index in 0..carry {
                                queue.extend(reader.take(steady + index));
                            }
                            let writer = edge.writer();
                            for index in 0..steady {
                                queue.extend(writer.take(carry + index));
                            }
                        }
                        EdgeKind::Input => {
                            let reader = edge.reader();
                            for index in 0..carry {
                                queue.extend(reader.take(steady + index));
                            }
                        }
                        EdgeKind::Output => {
                            // The just-finished steady state's production
                            // precedes anything the drain produces.
                            if let Some(shared) = outputs.get(token) {
                                let writer = edge.writer();
                                for index in 0..steady {
                                    if let Some(item) = writer.take(index) {
                                        shared.push(item);
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        let mut workers: BTreeMap<WorkerId, WorkerNode<T>> = self
            .workers
            .iter()
            .map(|(&id, cell)| (id, cell.take().expect("drain runs once")))
            .collect();

        match pull::interpret(&self.topology, &mut workers, &mut channels, &inputs, &outputs) {
            Ok(_) => {
                self.control.finish_drain();
                tracing::info!("[blob] drained");
            }
            Err(error) => {
                // Failure while draining: surface it, never invoke the
                // callback.
                tracing::error!("[blob] failure while draining: {}", error);
                *self.error.lock() = Some(error.to_string());
            }
        }
    }

    fn run_steady_state(&self, core: usize) {
        for run in &self.plan.core_runs[core] {
            let group = &self.plan.groups[run.group];
            let home_core = group.cores[0];
            for multiple in run.multiples.clone() {
                for &id in &group.workers {
                    let execs = group.execs[&id];
                    for firing in 0..execs {
                        self.fire(id, core, home_core, multiple, execs, firing);
                    }
                }
            }
        }
    }

    fn fire(
        &self,
        id: WorkerId,
        core: usize,
        home_core: usize,
        multiple: u64,
        execs: u64,
        firing: u64,
    ) {
        let worker_plan = &self.plan.workers[&id];
        let firing_index = multiple * execs + firing;

        let mut input_views = Vec::with_capacity(worker_plan.input_edges.len());
        for token in &worker_plan.input_edges {
            let edge = &self.edges[token];
            input_views.push(SlotReader {
                slots: edge.reader(),
                base: (firing_index * edge.plan.pop) as usize,
                cursor: 0,
            });
        }
        let mut output_views = Vec::with_capacity(worker_plan.output_edges.len());
        for token in &worker_plan.output_edges {
            let edge = &self.edges[token];
            output_views.push(SlotWriter {
                slots: edge.writer(),
                base: (edge.plan.carry + firing_index * edge.plan.push) as usize,
                cursor: 0,
            });
        }

        let cell = if core == home_core {
            &self.workers[&id]
        } else {
            &self.fission[&(id, core)]
        };
        // SAFETY: this core owns this worker instance for the duration of
        // the steady state.
        let node = unsafe { cell.borrow_mut() };
        let mut inputs = CompiledInputs { views: input_views };
        let mut outputs = CompiledOutputs {
            views: output_views,
        };
        node.imp.fire(&mut inputs, &mut outputs);
        node.executions += 1;
    }
}

struct SlotReader<'a, T> {
    slots: &'a SharedSlots<T>,
    base: usize,
    cursor: usize,
}

struct CompiledInputs<'a, T> {
    views: Vec<SlotReader<'a, T>>,
}

impl<T: Clone> InputPorts<T> for CompiledInputs<'_, T> {
    fn inputs(&self) -> usize {
        self.views.len()
    }

    fn pop(&mut self, port: usize) -> T {
        let view = &mut self.views[port];
        let item = view
            .slots
            .get(view.base + view.cursor)
            .expect("steady-state underflow")
            .clone();
        view.cursor += 1;
        item
    }

    fn peek(&self, port: usize, index: usize) -> &T {
        let view = &self.views[port];
        view.slots
            .get(view.base + view.cursor + index)
            .expect("peek past buffered lookahead")
    }
}

struct SlotWriter<'a, T> {
    slots: &'a SharedSlots<T>,
    base: usize,
    cursor: usize,
}

struct CompiledOutputs<'a, T> {
    views: Vec<SlotWriter<'a, T>>,
}

impl<T> OutputPorts<T> for CompiledOutputs<'_, T> {
    fn outputs(&self) -> usize {
        self.views.len()
    }

    fn push(&mut self, port: usize, item: T) {
        let view = &mut self.views[port];
        view.slots.set(view.base + view.cursor, item);
        view.cursor += 1;
    }
}

impl<T: Clone + Send + 'static> CoreRunner for CompiledInner<T> {
    fn run_core(&self, core: usize) {
        self.control.mark_running();
        tracing::debug!("[blob] core {} started", core);
        let mut caught = None;
        loop {
            self.barrier.wait();
            if core == 0 {
                self.leader_turn();
            }
            self.barrier.wait();
            if self.halt.load(Ordering::SeqCst) {
                break;
            }
            if caught.is_none() {
                // State touched by a failing steady state is discarded:
                // the leader halts the blob without draining it.
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| self.run_steady_state(core)))
                {
                    self.failed.store(true, Ordering::SeqCst);
                    caught = Some(payload);
                }
            }
        }
        tracing::debug!("[blob] core {} stopped", core);
        if let Some(payload) = caught {
            resume_unwind(payload);
        }
        if core == 0 {
            if let Some(error) = self.error.lock().take() {
                panic!("compiled blob failed: {}", error);
            }
        }
    }
}

impl<T: Clone + Send + 'static> Blob<T> for CompiledBlob<T> {
    fn workers(&self) -> BTreeSet<WorkerId> {
        self.inner.plan.members.clone()
    }

    fn input_channels(&self) -> BTreeMap<Token, Channel<T>> {
        self.inner.inputs.lock().clone()
    }

    fn output_channels(&self) -> BTreeMap<Token, Channel<T>> {
        self.inner.outputs.lock().clone()
    }

    fn wire_input(&self, token: Token, channel: Channel<T>) -> Result<()> {
        let mut inputs = self.inner.inputs.lock();
        if !inputs.contains_key(&token) {
            return Err(StreamJitError::invalid_graph(format!(
                "blob has no input edge {}",
                token
            )));
        }
        inputs.insert(token, channel);
        Ok(())
    }

    fn wire_output(&self, token: Token, channel: Channel<T>) -> Result<()> {
        let mut outputs = self.inner.outputs.lock();
        if !outputs.contains_key(&token) {
            return Err(StreamJitError::invalid_graph(format!(
                "blob has no output edge {}",
                token
            )));
        }
        outputs.insert(token, channel);
        Ok(())
    }

    fn core_count(&self) -> usize {
        self.inner.plan.core_count()
    }

    fn core_code(&self, core: usize) -> CoreCode {
        assert!(
            core < self.core_count(),
            "core {} out of range for a {}-core blob",
            core,
            self.core_count()
        );
        CoreCode::new(self.inner.clone(), core)
    }

    fn drain(&self, callback: DrainCallback) -> Result<()> {
        self.inner.control.request_drain(callback)
    }

    fn is_drained(&self) -> bool {
        self.inner.control.is_drained()
    }

    fn state(&self) -> BlobState {
        self.inner.control.state()
    }
}
