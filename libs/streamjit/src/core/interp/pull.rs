// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The pull schedule: fire sinks, recursively firing producers just
//! enough to satisfy them. Used by the interpreter blob for all execution
//! and by the compiled blob to flush residual data while draining.

use crate::core::error::{Result, StreamJitError};
use crate::core::graph::{Channel, Token, WorkerGraph, WorkerId, WorkerNode};
use crate::core::messages::MessageConstraint;
use crate::core::workers::{InputPorts, OutputPorts};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Immutable shape of a worker set as the pull executor sees it.
pub(crate) struct PullTopology {
    pub members: BTreeSet<WorkerId>,
    /// Full (graph-wide) predecessor lists; order is port order.
    pub predecessors: BTreeMap<WorkerId, Vec<WorkerId>>,
    pub successors: BTreeMap<WorkerId, Vec<WorkerId>>,
    /// Workers with a successor outside the set, or none at all.
    pub sinks: Vec<WorkerId>,
    pub constraints_for_recipient: BTreeMap<WorkerId, Vec<MessageConstraint>>,
}

impl PullTopology {
    /// Capture the topology of `members`, keeping only constraints fully
    /// inside the set; a constraint crossing the boundary is rejected.
    pub fn capture<T>(graph: &WorkerGraph<T>, members: &BTreeSet<WorkerId>) -> Result<Self> {
        let mut constraints_for_recipient: BTreeMap<WorkerId, Vec<MessageConstraint>> =
            BTreeMap::new();
        for constraint in graph.constraints() {
            let sender_inside = members.contains(&constraint.sender);
            let recipient_inside = members.contains(&constraint.recipient);
            if sender_inside != recipient_inside {
                return Err(StreamJitError::UnsupportedConstruct(format!(
                    "message constraint {} -> {} crosses the blob boundary",
                    constraint.sender, constraint.recipient
                )));
            }
            if recipient_inside {
                constraints_for_recipient
                    .entry(constraint.recipient)
                    .or_default()
                    .push(*constraint);
            }
        }

        let mut predecessors = BTreeMap::new();
        let mut successors = BTreeMap::new();
        let mut sinks = Vec::new();
        for &id in members {
            predecessors.insert(id, graph.predecessors(id).to_vec());
            let succs = graph.successors(id).to_vec();
            if succs.is_empty() || succs.iter().any(|s| !members.contains(s)) {
                sinks.push(id);
            }
            successors.insert(id, succs);
        }

        Ok(Self {
            members: members.clone(),
            predecessors,
            successors,
            sinks,
            constraints_for_recipient,
        })
    }

    /// Input edge tokens of a member, in port order.
    pub fn input_tokens(&self, worker: WorkerId) -> Vec<Token> {
        let preds = &self.predecessors[&worker];
        if preds.is_empty() {
            vec![Token::overall_input(worker)]
        } else {
            preds.iter().map(|&p| Token::new(p, worker)).collect()
        }
    }

    /// Output edge tokens of a member, in port order.
    pub fn output_tokens(&self, worker: WorkerId) -> Vec<Token> {
        let succs = &self.successors[&worker];
        if succs.is_empty() {
            vec![Token::overall_output(worker)]
        } else {
            succs.iter().map(|&s| Token::new(worker, s)).collect()
        }
    }

    /// Whether data on this token originates outside the set.
    fn is_boundary_input(&self, token: Token) -> bool {
        match token.upstream() {
            None => true,
            Some(up) => !self.members.contains(&up),
        }
    }
}

/// Items a worker needs on one input port before it can fire.
pub(crate) fn required_items<T>(node: &WorkerNode<T>, port: usize) -> Result<u64> {
    let peek = node.peek_rates[port];
    let pop = node.pop_rates[port];
    match (peek.fixed(), pop.fixed()) {
        (Some(peek), Some(pop)) => Ok(peek.max(pop)),
        _ => Err(StreamJitError::UnsupportedConstruct(format!(
            "dynamic input rate on worker {} is not supported by the interpreter",
            node.id
        ))),
    }
}

struct QueueInputs<'a, T> {
    queues: &'a mut [VecDeque<T>],
}

impl<T> InputPorts<T> for QueueInputs<'_, T> {
    fn inputs(&self) -> usize {
        self.queues.len()
    }
    fn pop(&mut self, port: usize) -> T {
        self.queues[port]
            .pop_front()
            .expect("firing was checked for input availability")
    }
    fn peek(&self, port: usize, index: usize) -> &T {
        &self.queues[port][index]
    }
}

struct QueueOutputs<'a, T> {
    queues: &'a mut [VecDeque<T>],
}

impl<T> OutputPorts<T> for QueueOutputs<'_, T> {
    fn outputs(&self) -> usize {
        self.queues.len()
    }
    fn push(&mut self, port: usize, item: T) {
        self.queues[port].push_back(item);
    }
}

/// Fire one worker against staging queues, flushing boundary outputs to
/// their shared channels. Increments the worker's firing counter.
pub(crate) fn fire_worker<T: 'static>(
    node: &mut WorkerNode<T>,
    input_tokens: &[Token],
    output_tokens: &[Token],
    channels: &mut BTreeMap<Token, VecDeque<T>>,
    outputs: &BTreeMap<Token, Channel<T>>,
) {
    let mut in_queues: Vec<VecDeque<T>> = input_tokens
        .iter()
        .map(|t| channels.remove(t).unwrap_or_default())
        .collect();
    let mut out_queues: Vec<VecDeque<T>> = output_tokens
        .iter()
        .map(|t| channels.remove(t).unwrap_or_default())
        .collect();

    {
        let mut inputs = QueueInputs {
            queues: &mut in_queues,
        };
        let mut outs = QueueOutputs {
            queues: &mut out_queues,
        };
        node.imp.fire(&mut inputs, &mut outs);
    }
    node.executions += 1;

    for (token, queue) in input_tokens.iter().zip(in_queues) {
        channels.insert(*token, queue);
    }
    for (token, mut queue) in output_tokens.iter().zip(out_queues) {
        if let Some(shared) = outputs.get(token) {
            shared.extend(queue.drain(..));
        }
        channels.insert(*token, queue);
    }
}

/// Interpret the worker set: run the pull schedule on every sink until no
/// sink can fire. Returns true iff any progress was made.
pub(crate) fn interpret<T: Clone + 'static>(
    topology: &PullTopology,
    workers: &mut BTreeMap<WorkerId, WorkerNode<T>>,
    channels: &mut BTreeMap<Token, VecDeque<T>>,
    inputs: &BTreeMap<Token, Channel<T>>,
    outputs: &BTreeMap<Token, Channel<T>>,
) -> Result<bool> {
    let mut ever_fired = false;
    loop {
        let mut fired = false;
        for &sink in &topology.sinks {
            let sink_fired = pull(topology, workers, channels, inputs, outputs, sink)?;
            fired |= sink_fired;
            ever_fired |= sink_fired;
        }
        if !fired {
            return Ok(ever_fired);
        }
    }
}

/// Fire upstream workers just enough to let `worker` fire, or return
/// false if that is impossible within the set.
fn pull<T: Clone + 'static>(
    topology: &PullTopology,
    workers: &mut BTreeMap<WorkerId, WorkerNode<T>>,
    channels: &mut BTreeMap<Token, VecDeque<T>>,
    inputs: &BTreeMap<Token, Channel<T>>,
    outputs: &BTreeMap<Token, Channel<T>>,
    worker: WorkerId,
) -> Result<bool> {
    // Unsatisfied workers encountered while trying to fire the argument.
    let mut stack: Vec<WorkerId> = vec![worker];
    'recurse: while let Some(&current) = stack.last() {
        // If current is already being fired deeper in the stack, it
        // depends on itself.
        if stack[..stack.len() - 1].contains(&current) {
            return Err(StreamJitError::IllegalStreamGraph(format!(
                "unsatisfiable message constraints at worker {}",
                current
            )));
        }

        // Satisfy data dependencies first.
        if let Some(port) = unsatisfied_channel(topology, workers, channels, inputs, current)? {
            let preds = &topology.predecessors[&current];
            if preds.is_empty() {
                // Waiting on overall input.
                return Ok(false);
            }
            let producer = preds[port];
            if !topology.members.contains(&producer) {
                // We need data from outside this worker set.
                return Ok(false);
            }
            stack.push(producer);
            continue 'recurse;
        }

        // Then message dependencies: fire any sender whose next delivery
        // time has not passed the sender's own firing count.
        if let Some(constraints) = topology.constraints_for_recipient.get(&current) {
            for constraint in constraints {
                let sender_executions = workers[&constraint.sender].executions;
                if constraint.delivery_time(sender_executions) <= sender_executions + 1 {
                    stack.push(constraint.sender);
                    continue 'recurse;
                }
            }
        }

        let input_tokens = topology.input_tokens(current);
        let output_tokens = topology.output_tokens(current);
        let node = workers.get_mut(&current).expect("member worker");
        fire_worker(node, &input_tokens, &output_tokens, channels, outputs);
        stack.pop();
    }
    Ok(true)
}

/// The first input port with fewer items than the worker requires, after
/// topping boundary staging up from the shared input channels.
fn unsatisfied_channel<T>(
    topology: &PullTopology,
    workers: &BTreeMap<WorkerId, WorkerNode<T>>,
    channels: &mut BTreeMap<Token, VecDeque<T>>,
    inputs: &BTreeMap<Token, Channel<T>>,
    worker: WorkerId,
) -> Result<Option<usize>> {
    let node = &workers[&worker];
    for (port, token) in topology.input_tokens(worker).into_iter().enumerate() {
        let required = required_items(node, port)? as usize;
        if topology.is_boundary_input(token) {
            if let Some(shared) = inputs.get(&token) {
                let staging = channels.entry(token).or_default();
                while staging.len() < required {
                    match shared.pop() {
                        Some(item) => staging.push_back(item),
                        None => break,
                    }
                }
            }
        }
        let available = channels.get(&token).map_or(0, VecDeque::len);
        if available < required {
            return Ok(Some(port));
        }
    }
    Ok(None)
}
