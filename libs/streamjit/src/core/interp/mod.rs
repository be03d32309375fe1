// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The interpreter blob: a single-threaded pull executor over a worker
//! set. Serves as the oracle for the compiled back-end, and as the
//! fallback when a blob uses constructs the compiler rejects.

pub(crate) mod pull;

use crate::core::error::{Result, StreamJitError};
use crate::core::graph::{Channel, Token, WorkerGraph, WorkerId, WorkerNode};
use crate::core::runtime::{Blob, BlobState, CoreCode, CoreRunner, DrainCallback, DrainControl};
use parking_lot::Mutex;
use pull::PullTopology;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

struct InterpreterState<T> {
    workers: BTreeMap<WorkerId, WorkerNode<T>>,
    channels: BTreeMap<Token, VecDeque<T>>,
}

struct InterpreterInner<T> {
    topology: PullTopology,
    state: Mutex<InterpreterState<T>>,
    inputs: Mutex<BTreeMap<Token, Channel<T>>>,
    outputs: Mutex<BTreeMap<Token, Channel<T>>>,
    control: DrainControl,
}

/// A reference pull-driven executor for a worker set.
pub struct InterpreterBlob<T> {
    inner: Arc<InterpreterInner<T>>,
}

impl<T: Clone + Send + 'static> InterpreterBlob<T> {
    /// Interpret an entire connected graph as one blob.
    pub fn new(graph: WorkerGraph<T>) -> Result<Self> {
        let members: BTreeSet<WorkerId> = graph.worker_ids().collect();
        let topology = PullTopology::capture(&graph, &members)?;
        let workers = graph
            .into_workers()
            .into_iter()
            .map(|node| (node.id, node))
            .collect();
        Ok(Self::from_parts(topology, workers))
    }

    pub(crate) fn from_parts(
        topology: PullTopology,
        workers: BTreeMap<WorkerId, WorkerNode<T>>,
    ) -> Self {
        let mut inputs = BTreeMap::new();
        let mut outputs = BTreeMap::new();
        for &id in &topology.members {
            for token in topology.input_tokens(id) {
                let outside = token
                    .upstream()
                    .map_or(true, |up| !topology.members.contains(&up));
                if outside {
                    inputs.insert(token, Channel::new());
                }
            }
            for token in topology.output_tokens(id) {
                let outside = token
                    .downstream()
                    .map_or(true, |down| !topology.members.contains(&down));
                if outside {
                    outputs.insert(token, Channel::new());
                }
            }
        }
        Self {
            inner: Arc::new(InterpreterInner {
                topology,
                state: Mutex::new(InterpreterState {
                    workers,
                    channels: BTreeMap::new(),
                }),
                inputs: Mutex::new(inputs),
                outputs: Mutex::new(outputs),
                control: DrainControl::new(),
            }),
        }
    }

    /// Run the pull schedule until no sink can fire. Returns true iff any
    /// worker fired. Exposed for single-threaded use as a test oracle.
    pub fn interpret(&self) -> Result<bool> {
        self.inner.interpret()
    }

    /// Completed firings of a worker.
    pub fn executions(&self, worker: WorkerId) -> Option<u64> {
        self.inner
            .state
            .lock()
            .workers
            .get(&worker)
            .map(|node| node.executions)
    }
}

impl<T: Clone + Send + 'static> InterpreterInner<T> {
    fn interpret(&self) -> Result<bool> {
        let inputs = self.inputs.lock().clone();
        let outputs = self.outputs.lock().clone();
        let mut state = self.state.lock();
        let InterpreterState { workers, channels } = &mut *state;
        pull::interpret(&self.topology, workers, channels, &inputs, &outputs)
    }
}

impl<T: Clone + Send + 'static> CoreRunner for InterpreterInner<T> {
    fn run_core(&self, core: usize) {
        assert_eq!(core, 0, "interpreter blobs are single-core");
        self.control.mark_running();
        tracing::debug!("[interp] core 0 started");
        while !self.control.stop_requested() {
            match self.interpret() {
                Ok(true) => {}
                Ok(false) => std::thread::sleep(Duration::from_micros(100)),
                Err(error) => {
                    // A worker failure terminates the blob; the drain
                    // callback is never invoked.
                    tracing::error!("[interp] worker failure: {}", error);
                    panic!("interpreter blob failed: {}", error);
                }
            }
        }
        // Terminal drain: flush everything still in flight downstream.
        loop {
            match self.interpret() {
                Ok(true) => {}
                Ok(false) => break,
                Err(error) => {
                    tracing::error!("[interp] failure while draining: {}", error);
                    panic!("interpreter blob failed while draining: {}", error);
                }
            }
        }
        self.control.finish_drain();
        tracing::debug!("[interp] core 0 drained");
    }
}

impl<T: Clone + Send + 'static> Blob<T> for InterpreterBlob<T> {
    fn workers(&self) -> BTreeSet<WorkerId> {
        self.inner.topology.members.clone()
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
        1
    }

    fn core_code(&self, core: usize) -> CoreCode {
        assert!(core < 1, "interpreter blobs are single-core");
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::elements::StreamElement;
    use crate::core::messages::MessageConstraint;
    use crate::core::workers::{
        DuplicateSplitter, FilterRates, Identity, InputPort, OutputPort, RoundrobinJoiner,
    };

    fn drive(blob: &InterpreterBlob<i32>, input: &[i32]) -> Vec<i32> {
        let in_channel = blob.input_channels().into_values().next().unwrap();
        for &item in input {
            in_channel.push(item);
        }
        while blob.interpret().unwrap() {}
        let out_channel = blob.output_channels().into_values().next().unwrap();
        out_channel.drain_all()
    }

    #[test]
    fn test_identity_pipeline() {
        let graph = WorkerGraph::connect(StreamElement::pipeline(vec![
            StreamElement::filter(Identity::new()),
            StreamElement::filter(Identity::new()),
        ]))
        .unwrap();
        let blob = InterpreterBlob::new(graph).unwrap();
        assert_eq!(drive(&blob, &[1, 2, 3]), vec![1, 2, 3]);
        assert_eq!(blob.executions(WorkerId(0)), Some(3));
    }

    #[test]
    fn test_duplicate_roundrobin_splitjoin() {
        let graph = WorkerGraph::connect(StreamElement::splitjoin(
            DuplicateSplitter::new(),
            RoundrobinJoiner::new(),
            vec![
                StreamElement::filter(Identity::new()),
                StreamElement::filter(Identity::new()),
            ],
        ))
        .unwrap();
        let blob = InterpreterBlob::new(graph).unwrap();
        assert_eq!(drive(&blob, &[10, 20]), vec![10, 10, 20, 20]);
    }

    struct Compressor;

    impl crate::core::workers::Filter<i32> for Compressor {
        fn rates(&self) -> FilterRates {
            FilterRates::new(2, 1)
        }
        fn work(&mut self, input: &mut dyn InputPort<i32>, output: &mut dyn OutputPort<i32>) {
            let kept = input.pop();
            input.pop();
            output.push(kept);
        }
    }

    struct Expander;

    impl crate::core::workers::Filter<i32> for Expander {
        fn rates(&self) -> FilterRates {
            FilterRates::new(1, 2)
        }
        fn work(&mut self, input: &mut dyn InputPort<i32>, output: &mut dyn OutputPort<i32>) {
            output.push(input.pop());
            output.push(0);
        }
    }

    #[test]
    fn test_compressor_then_expander() {
        let graph = WorkerGraph::connect(StreamElement::pipeline(vec![
            StreamElement::filter(Compressor),
            StreamElement::filter(Expander),
        ]))
        .unwrap();
        let blob = InterpreterBlob::new(graph).unwrap();
        assert_eq!(drive(&blob, &[1, 2, 3, 4]), vec![1, 0, 3, 0]);
    }

    #[test]
    fn test_partial_input_makes_no_progress() {
        let graph = WorkerGraph::connect(StreamElement::pipeline(vec![
            StreamElement::filter(Compressor),
            StreamElement::filter(Identity::new()),
        ]))
        .unwrap();
        let blob = InterpreterBlob::new(graph).unwrap();
        // One item cannot satisfy a pop-2 worker.
        assert_eq!(drive(&blob, &[7]), Vec::<i32>::new());
    }

    struct FanOut3;

    impl crate::core::workers::Filter<i32> for FanOut3 {
        fn rates(&self) -> FilterRates {
            FilterRates::new(1, 3)
        }
        fn work(&mut self, input: &mut dyn InputPort<i32>, output: &mut dyn OutputPort<i32>) {
            let item = input.pop();
            for offset in 0..3 {
                output.push(item * 10 + offset);
            }
        }
    }

    #[test]
    fn test_loose_constraint_lets_recipient_run_ahead() {
        // The recipient fires three times per sender firing, so their
        // counts diverge. Delivery is checked against the sender's own
        // firing count; a latency-2 constraint never forces the sender,
        // and the recipient drains everything the sender produced.
        let graph = {
            let mut graph = WorkerGraph::connect(StreamElement::pipeline(vec![
                StreamElement::filter(FanOut3),
                StreamElement::filter(Identity::new()),
            ]))
            .unwrap();
            graph
                .add_constraint(MessageConstraint::new(WorkerId(0), WorkerId(1), 2))
                .unwrap();
            graph
        };
        let blob = InterpreterBlob::new(graph).unwrap();
        assert_eq!(drive(&blob, &[1]), vec![10, 11, 12]);
        assert_eq!(blob.executions(WorkerId(0)), Some(1));
        assert_eq!(blob.executions(WorkerId(1)), Some(3));
    }

    #[test]
    fn test_tight_constraint_keeps_sender_ahead() {
        // With latency 1 the next delivery always lands within one sender
        // firing, so the pull schedule keeps firing the sender first; the
        // recipient holds off until the sender can no longer fire.
        let graph = {
            let mut graph = WorkerGraph::connect(StreamElement::pipeline(vec![
                StreamElement::filter(Identity::new()),
                StreamElement::filter(Identity::new()),
            ]))
            .unwrap();
            graph
                .add_constraint(MessageConstraint::new(WorkerId(0), WorkerId(1), 1))
                .unwrap();
            graph
        };
        let blob = InterpreterBlob::new(graph).unwrap();
        assert_eq!(drive(&blob, &[5, 6]), Vec::<i32>::new());
        assert_eq!(blob.executions(WorkerId(0)), Some(2));
        assert_eq!(blob.executions(WorkerId(1)), Some(0));
    }
}
