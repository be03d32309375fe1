// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! End-to-end scenarios: compile a graph, run it on the thread host,
//! drain, and check the output stream.

use std::time::{Duration, Instant};
use streamjit::core::config::{worker_to_machine_name, Configuration};
use streamjit::core::runtime::StreamHost;
use streamjit::{
    compile, DuplicateSplitter, Filter, Identity, RoundrobinJoiner, StreamElement, StreamJitError,
    WorkerGraph,
};
use streamjit::core::workers::{FilterRates, InputPort, OutputPort};

struct Compressor;

impl Filter<i32> for Compressor {
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

impl Filter<i32> for Expander {
    fn rates(&self) -> FilterRates {
        FilterRates::new(1, 2)
    }
    fn work(&mut self, input: &mut dyn InputPort<i32>, output: &mut dyn OutputPort<i32>) {
        output.push(input.pop());
        output.push(0);
    }
}

/// Compile, feed `input`, run until drained, return the full output.
fn run_to_completion(graph: WorkerGraph<i32>, config: &Configuration, input: &[i32]) -> Vec<i32> {
    let stream = compile(graph, config).unwrap();
    let in_channel = stream.input();
    for &item in input {
        in_channel.push(item);
    }
    let host = StreamHost::start(&stream);
    host.drain_and_join().unwrap();
    stream.output().drain_all()
}

#[test]
fn test_identity_pipeline_preserves_stream() {
    let graph = WorkerGraph::connect(StreamElement::pipeline(vec![
        StreamElement::filter(Identity::new()),
        StreamElement::filter(Identity::new()),
    ]))
    .unwrap();
    let config = Configuration::default_for(&graph);
    assert_eq!(run_to_completion(graph, &config, &[1, 2, 3]), vec![1, 2, 3]);
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
    let config = Configuration::default_for(&graph);
    assert_eq!(
        run_to_completion(graph, &config, &[10, 20]),
        vec![10, 10, 20, 20]
    );
}

#[test]
fn test_compressor_then_expander() {
    let graph = WorkerGraph::connect(StreamElement::pipeline(vec![
        StreamElement::filter(Compressor),
        StreamElement::filter(Expander),
    ]))
    .unwrap();
    let config = Configuration::default_for(&graph);
    assert_eq!(
        run_to_completion(graph, &config, &[1, 2, 3, 4]),
        vec![1, 0, 3, 0]
    );
}

#[test]
fn test_multiplier_amortizes_synchronization() {
    let graph = WorkerGraph::connect(StreamElement::pipeline(vec![
        StreamElement::filter(Identity::new()),
        StreamElement::filter(Identity::new()),
    ]))
    .unwrap();
    let config = {
        let base = Configuration::default_for(&graph);
        base.replace_parameter(streamjit::core::config::Parameter::Int(
            streamjit::IntParameter::new("multiplier", 1, 1 << 20, 3),
        ))
        .unwrap()
    };
    let input: Vec<i32> = (0..12).collect();
    assert_eq!(run_to_completion(graph, &config, &input), input);
}

#[test]
fn test_two_machine_pipeline() {
    let graph = WorkerGraph::connect(StreamElement::pipeline(vec![
        StreamElement::filter(Identity::new()),
        StreamElement::filter(Identity::new()),
        StreamElement::filter(Identity::new()),
        StreamElement::filter(Identity::new()),
    ]))
    .unwrap();
    let mut builder = Configuration::builder();
    for (index, id) in graph.worker_ids().enumerate() {
        let machine = if index < 2 { 0 } else { 1 };
        builder = builder
            .add_int(worker_to_machine_name(id), 0, 1, machine)
            .unwrap();
    }
    let config = builder.build();
    let stream_input: Vec<i32> = (100..108).collect();

    let stream = compile(graph, &config).unwrap();
    assert_eq!(stream.blobs().len(), 2);
    let channel = stream.input();
    for &item in &stream_input {
        channel.push(item);
    }
    let host = StreamHost::start(&stream);
    host.drain_and_join().unwrap();
    assert_eq!(stream.output().drain_all(), stream_input);
}

#[test]
fn test_data_parallel_cores_preserve_order() {
    let graph = WorkerGraph::connect(StreamElement::pipeline(vec![
        StreamElement::filter(Identity::new()),
        StreamElement::filter(Identity::new()),
    ]))
    .unwrap();
    let mut builder = Configuration::builder();
    for id in graph.worker_ids() {
        builder = builder
            .add_int(worker_to_machine_name(id), 0, 0, 0)
            .unwrap();
    }
    let config = builder
        .add_int("multiplier", 1, 64, 4)
        .unwrap()
        .add_int("maxNumCores", 1, 8, 2)
        .unwrap()
        .build();
    let input: Vec<i32> = (0..20).collect();

    let stream = compile(graph, &config).unwrap();
    assert_eq!(stream.summaries()[0].core_count, 2);
    let channel = stream.input();
    for &item in &input {
        channel.push(item);
    }
    let host = StreamHost::start(&stream);
    host.drain_and_join().unwrap();
    assert_eq!(stream.output().drain_all(), input);
}

struct KeepEven;

impl Filter<i32> for KeepEven {
    fn rates(&self) -> FilterRates {
        FilterRates {
            pop: streamjit::Rate::Fixed(1),
            peek: streamjit::Rate::Fixed(1),
            push: streamjit::Rate::Dynamic,
        }
    }
    fn work(&mut self, input: &mut dyn InputPort<i32>, output: &mut dyn OutputPort<i32>) {
        let item = input.pop();
        if item % 2 == 0 {
            output.push(item);
        }
    }
}

#[test]
fn test_interpreter_fallback_runs_end_to_end() {
    let graph = WorkerGraph::connect(StreamElement::pipeline(vec![
        StreamElement::filter(Identity::new()),
        StreamElement::filter(KeepEven),
    ]))
    .unwrap();
    let config = Configuration::default_for(&graph);
    let stream = compile(graph, &config).unwrap();
    assert!(stream.summaries()[0].interpreted);
    let channel = stream.input();
    for item in 0..10 {
        channel.push(item);
    }
    let host = StreamHost::start(&stream);
    host.drain_and_join().unwrap();
    assert_eq!(stream.output().drain_all(), vec![0, 2, 4, 6, 8]);
}

#[test]
fn test_drain_invokes_callback_exactly_once() {
    let graph = WorkerGraph::connect(StreamElement::pipeline(vec![
        StreamElement::filter(Identity::new()),
        StreamElement::filter(Identity::new()),
    ]))
    .unwrap();
    let config = Configuration::default_for(&graph);
    let stream = compile(graph, &config).unwrap();
    let input = stream.input();
    for item in 0..64 {
        input.push(item);
    }

    let blob = stream.blobs()[0].clone();
    let mut threads = Vec::new();
    for core in 0..blob.core_count() {
        let code = blob.core_code(core);
        threads.push(std::thread::spawn(move || code.run()));
    }

    // Wait until at least one steady state has produced output.
    let output = stream.output();
    let deadline = Instant::now() + Duration::from_secs(10);
    while output.is_empty() {
        assert!(Instant::now() < deadline, "no output before drain");
        std::thread::sleep(Duration::from_millis(1));
    }

    let (sender, receiver) = crossbeam_channel::bounded(1);
    blob.drain(Box::new(move || {
        let _ = sender.send(());
    }))
    .unwrap();
    receiver
        .recv_timeout(Duration::from_secs(10))
        .expect("drain callback");
    assert!(blob.is_drained());

    // A second drain is misuse.
    let err = blob.drain(Box::new(|| {})).unwrap_err();
    assert!(matches!(err, StreamJitError::DrainMisuse(_)));

    for handle in threads {
        handle.join().unwrap();
    }
}
