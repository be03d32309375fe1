// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Oracle equivalence: for any graph the back-end can compile, the
//! compiled blob and the pull interpreter produce identical output for
//! the same input prefix.

use streamjit::core::config::Configuration;
use streamjit::core::runtime::StreamHost;
use streamjit::core::workers::{FilterRates, InputPort, OutputPort};
use streamjit::{
    compile, DuplicateSplitter, Filter, Identity, InterpreterBlob, RoundrobinJoiner,
    RoundrobinSplitter, StreamElement, WorkerGraph,
};

struct Doubler;

impl Filter<i32> for Doubler {
    fn rates(&self) -> FilterRates {
        FilterRates::new(1, 1)
    }
    fn work(&mut self, input: &mut dyn InputPort<i32>, output: &mut dyn OutputPort<i32>) {
        output.push(input.pop() * 2);
    }
}

struct MovingSum;

impl Filter<i32> for MovingSum {
    fn rates(&self) -> FilterRates {
        FilterRates::new(1, 1).with_peek(3)
    }
    fn work(&mut self, input: &mut dyn InputPort<i32>, output: &mut dyn OutputPort<i32>) {
        let sum = *input.peek(0) + *input.peek(1) + *input.peek(2);
        input.pop();
        output.push(sum);
    }
}

struct Decimator;

impl Filter<i32> for Decimator {
    fn rates(&self) -> FilterRates {
        FilterRates::new(3, 1)
    }
    fn work(&mut self, input: &mut dyn InputPort<i32>, output: &mut dyn OutputPort<i32>) {
        let kept = input.pop();
        input.pop();
        input.pop();
        output.push(kept);
    }
}

fn interpreter_output(graph: WorkerGraph<i32>, input: &[i32]) -> Vec<i32> {
    let oracle = InterpreterBlob::new(graph).unwrap();
    let in_channel = oracle.input_channels().into_values().next().unwrap();
    for &item in input {
        in_channel.push(item);
    }
    while oracle.interpret().unwrap() {}
    let out_channel = oracle.output_channels().into_values().next().unwrap();
    out_channel.drain_all()
}

fn compiled_output(graph: WorkerGraph<i32>, input: &[i32]) -> Vec<i32> {
    let config = Configuration::default_for(&graph);
    let stream = compile(graph, &config).unwrap();
    assert!(
        !stream.summaries()[0].interpreted,
        "oracle comparison needs the compiled back-end"
    );
    let channel = stream.input();
    for &item in input {
        channel.push(item);
    }
    let host = StreamHost::start(&stream);
    host.drain_and_join().unwrap();
    stream.output().drain_all()
}

fn assert_equivalent(build: impl Fn() -> StreamElement<i32>, input: &[i32]) {
    let expected = interpreter_output(WorkerGraph::connect(build()).unwrap(), input);
    let actual = compiled_output(WorkerGraph::connect(build()).unwrap(), input);
    assert_eq!(actual, expected);
}

#[test]
fn test_filter_chain_equivalence() {
    assert_equivalent(
        || {
            StreamElement::pipeline(vec![
                StreamElement::filter(Doubler),
                StreamElement::filter(Identity::new()),
                StreamElement::filter(Doubler),
            ])
        },
        &(0..17).collect::<Vec<_>>(),
    );
}

#[test]
fn test_peeking_filter_equivalence() {
    assert_equivalent(
        || {
            StreamElement::pipeline(vec![
                StreamElement::filter(Identity::new()),
                StreamElement::filter(MovingSum),
            ])
        },
        &(0..23).collect::<Vec<_>>(),
    );
}

#[test]
fn test_rate_changing_chain_equivalence() {
    assert_equivalent(
        || {
            StreamElement::pipeline(vec![
                StreamElement::filter(Doubler),
                StreamElement::filter(Decimator),
            ])
        },
        &(0..30).collect::<Vec<_>>(),
    );
}

#[test]
fn test_splitjoin_equivalence() {
    assert_equivalent(
        || {
            StreamElement::splitjoin(
                DuplicateSplitter::new(),
                RoundrobinJoiner::new(),
                vec![
                    StreamElement::filter(Doubler),
                    StreamElement::filter(Identity::new()),
                ],
            )
        },
        &(0..11).collect::<Vec<_>>(),
    );
}

#[test]
fn test_nested_splitjoin_equivalence() {
    assert_equivalent(
        || {
            StreamElement::pipeline(vec![
                StreamElement::filter(Identity::new()),
                StreamElement::splitjoin(
                    RoundrobinSplitter::new(),
                    RoundrobinJoiner::new(),
                    vec![
                        StreamElement::filter(Doubler),
                        StreamElement::splitjoin(
                            RoundrobinSplitter::new(),
                            RoundrobinJoiner::new(),
                            vec![
                                StreamElement::filter(Identity::new()),
                                StreamElement::filter(Doubler),
                            ],
                        ),
                    ],
                ),
            ])
        },
        &(0..24).collect::<Vec<_>>(),
    );
}
