// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The DAG of blobs connected by boundary channels.
//!
//! Built from a machine→blobs map; construction fails with `CyclicBlobs`
//! (after dumping the offending assignment) when the partition induces a
//! cycle among blobs.

use crate::core::error::{Result, StreamJitError};
use crate::core::graph::{WorkerGraph, WorkerId};
use crate::core::schedule::{schedule, SchedulerChannel};
use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graph::DiGraph;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// One blob: a connected worker set assigned to a machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobNode {
    pub machine: i64,
    pub workers: BTreeSet<WorkerId>,
}

pub struct BlobGraph {
    blobs: Vec<BlobNode>,
    graph: DiGraph<usize, ()>,
    order: Vec<usize>,
    worker_to_blob: BTreeMap<WorkerId, usize>,
}

impl BlobGraph {
    pub fn new<T>(
        graph: &WorkerGraph<T>,
        machine_map: &BTreeMap<i64, Vec<BTreeSet<WorkerId>>>,
    ) -> Result<Self> {
        let mut blobs = Vec::new();
        let mut worker_to_blob = BTreeMap::new();
        for (&machine, machine_blobs) in machine_map {
            for workers in machine_blobs {
                let index = blobs.len();
                for &worker in workers {
                    worker_to_blob.insert(worker, index);
                }
                blobs.push(BlobNode {
                    machine,
                    workers: workers.clone(),
                });
            }
        }

        let mut digraph = DiGraph::new();
        let node_indices: Vec<_> = (0..blobs.len()).map(|i| digraph.add_node(i)).collect();
        let mut edges = HashSet::new();
        for (from_blob, blob) in blobs.iter().enumerate() {
            for &worker in &blob.workers {
                for &succ in graph.successors(worker) {
                    let to_blob = worker_to_blob[&succ];
                    if to_blob != from_blob && edges.insert((from_blob, to_blob)) {
                        digraph.add_edge(node_indices[from_blob], node_indices[to_blob], ());
                    }
                }
            }
        }

        if is_cyclic_directed(&digraph) {
            let assignment = dump_assignment(machine_map);
            tracing::error!(
                "cycles found in the worker->blob assignment\n{}",
                assignment
            );
            return Err(StreamJitError::CyclicBlobs { assignment });
        }

        let order = toposort(&digraph, None)
            .expect("acyclic after check")
            .into_iter()
            .map(|index| digraph[index])
            .collect();

        Ok(Self {
            blobs,
            graph: digraph,
            order,
            worker_to_blob,
        })
    }

    pub fn blobs(&self) -> &[BlobNode] {
        &self.blobs
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.len()
    }

    pub fn blob_of(&self, worker: WorkerId) -> Option<usize> {
        self.worker_to_blob.get(&worker).copied()
    }

    /// Blob indices in a data-flow order.
    pub fn topological_order(&self) -> &[usize] {
        &self.order
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// The external schedule: per-blob multiplicities solved over the
    /// inter-blob channels, with port rates aggregated by the endpoints'
    /// internal per-steady-state firing totals.
    pub fn external_schedule<T>(
        &self,
        graph: &WorkerGraph<T>,
        worker_totals: &BTreeMap<WorkerId, u64>,
    ) -> Result<BTreeMap<usize, u64>> {
        let mut channels = Vec::new();
        for (from_blob, blob) in self.blobs.iter().enumerate() {
            for &worker in &blob.workers {
                for &succ in graph.successors(worker) {
                    let to_blob = self.worker_to_blob[&succ];
                    if to_blob == from_blob {
                        continue;
                    }
                    let token = crate::core::graph::Token::new(worker, succ);
                    let push = graph.push_rate_on(token).fixed().ok_or_else(|| {
                        StreamJitError::UnsupportedConstruct(format!(
                            "dynamic push rate on inter-blob channel {}",
                            token
                        ))
                    })?;
                    let pop = graph.pop_rate_on(token).fixed().ok_or_else(|| {
                        StreamJitError::UnsupportedConstruct(format!(
                            "dynamic pop rate on inter-blob channel {}",
                            token
                        ))
                    })?;
                    channels.push(SchedulerChannel::new(
                        from_blob,
                        to_blob,
                        push * worker_totals[&worker],
                        pop * worker_totals[&succ],
                    ));
                }
            }
        }
        let nodes: Vec<usize> = (0..self.blobs.len()).collect();
        schedule(&nodes, &channels)
    }
}

/// Human-readable dump of a failed worker→blob assignment.
fn dump_assignment(machine_map: &BTreeMap<i64, Vec<BTreeSet<WorkerId>>>) -> String {
    let mut dump = String::new();
    for (machine, blobs) in machine_map {
        dump.push_str(&format!("Machine - {}\n", machine));
        for blob in blobs {
            let ids: Vec<String> = blob.iter().map(|w| w.to_string()).collect();
            dump.push_str(&format!("\tBlob worker set : {}\n", ids.join(" ")));
        }
    }
    dump
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::elements::StreamElement;
    use crate::core::workers::Identity;

    fn pipeline(length: usize) -> WorkerGraph<i32> {
        let children = (0..length)
            .map(|_| StreamElement::filter(Identity::new()))
            .collect();
        WorkerGraph::connect(StreamElement::pipeline(children)).unwrap()
    }

    fn machine_map(groups: &[(i64, &[usize])]) -> BTreeMap<i64, Vec<BTreeSet<WorkerId>>> {
        let mut map: BTreeMap<i64, Vec<BTreeSet<WorkerId>>> = BTreeMap::new();
        for &(machine, workers) in groups {
            map.entry(machine)
                .or_default()
                .push(workers.iter().map(|&w| WorkerId(w)).collect());
        }
        map
    }

    #[test]
    fn test_linear_partition_is_acyclic() {
        let graph = pipeline(4);
        let map = machine_map(&[(0, &[0, 1]), (1, &[2, 3])]);
        let blob_graph = BlobGraph::new(&graph, &map).unwrap();
        assert_eq!(blob_graph.blob_count(), 2);
        assert_eq!(blob_graph.edge_count(), 1);
        let order = blob_graph.topological_order();
        assert_eq!(order.len(), 2);
        let upstream = &blob_graph.blobs()[order[0]];
        assert!(upstream.workers.contains(&WorkerId(0)));
    }

    #[test]
    fn test_partition_induced_cycle_rejected() {
        // A→B→C with A and C fused into one blob: blob₁ ↔ blob₂.
        let graph = pipeline(3);
        let map = machine_map(&[(0, &[0, 2]), (1, &[1])]);
        let err = BlobGraph::new(&graph, &map).unwrap_err();
        match err {
            StreamJitError::CyclicBlobs { assignment } => {
                assert!(assignment.contains("Machine - 0"));
                assert!(assignment.contains("Blob worker set"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_external_schedule_unit_rates() {
        let graph = pipeline(2);
        let map = machine_map(&[(0, &[0]), (1, &[1])]);
        let blob_graph = BlobGraph::new(&graph, &map).unwrap();
        let totals: BTreeMap<WorkerId, u64> =
            [(WorkerId(0), 1), (WorkerId(1), 1)].into_iter().collect();
        let schedule = blob_graph.external_schedule(&graph, &totals).unwrap();
        assert_eq!(schedule[&0], 1);
        assert_eq!(schedule[&1], 1);
    }

    #[test]
    fn test_blob_of_lookup() {
        let graph = pipeline(2);
        let map = machine_map(&[(0, &[0]), (1, &[1])]);
        let blob_graph = BlobGraph::new(&graph, &map).unwrap();
        let blob0 = blob_graph.blob_of(WorkerId(0)).unwrap();
        assert!(blob_graph.blobs()[blob0].workers.contains(&WorkerId(0)));
    }
}
