// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Turns a worker→machine configuration into per-machine lists of
//! connected worker sets, one blob each.

use crate::core::config::{Configuration, PARTITION};
use crate::core::error::{Result, StreamJitError};
use crate::core::graph::{WorkerGraph, WorkerId};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Build the machine → blobs map from the configuration.
///
/// An explicit `PARTITION` parameter wins; otherwise each worker's
/// `worker<id>tomachine` assignment is read and every machine's worker set
/// is split into connected components, one blob per component.
pub fn machine_worker_map<T>(
    config: &Configuration,
    graph: &WorkerGraph<T>,
) -> Result<BTreeMap<i64, Vec<BTreeSet<WorkerId>>>> {
    if let Some(partition) = config.partition_parameter(PARTITION) {
        let mut map: BTreeMap<i64, Vec<BTreeSet<WorkerId>>> = BTreeMap::new();
        for blob in &partition.blobs {
            map.entry(blob.machine).or_default().push(blob.workers.clone());
        }
        verify_coverage(graph, &map)?;
        return Ok(map);
    }

    let mut by_machine: BTreeMap<i64, BTreeSet<WorkerId>> = BTreeMap::new();
    for id in graph.worker_ids() {
        let machine = config.worker_machine(id).ok_or_else(|| {
            StreamJitError::Configuration(format!(
                "no machine assignment for worker {} (parameter worker{}tomachine)",
                id, id
            ))
        })?;
        by_machine.entry(machine).or_default().insert(id);
    }

    let mut map = BTreeMap::new();
    for (machine, workers) in by_machine {
        let blobs = connected_blobs(graph, workers);
        tracing::debug!("machine {}: {} blob(s)", machine, blobs.len());
        map.insert(machine, blobs);
    }
    Ok(map)
}

/// Every worker must appear in exactly one blob.
fn verify_coverage<T>(
    graph: &WorkerGraph<T>,
    map: &BTreeMap<i64, Vec<BTreeSet<WorkerId>>>,
) -> Result<()> {
    let mut seen = BTreeSet::new();
    for blobs in map.values() {
        for blob in blobs {
            for &worker in blob {
                if !seen.insert(worker) {
                    return Err(StreamJitError::Configuration(format!(
                        "worker {} appears in more than one blob of the explicit partition",
                        worker
                    )));
                }
            }
        }
    }
    for id in graph.worker_ids() {
        if !seen.contains(&id) {
            return Err(StreamJitError::Configuration(format!(
                "worker {} is missing from the explicit partition",
                id
            )));
        }
    }
    Ok(())
}

/// Split a machine's worker set into connected components by BFS over
/// intra-machine successor and predecessor edges.
fn connected_blobs<T>(
    graph: &WorkerGraph<T>,
    mut workers: BTreeSet<WorkerId>,
) -> Vec<BTreeSet<WorkerId>> {
    let mut blobs = Vec::new();
    while let Some(&seed) = workers.iter().next() {
        workers.remove(&seed);
        let mut blob = BTreeSet::from([seed]);
        let mut queue = VecDeque::from([seed]);
        while let Some(current) = queue.pop_front() {
            for &next in graph
                .successors(current)
                .iter()
                .chain(graph.predecessors(current).iter())
            {
                if workers.remove(&next) {
                    blob.insert(next);
                    queue.push_back(next);
                }
            }
        }
        blobs.push(blob);
    }
    blobs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::worker_to_machine_name;
    use crate::core::elements::StreamElement;
    use crate::core::workers::Identity;

    fn pipeline(length: usize) -> WorkerGraph<i32> {
        let children = (0..length)
            .map(|_| StreamElement::filter(Identity::new()))
            .collect();
        WorkerGraph::connect(StreamElement::pipeline(children)).unwrap()
    }

    fn assign(assignments: &[(usize, i64)]) -> Configuration {
        let mut builder = Configuration::builder();
        for &(worker, machine) in assignments {
            builder = builder
                .add_int(worker_to_machine_name(WorkerId(worker)), 0, 8, machine)
                .unwrap();
        }
        builder.build()
    }

    #[test]
    fn test_single_machine_single_blob() {
        let graph = pipeline(3);
        let config = assign(&[(0, 0), (1, 0), (2, 0)]);
        let map = machine_worker_map(&config, &graph).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map[&0].len(), 1);
        assert_eq!(map[&0][0].len(), 3);
    }

    #[test]
    fn test_contiguous_split_one_blob_per_machine() {
        let graph = pipeline(4);
        let config = assign(&[(0, 0), (1, 0), (2, 1), (3, 1)]);
        let map = machine_worker_map(&config, &graph).unwrap();
        assert_eq!(map[&0].len(), 1);
        assert_eq!(map[&1].len(), 1);
    }

    #[test]
    fn test_disconnected_assignment_splits_into_blobs() {
        // Workers 0 and 2 share a machine but are not adjacent, so they
        // become two separate blobs.
        let graph = pipeline(3);
        let config = assign(&[(0, 0), (1, 1), (2, 0)]);
        let map = machine_worker_map(&config, &graph).unwrap();
        assert_eq!(map[&0].len(), 2);
        assert_eq!(map[&1].len(), 1);
    }

    #[test]
    fn test_missing_assignment_rejected() {
        let graph = pipeline(2);
        let config = assign(&[(0, 0)]);
        let err = machine_worker_map(&config, &graph).unwrap_err();
        assert!(matches!(err, StreamJitError::Configuration(_)));
    }
}
