// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Configuration: an immutable name→parameter map.
//!
//! Recognized options:
//!
//! | name                  | kind      | effect                              |
//! |-----------------------|-----------|-------------------------------------|
//! | `worker<id>tomachine` | Int       | machine id for worker `<id>`        |
//! | `multiplier`          | Int (≥1)  | steady-state replication factor     |
//! | `noOfMachines`        | Int       | machine count hint                  |
//! | `maxNumCores`         | Int       | per-blob core cap                   |
//! | `PARTITION`           | Partition | explicit per-machine/blob split     |
//! | `blobConfigs`         | sub-config| back-end private parameters         |

use crate::core::error::{Result, StreamJitError};
use crate::core::graph::{WorkerGraph, WorkerId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const MULTIPLIER: &str = "multiplier";
pub const NO_OF_MACHINES: &str = "noOfMachines";
pub const MAX_NUM_CORES: &str = "maxNumCores";
pub const PARTITION: &str = "PARTITION";
pub const BLOB_CONFIGS: &str = "blobConfigs";

/// The parameter name assigning a worker to a machine.
pub fn worker_to_machine_name(worker: WorkerId) -> String {
    format!("worker{}tomachine", worker.0)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntParameter {
    pub name: String,
    pub min: i64,
    pub max: i64,
    pub value: i64,
}

impl IntParameter {
    pub fn new(name: impl Into<String>, min: i64, max: i64, value: i64) -> Self {
        Self {
            name: name.into(),
            min,
            max,
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchParameter {
    pub name: String,
    /// The universe of admissible values; `value` indexes into it.
    pub universe: Vec<String>,
    pub value: usize,
}

impl SwitchParameter {
    pub fn selected(&self) -> Option<&str> {
        self.universe.get(self.value).map(String::as_str)
    }
}

/// One blob slot of an explicit partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobSpec {
    pub machine: i64,
    pub cores: u32,
    pub workers: BTreeSet<WorkerId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionParameter {
    pub name: String,
    pub cores_per_machine: BTreeMap<i64, u32>,
    pub blobs: Vec<BlobSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Parameter {
    Int(IntParameter),
    Switch(SwitchParameter),
    Partition(PartitionParameter),
}

impl Parameter {
    pub fn name(&self) -> &str {
        match self {
            Parameter::Int(p) => &p.name,
            Parameter::Switch(p) => &p.name,
            Parameter::Partition(p) => &p.name,
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Parameter::Int(_) => "int",
            Parameter::Switch(_) => "switch",
            Parameter::Partition(_) => "partition",
        }
    }
}

/// An immutable configuration. Parameters are looked up by name and
/// expected kind; a missing parameter returns `None`, letting callers
/// default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    parameters: BTreeMap<String, Parameter>,
    subconfigurations: BTreeMap<String, Configuration>,
    extra_data: BTreeMap<String, String>,
}

impl Configuration {
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::default()
    }

    /// The default configuration for a connected graph: every worker on
    /// machine 0, multiplier 1.
    pub fn default_for<T>(graph: &WorkerGraph<T>) -> Configuration {
        let mut builder = Configuration::builder();
        for id in graph.worker_ids() {
            builder = builder
                .add_parameter(Parameter::Int(IntParameter::new(
                    worker_to_machine_name(id),
                    0,
                    0,
                    0,
                )))
                .expect("generated names are unique");
        }
        builder
            .add_parameter(Parameter::Int(IntParameter::new(MULTIPLIER, 1, 1 << 20, 1)))
            .expect("fresh name")
            .build()
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.get(name)
    }

    pub fn int_parameter(&self, name: &str) -> Option<&IntParameter> {
        match self.parameters.get(name) {
            Some(Parameter::Int(p)) => Some(p),
            _ => None,
        }
    }

    pub fn switch_parameter(&self, name: &str) -> Option<&SwitchParameter> {
        match self.parameters.get(name) {
            Some(Parameter::Switch(p)) => Some(p),
            _ => None,
        }
    }

    pub fn partition_parameter(&self, name: &str) -> Option<&PartitionParameter> {
        match self.parameters.get(name) {
            Some(Parameter::Partition(p)) => Some(p),
            _ => None,
        }
    }

    pub fn subconfiguration(&self, name: &str) -> Option<&Configuration> {
        self.subconfigurations.get(name)
    }

    pub fn extra_data(&self, key: &str) -> Option<&str> {
        self.extra_data.get(key).map(String::as_str)
    }

    pub fn parameter_names(&self) -> impl Iterator<Item = &str> {
        self.parameters.keys().map(String::as_str)
    }

    /// The machine assigned to a worker, if the configuration names one.
    pub fn worker_machine(&self, worker: WorkerId) -> Option<i64> {
        self.int_parameter(&worker_to_machine_name(worker))
            .map(|p| p.value)
    }

    /// The steady-state replication factor. Defaults to 1; values below 1
    /// are rejected.
    pub fn multiplier(&self) -> Result<u64> {
        match self.int_parameter(MULTIPLIER) {
            None => Ok(1),
            Some(p) if p.value >= 1 => Ok(p.value as u64),
            Some(p) => Err(StreamJitError::Configuration(format!(
                "multiplier must be at least 1, got {}",
                p.value
            ))),
        }
    }

    pub fn max_num_cores(&self) -> Option<i64> {
        self.int_parameter(MAX_NUM_CORES).map(|p| p.value)
    }

    /// The core budget for one blob: its explicit `PARTITION` slot wins,
    /// then its machine's core count, then the global `maxNumCores` hint.
    pub fn blob_core_cap(&self, machine: i64, workers: &BTreeSet<WorkerId>) -> Option<i64> {
        if let Some(partition) = self.partition_parameter(PARTITION) {
            if let Some(blob) = partition
                .blobs
                .iter()
                .find(|blob| blob.machine == machine && blob.workers == *workers)
            {
                return Some(blob.cores as i64);
            }
            if let Some(&cores) = partition.cores_per_machine.get(&machine) {
                return Some(cores as i64);
            }
        }
        self.max_num_cores()
    }

    /// Autotuner replacement: substitute a parameter's value, requiring
    /// the replacement to preserve both name and kind.
    pub fn replace_parameter(&self, replacement: Parameter) -> Result<Configuration> {
        let existing = self.parameters.get(replacement.name()).ok_or_else(|| {
            StreamJitError::Configuration(format!(
                "no parameter named '{}' to replace",
                replacement.name()
            ))
        })?;
        if existing.kind_name() != replacement.kind_name() {
            return Err(StreamJitError::Configuration(format!(
                "replacement for '{}' changes kind from {} to {}",
                replacement.name(),
                existing.kind_name(),
                replacement.kind_name()
            )));
        }
        let mut next = self.clone();
        next.parameters
            .insert(replacement.name().to_string(), replacement);
        Ok(next)
    }
}

/// Builds a configuration, rejecting duplicate parameter names.
#[derive(Debug, Default)]
pub struct ConfigurationBuilder {
    parameters: BTreeMap<String, Parameter>,
    subconfigurations: BTreeMap<String, Configuration>,
    extra_data: BTreeMap<String, String>,
}

impl ConfigurationBuilder {
    pub fn add_parameter(mut self, parameter: Parameter) -> Result<Self> {
        let name = parameter.name().to_string();
        if self.parameters.contains_key(&name) {
            return Err(StreamJitError::Configuration(format!(
                "parameter '{}' is already present",
                name
            )));
        }
        self.parameters.insert(name, parameter);
        Ok(self)
    }

    pub fn add_int(self, name: impl Into<String>, min: i64, max: i64, value: i64) -> Result<Self> {
        self.add_parameter(Parameter::Int(IntParameter::new(name, min, max, value)))
    }

    pub fn add_subconfiguration(mut self, name: impl Into<String>, config: Configuration) -> Self {
        self.subconfigurations.insert(name.into(), config);
        self
    }

    pub fn put_extra_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_data.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Configuration {
        Configuration {
            parameters: self.parameters,
            subconfigurations: self.subconfigurations,
            extra_data: self.extra_data,
        }
    }
}
