// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Worker factory registry.
//!
//! Serialized graphs reference workers by registry key rather than by
//! type, so rebuilding a graph needs only the key plus the worker's
//! tunable parameters. Factories are registered at library init; duplicate
//! names are rejected.

use crate::core::error::{Result, StreamJitError};
use crate::core::workers::{Filter, Joiner, Splitter};
use std::collections::HashMap;

type FilterFactory<T> = Box<dyn Fn(&serde_json::Value) -> Result<Box<dyn Filter<T>>> + Send + Sync>;
type SplitterFactory<T> =
    Box<dyn Fn(&serde_json::Value) -> Result<Box<dyn Splitter<T>>> + Send + Sync>;
type JoinerFactory<T> = Box<dyn Fn(&serde_json::Value) -> Result<Box<dyn Joiner<T>>> + Send + Sync>;

pub struct WorkerRegistry<T> {
    filters: HashMap<String, FilterFactory<T>>,
    splitters: HashMap<String, SplitterFactory<T>>,
    joiners: HashMap<String, JoinerFactory<T>>,
}

impl<T> Default for WorkerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkerRegistry<T> {
    pub fn new() -> Self {
        Self {
            filters: HashMap::new(),
            splitters: HashMap::new(),
            joiners: HashMap::new(),
        }
    }

    pub fn register_filter(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&serde_json::Value) -> Result<Box<dyn Filter<T>>> + Send + Sync + 'static,
    ) -> Result<()> {
        let name = name.into();
        if self.filters.contains_key(&name) {
            return Err(StreamJitError::Configuration(format!(
                "worker '{}' is already registered",
                name
            )));
        }
        self.filters.insert(name, Box::new(factory));
        Ok(())
    }

    pub fn register_splitter(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&serde_json::Value) -> Result<Box<dyn Splitter<T>>> + Send + Sync + 'static,
    ) -> Result<()> {
        let name = name.into();
        if self.splitters.contains_key(&name) {
            return Err(StreamJitError::Configuration(format!(
                "worker '{}' is already registered",
                name
            )));
        }
        self.splitters.insert(name, Box::new(factory));
        Ok(())
    }

    pub fn register_joiner(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&serde_json::Value) -> Result<Box<dyn Joiner<T>>> + Send + Sync + 'static,
    ) -> Result<()> {
        let name = name.into();
        if self.joiners.contains_key(&name) {
            return Err(StreamJitError::Configuration(format!(
                "worker '{}' is already registered",
                name
            )));
        }
        self.joiners.insert(name, Box::new(factory));
        Ok(())
    }

    pub fn create_filter(&self, name: &str, params: &serde_json::Value) -> Result<Box<dyn Filter<T>>> {
        let factory = self.filters.get(name).ok_or_else(|| {
            StreamJitError::Configuration(format!("no filter registered under '{}'", name))
        })?;
        factory(params)
    }

    pub fn create_splitter(
        &self,
        name: &str,
        params: &serde_json::Value,
    ) -> Result<Box<dyn Splitter<T>>> {
        let factory = self.splitters.get(name).ok_or_else(|| {
            StreamJitError::Configuration(format!("no splitter registered under '{}'", name))
        })?;
        factory(params)
    }

    pub fn create_joiner(&self, name: &str, params: &serde_json::Value) -> Result<Box<dyn Joiner<T>>> {
        let factory = self.joiners.get(name).ok_or_else(|| {
            StreamJitError::Configuration(format!("no joiner registered under '{}'", name))
        })?;
        factory(params)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.filters.contains_key(name)
            || self.splitters.contains_key(name)
            || self.joiners.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .filters
            .keys()
            .chain(self.splitters.keys())
            .chain(self.joiners.keys())
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names
    }
}

impl<T: Clone + Send + 'static> WorkerRegistry<T> {
    /// A registry preloaded with the standard primitive workers.
    pub fn standard() -> Self {
        use crate::core::workers::{
            BlackHole, DuplicateSplitter, Identity, RoundrobinJoiner, RoundrobinSplitter,
        };
        let mut registry = Self::new();
        registry
            .register_filter("Identity", |_| Ok(Box::new(Identity::new())))
            .expect("fresh registry");
        registry
            .register_filter("BlackHole", |_| Ok(Box::new(BlackHole::new())))
            .expect("fresh registry");
        registry
            .register_splitter("DuplicateSplitter", |_| Ok(Box::new(DuplicateSplitter::new())))
            .expect("fresh registry");
        registry
            .register_splitter("RoundrobinSplitter", |_| {
                Ok(Box::new(RoundrobinSplitter::new()))
            })
            .expect("fresh registry");
        registry
            .register_joiner("RoundrobinJoiner", |_| Ok(Box::new(RoundrobinJoiner::new())))
            .expect("fresh registry");
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry_contains_primitives() {
        let registry = WorkerRegistry::<i32>::standard();
        assert!(registry.is_registered("Identity"));
        assert!(registry.is_registered("RoundrobinJoiner"));
        assert!(!registry.is_registered("FmRadio"));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = WorkerRegistry::<i32>::standard();
        let err = registry
            .register_filter("Identity", |_| {
                Ok(Box::new(crate::core::workers::Identity::new()))
            })
            .unwrap_err();
        assert!(matches!(err, StreamJitError::Configuration(_)));
    }

    #[test]
    fn test_create_by_name() {
        let registry = WorkerRegistry::<i32>::standard();
        let filter = registry
            .create_filter("Identity", &serde_json::Value::Null)
            .unwrap();
        assert_eq!(filter.rates().pop.fixed(), Some(1));
    }
}
