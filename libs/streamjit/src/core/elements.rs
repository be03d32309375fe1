// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The user-facing composite stream tree.
//!
//! A stream graph is described as a tree of elements: primitive workers at
//! the leaves, pipelines and splitjoins as composites. The tree is
//! validated and then lowered into a connected [`WorkerGraph`]
//! (`core::graph::connect`).
//!
//! [`WorkerGraph`]: crate::core::graph::WorkerGraph

use crate::core::error::{Result, StreamJitError};
use crate::core::workers::{Filter, Joiner, Splitter};

/// One node of the composite tree.
pub enum StreamElement<T> {
    Filter(Box<dyn Filter<T>>),
    Splitter(Box<dyn Splitter<T>>),
    Joiner(Box<dyn Joiner<T>>),
    Pipeline(Vec<StreamElement<T>>),
    Splitjoin {
        splitter: Box<dyn Splitter<T>>,
        joiner: Box<dyn Joiner<T>>,
        branches: Vec<StreamElement<T>>,
    },
}

impl<T> StreamElement<T> {
    pub fn filter(filter: impl Filter<T>) -> Self {
        StreamElement::Filter(Box::new(filter))
    }

    pub fn pipeline(children: Vec<StreamElement<T>>) -> Self {
        StreamElement::Pipeline(children)
    }

    pub fn splitjoin(
        splitter: impl Splitter<T>,
        joiner: impl Joiner<T>,
        branches: Vec<StreamElement<T>>,
    ) -> Self {
        StreamElement::Splitjoin {
            splitter: Box::new(splitter),
            joiner: Box::new(joiner),
            branches,
        }
    }

    /// Walk the tree in stream order, invoking the visitor callbacks.
    ///
    /// Bare splitters and joiners are only legal inside a splitjoin; the
    /// walk rejects them wherever else they appear.
    pub fn accept(&self, visitor: &mut dyn StreamVisitor<T>) -> Result<()> {
        match self {
            StreamElement::Filter(filter) => visitor.visit_filter(filter.as_ref()),
            StreamElement::Splitter(_) => Err(StreamJitError::invalid_graph(
                "splitter used outside a splitjoin",
            )),
            StreamElement::Joiner(_) => Err(StreamJitError::invalid_graph(
                "joiner used outside a splitjoin",
            )),
            StreamElement::Pipeline(children) => {
                visitor.enter_pipeline(children.len())?;
                for child in children {
                    child.accept(visitor)?;
                }
                visitor.exit_pipeline()
            }
            StreamElement::Splitjoin {
                splitter,
                joiner,
                branches,
            } => {
                visitor.enter_splitjoin(branches.len())?;
                visitor.visit_splitter(splitter.as_ref(), branches.len())?;
                for (index, branch) in branches.iter().enumerate() {
                    visitor.enter_splitjoin_branch(index)?;
                    branch.accept(visitor)?;
                    visitor.exit_splitjoin_branch(index)?;
                }
                visitor.visit_joiner(joiner.as_ref(), branches.len())?;
                visitor.exit_splitjoin()
            }
        }
    }
}

impl<T> std::fmt::Debug for StreamElement<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamElement::Filter(_) => write!(f, "Filter"),
            StreamElement::Splitter(_) => write!(f, "Splitter"),
            StreamElement::Joiner(_) => write!(f, "Joiner"),
            StreamElement::Pipeline(children) => {
                f.debug_tuple("Pipeline").field(&children.len()).finish()
            }
            StreamElement::Splitjoin { branches, .. } => {
                f.debug_tuple("Splitjoin").field(&branches.len()).finish()
            }
        }
    }
}

/// Callbacks for a stream-order walk of the composite tree.
///
/// All methods default to doing nothing, so a visitor implements only the
/// callbacks it cares about.
#[allow(unused_variables)]
pub trait StreamVisitor<T> {
    fn visit_filter(&mut self, filter: &dyn Filter<T>) -> Result<()> {
        Ok(())
    }
    fn enter_pipeline(&mut self, children: usize) -> Result<()> {
        Ok(())
    }
    fn exit_pipeline(&mut self) -> Result<()> {
        Ok(())
    }
    fn enter_splitjoin(&mut self, branches: usize) -> Result<()> {
        Ok(())
    }
    fn visit_splitter(&mut self, splitter: &dyn Splitter<T>, branches: usize) -> Result<()> {
        Ok(())
    }
    fn enter_splitjoin_branch(&mut self, index: usize) -> Result<()> {
        Ok(())
    }
    fn exit_splitjoin_branch(&mut self, index: usize) -> Result<()> {
        Ok(())
    }
    fn visit_joiner(&mut self, joiner: &dyn Joiner<T>, branches: usize) -> Result<()> {
        Ok(())
    }
    fn exit_splitjoin(&mut self) -> Result<()> {
        Ok(())
    }
}
