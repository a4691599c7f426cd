// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Gathering results of terminal and iterated nodes after a run.
//!
//! [`gather`] reads one output slot from a set of nodes in a finished
//! [`RunRecord`] and combines them according to an [`AggregationPolicy`]:
//!
//! * `Labeled` keeps every branch separately, keyed by its iteration label,
//!   with either its value or the reason it has none
//! * `Concatenate` joins list (or text) outputs along the first axis in key order
//! * `Reduce` folds outputs with an associative [`Combiner`] in key order
//!
//! Branches that failed, were blocked or never ran never abort a gather. They
//! are reported next to the combined value. Only structural problems (unknown
//! node, unknown slot, incompatible shapes, a failing combiner) are errors.

mod artifacts;
mod concatenate;
mod reduce;


use std::fmt;

use thiserror::Error;

use crate::engine::{NodeState, RunRecord};
use crate::errors::{ActionError, AggregationError};
use crate::graph::{IterationKey, NodeId, Value};

pub use artifacts::collect_artifacts;
pub use reduce::Combiner;

#[derive(Clone)]
pub enum AggregationPolicy {
    Labeled,
    Concatenate,
    Reduce(Combiner),
}

impl fmt::Debug for AggregationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationPolicy::Labeled => f.write_str("Labeled"),
            AggregationPolicy::Concatenate => f.write_str("Concatenate"),
            AggregationPolicy::Reduce(combiner) => write!(f, "Reduce({})", combiner.name()),
        }
    }
}

/// Why a branch has no value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BranchError {
    #[error("failed: {0}")]
    Failed(ActionError),

    #[error("blocked by failed node '{by}'")]
    Blocked { by: String },

    #[error("cancelled before it started")]
    Cancelled,

    #[error("did not run (state: {state})")]
    NotRun { state: NodeState },

    #[error("output '{slot}' was not produced")]
    MissingOutput { slot: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabeledEntry {
    /// Iteration label, or the node name for nodes that were not expanded
    pub label: String,
    pub key: Option<IterationKey>,
    pub node: NodeId,
    pub result: Result<Value, BranchError>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabeledCollection {
    pub entries: Vec<LabeledEntry>,
}

impl LabeledCollection {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, label: &str) -> Option<&Result<Value, BranchError>> {
        self.entries
            .iter()
            .find(|entry| entry.label == label)
            .map(|entry| &entry.result)
    }

    /// The entry whose iteration key has `field` set to `value`.
    pub fn by_field(&self, field: &str, value: &Value) -> Option<&LabeledEntry> {
        self.entries.iter().find(|entry| {
            entry
                .key
                .as_ref()
                .and_then(|key| key.get(field))
                .map(|found| found == value)
                .unwrap_or(false)
        })
    }

    pub fn values(&self) -> Vec<(&str, &Value)> {
        self.entries
            .iter()
            .filter_map(|entry| entry.result.as_ref().ok().map(|value| (entry.label.as_str(), value)))
            .collect()
    }

    pub fn errors(&self) -> Vec<(&str, &BranchError)> {
        self.entries
            .iter()
            .filter_map(|entry| entry.result.as_ref().err().map(|error| (entry.label.as_str(), error)))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Aggregate {
    Labeled(LabeledCollection),
    Combined {
        /// `None` when no branch produced a value
        value: Option<Value>,
        errors: Vec<(String, BranchError)>,
    },
}

impl Aggregate {
    pub fn as_labeled(&self) -> Option<&LabeledCollection> {
        match self {
            Aggregate::Labeled(collection) => Some(collection),
            Aggregate::Combined { .. } => None,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Aggregate::Combined { value, .. } => value.as_ref(),
            Aggregate::Labeled(_) => None,
        }
    }

    /// Branch errors as `(label, error)` pairs, whatever the policy.
    pub fn errors(&self) -> Vec<(String, BranchError)> {
        match self {
            Aggregate::Labeled(collection) => collection
                .errors()
                .into_iter()
                .map(|(label, error)| (label.to_string(), error.clone()))
                .collect(),
            Aggregate::Combined { errors, .. } => errors.clone(),
        }
    }
}

/// Gathers `slot` from `terminals`, in the order given.
pub fn gather(
    record: &RunRecord,
    terminals: &[NodeId],
    slot: &str,
    policy: &AggregationPolicy,
) -> Result<Aggregate, AggregationError> {
    let collection = labeled(record, terminals, slot)?;

    let (successes, errors): (Vec<_>, Vec<_>) = collection
        .entries
        .iter()
        .cloned()
        .partition(|entry| entry.result.is_ok());
    let values: Vec<(String, Value)> = successes
        .into_iter()
        .filter_map(|entry| entry.result.ok().map(|value| (entry.label, value)))
        .collect();
    let errors: Vec<(String, BranchError)> = errors
        .into_iter()
        .filter_map(|entry| entry.result.err().map(|error| (entry.label, error)))
        .collect();

    match policy {
        AggregationPolicy::Labeled => Ok(Aggregate::Labeled(collection)),
        AggregationPolicy::Concatenate => Ok(Aggregate::Combined {
            value: concatenate::concatenate(&values)?,
            errors,
        }),
        AggregationPolicy::Reduce(combiner) => Ok(Aggregate::Combined {
            value: reduce::reduce(&values, combiner)?,
            errors,
        }),
    }
}

/// Gathers `slot` from every member of an expanded template, in expansion order.
pub fn gather_template(
    record: &RunRecord,
    template: &str,
    slot: &str,
    policy: &AggregationPolicy,
) -> Result<Aggregate, AggregationError> {
    let members = record.graph().members_of(template);
    gather(record, &members, slot, policy)
}

fn labeled(record: &RunRecord, terminals: &[NodeId], slot: &str) -> Result<LabeledCollection, AggregationError> {
    let graph = record.graph();
    let mut entries = Vec::with_capacity(terminals.len());

    for id in terminals {
        let node = graph
            .get(*id)
            .ok_or(AggregationError::UnknownNode { index: id.index() })?;
        if !node.outputs().contains_key(slot) {
            return Err(AggregationError::UnknownSlot {
                node: node.name().to_string(),
                slot: slot.to_string(),
            });
        }

        let result = match record.state(*id) {
            NodeState::Completed | NodeState::Cached => record
                .output(*id, slot)
                .cloned()
                .ok_or_else(|| BranchError::MissingOutput { slot: slot.to_string() }),
            NodeState::Failed => Err(BranchError::Failed(
                record
                    .error(*id)
                    .cloned()
                    .unwrap_or_else(|| ActionError::failed("unknown failure")),
            )),
            NodeState::Blocked => Err(BranchError::Blocked {
                by: record
                    .node(*id)
                    .and_then(|r| r.blocked_by)
                    .map(|by| graph.node(by).name().to_string())
                    .unwrap_or_default(),
            }),
            NodeState::Cancelled => Err(BranchError::Cancelled),
            state => Err(BranchError::NotRun { state }),
        };

        entries.push(LabeledEntry {
            label: node
                .iteration()
                .map(IterationKey::label)
                .unwrap_or_else(|| node.name().to_string()),
            key: node.iteration().cloned(),
            node: *id,
            result,
        });
    }

    Ok(LabeledCollection { entries })
}
