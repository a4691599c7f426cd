// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Build-time errors: graph construction, slot binding and configuration loading.
//!
//! Everything in this module is fatal at build time and is never retried. Each
//! variant names the offending node, slot or edge so the caller can fix the
//! pipeline definition without re-running anything.

use std::path::PathBuf;

use thiserror::Error;

use crate::graph::SlotType;

/// Errors raised while assembling or validating a pipeline graph.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    /// Adding an edge (or finalizing the graph) would close a cycle.
    #[error("Cyclic dependency detected: {}", path.join(" -> "))]
    Cycle {
        /// The cycle path, first and last entries name the same node
        path: Vec<String>,
    },

    /// The producer's output type is not a subtype of the consumer's input type.
    #[error(
        "Type mismatch on edge {producer}.{output} -> {consumer}.{input}: {found} is not compatible with {expected}"
    )]
    TypeMismatch {
        producer: String,
        output: String,
        consumer: String,
        input: String,
        expected: SlotType,
        found: SlotType,
    },

    #[error("Duplicate node name: '{name}'")]
    DuplicateNode { name: String },

    #[error("Unknown node: '{name}'")]
    UnknownNode { name: String },

    /// A fan-in consumer requires at least one upstream result but the expansion is empty.
    #[error(
        "Expansion '{template}' has no members but '{consumer}.{input}' requires at least one upstream result"
    )]
    EmptyExpansion {
        template: String,
        consumer: String,
        input: String,
    },

    #[error("Node '{node}' cannot run: required input '{slot}' is not bound")]
    UnboundInput { node: String, slot: String },

    /// Zipped expansions must cover the same iteration keys in the same order.
    #[error("Cannot zip '{producer}' into '{consumer}': iteration spaces differ ({reason})")]
    IterationMismatch {
        producer: String,
        consumer: String,
        reason: String,
    },

    #[error("Invalid configuration: {reason}")]
    Invalid { reason: String },

    #[error("Failed to load configuration from {}: {reason}", path.display())]
    Load { path: PathBuf, reason: String },
}

/// Errors raised while binding a value or an upstream reference to a node slot.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SlotError {
    #[error("Node '{node}' has no input slot '{slot}'")]
    UnknownInput { node: String, slot: String },

    #[error("Node '{node}' has no output slot '{slot}'")]
    UnknownOutput { node: String, slot: String },

    #[error("Input slot '{node}.{slot}' is already bound")]
    AlreadyBound { node: String, slot: String },

    #[error("Input slot '{node}.{slot}' expects {expected}, got a {found} value")]
    IncompatibleValue {
        node: String,
        slot: String,
        expected: SlotType,
        found: String,
    },
}

/// Umbrella error for `GraphBuilder` operations, which can fail either way.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Slot(#[from] SlotError),
}

impl BuildError {
    /// True when this error reports a cycle, whether caught at `connect` or `finalize`.
    pub fn is_cycle(&self) -> bool {
        matches!(self, BuildError::Configuration(ConfigurationError::Cycle { .. }))
    }
}
