// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use thiserror::Error;

use crate::graph::{Shape, ValueKind};

/// Errors from `aggregate::gather`. Fatal for that gather call only.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AggregationError {
    #[error("Unknown terminal node id {index}")]
    UnknownNode { index: usize },

    #[error("Node '{node}' has no output slot '{slot}'")]
    UnknownSlot { node: String, slot: String },

    #[error("Cannot concatenate '{label}': expected element shape {expected}, found {found}")]
    ShapeMismatch {
        label: String,
        expected: Shape,
        found: Shape,
    },

    #[error("Cannot concatenate '{label}': {kind} values are not concatenable with the other branches")]
    NotConcatenable { label: String, kind: ValueKind },

    #[error("Combiner failed at '{label}': {message}")]
    Combiner { label: String, message: String },
}
