// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Run-time errors: action failures and cache store problems.

use std::fmt::Display;
use std::path::PathBuf;

use thiserror::Error;

use crate::graph::SlotType;

/// A node's action failed. Recorded in the run record, never retried by the engine.
///
/// The error is cloneable so it can live in the run record and be handed to the
/// result aggregator at the same time.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActionError {
    #[error("{message}")]
    Failed { message: String },

    #[error("action panicked: {message}")]
    Panicked { message: String },

    #[error("missing input '{slot}'")]
    MissingInput { slot: String },

    #[error("input '{slot}' is not a {expected} value")]
    InvalidInput { slot: String, expected: String },

    #[error("declared output '{slot}' was not produced")]
    MissingOutput { slot: String },

    #[error("produced undeclared output '{slot}'")]
    UndeclaredOutput { slot: String },

    #[error("output '{slot}' expects {expected}, got a {found} value")]
    OutputTypeMismatch {
        slot: String,
        expected: SlotType,
        found: String,
    },
}

impl ActionError {
    pub fn failed(message: impl Display) -> Self {
        ActionError::Failed {
            message: message.to_string(),
        }
    }

    pub(crate) fn from_join_error(error: tokio::task::JoinError) -> Self {
        if !error.is_panic() {
            return ActionError::Panicked {
                message: error.to_string(),
            };
        }
        let payload = error.into_panic();
        let message = if let Some(text) = payload.downcast_ref::<&str>() {
            (*text).to_string()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "unknown panic payload".to_string()
        };
        ActionError::Panicked { message }
    }
}

impl From<std::io::Error> for ActionError {
    fn from(error: std::io::Error) -> Self {
        ActionError::failed(error)
    }
}

impl From<anyhow::Error> for ActionError {
    fn from(error: anyhow::Error) -> Self {
        ActionError::failed(format!("{:#}", error))
    }
}

/// Cache store failures. Lookup failures degrade to a miss, commit failures are logged.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt cache entry {fingerprint}: {reason}")]
    Corrupt { fingerprint: String, reason: String },

    #[error("Cache entry {fingerprint} references missing artifact {}", path.display())]
    MissingArtifact { fingerprint: String, path: PathBuf },

    #[error("Failed to encode cache entry: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Cache lock poisoned: {0}")]
    Poisoned(String),

    #[error("Cache task did not complete: {0}")]
    Interrupted(String),
}
