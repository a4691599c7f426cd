// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The action boundary: the opaque body a node runs.
//!
//! The engine only ever talks to actions through [`Action`]. An action is a
//! pure function of its resolved inputs and node configuration from the
//! engine's point of view; anything it writes to disk goes under the working
//! directory in [`ActionContext`] and is reported back as an artifact path.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cache::Fingerprint;
use crate::errors::ActionError;
use crate::graph::{IterationKey, Value};

/// Stable identity of an action, part of every fingerprint.
///
/// Bumping `version` invalidates every cache entry the action produced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionIdentity {
    pub name: String,
    pub version: String,
}

impl ActionIdentity {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl Display for ActionIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

#[async_trait]
pub trait Action: Send + Sync {
    fn identity(&self) -> ActionIdentity;

    async fn run(&self, inputs: Inputs, ctx: ActionContext) -> Result<ActionOutput, ActionError>;
}

/// Resolved inputs handed to an action, keyed by input slot name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Inputs {
    values: BTreeMap<String, Value>,
}

impl Inputs {
    pub fn new(values: BTreeMap<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, slot: &str) -> Option<&Value> {
        self.values.get(slot)
    }

    pub fn require(&self, slot: &str) -> Result<&Value, ActionError> {
        self.values.get(slot).ok_or_else(|| ActionError::MissingInput {
            slot: slot.to_string(),
        })
    }

    pub fn float(&self, slot: &str) -> Result<f64, ActionError> {
        self.require(slot)?
            .as_float()
            .ok_or_else(|| invalid(slot, "float"))
    }

    pub fn int(&self, slot: &str) -> Result<i64, ActionError> {
        self.require(slot)?.as_int().ok_or_else(|| invalid(slot, "int"))
    }

    pub fn text(&self, slot: &str) -> Result<&str, ActionError> {
        self.require(slot)?.as_str().ok_or_else(|| invalid(slot, "text"))
    }

    pub fn path(&self, slot: &str) -> Result<&Path, ActionError> {
        self.require(slot)?.as_path().ok_or_else(|| invalid(slot, "path"))
    }

    pub fn list(&self, slot: &str) -> Result<&[Value], ActionError> {
        self.require(slot)?.as_list().ok_or_else(|| invalid(slot, "list"))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_map(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn into_map(self) -> BTreeMap<String, Value> {
        self.values
    }
}

fn invalid(slot: &str, expected: &str) -> ActionError {
    ActionError::InvalidInput {
        slot: slot.to_string(),
        expected: expected.to_string(),
    }
}

/// What an action hands back: output values plus any durable files it wrote.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionOutput {
    pub outputs: BTreeMap<String, Value>,
    pub artifacts: Vec<PathBuf>,
}

impl ActionOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, slot: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(slot.into(), value.into());
        self
    }

    pub fn artifact(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifacts.push(path.into());
        self
    }
}

/// Per-invocation context.
#[derive(Debug, Clone)]
pub struct ActionContext {
    /// Concrete node name, e.g. `psd[subject_id=sub-01]`
    pub node: String,
    pub iteration: Option<IterationKey>,
    pub config: BTreeMap<String, Value>,
    /// Directory reserved for this invocation's artifacts, when the cache has one
    pub work_dir: Option<PathBuf>,
    pub fingerprint: Fingerprint,
}

impl ActionContext {
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.config.get(key)
    }
}
