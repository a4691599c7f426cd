// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::errors::CacheError;
use crate::graph::Value;
use crate::traits::ActionIdentity;

use super::fingerprint::Fingerprint;

/// A completed node invocation, keyed by its fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    /// Name of the node that first produced the entry
    pub node: String,
    pub action: ActionIdentity,
    pub outputs: BTreeMap<String, Value>,
    pub artifacts: Vec<PathBuf>,
    /// Completion marker, only complete entries are ever committed
    pub completed: bool,
    pub created_at: u64,
}

impl CacheEntry {
    pub fn new(
        fingerprint: Fingerprint,
        node: impl Into<String>,
        action: ActionIdentity,
        outputs: BTreeMap<String, Value>,
        artifacts: Vec<PathBuf>,
    ) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0);
        Self {
            fingerprint,
            node: node.into(),
            action,
            outputs,
            artifacts,
            completed: true,
            created_at,
        }
    }

    /// Fails on the first referenced artifact that no longer exists.
    pub fn verify_artifacts(&self) -> Result<(), CacheError> {
        match self.artifacts.iter().find(|path| !path.exists()) {
            Some(path) => Err(CacheError::MissingArtifact {
                fingerprint: self.fingerprint.to_string(),
                path: path.clone(),
            }),
            None => Ok(()),
        }
    }
}
