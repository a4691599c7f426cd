// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Content fingerprints of node invocations.
//!
//! A fingerprint is the SHA-256 of a canonical JSON document:
//!
//! ```text
//! {
//!   "schema": 2,
//!   "action": {"name": "compute_psd", "version": "2"},
//!   "inputs": {"raw": {"type": "file", "sha256": "9f2c..."}, "fmin": {"type": "float", "value": 1.0}},
//!   "config": {"method": {"type": "text", "value": "welch"}}
//! }
//! ```
//!
//! JSON objects serialize with sorted keys, so the document (and the hash) does
//! not depend on insertion order. Path inputs that name an existing file are
//! replaced by the SHA-256 of the file content; renaming or touching a file
//! leaves the fingerprint unchanged, editing it does not. Floats keep their
//! `Value` encoding, so `NaN`, `inf` and `-inf` hash as distinct strings.

use std::fmt::{self, Display, Formatter};
use std::fs::File;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::graph::{Node, Value};
use crate::traits::Inputs;

/// Bumped whenever the canonical document changes shape.
pub const FINGERPRINT_SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two-character prefix used to shard cache directories.
    pub fn shard(&self) -> &str {
        self.0.get(..2).unwrap_or(&self.0)
    }

    /// Abbreviated form for log lines.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint of running `node` on `inputs`.
pub fn fingerprint(node: &Node, inputs: &Inputs) -> Fingerprint {
    let identity = node.identity();
    let resolved: serde_json::Map<String, serde_json::Value> = inputs
        .iter()
        .map(|(slot, value)| (slot.clone(), canonical(value)))
        .collect();
    let config: serde_json::Map<String, serde_json::Value> = node
        .config()
        .iter()
        .map(|(key, value)| (key.clone(), canonical(value)))
        .collect();

    let document = json!({
        "schema": FINGERPRINT_SCHEMA_VERSION,
        "action": {"name": identity.name, "version": identity.version},
        "inputs": resolved,
        "config": config,
    });

    let mut hasher = Sha256::new();
    hasher.update(document.to_string().as_bytes());
    Fingerprint(hex::encode(hasher.finalize()))
}

/// SHA-256 of a file's content, hex encoded.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

fn canonical(value: &Value) -> serde_json::Value {
    match value {
        Value::Path(path) if path.is_file() => match hash_file(path) {
            Ok(digest) => json!({"type": "file", "sha256": digest}),
            Err(_) => tagged(value),
        },
        Value::List(items) => json!({
            "type": "list",
            "value": items.iter().map(canonical).collect::<Vec<_>>(),
        }),
        Value::Map(map) => json!({
            "type": "map",
            "value": map
                .iter()
                .map(|(key, item)| (key.clone(), canonical(item)))
                .collect::<serde_json::Map<_, _>>(),
        }),
        _ => tagged(value),
    }
}

fn tagged(value: &Value) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}
