// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Iteration spaces and the expansions they produce.
//!
//! An [`IterationSpace`] is an ordered list of named fields, each with an
//! ordered sequence of values. Expanding a node template over a space clones
//! the template once per combination (Cartesian product, first field varies
//! slowest) and tags each clone with its [`IterationKey`].
//!
//! ```text
//! subject_id: [sub-01, sub-02]      psd[subject_id=sub-01,session_id=ses-01]
//! session_id: [ses-01, ses-02]  ->  psd[subject_id=sub-01,session_id=ses-02]
//!                                   psd[subject_id=sub-02,session_id=ses-01]
//!                                   psd[subject_id=sub-02,session_id=ses-02]
//! ```
//!
//! Clones are independent nodes: each has its own fingerprint, cache entry
//! and failure state.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use super::node::NodeId;
use super::value::Value;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IterationSpace {
    fields: Vec<(String, Vec<Value>)>,
}

impl IterationSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a field. Fields added later vary faster.
    pub fn field<V: Into<Value>>(mut self, name: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        self.fields
            .push((name.into(), values.into_iter().map(Into::into).collect()));
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &[Value])> {
        self.fields.iter().map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    /// Number of combinations. A space with no fields, or with any empty field, has none.
    pub fn len(&self) -> usize {
        if self.fields.is_empty() {
            return 0;
        }
        self.fields.iter().map(|(_, values)| values.len()).product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<IterationKey> {
        if self.is_empty() {
            return Vec::new();
        }

        let mut keys = vec![IterationKey::default()];
        for (name, values) in &self.fields {
            keys = keys
                .into_iter()
                .flat_map(|prefix| {
                    values.iter().map(move |value| {
                        let mut key = prefix.clone();
                        key.pairs.push((name.clone(), value.clone()));
                        key
                    })
                })
                .collect();
        }
        keys
    }
}

/// The combination of field values one expanded node was created for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IterationKey {
    pairs: Vec<(String, Value)>,
}

impl IterationKey {
    pub fn new(pairs: Vec<(String, Value)>) -> Self {
        Self { pairs }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.pairs
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    pub fn pairs(&self) -> &[(String, Value)] {
        &self.pairs
    }

    /// This key followed by the pairs of `inner`.
    pub fn extended(&self, inner: &IterationKey) -> IterationKey {
        let mut pairs = self.pairs.clone();
        pairs.extend(inner.pairs.iter().cloned());
        IterationKey { pairs }
    }

    /// The key with `field` removed.
    pub fn without(&self, field: &str) -> IterationKey {
        IterationKey {
            pairs: self.pairs.iter().filter(|(name, _)| name != field).cloned().collect(),
        }
    }

    /// Whether every pair of this key also appears in `other`.
    pub fn is_subset_of(&self, other: &IterationKey) -> bool {
        self.pairs
            .iter()
            .all(|(name, value)| other.get(name) == Some(value))
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// `field=value` pairs joined by commas, in field declaration order.
    pub fn label(&self) -> String {
        self.pairs
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl Display for IterationKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// The nodes produced by expanding one template, in iteration order.
#[derive(Debug, Clone, PartialEq)]
pub struct Expansion {
    pub template: String,
    pub members: Vec<(IterationKey, NodeId)>,
}

impl Expansion {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn nodes(&self) -> Vec<NodeId> {
        self.members.iter().map(|(_, id)| *id).collect()
    }

    pub fn keys(&self) -> Vec<&IterationKey> {
        self.members.iter().map(|(key, _)| key).collect()
    }

    pub fn node_for(&self, key: &IterationKey) -> Option<NodeId> {
        self.members
            .iter()
            .find(|(candidate, _)| candidate == key)
            .map(|(_, id)| *id)
    }
}

/// `template[label]`, or the bare template name for an empty key.
pub(crate) fn member_name(template: &str, key: &IterationKey) -> String {
    if key.is_empty() {
        return template.to_string();
    }
    format!("{}[{}]", template, key.label())
}
