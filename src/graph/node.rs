// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Nodes: named units of work with typed slots and an opaque action.
//!
//! A `Node` is a declaration. It carries no execution state; per-run state
//! (Pending, Running, Cached, ...) lives in the run record so the same
//! finalized graph can be run any number of times.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::errors::{ActionError, SlotError};
use crate::traits::{Action, ActionContext, ActionIdentity, ActionOutput, Inputs};

use super::expansion::IterationKey;
use super::slot::{InputSlot, SlotType};
use super::value::Value;

/// Index of a node in a builder or finalized graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How an input slot gets its value.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Literal(Value),
    Upstream { node: NodeId, slot: String },
    /// Fan-in: a list of upstream outputs, in expansion order
    Gather { sources: Vec<(NodeId, String)> },
}

impl Binding {
    pub(crate) fn upstream_nodes(&self) -> Vec<NodeId> {
        match self {
            Binding::Literal(_) => Vec::new(),
            Binding::Upstream { node, .. } => vec![*node],
            Binding::Gather { sources } => sources.iter().map(|(node, _)| *node).collect(),
        }
    }

    pub(crate) fn remap(&self, offset: usize) -> Binding {
        match self {
            Binding::Literal(value) => Binding::Literal(value.clone()),
            Binding::Upstream { node, slot } => Binding::Upstream {
                node: NodeId(node.0 + offset),
                slot: slot.clone(),
            },
            Binding::Gather { sources } => Binding::Gather {
                sources: sources
                    .iter()
                    .map(|(node, slot)| (NodeId(node.0 + offset), slot.clone()))
                    .collect(),
            },
        }
    }
}

#[derive(Clone)]
pub struct Node {
    name: String,
    inputs: BTreeMap<String, InputSlot>,
    outputs: BTreeMap<String, SlotType>,
    action: Arc<dyn Action>,
    config: BTreeMap<String, Value>,
    bindings: BTreeMap<String, Binding>,
    pub(crate) iteration: Option<IterationKey>,
    pub(crate) template: Option<String>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("action", &self.action.identity())
            .field("inputs", &self.inputs.keys().collect::<Vec<_>>())
            .field("outputs", &self.outputs.keys().collect::<Vec<_>>())
            .field("iteration", &self.iteration)
            .finish()
    }
}

impl Node {
    pub fn new(name: impl Into<String>, action: Arc<dyn Action>) -> Self {
        Self {
            name: name.into(),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            action,
            config: BTreeMap::new(),
            bindings: BTreeMap::new(),
            iteration: None,
            template: None,
        }
    }

    pub fn input(mut self, name: impl Into<String>, slot: InputSlot) -> Self {
        self.inputs.insert(name.into(), slot);
        self
    }

    pub fn output(mut self, name: impl Into<String>, ty: SlotType) -> Self {
        self.outputs.insert(name.into(), ty);
        self
    }

    /// Adds a configuration parameter. Configuration takes part in the fingerprint.
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Binds a literal while declaring the node. Checked against the slot type at `add_node`.
    pub fn with_literal(mut self, slot: impl Into<String>, value: impl Into<Value>) -> Self {
        self.bindings.insert(slot.into(), Binding::Literal(value.into()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn action(&self) -> &Arc<dyn Action> {
        &self.action
    }

    pub fn identity(&self) -> ActionIdentity {
        self.action.identity()
    }

    pub fn inputs(&self) -> &BTreeMap<String, InputSlot> {
        &self.inputs
    }

    pub fn outputs(&self) -> &BTreeMap<String, SlotType> {
        &self.outputs
    }

    pub fn config(&self) -> &BTreeMap<String, Value> {
        &self.config
    }

    pub fn bindings(&self) -> &BTreeMap<String, Binding> {
        &self.bindings
    }

    pub fn iteration(&self) -> Option<&IterationKey> {
        self.iteration.as_ref()
    }

    /// Name of the template this node was expanded from.
    pub fn template(&self) -> Option<&str> {
        self.template.as_deref()
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }

    /// Binds an input slot.
    ///
    /// Fails when the slot is unknown, already bound, or a literal does not
    /// satisfy the slot type. Upstream type checks happen in the builder, which
    /// knows the producer's declared output type.
    pub fn bind(&mut self, slot: &str, binding: Binding) -> Result<(), SlotError> {
        let declared = self.inputs.get(slot).ok_or_else(|| SlotError::UnknownInput {
            node: self.name.clone(),
            slot: slot.to_string(),
        })?;

        if self.bindings.contains_key(slot) {
            return Err(SlotError::AlreadyBound {
                node: self.name.clone(),
                slot: slot.to_string(),
            });
        }

        if let Binding::Literal(value) = &binding {
            if !declared.ty.accepts(value) {
                return Err(SlotError::IncompatibleValue {
                    node: self.name.clone(),
                    slot: slot.to_string(),
                    expected: declared.ty.clone(),
                    found: value.kind().to_string(),
                });
            }
        }

        self.bindings.insert(slot.to_string(), binding);
        Ok(())
    }

    pub(crate) fn check_literals(&self) -> Result<(), SlotError> {
        for (slot, binding) in &self.bindings {
            let Some(declared) = self.inputs.get(slot) else {
                return Err(SlotError::UnknownInput {
                    node: self.name.clone(),
                    slot: slot.clone(),
                });
            };
            if let Binding::Literal(value) = binding {
                if !declared.ty.accepts(value) {
                    return Err(SlotError::IncompatibleValue {
                        node: self.name.clone(),
                        slot: slot.clone(),
                        expected: declared.ty.clone(),
                        found: value.kind().to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    pub(crate) fn bindings_mut(&mut self) -> &mut BTreeMap<String, Binding> {
        &mut self.bindings
    }

    /// First required input that is neither bound nor defaulted.
    pub fn unbound_required(&self) -> Option<&str> {
        self.inputs
            .iter()
            .find(|(name, slot)| slot.required && slot.default.is_none() && !self.bindings.contains_key(*name))
            .map(|(name, _)| name.as_str())
    }

    pub fn is_ready(&self) -> bool {
        self.unbound_required().is_none()
    }

    /// Runs the action and validates what it produced against the declared outputs.
    pub async fn execute(&self, inputs: Inputs, ctx: ActionContext) -> Result<ActionOutput, ActionError> {
        let output = self.action.run(inputs, ctx).await?;
        self.validate_outputs(&output)?;
        Ok(output)
    }

    fn validate_outputs(&self, output: &ActionOutput) -> Result<(), ActionError> {
        if let Some(slot) = output.outputs.keys().find(|slot| !self.outputs.contains_key(*slot)) {
            return Err(ActionError::UndeclaredOutput { slot: slot.clone() });
        }

        for (slot, ty) in &self.outputs {
            let value = output
                .outputs
                .get(slot)
                .ok_or_else(|| ActionError::MissingOutput { slot: slot.clone() })?;
            if !ty.accepts(value) {
                return Err(ActionError::OutputTypeMismatch {
                    slot: slot.clone(),
                    expected: ty.clone(),
                    found: value.kind().to_string(),
                });
            }
        }
        Ok(())
    }
}
