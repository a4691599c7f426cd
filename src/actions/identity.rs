// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::ActionError;
use crate::graph::{InputSlot, Node, SlotType};
use crate::traits::{Action, ActionContext, ActionIdentity, ActionOutput, Inputs};

/// Passes every input through to the output slot of the same name.
///
/// Used for entry nodes that fan pipeline parameters out to the rest of the
/// graph (an `inputnode`, or the `infosource` of an iterated pipeline).
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityAction;

impl IdentityAction {
    pub fn new() -> Self {
        Self
    }

    /// A node whose `fields` are each an `Any` input and the matching output.
    pub fn node(name: impl Into<String>, fields: &[&str]) -> Node {
        fields.iter().fold(Node::new(name, Arc::new(IdentityAction)), |node, field| {
            node.input(*field, InputSlot::required(SlotType::Any))
                .output(*field, SlotType::Any)
        })
    }
}

#[async_trait]
impl Action for IdentityAction {
    fn identity(&self) -> ActionIdentity {
        ActionIdentity::new("identity", "1")
    }

    async fn run(&self, inputs: Inputs, _ctx: ActionContext) -> Result<ActionOutput, ActionError> {
        Ok(ActionOutput {
            outputs: inputs.into_map(),
            artifacts: Vec::new(),
        })
    }
}
