// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::ActionError;
use crate::traits::{Action, ActionContext, ActionIdentity, ActionOutput, Inputs};

type BlockingBody = dyn Fn(Inputs, ActionContext) -> Result<ActionOutput, ActionError> + Send + Sync;

/// Wraps a blocking closure as an [`Action`].
///
/// The closure runs on tokio's blocking pool, so CPU-heavy or file-bound
/// work never stalls the scheduler. A panic inside the closure surfaces as
/// [`ActionError::Panicked`].
#[derive(Clone)]
pub struct FnAction {
    identity: ActionIdentity,
    body: Arc<BlockingBody>,
}

impl FnAction {
    pub fn new<F>(name: impl Into<String>, version: impl Into<String>, body: F) -> Self
    where
        F: Fn(Inputs) -> Result<ActionOutput, ActionError> + Send + Sync + 'static,
    {
        Self::with_context(name, version, move |inputs, _| body(inputs))
    }

    /// Like [`new`](Self::new) but the closure also sees the invocation context
    /// (node name, iteration key, configuration, working directory).
    pub fn with_context<F>(name: impl Into<String>, version: impl Into<String>, body: F) -> Self
    where
        F: Fn(Inputs, ActionContext) -> Result<ActionOutput, ActionError> + Send + Sync + 'static,
    {
        Self {
            identity: ActionIdentity::new(name, version),
            body: Arc::new(body),
        }
    }
}

impl fmt::Debug for FnAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnAction").field("identity", &self.identity).finish()
    }
}

#[async_trait]
impl Action for FnAction {
    fn identity(&self) -> ActionIdentity {
        self.identity.clone()
    }

    async fn run(&self, inputs: Inputs, ctx: ActionContext) -> Result<ActionOutput, ActionError> {
        let body = Arc::clone(&self.body);
        tokio::task::spawn_blocking(move || body(inputs, ctx))
            .await
            .map_err(ActionError::from_join_error)?
    }
}
