// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::fmt::{Display, Formatter};

use tracing::Span;

use crate::observability::messages::StructuredLog;

/// Graph validated and frozen.
///
/// # Log Level
/// `debug!`
pub struct GraphFinalized {
    pub node_count: usize,
    pub edge_count: usize,
}

impl Display for GraphFinalized {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Finalized pipeline graph: {} nodes, {} edges",
            self.node_count, self.edge_count
        )
    }
}

impl StructuredLog for GraphFinalized {
    fn log(&self) {
        tracing::debug!(
            node_count = self.node_count,
            edge_count = self.edge_count,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "graph_finalized",
            span_name = name,
            node_count = self.node_count,
            edge_count = self.edge_count,
        )
    }
}

/// # Log Level
/// `debug!`
pub struct TemplateExpanded<'a> {
    pub template: &'a str,
    pub members: usize,
}

impl Display for TemplateExpanded<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Expanded '{}' into {} node(s)", self.template, self.members)
    }
}

impl StructuredLog for TemplateExpanded<'_> {
    fn log(&self) {
        tracing::debug!(template = self.template, members = self.members, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "template_expanded",
            span_name = name,
            template = self.template,
            members = self.members,
        )
    }
}

/// An expansion produced no nodes because a field had no values.
///
/// # Log Level
/// `warn!`
pub struct EmptyExpansion<'a> {
    pub template: &'a str,
}

impl Display for EmptyExpansion<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Expansion of '{}' is empty, no nodes created", self.template)
    }
}

impl StructuredLog for EmptyExpansion<'_> {
    fn log(&self) {
        tracing::warn!(template = self.template, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!("empty_expansion", span_name = name, template = self.template)
    }
}
