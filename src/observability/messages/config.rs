// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::fmt::{Display, Formatter};
use std::path::Path;

use tracing::Span;

use crate::observability::messages::StructuredLog;

/// # Log Level
/// `info!`
pub struct ConfigLoaded<'a> {
    pub path: &'a Path,
    pub format: &'a str,
    pub pipeline: &'a str,
}

impl Display for ConfigLoaded<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Loaded {} configuration for pipeline '{}' from {}",
            self.format,
            self.pipeline,
            self.path.display()
        )
    }
}

impl StructuredLog for ConfigLoaded<'_> {
    fn log(&self) {
        tracing::info!(
            path = %self.path.display(),
            format = self.format,
            pipeline = self.pipeline,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "config",
            span_name = name,
            path = %self.path.display(),
            pipeline = self.pipeline,
        )
    }
}

/// Cache store chosen by the runtime builder.
///
/// # Log Level
/// `debug!`
pub struct CacheSelected<'a> {
    pub kind: &'a str,
    pub location: Option<&'a Path>,
}

impl Display for CacheSelected<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self.location {
            Some(path) => write!(f, "Using {} cache at {}", self.kind, path.display()),
            None => write!(f, "Using {} cache", self.kind),
        }
    }
}

impl StructuredLog for CacheSelected<'_> {
    fn log(&self) {
        match self.location {
            Some(path) => tracing::debug!(kind = self.kind, location = %path.display(), "{}", self),
            None => tracing::debug!(kind = self.kind, "{}", self),
        }
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!("cache_selected", span_name = name, kind = self.kind)
    }
}
