// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::fs;
use std::path::{Path, PathBuf};

use crate::engine::RunRecord;
use crate::graph::{IterationKey, NodeId};

/// Artifact files of `nodes` whose file name ends with `suffix`, labeled like [`gather`](super::gather).
///
/// Directories reported as artifacts are searched recursively; symlinked
/// directories inside them are not followed. Nodes without artifacts (or that
/// never ran) contribute nothing.
pub fn collect_artifacts(record: &RunRecord, nodes: &[NodeId], suffix: &str) -> Vec<(String, PathBuf)> {
    let graph = record.graph();
    let mut found = Vec::new();

    for id in nodes {
        let (Some(node), Some(node_record)) = (graph.get(*id), record.node(*id)) else {
            continue;
        };
        let label = node
            .iteration()
            .map(IterationKey::label)
            .unwrap_or_else(|| node.name().to_string());

        let mut files = Vec::new();
        for artifact in &node_record.artifacts {
            walk(artifact, suffix, &mut files);
        }
        files.sort();
        found.extend(files.into_iter().map(|path| (label.clone(), path)));
    }
    found
}

fn walk(path: &Path, suffix: &str, files: &mut Vec<PathBuf>) {
    if path.is_dir() {
        let Ok(entries) = fs::read_dir(path) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let linked_dir = entry
                .file_type()
                .map(|kind| kind.is_symlink() && path.is_dir())
                .unwrap_or(true);
            if !linked_dir {
                walk(&path, suffix, files);
            }
        }
    } else if path
        .file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.ends_with(suffix))
        .unwrap_or(false)
    {
        files.push(path.to_path_buf());
    }
}
