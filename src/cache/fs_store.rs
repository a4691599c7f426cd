// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Filesystem cache store.
//!
//! Layout, one directory per fingerprint sharded by its first two hex digits:
//!
//! ```text
//! <root>/
//!   9f/
//!     9f2c.../
//!       entry.json     committed entry, written atomically
//!       work/          working directory handed to the action
//! ```
//!
//! `entry.json` is written to a temporary file in the same directory and then
//! renamed over the final name, so readers see either the previous entry or
//! the new one, never a partial file. Concurrent writers of the same key race
//! benignly: the last rename wins and both wrote equivalent content.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::errors::CacheError;
use crate::traits::CacheStore;

use super::entry::CacheEntry;
use super::fingerprint::Fingerprint;

const ENTRY_FILE: &str = "entry.json";
const WORK_DIR: &str = "work";

#[derive(Debug, Clone)]
pub struct FsCache {
    root: PathBuf,
}

impl FsCache {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| io_error(&root, source))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_dir(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.root.join(fingerprint.shard()).join(fingerprint.as_str())
    }

    fn entry_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.entry_dir(fingerprint).join(ENTRY_FILE)
    }
}

impl CacheStore for FsCache {
    fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>, CacheError> {
        let path = self.entry_path(fingerprint);
        let contents = match fs::read(&path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(io_error(&path, source)),
        };

        let entry: CacheEntry = serde_json::from_slice(&contents).map_err(|e| CacheError::Corrupt {
            fingerprint: fingerprint.to_string(),
            reason: e.to_string(),
        })?;

        if &entry.fingerprint != fingerprint {
            return Err(CacheError::Corrupt {
                fingerprint: fingerprint.to_string(),
                reason: format!("entry records fingerprint {}", entry.fingerprint),
            });
        }
        if !entry.completed {
            return Err(CacheError::Corrupt {
                fingerprint: fingerprint.to_string(),
                reason: "entry is not marked complete".to_string(),
            });
        }
        entry.verify_artifacts()?;
        Ok(Some(entry))
    }

    fn commit(&self, entry: CacheEntry) -> Result<(), CacheError> {
        let dir = self.entry_dir(&entry.fingerprint);
        fs::create_dir_all(&dir).map_err(|source| io_error(&dir, source))?;

        let mut temp = NamedTempFile::new_in(&dir).map_err(|source| io_error(&dir, source))?;
        serde_json::to_writer_pretty(&mut temp, &entry)?;
        temp.flush().map_err(|source| io_error(temp.path(), source))?;

        let target = dir.join(ENTRY_FILE);
        temp.persist(&target)
            .map_err(|e| io_error(&target, e.error))?;
        Ok(())
    }

    fn work_dir(&self, fingerprint: &Fingerprint) -> Result<Option<PathBuf>, CacheError> {
        let dir = self.entry_dir(fingerprint).join(WORK_DIR);
        fs::create_dir_all(&dir).map_err(|source| io_error(&dir, source))?;
        Ok(Some(dir))
    }
}

fn io_error(path: &Path, source: io::Error) -> CacheError {
    CacheError::Io {
        path: path.to_path_buf(),
        source,
    }
}
