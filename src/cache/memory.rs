// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::collections::HashMap;
use std::sync::RwLock;

use crate::errors::CacheError;
use crate::traits::CacheStore;

use super::entry::CacheEntry;
use super::fingerprint::Fingerprint;

/// Process-local cache store. Entries live as long as the store.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<Fingerprint, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.clear();
    }
}

impl CacheStore for MemoryCache {
    fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>, CacheError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| CacheError::Poisoned(e.to_string()))?;
        match entries.get(fingerprint) {
            Some(entry) => {
                entry.verify_artifacts()?;
                Ok(Some(entry.clone()))
            }
            None => Ok(None),
        }
    }

    fn commit(&self, entry: CacheEntry) -> Result<(), CacheError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| CacheError::Poisoned(e.to_string()))?;
        entries.insert(entry.fingerprint.clone(), entry);
        Ok(())
    }
}
