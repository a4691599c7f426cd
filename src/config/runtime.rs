// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::sync::Arc;

use crate::cache::{FsCache, MemoryCache};
use crate::config::consts::DEFAULT_WORKERS_FALLBACK;
use crate::config::PipelineConfig;
use crate::engine::Scheduler;
use crate::errors::ConfigurationError;
use crate::observability::messages::config::CacheSelected;
use crate::observability::messages::StructuredLog;
use crate::traits::CacheStore;

/// Turns a [`PipelineConfig`] into a ready-to-run [`Scheduler`].
///
/// # Examples
///
/// ```
/// use ephyflow::config::{ConfigFormat, PipelineConfig, RuntimeBuilder};
///
/// let config = PipelineConfig::parse("name: psd\nworkers: 3", ConfigFormat::Yaml).unwrap();
/// let scheduler = RuntimeBuilder::from_config(&config).unwrap();
///
/// assert_eq!(scheduler.workers(), 3);
/// ```
pub struct RuntimeBuilder;

impl RuntimeBuilder {
    /// Builds the scheduler and its cache store.
    ///
    /// Workers default to the available parallelism. The cache is in-memory
    /// unless `cache_dir` is set, in which case it is created if missing.
    pub fn from_config(cfg: &PipelineConfig) -> Result<Scheduler, ConfigurationError> {
        let workers = cfg.workers.unwrap_or_else(default_workers);
        let cache = Self::cache_from_config(cfg)?;
        Ok(Scheduler::new(workers, cache).with_force_rerun(cfg.force_rerun.iter().cloned()))
    }

    pub fn cache_from_config(cfg: &PipelineConfig) -> Result<Arc<dyn CacheStore>, ConfigurationError> {
        match &cfg.cache_dir {
            Some(dir) => {
                let cache = FsCache::new(dir).map_err(|e| ConfigurationError::Invalid {
                    reason: format!("cannot open cache directory: {}", e),
                })?;
                CacheSelected {
                    kind: "filesystem",
                    location: Some(dir),
                }
                .log();
                Ok(Arc::new(cache))
            }
            None => {
                CacheSelected {
                    kind: "memory",
                    location: None,
                }
                .log();
                Ok(Arc::new(MemoryCache::new()))
            }
        }
    }
}

pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(DEFAULT_WORKERS_FALLBACK)
}
