// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod actions;    // built-in actions
pub mod aggregate;  // gathering results after a run
pub mod cache;      // fingerprints and cache stores
pub mod config;     // pipeline config + runtime
pub mod engine;     // scheduler and run record
pub mod errors;     // error handling
pub mod graph;      // nodes, expansions, builder
pub mod observability;
pub mod traits;     // unified abstractions
