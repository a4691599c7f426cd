// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod ready_queue;
pub mod run_record;
pub mod scheduler;
#[cfg(test)]
mod integration_tests;

pub use run_record::{BlockedNode, FailedNode, NodeRecord, NodeState, NodeSummary, RunOutcome, RunRecord, RunSummary};
pub use scheduler::Scheduler;
