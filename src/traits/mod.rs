// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod action;
pub mod cache;

pub use action::{Action, ActionContext, ActionIdentity, ActionOutput, Inputs};
pub use cache::CacheStore;
