// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Ready-made actions.

mod function;
mod identity;

pub use function::FnAction;
pub use identity::IdentityAction;
