// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Pipeline graph model: values, typed slots, nodes, expansions and the builder
//! that validates them into an immutable [`Graph`].

mod builder;
mod expansion;
#[allow(clippy::module_inception)]
mod graph;
mod node;
mod slot;
mod value;

pub use builder::GraphBuilder;
pub use expansion::{Expansion, IterationKey, IterationSpace};
pub use graph::{Edge, Graph};
pub use node::{Binding, Node, NodeId};
pub use slot::{InputSlot, SlotType};
pub use value::{Shape, Value, ValueKind};
