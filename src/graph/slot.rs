// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Slot type constraints and input slot declarations.
//!
//! Compatibility is a subtype relation checked at build time on every edge:
//! the producer's output type must be a subtype of the consumer's input type.
//!
//! ```text
//! Any  accepts everything
//! Int  ⊂ Float
//! List(a) ⊂ List(b)  iff  a ⊂ b
//! Map(a)  ⊂ Map(b)   iff  a ⊂ b
//! ```

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use super::value::Value;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotType {
    Any,
    Bool,
    Int,
    Float,
    Text,
    Path,
    Bytes,
    List(Box<SlotType>),
    Map(Box<SlotType>),
}

impl SlotType {
    pub fn list_of(inner: SlotType) -> Self {
        SlotType::List(Box::new(inner))
    }

    pub fn map_of(inner: SlotType) -> Self {
        SlotType::Map(Box::new(inner))
    }

    /// True when a value of type `self` may flow into a slot of type `target`.
    pub fn is_compatible_with(&self, target: &SlotType) -> bool {
        match (self, target) {
            (_, SlotType::Any) => true,
            (SlotType::Int, SlotType::Float) => true,
            (SlotType::List(a), SlotType::List(b)) => a.is_compatible_with(b),
            (SlotType::Map(a), SlotType::Map(b)) => a.is_compatible_with(b),
            (a, b) => a == b,
        }
    }

    /// Checks a concrete value against this constraint.
    ///
    /// `Null` is only accepted by `Any`, so a literal `Null` never silently
    /// satisfies a typed slot.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (SlotType::Any, _) => true,
            (SlotType::Bool, Value::Bool(_)) => true,
            (SlotType::Int, Value::Int(_)) => true,
            (SlotType::Float, Value::Float(_) | Value::Int(_)) => true,
            (SlotType::Text, Value::Text(_)) => true,
            (SlotType::Path, Value::Path(_)) => true,
            (SlotType::Bytes, Value::Bytes(_)) => true,
            (SlotType::List(inner), Value::List(items)) => items.iter().all(|v| inner.accepts(v)),
            (SlotType::Map(inner), Value::Map(map)) => map.values().all(|v| inner.accepts(v)),
            _ => false,
        }
    }

    /// The element type when this is a list, used by gather edges.
    pub fn element(&self) -> Option<&SlotType> {
        match self {
            SlotType::List(inner) => Some(inner),
            SlotType::Any => Some(&SlotType::Any),
            _ => None,
        }
    }
}

impl Display for SlotType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SlotType::Any => f.write_str("any"),
            SlotType::Bool => f.write_str("bool"),
            SlotType::Int => f.write_str("int"),
            SlotType::Float => f.write_str("float"),
            SlotType::Text => f.write_str("text"),
            SlotType::Path => f.write_str("path"),
            SlotType::Bytes => f.write_str("bytes"),
            SlotType::List(inner) => write!(f, "list<{}>", inner),
            SlotType::Map(inner) => write!(f, "map<{}>", inner),
        }
    }
}

/// A declared input slot.
#[derive(Debug, Clone, PartialEq)]
pub struct InputSlot {
    pub ty: SlotType,
    pub required: bool,
    pub default: Option<Value>,
}

impl InputSlot {
    pub fn required(ty: SlotType) -> Self {
        Self {
            ty,
            required: true,
            default: None,
        }
    }

    /// An input that may stay unbound. With a default the action always sees
    /// a value, without one the slot is simply absent from its inputs.
    pub fn optional(ty: SlotType, default: Option<Value>) -> Self {
        Self {
            ty,
            required: false,
            default,
        }
    }
}
