// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::fmt;
use std::sync::Arc;

use crate::errors::AggregationError;
use crate::graph::Value;

type CombineFn = dyn Fn(&Value, &Value) -> Result<Value, String> + Send + Sync;

/// An associative binary operation folded over branch values in key order.
#[derive(Clone)]
pub struct Combiner {
    name: String,
    combine: Arc<CombineFn>,
}

impl Combiner {
    pub fn new<F>(name: impl Into<String>, combine: F) -> Self
    where
        F: Fn(&Value, &Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            combine: Arc::new(combine),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn apply(&self, left: &Value, right: &Value) -> Result<Value, String> {
        (self.combine)(left, right)
    }

    /// Numeric sum. Ints stay ints until a float is involved.
    pub fn sum() -> Self {
        Self::new("sum", |a, b| match (a, b) {
            (Value::Int(x), Value::Int(y)) => x
                .checked_add(*y)
                .map(Value::Int)
                .ok_or_else(|| "integer overflow".to_string()),
            _ => numeric_pair(a, b).map(|(x, y)| Value::Float(x + y)),
        })
    }

    pub fn min() -> Self {
        Self::new("min", |a, b| {
            let (x, y) = numeric_pair(a, b)?;
            Ok(if y < x { b.clone() } else { a.clone() })
        })
    }

    pub fn max() -> Self {
        Self::new("max", |a, b| {
            let (x, y) = numeric_pair(a, b)?;
            Ok(if y > x { b.clone() } else { a.clone() })
        })
    }

    /// Union of maps. A key present in both must carry the same value.
    pub fn merge_maps() -> Self {
        Self::new("merge_maps", |a, b| match (a, b) {
            (Value::Map(left), Value::Map(right)) => {
                let mut merged = left.clone();
                for (key, value) in right {
                    match merged.get(key) {
                        Some(existing) if existing != value => {
                            return Err(format!("conflicting values for key '{}'", key));
                        }
                        _ => {
                            merged.insert(key.clone(), value.clone());
                        }
                    }
                }
                Ok(Value::Map(merged))
            }
            _ => Err(format!("cannot merge {} with {}", a.kind(), b.kind())),
        })
    }
}

impl fmt::Debug for Combiner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Combiner").field("name", &self.name).finish()
    }
}

fn numeric_pair(a: &Value, b: &Value) -> Result<(f64, f64), String> {
    match (a.as_float(), b.as_float()) {
        (Some(x), Some(y)) => Ok((x, y)),
        _ => Err(format!("expected numbers, got {} and {}", a.kind(), b.kind())),
    }
}

pub(crate) fn reduce(values: &[(String, Value)], combiner: &Combiner) -> Result<Option<Value>, AggregationError> {
    let mut iter = values.iter();
    let Some((_, first)) = iter.next() else {
        return Ok(None);
    };

    let mut acc = first.clone();
    for (label, value) in iter {
        acc = combiner
            .apply(&acc, value)
            .map_err(|message| AggregationError::Combiner {
                label: label.clone(),
                message,
            })?;
    }
    Ok(Some(acc))
}
