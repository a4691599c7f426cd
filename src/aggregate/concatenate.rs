// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::errors::AggregationError;
use crate::graph::{Shape, Value, ValueKind};

/// Joins branch values in order.
///
/// Lists are concatenated along their first axis and every non-empty list
/// must share the first one's element shape. Texts and byte strings are
/// joined. Scalars of one shape are stacked into a list. Maps cannot be
/// concatenated.
pub(crate) fn concatenate(values: &[(String, Value)]) -> Result<Option<Value>, AggregationError> {
    let Some((first_label, first)) = values.first() else {
        return Ok(None);
    };

    match first {
        Value::List(_) => concat_lists(values).map(Some),
        Value::Text(_) => {
            let mut joined = String::new();
            for (label, value) in values {
                match value {
                    Value::Text(text) => joined.push_str(text),
                    other => return Err(not_concatenable(label, other)),
                }
            }
            Ok(Some(Value::Text(joined)))
        }
        Value::Bytes(_) => {
            let mut joined = Vec::new();
            for (label, value) in values {
                match value {
                    Value::Bytes(bytes) => joined.extend_from_slice(bytes),
                    other => return Err(not_concatenable(label, other)),
                }
            }
            Ok(Some(Value::Bytes(joined)))
        }
        Value::Map(_) => Err(not_concatenable(first_label, first)),
        _ => {
            let expected = first.shape();
            for (label, value) in values {
                let found = value.shape();
                if found != expected {
                    return Err(AggregationError::ShapeMismatch {
                        label: label.clone(),
                        expected,
                        found,
                    });
                }
            }
            Ok(Some(Value::List(values.iter().map(|(_, v)| v.clone()).collect())))
        }
    }
}

fn concat_lists(values: &[(String, Value)]) -> Result<Value, AggregationError> {
    let mut expected: Option<Shape> = None;
    let mut joined = Vec::new();

    for (label, value) in values {
        let Value::List(items) = value else {
            return Err(not_concatenable(label, value));
        };
        if items.is_empty() {
            continue;
        }
        let element = element_shape(value);
        match &expected {
            None => expected = Some(element),
            Some(shape) if *shape != element => {
                return Err(AggregationError::ShapeMismatch {
                    label: label.clone(),
                    expected: shape.clone(),
                    found: element,
                });
            }
            Some(_) => {}
        }
        joined.extend(items.iter().cloned());
    }

    Ok(Value::List(joined))
}

fn element_shape(list: &Value) -> Shape {
    list.shape().element_shape().unwrap_or(Shape {
        dims: Vec::new(),
        element: ValueKind::Mixed,
    })
}

fn not_concatenable(label: &str, value: &Value) -> AggregationError {
    AggregationError::NotConcatenable {
        label: label.to_string(),
        kind: value.kind(),
    }
}
