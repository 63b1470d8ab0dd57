// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.


use super::Shape;
use crate::fingerprint::value_kind;
use serde_json::{Map, Number, Value};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationFailure {
    pub path: String,
    pub expected: String,
    pub found: String,
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "at {}: expected {}, found {}",
            self.path, self.expected, self.found
        )
    }
}

impl std::error::Error for ValidationFailure {}

/// Checks a value against a shape, returning the validated (possibly coerced) value.
pub trait ShapeValidator: Send + Sync {
    fn validate(&self, value: &Value, shape: &Shape) -> Result<Value, ValidationFailure>;
}

/// Default validator. Objects drop keys the shape does not name; primitives are only
/// converted between kinds when `coerce` is set.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaValidator {
    coerce: bool,
}

impl SchemaValidator {
    pub fn new(coerce: bool) -> Self {
        Self { coerce }
    }

    fn check(&self, value: &Value, shape: &Shape, path: &str) -> Result<Value, ValidationFailure> {
        let fail = |expected: String| ValidationFailure {
            path: path.to_string(),
            expected,
            found: describe_found(value),
        };
        match shape {
            Shape::Any => Ok(value.clone()),
            Shape::String => match value {
                Value::String(_) => Ok(value.clone()),
                Value::Number(n) if self.coerce => Ok(Value::String(n.to_string())),
                Value::Bool(b) if self.coerce => Ok(Value::String(b.to_string())),
                _ => Err(fail(shape.describe())),
            },
            Shape::Number => match value {
                Value::Number(_) => Ok(value.clone()),
                Value::String(s) if self.coerce => {
                    parse_number(s).ok_or_else(|| fail(shape.describe()))
                }
                _ => Err(fail(shape.describe())),
            },
            Shape::Integer => {
                let candidate = match value {
                    Value::String(s) if self.coerce => parse_number(s),
                    Value::Number(_) => Some(value.clone()),
                    _ => None,
                };
                candidate
                    .and_then(|v| integral(&v))
                    .ok_or_else(|| fail(shape.describe()))
            }
            Shape::Boolean => match value {
                Value::Bool(_) => Ok(value.clone()),
                Value::String(s) if self.coerce => match s.trim() {
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    _ => Err(fail(shape.describe())),
                },
                _ => Err(fail(shape.describe())),
            },
            Shape::Null => match value {
                Value::Null => Ok(Value::Null),
                _ => Err(fail(shape.describe())),
            },
            Shape::Array { items } => {
                let Value::Array(elements) = value else {
                    return Err(fail(shape.describe()));
                };
                elements
                    .iter()
                    .enumerate()
                    .map(|(i, element)| self.check(element, items, &format!("{path}[{i}]")))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array)
            }
            Shape::Object { fields } => {
                let Value::Object(map) = value else {
                    return Err(fail(shape.describe()));
                };
                let mut out = Map::new();
                for (key, field_shape) in fields {
                    let field_path = format!("{path}.{key}");
                    match map.get(key) {
                        Some(field) => {
                            let checked = self.check(field, field_shape, &field_path)?;
                            out.insert(key.clone(), checked);
                        }
                        None if field_shape.accepts_absent() => {}
                        None => {
                            return Err(ValidationFailure {
                                path: field_path,
                                expected: field_shape.describe(),
                                found: "nothing".into(),
                            })
                        }
                    }
                }
                Ok(Value::Object(out))
            }
            Shape::Optional { inner } => match value {
                Value::Null => Ok(Value::Null),
                other => self.check(other, inner, path),
            },
            Shape::Nullable { inner } => match value {
                Value::Null => Ok(Value::Null),
                other => self.check(other, inner, path),
            },
            Shape::Enum { values } => match value {
                Value::String(s) if values.iter().any(|v| v == s) => Ok(value.clone()),
                _ => Err(fail(shape.describe())),
            },
            Shape::Literal { value: expected } => {
                if expected == value {
                    Ok(value.clone())
                } else {
                    Err(fail(shape.describe()))
                }
            }
            Shape::Union { variants } => variants
                .iter()
                .find_map(|variant| self.check(value, variant, path).ok())
                .ok_or_else(|| fail(shape.describe())),
        }
    }
}

impl ShapeValidator for SchemaValidator {
    fn validate(&self, value: &Value, shape: &Shape) -> Result<Value, ValidationFailure> {
        self.check(value, shape, "$")
    }
}

fn describe_found(value: &Value) -> String {
    match value {
        Value::String(s) if s.len() <= 32 => format!("string \"{s}\""),
        Value::Number(n) => format!("number {n}"),
        Value::Bool(b) => format!("boolean {b}"),
        other => value_kind(other).to_string(),
    }
}

fn parse_number(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return Some(Value::Number(i.into()));
    }
    trimmed
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

fn integral(value: &Value) -> Option<Value> {
    let Value::Number(n) = value else {
        return None;
    };
    if n.is_i64() || n.is_u64() {
        return Some(value.clone());
    }
    let f = n.as_f64()?;
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(Value::Number((f as i64).into()))
    } else {
        None
    }
}
