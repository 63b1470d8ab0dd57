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


//! Declarative descriptions of an expected value and the capability to check a value
//! against one.

pub mod validator;

pub use validator::{SchemaValidator, ShapeValidator, ValidationFailure};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Shape {
    Any,
    String,
    Number,
    Integer,
    Boolean,
    Null,
    Array { items: Box<Shape> },
    Object { fields: BTreeMap<String, Shape> },
    Optional { inner: Box<Shape> },
    Nullable { inner: Box<Shape> },
    Enum { values: Vec<String> },
    Literal { value: Value },
    Union { variants: Vec<Shape> },
}

impl Shape {
    pub fn array(items: Shape) -> Self {
        Shape::Array {
            items: Box::new(items),
        }
    }

    pub fn object<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Shape)>,
    {
        Shape::Object {
            fields: fields.into_iter().map(|(k, s)| (k.into(), s)).collect(),
        }
    }

    pub fn optional(self) -> Self {
        Shape::Optional {
            inner: Box::new(self),
        }
    }

    pub fn nullable(self) -> Self {
        Shape::Nullable {
            inner: Box::new(self),
        }
    }

    pub fn one_of<S: Into<String>>(values: impl IntoIterator<Item = S>) -> Self {
        Shape::Enum {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Compact type notation used when describing the contract to a generator.
    pub fn describe(&self) -> String {
        match self {
            Shape::Any => "any".into(),
            Shape::String => "string".into(),
            Shape::Number => "number".into(),
            Shape::Integer => "integer".into(),
            Shape::Boolean => "boolean".into(),
            Shape::Null => "null".into(),
            Shape::Array { items } => match items.as_ref() {
                Shape::Union { .. } | Shape::Nullable { .. } => format!("({})[]", items.describe()),
                other => format!("{}[]", other.describe()),
            },
            Shape::Object { fields } => {
                if fields.is_empty() {
                    return "{}".into();
                }
                let props: Vec<String> = fields
                    .iter()
                    .map(|(k, v)| format!("{k}: {}", v.describe()))
                    .collect();
                format!("{{ {} }}", props.join(", "))
            }
            Shape::Optional { inner } => format!("{}?", inner.describe()),
            Shape::Nullable { inner } => format!("{} | null", inner.describe()),
            Shape::Enum { values } => values
                .iter()
                .map(|v| format!("\"{v}\""))
                .collect::<Vec<_>>()
                .join(" | "),
            Shape::Literal { value } => value.to_string(),
            Shape::Union { variants } => variants
                .iter()
                .map(Shape::describe)
                .collect::<Vec<_>>()
                .join(" | "),
        }
    }

    /// Canonical JSON rendering; object fields are ordered so equal shapes render equally.
    pub fn canonical_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.describe())
    }

    /// Stable identity used as the output-contract component of a fingerprint.
    pub fn identity(&self) -> String {
        let digest = Sha256::digest(self.canonical_json().as_bytes());
        hex::encode(&digest[..12])
    }

    /// Whether `undefined`/absent is acceptable for this shape.
    pub fn accepts_absent(&self) -> bool {
        matches!(self, Shape::Optional { .. } | Shape::Any)
    }
}
