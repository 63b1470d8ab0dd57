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


//! Cache keys for synthesized implementations.
//!
//! Under [`FingerprintPolicy::Kind`] a key is built from the call name, the runtime kind of
//! each argument and the identity of the output shape, so `add(1, 2)` and `add(3, 4)` share
//! one implementation. [`FingerprintPolicy::Value`] keys on the canonical argument values
//! instead and therefore memoizes per distinct input.

use crate::shape::Shape;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintPolicy {
    #[default]
    Kind,
    Value,
}

impl FromStr for FingerprintPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "kind" | "type" | "fast" => Ok(FingerprintPolicy::Kind),
            "value" | "strict" => Ok(FingerprintPolicy::Value),
            other => Err(format!("unknown fingerprint policy: {other}")),
        }
    }
}

/// Coarse runtime kind of a value.
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// JSON rendering with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub policy: FingerprintPolicy,
    pub name: String,
    pub params: String,
    pub output: Option<String>,
}

impl Fingerprint {
    pub fn compute(
        name: &str,
        arguments: &[Value],
        output_shape: Option<&Shape>,
        policy: FingerprintPolicy,
    ) -> Self {
        let params = match policy {
            FingerprintPolicy::Kind => arguments
                .iter()
                .map(value_kind)
                .collect::<Vec<_>>()
                .join("|"),
            FingerprintPolicy::Value => canonical_json(&Value::Array(arguments.to_vec())),
        };
        Self {
            policy,
            name: name.to_string(),
            params,
            output: output_shape.map(Shape::identity),
        }
    }

    pub fn canonical(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{self}"))
    }

    /// Content hash of the canonical form; bounded length regardless of the call name.
    pub fn key(&self) -> String {
        hex::encode(Sha256::digest(self.canonical().as_bytes()))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.params)?;
        if let Some(output) = &self.output {
            write!(f, " -> {output}")?;
        }
        Ok(())
    }
}
