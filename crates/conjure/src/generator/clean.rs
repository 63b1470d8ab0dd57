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


use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static FENCE_OPEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^```(?:javascript|js|typescript|ts)?[ \t]*\r?\n").expect("valid fence regex")
});
static FENCE_CLOSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\r?\n?```\s*$").expect("valid fence regex"));
static FUNCTION_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:async\s+)?function\s*\*?\s*[\w$]*\s*\([^)]*\)\s*\{(?s)(.*)\}$")
        .expect("valid function regex")
});
static ARROW_FN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:async\s+)?\([^)]*\)\s*=>\s*\{(?s)(.*)\}$").expect("valid arrow regex")
});

/// Reduces a model reply to a bare function body.
///
/// Handles markdown fences, a `{"code": "..."}` JSON envelope, and a wrapping function
/// declaration or arrow function. Anything else is returned trimmed.
pub fn clean_generated_code(raw: &str) -> String {
    let mut code = raw.trim().to_string();

    if FENCE_OPEN.is_match(&code) {
        code = FENCE_OPEN.replace(&code, "").into_owned();
        code = FENCE_CLOSE.replace(&code, "").trim().to_string();
    }

    if code.starts_with('{') {
        if let Ok(Value::Object(envelope)) = serde_json::from_str::<Value>(&code) {
            if let Some(inner) = envelope.get("code").and_then(Value::as_str) {
                return clean_generated_code(inner);
            }
        }
    }

    if let Some(body) = FUNCTION_DECL
        .captures(&code)
        .or_else(|| ARROW_FN.captures(&code))
        .and_then(|c| c.get(1))
    {
        return body.as_str().trim().to_string();
    }

    code
}
