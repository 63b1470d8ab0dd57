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


//! Append-only record of every resolved call.

pub mod jsonl;
pub mod memory;

pub use jsonl::JsonlActivityLog;
pub use memory::MemoryActivityLog;

use crate::error::ConjureResult;
use crate::generator::GenerationMetadata;
use crate::orchestrator::CallState;
use crate::shape::Shape;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ValidationOutcome {
    /// No shape was requested, or the call failed before validation.
    #[default]
    Skipped,
    Passed,
    /// Lenient mode: the mismatch was ignored and the raw value returned.
    Swallowed { reason: String },
    /// Strict mode: the mismatch failed the call.
    Rejected { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub arguments: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_shape: Option<Shape>,
    pub depth: u32,
    pub fingerprint: String,
    pub from_cache: bool,
    #[serde(default)]
    pub deduplicated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default)]
    pub validation: ValidationOutcome,
    #[serde(default)]
    pub cache_written: bool,
    pub path: Vec<CallState>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<GenerationMetadata>,
}

impl ActivityRecord {
    pub fn day(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }

    pub fn succeeded(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

#[async_trait]
pub trait ActivityLog: Send + Sync {
    async fn append(&self, record: &ActivityRecord) -> ConjureResult<()>;

    /// Records written on the given UTC calendar day, oldest first.
    async fn read_day(&self, day: NaiveDate) -> ConjureResult<Vec<ActivityRecord>>;

    async fn clear(&self) -> ConjureResult<()>;
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn record(name: &str, timestamp: DateTime<Utc>) -> ActivityRecord {
        ActivityRecord {
            timestamp,
            name: name.to_string(),
            arguments: vec![serde_json::json!(5), serde_json::json!(3)],
            output_shape: None,
            depth: 0,
            fingerprint: format!("{name}(number|number)"),
            from_cache: false,
            deduplicated: false,
            code: Some("return args[0] + args[1];".into()),
            outcome: Outcome::Success,
            result: Some(serde_json::json!(8)),
            error: None,
            error_kind: None,
            validation: ValidationOutcome::Skipped,
            cache_written: true,
            path: vec![CallState::Init, CallState::Done],
            duration_ms: 12,
            generation: None,
        }
    }
}
