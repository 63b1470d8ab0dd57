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


use llm_contracts::LLMError;
use thiserror::Error;

/// Failure taxonomy of a dispatched call.
///
/// `Generation`, `Execution`, `Validation` (strict mode) and `DepthExceeded` reject the
/// call. `CacheIo` and `LogIo` are logged and never reject a call.
#[derive(Debug, Clone, Error)]
pub enum ConjureError {
    #[error("generation failed: {0}")]
    Generation(String),

    #[error("execution failed: {message}")]
    Execution { code: String, message: String },

    #[error("output validation failed: {0}")]
    Validation(String),

    #[error("cache io error: {0}")]
    CacheIo(String),

    #[error("activity log io error: {0}")]
    LogIo(String),

    #[error("call depth {depth} exceeds the ceiling of {max_depth}")]
    DepthExceeded { depth: u32, max_depth: u32 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialisation error: {0}")]
    Serialisation(String),
}

impl ConjureError {
    pub fn execution(code: impl Into<String>, message: impl Into<String>) -> Self {
        ConjureError::Execution {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Short label recorded in the activity log.
    pub fn kind(&self) -> &'static str {
        match self {
            ConjureError::Generation(_) => "generation",
            ConjureError::Execution { .. } => "execution",
            ConjureError::Validation(_) => "validation",
            ConjureError::CacheIo(_) => "cache_io",
            ConjureError::LogIo(_) => "log_io",
            ConjureError::DepthExceeded { .. } => "depth_exceeded",
            ConjureError::Config(_) => "config",
            ConjureError::Serialisation(_) => "serialisation",
        }
    }
}

impl From<LLMError> for ConjureError {
    fn from(err: LLMError) -> Self {
        ConjureError::Generation(err.to_string())
    }
}

impl From<serde_json::Error> for ConjureError {
    fn from(err: serde_json::Error) -> Self {
        ConjureError::Serialisation(err.to_string())
    }
}

pub type ConjureResult<T> = Result<T, ConjureError>;
