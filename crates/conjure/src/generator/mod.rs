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


//! The collaborator that writes implementations: given a call, produce a script body.

pub mod clean;
pub mod llm;
pub mod openai;
pub mod prompt;
pub mod scripted;

pub use clean::clean_generated_code;
pub use llm::LlmGenerator;
pub use openai::{ApiClient, OpenAIClient};
pub use prompt::PromptBuilder;
pub use scripted::ScriptedGenerator;

use crate::shape::Shape;
use async_trait::async_trait;
use llm_contracts::{LLMResult, Usage};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub name: String,
    pub arguments: Vec<Value>,
    pub output_shape: Option<Shape>,
    /// Set on the last permitted hop; the implementation should answer without delegating.
    pub is_terminal_hop: bool,
    pub depth: u32,
}

/// What was asked of the model and what came back, kept for the activity log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GenerationMetadata {
    pub model_id: String,
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub user_prompt: String,
    #[serde(default)]
    pub raw_content: String,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub code: String,
    pub metadata: GenerationMetadata,
}

#[async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> LLMResult<GenerationResponse>;
}
