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


use super::{
    clean_generated_code, ApiClient, CodeGenerator, GenerationMetadata, GenerationRequest,
    GenerationResponse, PromptBuilder,
};
use async_trait::async_trait;
use llm_contracts::{LLMError, LLMResult, Message, ProviderRequest};
use tracing::{debug, instrument};

pub const DEFAULT_TEMPERATURE: f32 = 0.6;
pub const DEFAULT_MAX_TOKENS: u32 = 2000;

/// Generator backed by a chat-completion model.
pub struct LlmGenerator<C: ApiClient> {
    client: C,
    model: String,
    prompts: PromptBuilder,
    temperature: f32,
    max_tokens: u32,
}

impl<C: ApiClient> LlmGenerator<C> {
    pub fn new(client: C, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            prompts: PromptBuilder,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl<C: ApiClient> CodeGenerator for LlmGenerator<C> {
    #[instrument(skip_all, fields(name = %request.name, depth = request.depth, provider = self.client.provider_name()))]
    async fn generate(&self, request: &GenerationRequest) -> LLMResult<GenerationResponse> {
        let system_prompt = self.prompts.system_prompt();
        let user_prompt = self.prompts.user_prompt(request);

        let provider_request = ProviderRequest::new(self.model.clone())
            .with_message(Message::system(system_prompt.clone()))
            .with_message(Message::user(user_prompt.clone()))
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens);

        let response = self.client.send_request(provider_request).await?;
        let code = clean_generated_code(&response.content);
        if code.is_empty() {
            return Err(LLMError::EmptyCompletion(self.client.provider_name().to_string()));
        }
        debug!(model = %response.model, bytes = code.len(), "implementation generated");

        Ok(GenerationResponse {
            code,
            metadata: GenerationMetadata {
                model_id: response.model,
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                system_prompt,
                user_prompt,
                raw_content: response.content,
                finish_reason: response.finish_reason,
                usage: response.usage,
            },
        })
    }
}
