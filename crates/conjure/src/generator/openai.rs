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


use async_trait::async_trait;
use llm_contracts::{LLMError, LLMResult, ProviderRequest, ProviderResponse, Usage};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

#[async_trait]
pub trait ApiClient: Send + Sync {
    async fn send_request(&self, request: ProviderRequest) -> LLMResult<ProviderResponse>;

    fn provider_name(&self) -> &'static str;
}

/// Chat-completions client for OpenAI and compatible endpoints.
#[derive(Debug, Clone)]
pub struct OpenAIClient {
    client: Client,
    api_key: String,
    endpoint: String,
    timeout: Duration,
    max_retries: u32,
    backoff: Duration,
}

impl OpenAIClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: &str,
        timeout: Duration,
        max_retries: u32,
    ) -> LLMResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LLMError::Configuration(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            timeout,
            max_retries: max_retries.max(1),
            backoff: Duration::from_secs(1),
        })
    }

    /// Base delay between attempts; doubled per attempt, capped at eight times the base.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn build_openai_payload(&self, request: &ProviderRequest) -> Value {
        let mut payload = json!({
            "model": request.model,
            "messages": request.messages.iter().map(|msg| {
                json!({
                    "role": msg.role.as_str(),
                    "content": msg.content
                })
            }).collect::<Vec<_>>()
        });

        if let Some(max_tokens) = request.max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }
        if let Some(temperature) = request.temperature {
            payload["temperature"] = json!(temperature);
        }
        payload
    }

    fn parse_openai_response(&self, response_data: Value, model: String) -> LLMResult<ProviderResponse> {
        let content = response_data["choices"][0]["message"]["content"]
            .as_str()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| LLMError::EmptyCompletion(self.provider_name().to_string()))?
            .to_string();

        let finish_reason = response_data["choices"][0]["finish_reason"]
            .as_str()
            .map(|s| s.to_string());
        let model = response_data["model"]
            .as_str()
            .map(|s| s.to_string())
            .unwrap_or(model);

        Ok(ProviderResponse {
            content,
            model,
            usage: Usage::from_openai(&response_data),
            finish_reason,
        })
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff * 2_u32.pow(attempt.min(3))
    }

    /// Sends one attempt and classifies any failure as an [`LLMError`].
    async fn attempt(&self, payload: &Value) -> LLMResult<Value> {
        let response = tokio::time::timeout(
            self.timeout,
            self.client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(payload)
                .send(),
        )
        .await
        .map_err(|_| LLMError::Timeout)?
        .map_err(|e| LLMError::Network(format!("Request failed: {e}")))?;

        match response.status() {
            status if status.is_success() => response
                .json()
                .await
                .map_err(|e| LLMError::Serialisation(format!("Failed to parse response: {e}"))),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let body = response.text().await.unwrap_or_default();
                Err(LLMError::Authentication(format!(
                    "{} rejected credentials: {body}",
                    self.provider_name()
                )))
            }
            StatusCode::TOO_MANY_REQUESTS => Err(LLMError::RateLimit),
            status => {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                let message = format!("OpenAI API error {status}: {body}");
                if status.is_server_error() {
                    Err(LLMError::Unavailable(message))
                } else {
                    Err(LLMError::Provider(message))
                }
            }
        }
    }

    async fn execute_request_with_retry(&self, payload: &Value) -> LLMResult<Value> {
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.delay_for(attempt - 1)).await;
            }

            match self.attempt(payload).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_retryable() => {
                    warn!(attempt, error = %e, "provider request failed, retrying");
                    last_error = Some(e);
                }
                Err(e) => {
                    debug!(attempt, error = %e, "provider request failed permanently");
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| LLMError::Internal("Unknown error".to_string())))
    }
}

#[async_trait]
impl ApiClient for OpenAIClient {
    async fn send_request(&self, request: ProviderRequest) -> LLMResult<ProviderResponse> {
        let payload = self.build_openai_payload(&request);
        let response_data = self.execute_request_with_retry(&payload).await?;
        self.parse_openai_response(response_data, request.model)
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}
