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


use super::{CodeGenerator, GenerationMetadata, GenerationRequest, GenerationResponse};
use async_trait::async_trait;
use llm_contracts::{LLMError, LLMResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

type Matcher = Box<dyn Fn(&GenerationRequest) -> bool + Send + Sync>;

enum Reply {
    Code(String),
    Fail(String),
}

/// Offline generator answering from a fixed rule table. Every request is recorded.
///
/// Rules are checked in insertion order; the first matching rule supplies the code.
pub struct ScriptedGenerator {
    rules: Vec<(Matcher, Reply)>,
    fallback: Option<String>,
    latency: Option<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl Default for ScriptedGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            fallback: None,
            latency: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answers calls named exactly `name` with `code`.
    pub fn with(self, name: &str, code: impl Into<String>) -> Self {
        let name = name.to_string();
        self.when(move |r| r.name == name, code)
    }

    pub fn when(
        mut self,
        matcher: impl Fn(&GenerationRequest) -> bool + Send + Sync + 'static,
        code: impl Into<String>,
    ) -> Self {
        self.rules.push((Box::new(matcher), Reply::Code(code.into())));
        self
    }

    /// Fails every call named `name` with a provider error.
    pub fn failing(mut self, name: &str, message: impl Into<String>) -> Self {
        let name = name.to_string();
        self.rules
            .push((Box::new(move |r| r.name == name), Reply::Fail(message.into())));
        self
    }

    pub fn otherwise(mut self, code: impl Into<String>) -> Self {
        self.fallback = Some(code.into());
        self
    }

    /// Delay applied before each answer, to widen races in tests.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CodeGenerator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> LLMResult<GenerationResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let reply = self
            .rules
            .iter()
            .find(|(matcher, _)| matcher(request))
            .map(|(_, reply)| reply);
        let code = match (reply, &self.fallback) {
            (Some(Reply::Code(code)), _) => code.clone(),
            (Some(Reply::Fail(message)), _) => return Err(LLMError::Provider(message.clone())),
            (None, Some(code)) => code.clone(),
            (None, None) => {
                return Err(LLMError::Provider(format!(
                    "no scripted implementation for {}",
                    request.name
                )))
            }
        };
        Ok(GenerationResponse {
            metadata: GenerationMetadata {
                model_id: "scripted".into(),
                raw_content: code.clone(),
                finish_reason: Some("stop".into()),
                ..Default::default()
            },
            code,
        })
    }
}
