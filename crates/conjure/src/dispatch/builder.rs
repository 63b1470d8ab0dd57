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


use super::Conjure;
use crate::activity::{ActivityLog, JsonlActivityLog, MemoryActivityLog};
use crate::cache::{CacheStore, FileCacheStore, MemoryCacheStore, SynthesisCache};
use crate::config::{ConjureConfig, Settings};
use crate::error::{ConjureError, ConjureResult};
use crate::executor::{SandboxExecutor, ScriptExecutor};
use crate::generator::{CodeGenerator, LlmGenerator, OpenAIClient};
use crate::orchestrator::CallOrchestrator;
use crate::shape::{SchemaValidator, ShapeValidator};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const MAX_RETRIES: u32 = 3;

/// Assembles a [`Conjure`] handle. Collaborators left unset are derived from the
/// resolved settings: an OpenAI generator, file-backed cache and JSONL activity log.
#[derive(Default)]
pub struct ConjureBuilder {
    config: ConjureConfig,
    settings: Option<Settings>,
    generator: Option<Arc<dyn CodeGenerator>>,
    cache_store: Option<Arc<dyn CacheStore>>,
    activity_log: Option<Arc<dyn ActivityLog>>,
    validator: Option<Arc<dyn ShapeValidator>>,
    executor: Option<Arc<dyn ScriptExecutor>>,
}

impl ConjureBuilder {
    /// Explicit configuration; unset fields fall back to the environment, then defaults.
    pub fn config(mut self, config: ConjureConfig) -> Self {
        self.config = config;
        self
    }

    /// Fully resolved settings. The environment is not consulted.
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn generator(mut self, generator: Arc<dyn CodeGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache_store = Some(store);
        self
    }

    pub fn activity_log(mut self, log: Arc<dyn ActivityLog>) -> Self {
        self.activity_log = Some(log);
        self
    }

    pub fn validator(mut self, validator: Arc<dyn ShapeValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn ScriptExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Keeps the cache and the activity log in process memory.
    pub fn in_memory(mut self) -> Self {
        self.cache_store = Some(Arc::new(MemoryCacheStore::default()));
        self.activity_log = Some(Arc::new(MemoryActivityLog::default()));
        self
    }

    pub fn build(self) -> ConjureResult<Conjure> {
        let settings = match self.settings {
            Some(settings) => settings,
            None => self.config.resolve(),
        };

        let generator = match self.generator {
            Some(generator) => generator,
            None => default_generator(&settings)?,
        };
        let cache_store = self
            .cache_store
            .unwrap_or_else(|| Arc::new(FileCacheStore::new(settings.cache_dir.clone())));
        let activity_log = self
            .activity_log
            .unwrap_or_else(|| Arc::new(JsonlActivityLog::new(settings.log_dir.clone())));
        let validator = self
            .validator
            .unwrap_or_else(|| Arc::new(SchemaValidator::new(settings.coerce)));
        let executor = self
            .executor
            .unwrap_or_else(|| Arc::new(SandboxExecutor::new(settings.timeout)));

        debug!(
            max_depth = settings.max_depth,
            validation = ?settings.validation,
            fingerprint = ?settings.fingerprint,
            "conjure engine assembled"
        );

        let orchestrator = CallOrchestrator::new(
            settings,
            SynthesisCache::new(cache_store),
            generator,
            executor,
            validator,
            activity_log,
        );
        Ok(Conjure::root(Arc::new(orchestrator)))
    }
}

fn default_generator(settings: &Settings) -> ConjureResult<Arc<dyn CodeGenerator>> {
    if settings.api_key.is_empty() {
        return Err(ConjureError::Config(
            "no API key configured; set CONJURE_API_KEY or OPENAI_API_KEY".to_string(),
        ));
    }
    let client = OpenAIClient::new(
        settings.api_key.clone(),
        &settings.base_url,
        REQUEST_TIMEOUT,
        MAX_RETRIES,
    )
    .map_err(|e| ConjureError::Config(e.to_string()))?;
    Ok(Arc::new(LlmGenerator::new(client, settings.model.clone())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::ScriptedGenerator;

    #[test]
    fn missing_api_key_is_a_config_error() {
        let err = ConjureBuilder::default()
            .settings(Settings::default())
            .in_memory()
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, ConjureError::Config(msg) if msg.contains("CONJURE_API_KEY")));
    }

    #[test]
    fn explicit_settings_reach_the_orchestrator() {
        let settings = Settings {
            max_depth: 3,
            ..Settings::default()
        };
        let conjure = ConjureBuilder::default()
            .settings(settings)
            .generator(Arc::new(ScriptedGenerator::new()))
            .in_memory()
            .build()
            .unwrap();
        assert_eq!(conjure.settings().max_depth, 3);
        assert_eq!(conjure.depth(), 0);
    }

    #[test]
    fn api_key_enables_the_default_generator() {
        let settings = Settings {
            api_key: "sk-test".into(),
            ..Settings::default()
        };
        assert!(ConjureBuilder::default()
            .settings(settings)
            .in_memory()
            .build()
            .is_ok());
    }
}
