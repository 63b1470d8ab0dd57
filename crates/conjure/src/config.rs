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


use crate::error::{ConjureError, ConjureResult};
use crate::fingerprint::FingerprintPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "gpt-4";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_CACHE_DIR: &str = ".conjure/cache";
pub const DEFAULT_MAX_DEPTH: u32 = 5;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    /// A shape mismatch fails the call.
    Strict,
    /// A shape mismatch is swallowed and the raw value returned.
    #[default]
    Lenient,
}

/// Partially specified configuration. Unset fields fall through to the environment and
/// then to built-in defaults when [`ConjureConfig::resolve`] is called.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConjureConfig {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub cache_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub strict: Option<bool>,
    pub max_depth: Option<u32>,
    pub fingerprint: Option<FingerprintPolicy>,
    pub coerce: Option<bool>,
    pub timeout_secs: Option<u64>,
    pub dedupe_synthesis: Option<bool>,
    pub hard_depth_limit: Option<bool>,
}

/// Fully resolved settings consumed by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub cache_dir: PathBuf,
    pub log_dir: PathBuf,
    pub validation: ValidationMode,
    pub max_depth: u32,
    pub fingerprint: FingerprintPolicy,
    pub coerce: bool,
    pub timeout: Duration,
    pub dedupe_synthesis: bool,
    pub hard_depth_limit: bool,
}

impl ConjureConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let text = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let flag = |key: &str| {
            text(key).map(|v| {
                let v = v.trim().to_ascii_lowercase();
                matches!(v.as_str(), "true" | "1" | "yes")
            })
        };
        Self {
            api_key: text("CONJURE_API_KEY").or_else(|| text("OPENAI_API_KEY")),
            model: text("CONJURE_MODEL"),
            base_url: text("CONJURE_BASE_URL"),
            cache_dir: text("CONJURE_CACHE_DIR").map(PathBuf::from),
            log_dir: text("CONJURE_LOG_DIR").map(PathBuf::from),
            strict: flag("CONJURE_STRICT"),
            max_depth: text("CONJURE_MAX_DEPTH")
                .and_then(|s| s.trim().parse::<u32>().ok())
                .filter(|&d| d > 0),
            fingerprint: text("CONJURE_FINGERPRINT").and_then(|s| s.parse().ok()),
            coerce: flag("CONJURE_COERCE"),
            timeout_secs: text("CONJURE_TIMEOUT_SECS").and_then(|s| s.trim().parse().ok()),
            dedupe_synthesis: None,
            hard_depth_limit: None,
        }
    }

    pub fn from_toml_file(path: &Path) -> ConjureResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConjureError::Config(format!("read {}: {e}", path.display())))?;
        toml::from_str(&raw)
            .map_err(|e| ConjureError::Config(format!("parse {}: {e}", path.display())))
    }

    /// Fills every unset field of `self` from `fallback`.
    pub fn merge(self, fallback: ConjureConfig) -> Self {
        Self {
            api_key: self.api_key.or(fallback.api_key),
            model: self.model.or(fallback.model),
            base_url: self.base_url.or(fallback.base_url),
            cache_dir: self.cache_dir.or(fallback.cache_dir),
            log_dir: self.log_dir.or(fallback.log_dir),
            strict: self.strict.or(fallback.strict),
            max_depth: self.max_depth.or(fallback.max_depth),
            fingerprint: self.fingerprint.or(fallback.fingerprint),
            coerce: self.coerce.or(fallback.coerce),
            timeout_secs: self.timeout_secs.or(fallback.timeout_secs),
            dedupe_synthesis: self.dedupe_synthesis.or(fallback.dedupe_synthesis),
            hard_depth_limit: self.hard_depth_limit.or(fallback.hard_depth_limit),
        }
    }

    /// Explicit values win over the environment, which wins over defaults.
    pub fn resolve(self) -> Settings {
        self.merge(Self::from_env()).into_settings()
    }

    /// Resolves against defaults only, ignoring the process environment.
    pub fn into_settings(self) -> Settings {
        let cache_dir = self
            .cache_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR));
        let log_dir = self
            .log_dir
            .unwrap_or_else(|| sibling_log_dir(&cache_dir));
        Settings {
            api_key: self.api_key.unwrap_or_default(),
            model: self.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: self
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            cache_dir,
            log_dir,
            validation: if self.strict.unwrap_or(false) {
                ValidationMode::Strict
            } else {
                ValidationMode::Lenient
            },
            max_depth: self.max_depth.unwrap_or(DEFAULT_MAX_DEPTH).max(1),
            fingerprint: self.fingerprint.unwrap_or_default(),
            coerce: self.coerce.unwrap_or(false),
            timeout: Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            dedupe_synthesis: self.dedupe_synthesis.unwrap_or(true),
            hard_depth_limit: self.hard_depth_limit.unwrap_or(true),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        ConjureConfig::default().into_settings()
    }
}

/// The log directory never lives under the cache root: `<dir>/cache` pairs with `<dir>/logs`,
/// any other `<dir>/<name>` pairs with `<dir>/<name>-logs`.
fn sibling_log_dir(cache_dir: &Path) -> PathBuf {
    match cache_dir.file_name() {
        Some(name) if name == "cache" => cache_dir.with_file_name("logs"),
        Some(name) => {
            let mut sibling = name.to_os_string();
            sibling.push("-logs");
            cache_dir.with_file_name(sibling)
        }
        None => cache_dir.join("..").join("conjure-logs"),
    }
}
