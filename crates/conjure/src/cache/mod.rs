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


pub mod file;
pub mod memory;

pub use file::FileCacheStore;
pub use memory::MemoryCacheStore;

use crate::error::ConjureResult;
use crate::fingerprint::Fingerprint;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Code synthesized for one fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesizedUnit {
    pub fingerprint: Fingerprint,
    pub code: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub model_id: Option<String>,
}

impl SynthesizedUnit {
    pub fn new(fingerprint: Fingerprint, code: String) -> Self {
        Self {
            fingerprint,
            code,
            created_at: Utc::now(),
            model_id: None,
        }
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    /// Read-only rendering of the unit as a standalone function, for humans.
    pub fn render_for_review(&self) -> String {
        let body: String = self
            .code
            .lines()
            .map(|line| format!("  {line}\n"))
            .collect();
        format!(
            "// {}\n// synthesized {}{}\nasync function generated(args, v, z) {{\n{}}}\n",
            self.fingerprint,
            self.created_at.to_rfc3339(),
            self.model_id
                .as_deref()
                .map(|m| format!(" by {m}"))
                .unwrap_or_default(),
            body
        )
    }
}

/// Persistence backend for synthesized units, addressed by fingerprint key.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn load(&self, key: &str) -> ConjureResult<Option<SynthesizedUnit>>;

    async fn store(&self, key: &str, unit: &SynthesizedUnit) -> ConjureResult<()>;

    async fn clear(&self) -> ConjureResult<()>;
}

/// Fingerprint-keyed cache over a [`CacheStore`]. Reads and writes never fail the caller:
/// a failed read is a miss and a failed write is logged.
#[derive(Clone)]
pub struct SynthesisCache {
    store: Arc<dyn CacheStore>,
}

impl SynthesisCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCacheStore::default()))
    }

    pub async fn get(&self, fingerprint: &Fingerprint) -> Option<SynthesizedUnit> {
        let key = fingerprint.key();
        match self.store.load(&key).await {
            Ok(Some(unit)) if unit.fingerprint == *fingerprint => Some(unit),
            Ok(Some(unit)) => {
                warn!(
                    key = %key,
                    stored = %unit.fingerprint,
                    requested = %fingerprint,
                    "cached unit does not match its key, ignoring"
                );
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "cache read failed, treating as miss");
                None
            }
        }
    }

    /// Returns whether the unit was written.
    pub async fn put(&self, unit: &SynthesizedUnit) -> bool {
        let key = unit.fingerprint.key();
        match self.store.store(&key, unit).await {
            Ok(()) => {
                debug!(key = %key, fingerprint = %unit.fingerprint, "cached synthesized unit");
                true
            }
            Err(e) => {
                warn!(key = %key, error = %e, "cache write failed, result still returned");
                false
            }
        }
    }

    pub async fn clear(&self) -> ConjureResult<()> {
        self.store.clear().await
    }
}
