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


use super::{CacheStore, SynthesizedUnit};
use crate::error::{ConjureError, ConjureResult};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;

static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

/// One `<key>.json` file per unit under `root`, with a `<key>.js` review copy beside it.
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    root: PathBuf,
}

impl FileCacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn unit_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    fn review_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.js"))
    }
}

fn io_error(action: &str, path: &Path, err: std::io::Error) -> ConjureError {
    ConjureError::CacheIo(format!("{action} {}: {err}", path.display()))
}

fn is_cache_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| matches!(ext, "json" | "js" | "tmp"))
}

#[async_trait]
impl CacheStore for FileCacheStore {
    async fn load(&self, key: &str) -> ConjureResult<Option<SynthesizedUnit>> {
        let path = self.unit_path(key);
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error("read", &path, e)),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| ConjureError::CacheIo(format!("decode {}: {e}", path.display())))
    }

    async fn store(&self, key: &str, unit: &SynthesizedUnit) -> ConjureResult<()> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| io_error("create", &self.root, e))?;
        let path = self.unit_path(key);
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let seq = STAGING_SEQ.fetch_add(1, Ordering::Relaxed);
        let staging = self.root.join(format!("{key}.{nanos}-{seq}.tmp"));
        let encoded = serde_json::to_vec_pretty(unit)?;
        fs::write(&staging, encoded)
            .await
            .map_err(|e| io_error("write", &staging, e))?;
        fs::rename(&staging, &path)
            .await
            .map_err(|e| io_error("rename", &path, e))?;

        let review = self.review_path(key);
        if let Err(e) = fs::write(&review, unit.render_for_review()).await {
            tracing::debug!(path = %review.display(), error = %e, "review copy not written");
        }
        Ok(())
    }

    /// Removes unit, review and staging files only; anything else under `root` survives.
    async fn clear(&self) -> ConjureResult<()> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(io_error("list", &self.root, e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error("list", &self.root, e))?
        {
            let path = entry.path();
            let is_file = entry.file_type().await.is_ok_and(|t| t.is_file());
            if !is_file || !is_cache_file(&path) {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(io_error("remove", &path, e)),
            }
        }
        Ok(())
    }
}
