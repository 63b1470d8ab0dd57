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


use super::{ActivityLog, ActivityRecord};
use crate::error::{ConjureError, ConjureResult};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

/// One JSON line per record in `conjure-YYYY-MM-DD.jsonl`, partitioned by UTC day.
#[derive(Debug)]
pub struct JsonlActivityLog {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlActivityLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn day_file(&self, day: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("conjure-{}.jsonl", day.format("%Y-%m-%d")))
    }
}

fn io_error(action: &str, path: &Path, err: std::io::Error) -> ConjureError {
    ConjureError::LogIo(format!("{action} {}: {err}", path.display()))
}

#[async_trait]
impl ActivityLog for JsonlActivityLog {
    async fn append(&self, record: &ActivityRecord) -> ConjureResult<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let path = self.day_file(record.day());

        let _guard = self.write_lock.lock().await;
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error("create", &self.dir, e))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| io_error("open", &path, e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| io_error("append", &path, e))?;
        file.flush().await.map_err(|e| io_error("flush", &path, e))
    }

    async fn read_day(&self, day: NaiveDate) -> ConjureResult<Vec<ActivityRecord>> {
        let path = self.day_file(day);
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error("read", &path, e)),
        };
        let mut records = Vec::new();
        for (number, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ActivityRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    file = %path.display(),
                    line = number + 1,
                    error = %e,
                    "skipping unreadable activity line"
                ),
            }
        }
        Ok(records)
    }

    async fn clear(&self) -> ConjureResult<()> {
        let _guard = self.write_lock.lock().await;
        match fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("remove", &self.dir, e)),
        }
    }
}
