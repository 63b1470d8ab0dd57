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
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct MemoryActivityLog {
    records: Mutex<Vec<ActivityRecord>>,
}

impl MemoryActivityLog {
    pub fn records(&self) -> Vec<ActivityRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    fn guard(&self) -> ConjureResult<MutexGuard<'_, Vec<ActivityRecord>>> {
        self.records
            .lock()
            .map_err(|_| ConjureError::LogIo("in-memory activity log lock poisoned".into()))
    }
}

#[async_trait]
impl ActivityLog for MemoryActivityLog {
    async fn append(&self, record: &ActivityRecord) -> ConjureResult<()> {
        self.guard()?.push(record.clone());
        Ok(())
    }

    async fn read_day(&self, day: NaiveDate) -> ConjureResult<Vec<ActivityRecord>> {
        Ok(self
            .guard()?
            .iter()
            .filter(|r| r.day() == day)
            .cloned()
            .collect())
    }

    async fn clear(&self) -> ConjureResult<()> {
        self.guard()?.clear();
        Ok(())
    }
}
