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
use crate::error::ConjureResult;
use async_trait::async_trait;
use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    units: DashMap<String, SynthesizedUnit>,
}

impl MemoryCacheStore {
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn load(&self, key: &str) -> ConjureResult<Option<SynthesizedUnit>> {
        Ok(self.units.get(key).map(|entry| entry.value().clone()))
    }

    async fn store(&self, key: &str, unit: &SynthesizedUnit) -> ConjureResult<()> {
        self.units.insert(key.to_string(), unit.clone());
        Ok(())
    }

    async fn clear(&self) -> ConjureResult<()> {
        self.units.clear();
        Ok(())
    }
}
