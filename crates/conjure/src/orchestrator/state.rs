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


use crate::shape::Shape;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// States a call moves through. `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Init,
    CacheLookup,
    CacheHit,
    CacheMiss,
    Synthesize,
    Execute,
    Validate,
    Persist,
    Done,
    Failed,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Done | CallState::Failed)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CallState::Init => "init",
            CallState::CacheLookup => "cache_lookup",
            CallState::CacheHit => "cache_hit",
            CallState::CacheMiss => "cache_miss",
            CallState::Synthesize => "synthesize",
            CallState::Execute => "execute",
            CallState::Validate => "validate",
            CallState::Persist => "persist",
            CallState::Done => "done",
            CallState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// One dispatched invocation. Immutable once handed to the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub name: String,
    pub arguments: Vec<Value>,
    pub output_shape: Option<Shape>,
    pub depth: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CallStats {
    pub hits: u64,
    pub misses: u64,
    pub generations: u64,
    pub failures: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    generations: AtomicU64,
    failures: AtomicU64,
}

impl StatCounters {
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn generation(&self) {
        self.generations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CallStats {
        CallStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            generations: self.generations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_serialise_as_snake_case() {
        let path = vec![CallState::Init, CallState::CacheMiss, CallState::Done];
        assert_eq!(
            serde_json::to_string(&path).unwrap(),
            r#"["init","cache_miss","done"]"#
        );
        assert_eq!(CallState::CacheLookup.to_string(), "cache_lookup");
        assert!(CallState::Failed.is_terminal());
        assert!(!CallState::Persist.is_terminal());
    }

    #[test]
    fn counters_snapshot() {
        let counters = StatCounters::default();
        counters.hit();
        counters.miss();
        counters.miss();
        counters.generation();
        assert_eq!(
            counters.snapshot(),
            CallStats {
                hits: 1,
                misses: 2,
                generations: 1,
                failures: 0
            }
        );
    }
}
