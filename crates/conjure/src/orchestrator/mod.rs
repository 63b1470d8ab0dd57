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


//! Resolves one call end to end: fingerprint, cache lookup, synthesis, execution,
//! validation, cache write and activity record.

mod state;

pub use state::{Call, CallState, CallStats};

use crate::activity::{ActivityLog, ActivityRecord, Outcome, ValidationOutcome};
use crate::cache::{SynthesisCache, SynthesizedUnit};
use crate::config::{Settings, ValidationMode};
use crate::dispatch::Conjure;
use crate::error::{ConjureError, ConjureResult};
use crate::executor::{ExecutionContext, ScriptExecutor};
use crate::fingerprint::Fingerprint;
use crate::generator::{CodeGenerator, GenerationMetadata, GenerationRequest};
use crate::shape::ShapeValidator;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use state::StatCounters;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone)]
struct Synthesis {
    unit: SynthesizedUnit,
    metadata: GenerationMetadata,
}

type PendingSynthesis = Shared<BoxFuture<'static, ConjureResult<Synthesis>>>;

pub struct CallOrchestrator {
    settings: Settings,
    cache: SynthesisCache,
    generator: Arc<dyn CodeGenerator>,
    executor: Arc<dyn ScriptExecutor>,
    validator: Arc<dyn ShapeValidator>,
    log: Arc<dyn ActivityLog>,
    in_flight: DashMap<String, PendingSynthesis>,
    stats: Arc<StatCounters>,
}

/// What happened during one call, folded into its activity record at the end.
struct CallTrace {
    started: Instant,
    timestamp: DateTime<Utc>,
    path: Vec<CallState>,
    fingerprint: Fingerprint,
    from_cache: bool,
    deduplicated: bool,
    code: Option<String>,
    validation: ValidationOutcome,
    cache_written: bool,
    generation: Option<GenerationMetadata>,
}

impl CallTrace {
    fn new(fingerprint: Fingerprint) -> Self {
        Self {
            started: Instant::now(),
            timestamp: Utc::now(),
            path: Vec::new(),
            fingerprint,
            from_cache: false,
            deduplicated: false,
            code: None,
            validation: ValidationOutcome::Skipped,
            cache_written: false,
            generation: None,
        }
    }

    fn enter(&mut self, state: CallState) {
        debug!(%state, fingerprint = %self.fingerprint, "call state");
        self.path.push(state);
    }

    fn into_record(mut self, call: &Call, result: &ConjureResult<Value>) -> ActivityRecord {
        let (outcome, value, error, error_kind) = match result {
            Ok(value) => {
                self.enter(CallState::Done);
                (Outcome::Success, Some(value.clone()), None, None)
            }
            Err(e) => {
                self.enter(CallState::Failed);
                (
                    Outcome::Failed,
                    None,
                    Some(e.to_string()),
                    Some(e.kind().to_string()),
                )
            }
        };
        ActivityRecord {
            timestamp: self.timestamp,
            name: call.name.clone(),
            arguments: call.arguments.clone(),
            output_shape: call.output_shape.clone(),
            depth: call.depth,
            fingerprint: self.fingerprint.to_string(),
            from_cache: self.from_cache,
            deduplicated: self.deduplicated,
            code: self.code,
            outcome,
            result: value,
            error,
            error_kind,
            validation: self.validation,
            cache_written: self.cache_written,
            path: self.path,
            duration_ms: self.started.elapsed().as_millis() as u64,
            generation: self.generation,
        }
    }
}

impl CallOrchestrator {
    pub fn new(
        settings: Settings,
        cache: SynthesisCache,
        generator: Arc<dyn CodeGenerator>,
        executor: Arc<dyn ScriptExecutor>,
        validator: Arc<dyn ShapeValidator>,
        log: Arc<dyn ActivityLog>,
    ) -> Self {
        Self {
            settings,
            cache,
            generator,
            executor,
            validator,
            log,
            in_flight: DashMap::new(),
            stats: Arc::new(StatCounters::default()),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn cache(&self) -> &SynthesisCache {
        &self.cache
    }

    pub fn activity_log(&self) -> &Arc<dyn ActivityLog> {
        &self.log
    }

    pub fn stats(&self) -> CallStats {
        self.stats.snapshot()
    }

    /// Whether a call at `depth` is the last permitted hop.
    pub fn is_terminal_hop(&self, depth: u32) -> bool {
        depth.saturating_add(1) >= self.settings.max_depth
    }

    /// Runs `call` to a terminal state and appends exactly one activity record for it.
    ///
    /// `handle` is the dispatch handle the call arrived through; generated code receives a
    /// copy bound one level deeper.
    #[instrument(skip_all, fields(name = %call.name, depth = call.depth))]
    pub async fn resolve(&self, call: Call, handle: &Conjure) -> ConjureResult<Value> {
        let fingerprint = Fingerprint::compute(
            &call.name,
            &call.arguments,
            call.output_shape.as_ref(),
            self.settings.fingerprint,
        );
        let mut trace = CallTrace::new(fingerprint);

        let result = self.drive(&call, handle, &mut trace).await;
        if result.is_err() {
            self.stats.failure();
        }

        let record = trace.into_record(&call, &result);
        match &result {
            Ok(_) => info!(
                fingerprint = %record.fingerprint,
                from_cache = record.from_cache,
                duration_ms = record.duration_ms,
                "call resolved"
            ),
            Err(e) => warn!(
                fingerprint = %record.fingerprint,
                error = %e,
                duration_ms = record.duration_ms,
                "call failed"
            ),
        }
        if let Err(e) = self.log.append(&record).await {
            warn!(error = %e, "failed to append activity record");
        }

        result
    }

    async fn drive(
        &self,
        call: &Call,
        handle: &Conjure,
        trace: &mut CallTrace,
    ) -> ConjureResult<Value> {
        trace.enter(CallState::Init);
        if self.settings.hard_depth_limit && call.depth >= self.settings.max_depth {
            return Err(ConjureError::DepthExceeded {
                depth: call.depth,
                max_depth: self.settings.max_depth,
            });
        }

        trace.enter(CallState::CacheLookup);
        let cached = self.cache.get(&trace.fingerprint).await;
        // Held until the cache write so misses arriving before it join this synthesis.
        let mut in_flight = None;
        let (unit, synthesized) = match cached {
            Some(unit) => {
                trace.enter(CallState::CacheHit);
                self.stats.hit();
                trace.from_cache = true;
                (unit, false)
            }
            None => {
                trace.enter(CallState::CacheMiss);
                self.stats.miss();
                trace.enter(CallState::Synthesize);
                let (synthesis, joined, guard) =
                    self.synthesize(call, &trace.fingerprint).await?;
                in_flight = guard;
                trace.deduplicated = joined;
                trace.generation = Some(synthesis.metadata);
                (synthesis.unit, true)
            }
        };
        trace.code = Some(unit.code.clone());

        trace.enter(CallState::Execute);
        let raw = self
            .executor
            .execute(ExecutionContext {
                code: unit.code.clone(),
                arguments: call.arguments.clone(),
                handle: handle.descend(),
                depth: call.depth,
            })
            .await?;

        trace.enter(CallState::Validate);
        let value = self.validate(call, raw, trace)?;

        trace.enter(CallState::Persist);
        if synthesized {
            trace.cache_written = self.cache.put(&unit).await;
        }
        drop(in_flight);

        Ok(value)
    }

    fn validate(&self, call: &Call, raw: Value, trace: &mut CallTrace) -> ConjureResult<Value> {
        let Some(shape) = &call.output_shape else {
            return Ok(raw);
        };

        match self.validator.validate(&raw, shape) {
            Ok(value) => {
                trace.validation = ValidationOutcome::Passed;
                Ok(value)
            }
            Err(failure) => match self.settings.validation {
                ValidationMode::Strict => {
                    trace.validation = ValidationOutcome::Rejected {
                        reason: failure.to_string(),
                    };
                    Err(ConjureError::Validation(failure.to_string()))
                }
                ValidationMode::Lenient => {
                    debug!(%failure, "shape mismatch ignored in lenient mode");
                    trace.validation = ValidationOutcome::Swallowed {
                        reason: failure.to_string(),
                    };
                    Ok(raw)
                }
            },
        }
    }

    /// Asks the generator for code. With de-duplication on, misses on the same fingerprint
    /// share a single generator request for as long as the owning call holds the returned
    /// guard; the flag reports whether this call joined a synthesis already registered.
    async fn synthesize(
        &self,
        call: &Call,
        fingerprint: &Fingerprint,
    ) -> ConjureResult<(Synthesis, bool, Option<InFlightGuard<'_>>)> {
        let request = GenerationRequest {
            name: call.name.clone(),
            arguments: call.arguments.clone(),
            output_shape: call.output_shape.clone(),
            is_terminal_hop: self.is_terminal_hop(call.depth),
            depth: call.depth,
        };
        let generation = Self::generate(
            self.generator.clone(),
            self.stats.clone(),
            request,
            fingerprint.clone(),
        );

        if !self.settings.dedupe_synthesis {
            return generation.await.map(|s| (s, false, None));
        }

        let key = fingerprint.key();
        let (pending, joined) = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => (entry.get().clone(), true),
            Entry::Vacant(entry) => {
                let pending = generation.boxed().shared();
                entry.insert(pending.clone());
                (pending, false)
            }
        };
        if joined {
            debug!(%fingerprint, "joining in-flight synthesis");
        }

        let guard = InFlightGuard {
            in_flight: &self.in_flight,
            key,
            pending: pending.clone(),
            owner: !joined,
        };
        let synthesis = pending.await?;
        Ok((synthesis, joined, Some(guard)))
    }

    async fn generate(
        generator: Arc<dyn CodeGenerator>,
        stats: Arc<StatCounters>,
        request: GenerationRequest,
        fingerprint: Fingerprint,
    ) -> ConjureResult<Synthesis> {
        stats.generation();
        let response = generator.generate(&request).await?;
        debug!(%fingerprint, model = %response.metadata.model_id, "synthesized implementation");
        let unit = SynthesizedUnit::new(fingerprint, response.code)
            .with_model(response.metadata.model_id.clone());
        Ok(Synthesis {
            unit,
            metadata: response.metadata,
        })
    }
}

/// Drops the in-flight entry once the owning call has persisted its unit, fails, or is
/// abandoned mid-flight.
struct InFlightGuard<'a> {
    in_flight: &'a DashMap<String, PendingSynthesis>,
    key: String,
    pending: PendingSynthesis,
    owner: bool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.owner {
            self.in_flight
                .remove_if(&self.key, |_, current| current.ptr_eq(&self.pending));
        }
    }
}
