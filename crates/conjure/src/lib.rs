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


//! Call functions that were never written.
//!
//! A call names a function and passes arguments. The first time a signature is seen a
//! generator writes an implementation, which runs in an embedded script engine, is checked
//! against an optional shape, and is cached by fingerprint so later calls with the same
//! signature skip generation.

pub mod activity;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod fingerprint;
pub mod generator;
pub mod orchestrator;
pub mod shape;

pub use activity::{ActivityLog, ActivityRecord, JsonlActivityLog, MemoryActivityLog};
pub use cache::{CacheStore, FileCacheStore, MemoryCacheStore, SynthesisCache, SynthesizedUnit};
pub use config::{ConjureConfig, Settings, ValidationMode};
pub use dispatch::{Conjure, ConjureBound, ConjureBuilder, DeferredCall, NamedFunction, ShapedCall};
pub use error::{ConjureError, ConjureResult};
pub use executor::{ExecutionContext, SandboxExecutor, ScriptExecutor};
pub use fingerprint::{Fingerprint, FingerprintPolicy};
pub use generator::{CodeGenerator, GenerationRequest, GenerationResponse, LlmGenerator, OpenAIClient, ScriptedGenerator};
pub use orchestrator::{Call, CallOrchestrator, CallState, CallStats};
pub use shape::{SchemaValidator, Shape, ShapeValidator, ValidationFailure};

#[doc(hidden)]
pub use serde_json::json as __json;
