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


//! The call surface: a root handle that turns any name into a deferred invocation.
//!
//! ```no_run
//! # async fn demo(conjure: conjure::Conjure) -> conjure::ConjureResult<()> {
//! use conjure::{conjure, Shape};
//! use serde_json::json;
//!
//! let sum = conjure.invoke("add", vec![json!(5), json!(3)]).await?;
//! let same = conjure!(conjure.add(5, 3)).await?;
//! let shaped = conjure
//!     .function("summarise this in one line")
//!     .call([json!("a long text")])
//!     .shape(Shape::String)
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod bound;
mod builder;

pub use bound::ConjureBound;
pub use builder::ConjureBuilder;

use crate::activity::ActivityRecord;
use crate::config::Settings;
use crate::error::ConjureResult;
use crate::orchestrator::{Call, CallOrchestrator, CallStats};
use crate::shape::Shape;
use chrono::NaiveDate;
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::future::IntoFuture;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Dispatch handle bound to a call depth. Cloning is cheap.
///
/// Handles created by the builder sit at depth 0. Generated code receives a handle one level
/// deeper than the call that runs it; callers never choose a depth themselves.
#[derive(Clone)]
pub struct Conjure {
    orchestrator: Arc<CallOrchestrator>,
    depth: u32,
}

impl fmt::Debug for Conjure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conjure").field("depth", &self.depth).finish()
    }
}

impl Conjure {
    pub fn builder() -> ConjureBuilder {
        ConjureBuilder::default()
    }

    pub(crate) fn root(orchestrator: Arc<CallOrchestrator>) -> Self {
        Self {
            orchestrator,
            depth: 0,
        }
    }

    pub(crate) fn descend(&self) -> Self {
        Self {
            orchestrator: Arc::clone(&self.orchestrator),
            depth: self.depth.saturating_add(1),
        }
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn settings(&self) -> &Settings {
        self.orchestrator.settings()
    }

    /// Captures a call by name. Nothing runs until the result is awaited.
    pub fn invoke(&self, name: impl Into<String>, arguments: Vec<Value>) -> DeferredCall {
        DeferredCall {
            inner: Arc::new(DeferredInner {
                handle: self.clone(),
                name: name.into(),
                arguments,
                settled: DashMap::new(),
            }),
        }
    }

    /// A named function awaiting its arguments. Any text is a valid name.
    pub fn function(&self, name: impl Into<String>) -> NamedFunction {
        NamedFunction {
            handle: self.clone(),
            name: name.into(),
        }
    }

    pub async fn clear_cache(&self) -> ConjureResult<()> {
        self.orchestrator.cache().clear().await
    }

    pub async fn read_logs(&self, day: NaiveDate) -> ConjureResult<Vec<ActivityRecord>> {
        self.orchestrator.activity_log().read_day(day).await
    }

    pub async fn clear_logs(&self) -> ConjureResult<()> {
        self.orchestrator.activity_log().clear().await
    }

    pub fn stats(&self) -> CallStats {
        self.orchestrator.stats()
    }
}

#[derive(Debug, Clone)]
pub struct NamedFunction {
    handle: Conjure,
    name: String,
}

impl NamedFunction {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call<I>(&self, arguments: I) -> DeferredCall
    where
        I: IntoIterator<Item = Value>,
    {
        self.handle
            .invoke(self.name.clone(), arguments.into_iter().collect())
    }
}

struct DeferredInner {
    handle: Conjure,
    name: String,
    arguments: Vec<Value>,
    /// One settled outcome per distinct shape; `None` is the unshaped resolution.
    settled: DashMap<Option<String>, Arc<OnceCell<ConjureResult<Value>>>>,
}

/// A captured call. Awaiting it (directly, by reference, or through a clone) runs the call
/// at most once per distinct shape and replays the settled outcome afterwards.
#[derive(Clone)]
pub struct DeferredCall {
    inner: Arc<DeferredInner>,
}

impl fmt::Debug for DeferredCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredCall")
            .field("name", &self.inner.name)
            .field("arguments", &self.inner.arguments)
            .field("depth", &self.inner.handle.depth)
            .finish()
    }
}

impl DeferredCall {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn arguments(&self) -> &[Value] {
        &self.inner.arguments
    }

    /// Applies a shape; the returned call resolves with that shape enforced.
    pub fn shape(&self, shape: Shape) -> ShapedCall {
        ShapedCall {
            deferred: self.clone(),
            shape,
        }
    }

    pub async fn with_shape(&self, shape: Shape) -> ConjureResult<Value> {
        self.resolve(Some(shape)).await
    }

    pub async fn resolve(&self, shape: Option<Shape>) -> ConjureResult<Value> {
        let inner = &self.inner;
        let cell = inner
            .settled
            .entry(shape.as_ref().map(Shape::identity))
            .or_default()
            .clone();

        cell.get_or_init(|| async move {
            let call = Call {
                name: inner.name.clone(),
                arguments: inner.arguments.clone(),
                output_shape: shape,
                depth: inner.handle.depth,
            };
            inner.handle.orchestrator.resolve(call, &inner.handle).await
        })
        .await
        .clone()
    }
}

impl IntoFuture for DeferredCall {
    type Output = ConjureResult<Value>;
    type IntoFuture = BoxFuture<'static, ConjureResult<Value>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.resolve(None).await })
    }
}

impl<'a> IntoFuture for &'a DeferredCall {
    type Output = ConjureResult<Value>;
    type IntoFuture = BoxFuture<'a, ConjureResult<Value>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.resolve(None))
    }
}

/// A deferred call with a shape applied.
#[derive(Debug, Clone)]
pub struct ShapedCall {
    deferred: DeferredCall,
    shape: Shape,
}

impl ShapedCall {
    pub fn deferred(&self) -> &DeferredCall {
        &self.deferred
    }
}

impl IntoFuture for ShapedCall {
    type Output = ConjureResult<Value>;
    type IntoFuture = BoxFuture<'static, ConjureResult<Value>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.deferred.resolve(Some(self.shape)).await })
    }
}

/// Member-call syntax over a handle: `conjure!(handle.add(5, 3))` or
/// `conjure!(handle["any text"](arg))`. Arguments may be any serialisable expression.
#[macro_export]
macro_rules! conjure {
    ($handle:ident . $name:ident ( $($arg:expr),* $(,)? )) => {
        $handle.invoke(stringify!($name), vec![$($crate::__json!($arg)),*])
    };
    ($handle:ident [ $name:expr ] ( $($arg:expr),* $(,)? )) => {
        $handle.invoke($name, vec![$($crate::__json!($arg)),*])
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::ScriptedGenerator;
    use serde_json::json;

    fn handle(generator: Arc<ScriptedGenerator>) -> Conjure {
        Conjure::builder()
            .settings(Settings::default())
            .generator(generator)
            .in_memory()
            .build()
            .unwrap()
    }

    #[test]
    fn macro_captures_name_and_arguments() {
        let conjure = handle(Arc::new(ScriptedGenerator::new()));
        let label = "x";
        let call = conjure!(conjure.add(5, 3));
        assert_eq!(call.name(), "add");
        assert_eq!(call.arguments(), &[json!(5), json!(3)]);

        let call = conjure!(conjure["make a greeting"](label, [1, 2]));
        assert_eq!(call.name(), "make a greeting");
        assert_eq!(call.arguments(), &[json!("x"), json!([1, 2])]);
    }

    #[test]
    fn descending_moves_one_level() {
        let conjure = handle(Arc::new(ScriptedGenerator::new()));
        assert_eq!(conjure.depth(), 0);
        assert_eq!(conjure.descend().descend().depth(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn awaiting_twice_resolves_once() {
        let generator = Arc::new(ScriptedGenerator::new().otherwise("return Math.random();"));
        let conjure = handle(generator.clone());

        let deferred = conjure.invoke("roll", vec![]);
        let first = (&deferred).await.unwrap();
        let second = deferred.clone().await.unwrap();
        let third = deferred.await.unwrap();
        assert_eq!(first, second);
        assert_eq!(second, third);
        assert_eq!(generator.call_count(), 1);
        assert_eq!(conjure.stats().misses, 1);
        assert_eq!(conjure.stats().hits, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn each_shape_settles_separately() {
        let generator = Arc::new(ScriptedGenerator::new().otherwise("return args[0] * 2;"));
        let conjure = handle(generator.clone());

        let deferred = conjure.function("double").call([json!(4)]);
        assert_eq!(deferred.shape(Shape::Number).await.unwrap(), json!(8));
        assert_eq!(deferred.with_shape(Shape::Number).await.unwrap(), json!(8));
        assert_eq!(deferred.clone().await.unwrap(), json!(8));
        // unshaped and number-shaped calls fingerprint differently
        assert_eq!(generator.call_count(), 2);
    }
}
