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


//! Runs synthesized bodies inside an embedded QuickJS runtime.
//!
//! Each execution gets a fresh runtime on a blocking thread. The body sees exactly three
//! bindings: `args`, a re-entrant handle `v`, and the shape factory `z`. Calls made through
//! `v` re-enter the engine on the host side one depth level deeper.

use crate::dispatch::Conjure;
use crate::error::{ConjureError, ConjureResult};
use crate::shape::Shape;
use async_trait::async_trait;
use rquickjs::{Context, Ctx, Function, Runtime};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

const PRELUDE: &str = include_str!("prelude.js");

pub const DEFAULT_MEMORY_LIMIT: usize = 64 * 1024 * 1024;
const MAX_STACK_SIZE: usize = 1024 * 1024;

pub struct ExecutionContext {
    pub code: String,
    pub arguments: Vec<Value>,
    /// Handle exposed to the body as `v`; already bound one level below `depth`.
    pub handle: Conjure,
    pub depth: u32,
}

#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    async fn execute(&self, context: ExecutionContext) -> ConjureResult<Value>;
}

#[derive(Debug, Clone)]
pub struct SandboxExecutor {
    timeout: Duration,
    memory_limit: usize,
}

impl Default for SandboxExecutor {
    fn default() -> Self {
        Self::new(Duration::from_secs(crate::config::DEFAULT_TIMEOUT_SECS))
    }
}

impl SandboxExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            memory_limit: DEFAULT_MEMORY_LIMIT,
        }
    }

    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = bytes;
        self
    }
}

#[async_trait]
impl ScriptExecutor for SandboxExecutor {
    #[instrument(skip_all, fields(depth = context.depth))]
    async fn execute(&self, context: ExecutionContext) -> ConjureResult<Value> {
        let code = context.code.clone();
        let runtime = tokio::runtime::Handle::current();
        let limits = self.clone();

        let started = Instant::now();
        let result = tokio::task::spawn_blocking(move || limits.run(context, runtime))
            .await
            .map_err(|e| ConjureError::execution(code, format!("script task failed: {e}")))?;
        debug!(elapsed_ms = started.elapsed().as_millis() as u64, ok = result.is_ok(), "script finished");
        result
    }
}

/// Running time of one script, minus the time it spent blocked on delegated calls.
struct ScriptClock {
    started: Instant,
    limit: Duration,
    delegated_nanos: AtomicU64,
}

impl ScriptClock {
    fn start(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit,
            delegated_nanos: AtomicU64::new(0),
        }
    }

    fn charge_delegated(&self, spent: Duration) {
        self.delegated_nanos
            .fetch_add(spent.as_nanos() as u64, Ordering::Relaxed);
    }

    fn exhausted(&self) -> bool {
        let delegated = Duration::from_nanos(self.delegated_nanos.load(Ordering::Relaxed));
        self.started.elapsed().saturating_sub(delegated) > self.limit
    }
}

#[derive(Deserialize)]
struct ScriptOutcome {
    ok: bool,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    error: Option<String>,
}

impl SandboxExecutor {
    fn run(&self, context: ExecutionContext, runtime: tokio::runtime::Handle) -> ConjureResult<Value> {
        let ExecutionContext {
            code,
            arguments,
            handle,
            ..
        } = context;
        let clock = Arc::new(ScriptClock::start(self.timeout));
        let timeout = self.timeout;
        let fail = |message: String| {
            let message = if clock.exhausted() {
                format!("timed out after {}ms", timeout.as_millis())
            } else {
                message
            };
            ConjureError::execution(code.clone(), message)
        };

        let arguments = serde_json::to_string(&arguments).map_err(|e| fail(e.to_string()))?;

        let rt = Runtime::new().map_err(|e| fail(format!("failed to start runtime: {e}")))?;
        rt.set_memory_limit(self.memory_limit);
        rt.set_max_stack_size(MAX_STACK_SIZE);
        let interrupt = Arc::clone(&clock);
        rt.set_interrupt_handler(Some(Box::new(move || interrupt.exhausted())));
        let js = Context::full(&rt).map_err(|e| fail(format!("failed to create context: {e}")))?;

        let bridge_clock = Arc::clone(&clock);
        let bridge = move |name: String, args: String, shape: String| -> String {
            let started = Instant::now();
            let reply = delegate(&runtime, &handle, name, &args, &shape);
            bridge_clock.charge_delegated(started.elapsed());
            reply
        };

        js.with(|ctx| -> Result<(), String> {
            let globals = ctx.globals();
            globals
                .set("__conjure_code", code.clone())
                .map_err(|e| describe_error(&ctx, e))?;
            globals
                .set("__conjure_args", arguments)
                .map_err(|e| describe_error(&ctx, e))?;
            let host = Function::new(ctx.clone(), bridge).map_err(|e| describe_error(&ctx, e))?;
            globals
                .set("__conjure_host", host)
                .map_err(|e| describe_error(&ctx, e))?;
            ctx.eval::<(), _>(PRELUDE).map_err(|e| describe_error(&ctx, e))
        })
        .map_err(fail)?;

        loop {
            match rt.execute_pending_job() {
                Ok(true) => continue,
                Ok(false) => break,
                Err(_) => return Err(fail(js.with(|ctx| describe_thrown(&ctx)))),
            }
        }

        let outcome = js
            .with(|ctx| ctx.globals().get::<_, Option<String>>("__conjure_outcome"))
            .map_err(|e| fail(e.to_string()))?
            .ok_or_else(|| fail("script did not settle".to_string()))?;
        let outcome: ScriptOutcome =
            serde_json::from_str(&outcome).map_err(|e| fail(format!("unreadable outcome: {e}")))?;

        if outcome.ok {
            Ok(outcome.value)
        } else {
            Err(fail(
                outcome
                    .error
                    .unwrap_or_else(|| "script failed".to_string()),
            ))
        }
    }
}

/// Host side of `v`: resolves a nested call and answers with a JSON envelope.
fn delegate(
    runtime: &tokio::runtime::Handle,
    handle: &Conjure,
    name: String,
    args: &str,
    shape: &str,
) -> String {
    let resolved = (|| -> ConjureResult<Value> {
        let arguments: Vec<Value> = serde_json::from_str(args)?;
        let shape: Option<Shape> = serde_json::from_str(shape)?;
        runtime.block_on(handle.invoke(name, arguments).resolve(shape))
    })();

    match resolved {
        Ok(value) => json!({ "ok": true, "value": value }).to_string(),
        Err(e) => json!({ "ok": false, "error": e.to_string() }).to_string(),
    }
}

fn describe_error(ctx: &Ctx<'_>, error: rquickjs::Error) -> String {
    match error {
        rquickjs::Error::Exception => describe_thrown(ctx),
        other => other.to_string(),
    }
}

fn describe_thrown(ctx: &Ctx<'_>) -> String {
    let thrown = ctx.catch();
    if let Some(exception) = thrown.as_exception() {
        return exception
            .message()
            .unwrap_or_else(|| "uncaught exception".to_string());
    }
    thrown
        .as_string()
        .and_then(|s| s.to_string().ok())
        .unwrap_or_else(|| "uncaught exception".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::ScriptedGenerator;
    use std::sync::Arc;

    fn engine(generator: ScriptedGenerator) -> (Conjure, Arc<ScriptedGenerator>) {
        let generator = Arc::new(generator);
        let conjure = Conjure::builder()
            .generator(generator.clone())
            .in_memory()
            .build()
            .unwrap();
        (conjure, generator)
    }

    async fn run(conjure: &Conjure, code: &str, arguments: Vec<Value>) -> ConjureResult<Value> {
        run_with(&SandboxExecutor::default(), conjure, code, arguments).await
    }

    async fn run_with(
        executor: &SandboxExecutor,
        conjure: &Conjure,
        code: &str,
        arguments: Vec<Value>,
    ) -> ConjureResult<Value> {
        executor
            .execute(ExecutionContext {
                code: code.to_string(),
                arguments,
                handle: conjure.descend(),
                depth: 0,
            })
            .await
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn evaluates_body_against_arguments() {
        let (conjure, _) = engine(ScriptedGenerator::new());
        let value = run(&conjure, "return args[0] + args[1];", vec![json!(5), json!(3)])
            .await
            .unwrap();
        assert_eq!(value, json!(8));

        let value = run(&conjure, "const [a] = args; return { twice: a.repeat(2) };", vec![json!("ab")])
            .await
            .unwrap();
        assert_eq!(value, json!({ "twice": "abab" }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn undefined_result_becomes_null() {
        let (conjure, _) = engine(ScriptedGenerator::new());
        assert_eq!(run(&conjure, "let x = 1;", vec![]).await.unwrap(), Value::Null);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shape_factory_serialises_like_shape() {
        let (conjure, _) = engine(ScriptedGenerator::new());
        let value = run(
            &conjure,
            "return z.object({ sum: z.number(), note: z.string().optional(), tags: z.array(z.enum(['a', 'b'])) });",
            vec![],
        )
        .await
        .unwrap();
        let shape: Shape = serde_json::from_value(value).unwrap();
        assert_eq!(
            shape,
            Shape::object([
                ("sum", Shape::Number),
                ("note", Shape::String.optional()),
                ("tags", Shape::array(Shape::one_of(["a", "b"]))),
            ])
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn compile_errors_carry_the_code() {
        let (conjure, _) = engine(ScriptedGenerator::new());
        let err = run(&conjure, "return (;", vec![]).await.unwrap_err();
        match err {
            ConjureError::Execution { code, message } => {
                assert_eq!(code, "return (;");
                assert!(message.contains("SyntaxError"), "{message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn thrown_errors_are_execution_errors() {
        let (conjure, _) = engine(ScriptedGenerator::new());
        let err = run(&conjure, "await null; throw new TypeError('boom');", vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, ConjureError::Execution { ref message, .. } if message == "TypeError: boom"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn runaway_scripts_time_out() {
        let (conjure, _) = engine(ScriptedGenerator::new());
        let executor = SandboxExecutor::new(Duration::from_millis(200));
        let err = run_with(&executor, &conjure, "while (true) {}", vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, ConjureError::Execution { ref message, .. } if message.contains("timed out")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delegates_through_v_one_level_deeper() {
        let (conjure, generator) =
            engine(ScriptedGenerator::new().with("double", "return args[0] * 2;"));
        let value = run(
            &conjure,
            "const a = await v.double(21); const b = await v['double'](2)(z.number()); return a + b;",
            vec![],
        )
        .await
        .unwrap();
        assert_eq!(value, json!(46));

        let requests = generator.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| r.depth == 1));
        assert_eq!(requests[1].output_shape, Some(Shape::Number));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn deferred_values_settle_once_per_shape() {
        let (conjure, generator) = engine(ScriptedGenerator::new().otherwise("return Math.random();"));
        let value = run(
            &conjure,
            "const d = v.roll(); const a = await d; const b = await d; \
             const c = await d.withShape(z.number()); const e = await d(z.number()); \
             return [a === b, c === e];",
            vec![],
        )
        .await
        .unwrap();
        assert_eq!(value, json!([true, true]));
        assert_eq!(generator.call_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delegated_failures_reject_inside_the_script() {
        let (conjure, _) = engine(ScriptedGenerator::new().failing("lookup", "service down"));
        let value = run(
            &conjure,
            "try { await v.lookup('x'); return 'unreachable'; } catch (e) { return e.message; }",
            vec![],
        )
        .await
        .unwrap();
        assert!(value.as_str().unwrap().contains("service down"));
    }
}
