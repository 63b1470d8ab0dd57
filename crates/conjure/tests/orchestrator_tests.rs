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


use async_trait::async_trait;
use conjure::activity::ValidationOutcome;
use conjure::{
    ActivityLog, ActivityRecord, CacheStore, CallState, Conjure, ConjureError, ConjureResult,
    FingerprintPolicy, MemoryActivityLog, MemoryCacheStore, ScriptedGenerator, Settings, Shape,
    SynthesizedUnit, ValidationMode,
};
use chrono::NaiveDate;
use futures::future::join_all;
use serde_json::json;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    conjure: Conjure,
    generator: Arc<ScriptedGenerator>,
    log: Arc<MemoryActivityLog>,
    cache: Arc<MemoryCacheStore>,
}

fn setup(generator: ScriptedGenerator, settings: Settings) -> Harness {
    let generator = Arc::new(generator);
    let log = Arc::new(MemoryActivityLog::default());
    let cache = Arc::new(MemoryCacheStore::default());
    let conjure = Conjure::builder()
        .settings(settings)
        .generator(generator.clone())
        .cache_store(cache.clone())
        .activity_log(log.clone())
        .build()
        .expect("engine builds");
    Harness {
        conjure,
        generator,
        log,
        cache,
    }
}

fn adder() -> ScriptedGenerator {
    ScriptedGenerator::new().with("add", "return args[0] + args[1];")
}

#[tokio::test(flavor = "multi_thread")]
async fn test_first_call_synthesizes_and_repeat_hits_cache() {
    let h = setup(adder(), Settings::default());

    let first = h.conjure.invoke("add", vec![json!(5), json!(3)]).await.unwrap();
    let second = h.conjure.invoke("add", vec![json!(5), json!(3)]).await.unwrap();
    assert_eq!(first, json!(8));
    assert_eq!(second, json!(8));
    assert_eq!(h.generator.call_count(), 1);

    let records = h.log.records();
    assert_eq!(records.len(), 2);
    assert_eq!(
        records[0].path,
        vec![
            CallState::Init,
            CallState::CacheLookup,
            CallState::CacheMiss,
            CallState::Synthesize,
            CallState::Execute,
            CallState::Validate,
            CallState::Persist,
            CallState::Done,
        ]
    );
    assert!(!records[0].from_cache);
    assert!(records[0].cache_written);
    assert!(records[0].generation.is_some());
    assert_eq!(
        records[1].path,
        vec![
            CallState::Init,
            CallState::CacheLookup,
            CallState::CacheHit,
            CallState::Execute,
            CallState::Validate,
            CallState::Persist,
            CallState::Done,
        ]
    );
    assert!(records[1].from_cache);
    assert!(records[1].generation.is_none());
    assert_eq!(records[1].code.as_deref(), Some("return args[0] + args[1];"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_kind_policy_reuses_logic_for_new_values() {
    let h = setup(adder(), Settings::default());

    assert_eq!(h.conjure.invoke("add", vec![json!(1), json!(2)]).await.unwrap(), json!(3));
    assert_eq!(h.conjure.invoke("add", vec![json!(3), json!(4)]).await.unwrap(), json!(7));
    assert_eq!(h.generator.call_count(), 1);

    let stats = h.conjure.stats();
    assert_eq!((stats.hits, stats.misses, stats.generations), (1, 1, 1));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_value_policy_memoizes_per_input() {
    let settings = Settings {
        fingerprint: FingerprintPolicy::Value,
        ..Settings::default()
    };
    let h = setup(adder(), settings);

    h.conjure.invoke("add", vec![json!(1), json!(2)]).await.unwrap();
    h.conjure.invoke("add", vec![json!(3), json!(4)]).await.unwrap();
    h.conjure.invoke("add", vec![json!(1), json!(2)]).await.unwrap();
    assert_eq!(h.generator.call_count(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_different_argument_kinds_synthesize_separately() {
    let h = setup(
        ScriptedGenerator::new().otherwise("return String(args[0]).length;"),
        Settings::default(),
    );

    h.conjure.invoke("measure", vec![json!("abc")]).await.unwrap();
    h.conjure.invoke("measure", vec![json!(12345)]).await.unwrap();
    h.conjure.invoke("measure", vec![json!("longer text")]).await.unwrap();
    assert_eq!(h.generator.call_count(), 2);
    assert_eq!(h.cache.len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_depth_threads_through_delegation() {
    let settings = Settings {
        max_depth: 3,
        ..Settings::default()
    };
    let generator = ScriptedGenerator::new()
        .with("outer", "return await v.middle(args[0]);")
        .with("middle", "return await v.inner(args[0]);")
        .with("inner", "return args[0] + 1;");
    let h = setup(generator, settings);

    let value = h.conjure.invoke("outer", vec![json!(41)]).await.unwrap();
    assert_eq!(value, json!(42));

    let requests = h.generator.requests();
    let seen: Vec<_> = requests
        .iter()
        .map(|r| (r.name.as_str(), r.depth, r.is_terminal_hop))
        .collect();
    assert_eq!(
        seen,
        vec![("outer", 0, false), ("middle", 1, false), ("inner", 2, true)]
    );

    let mut depths: Vec<_> = h.log.records().iter().map(|r| (r.name.clone(), r.depth)).collect();
    depths.sort();
    assert_eq!(
        depths,
        vec![("inner".into(), 2), ("middle".into(), 1), ("outer".into(), 0)]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_calls_past_the_ceiling_are_rejected() {
    let settings = Settings {
        max_depth: 2,
        ..Settings::default()
    };
    let generator = ScriptedGenerator::new()
        .with("outer", "return await v.middle(args[0]);")
        .with("middle", "return await v.inner(args[0]);")
        .with("inner", "return args[0];");
    let h = setup(generator, settings);

    let err = h.conjure.invoke("outer", vec![json!(1)]).await.unwrap_err();
    assert!(matches!(err, ConjureError::Execution { ref message, .. } if message.contains("ceiling")));
    assert!(h.generator.requests().iter().all(|r| r.name != "inner"));

    let records = h.log.records();
    let inner = records.iter().find(|r| r.name == "inner").unwrap();
    assert_eq!(inner.error_kind.as_deref(), Some("depth_exceeded"));
    assert_eq!(inner.path, vec![CallState::Init, CallState::Failed]);
    assert!(records.iter().all(|r| !r.succeeded()));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_soft_limit_only_when_hard_limit_disabled() {
    let settings = Settings {
        max_depth: 2,
        hard_depth_limit: false,
        ..Settings::default()
    };
    let generator = ScriptedGenerator::new()
        .with("outer", "return await v.inner(args[0]);")
        .with("inner", "return await v.deepest(args[0]);")
        .with("deepest", "return args[0] * 10;");
    let h = setup(generator, settings);

    let value = h.conjure.invoke("outer", vec![json!(2)]).await.unwrap();
    assert_eq!(value, json!(20));
    let deepest = h
        .generator
        .requests()
        .into_iter()
        .find(|r| r.name == "deepest")
        .unwrap();
    assert_eq!(deepest.depth, 2);
    assert!(deepest.is_terminal_hop);
}

fn sum_shape() -> Shape {
    Shape::object([("sum", Shape::Number)])
}

fn stringly_sum() -> ScriptedGenerator {
    ScriptedGenerator::new().with("sum", "return { sum: String(args[0] + args[1]), extra: true };")
}

#[tokio::test(flavor = "multi_thread")]
async fn test_strict_mode_rejects_mismatch() {
    let settings = Settings {
        validation: ValidationMode::Strict,
        ..Settings::default()
    };
    let h = setup(stringly_sum(), settings);

    let err = h
        .conjure
        .invoke("sum", vec![json!(1), json!(3)])
        .shape(sum_shape())
        .await
        .unwrap_err();
    assert!(matches!(err, ConjureError::Validation(ref msg) if msg.contains("$.sum")));

    let record = &h.log.records()[0];
    assert!(matches!(record.validation, ValidationOutcome::Rejected { .. }));
    assert_eq!(record.error_kind.as_deref(), Some("validation"));
    assert!(!record.cache_written);
    assert!(h.cache.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_strict_mode_with_coercion_accepts_coerced_value() {
    let settings = Settings {
        validation: ValidationMode::Strict,
        coerce: true,
        ..Settings::default()
    };
    let h = setup(stringly_sum(), settings);

    let value = h
        .conjure
        .invoke("sum", vec![json!(1), json!(3)])
        .with_shape(sum_shape())
        .await
        .unwrap();
    assert_eq!(value, json!({ "sum": 4 }));
    assert_eq!(h.log.records()[0].validation, ValidationOutcome::Passed);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_lenient_mode_returns_raw_value() {
    let h = setup(stringly_sum(), Settings::default());

    let value = h
        .conjure
        .invoke("sum", vec![json!(1), json!(3)])
        .shape(sum_shape())
        .await
        .unwrap();
    assert_eq!(value, json!({ "sum": "4", "extra": true }));

    let record = &h.log.records()[0];
    assert!(matches!(record.validation, ValidationOutcome::Swallowed { .. }));
    assert!(record.cache_written);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_generation_failure_is_surfaced_and_logged() {
    let h = setup(
        ScriptedGenerator::new().failing("forecast", "model unavailable"),
        Settings::default(),
    );

    let err = h.conjure.invoke("forecast", vec![]).await.unwrap_err();
    assert!(matches!(err, ConjureError::Generation(ref msg) if msg.contains("model unavailable")));
    h.conjure.invoke("forecast", vec![]).await.unwrap_err();
    assert_eq!(h.generator.call_count(), 2);

    let record = &h.log.records()[0];
    assert_eq!(record.error_kind.as_deref(), Some("generation"));
    assert_eq!(record.path.last(), Some(&CallState::Failed));
    assert!(record.path.contains(&CallState::Synthesize));
    assert!(!record.path.contains(&CallState::Execute));
    assert_eq!(h.conjure.stats().failures, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_execution_failure_carries_code_and_skips_cache() {
    let code = "throw new RangeError('negative input');";
    let h = setup(ScriptedGenerator::new().with("sqrt", code), Settings::default());

    let err = h.conjure.invoke("sqrt", vec![json!(-1)]).await.unwrap_err();
    match err {
        ConjureError::Execution { code: failed, message } => {
            assert_eq!(failed, code);
            assert_eq!(message, "RangeError: negative input");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(h.cache.is_empty());
    let record = &h.log.records()[0];
    assert_eq!(record.code.as_deref(), Some(code));
    assert_eq!(record.error_kind.as_deref(), Some("execution"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_misses_share_one_synthesis() {
    let h = setup(
        adder().with_latency(Duration::from_millis(200)),
        Settings::default(),
    );

    let calls = (0..5).map(|i| h.conjure.invoke("add", vec![json!(i), json!(i)]));
    let results = join_all(calls.map(|c| c.into_future())).await;
    let values: Vec<_> = results.into_iter().map(Result::unwrap).collect();
    assert_eq!(values, vec![json!(0), json!(2), json!(4), json!(6), json!(8)]);
    assert_eq!(h.generator.call_count(), 1);

    let records = h.log.records();
    assert_eq!(records.iter().filter(|r| r.deduplicated).count(), 4);
    assert_eq!(h.conjure.stats().generations, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_miss_during_first_execution_joins_its_synthesis() {
    let slow_add = "const until = Date.now() + 400; while (Date.now() < until) {} \
                    return args[0] + args[1];";
    let h = setup(ScriptedGenerator::new().with("add", slow_add), Settings::default());

    let first = tokio::spawn(h.conjure.invoke("add", vec![json!(1), json!(2)]).into_future());
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = h.conjure.invoke("add", vec![json!(3), json!(4)]).await.unwrap();

    assert_eq!(first.await.unwrap().unwrap(), json!(3));
    assert_eq!(second, json!(7));
    assert_eq!(h.generator.call_count(), 1);
    let joined: Vec<_> = h.log.records().into_iter().filter(|r| r.deduplicated).collect();
    assert_eq!(joined.len(), 1);
    assert_eq!(joined[0].arguments, vec![json!(3), json!(4)]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_synthesis_is_not_shared_with_later_calls() {
    let h = setup(
        ScriptedGenerator::new().with("check", "throw new Error('bad draft');"),
        Settings::default(),
    );

    h.conjure.invoke("check", vec![json!(1)]).await.unwrap_err();
    h.conjure.invoke("check", vec![json!(2)]).await.unwrap_err();
    assert_eq!(h.generator.call_count(), 2);
    assert!(h.log.records().iter().all(|r| !r.deduplicated));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_misses_without_dedupe_all_generate() {
    let settings = Settings {
        dedupe_synthesis: false,
        ..Settings::default()
    };
    let h = setup(adder().with_latency(Duration::from_millis(100)), settings);

    let calls = (0..3).map(|i| h.conjure.invoke("add", vec![json!(i), json!(1)]).into_future());
    for result in join_all(calls).await {
        result.unwrap();
    }
    assert_eq!(h.generator.call_count(), 3);
    assert_eq!(h.cache.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_clear_cache_makes_next_call_a_miss() {
    let h = setup(adder(), Settings::default());

    h.conjure.invoke("add", vec![json!(5), json!(3)]).await.unwrap();
    h.conjure.invoke("add", vec![json!(5), json!(3)]).await.unwrap();
    h.conjure.clear_cache().await.unwrap();
    assert!(h.cache.is_empty());

    let value = h.conjure.invoke("add", vec![json!(5), json!(3)]).await.unwrap();
    assert_eq!(value, json!(8));
    assert_eq!(h.generator.call_count(), 2);
    assert!(!h.log.records()[2].from_cache);
}

struct FailingStore;

#[async_trait]
impl CacheStore for FailingStore {
    async fn load(&self, _key: &str) -> ConjureResult<Option<SynthesizedUnit>> {
        Err(ConjureError::CacheIo("read-only volume".into()))
    }
    async fn store(&self, _key: &str, _unit: &SynthesizedUnit) -> ConjureResult<()> {
        Err(ConjureError::CacheIo("read-only volume".into()))
    }
    async fn clear(&self) -> ConjureResult<()> {
        Ok(())
    }
}

struct FailingLog;

#[async_trait]
impl ActivityLog for FailingLog {
    async fn append(&self, _record: &ActivityRecord) -> ConjureResult<()> {
        Err(ConjureError::LogIo("disk full".into()))
    }
    async fn read_day(&self, _day: NaiveDate) -> ConjureResult<Vec<ActivityRecord>> {
        Ok(Vec::new())
    }
    async fn clear(&self) -> ConjureResult<()> {
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_storage_failures_never_fail_the_call() {
    let generator = Arc::new(adder());
    let conjure = Conjure::builder()
        .settings(Settings::default())
        .generator(generator.clone())
        .cache_store(Arc::new(FailingStore))
        .activity_log(Arc::new(FailingLog))
        .build()
        .unwrap();

    assert_eq!(conjure.invoke("add", vec![json!(2), json!(2)]).await.unwrap(), json!(4));
    assert_eq!(conjure.invoke("add", vec![json!(2), json!(2)]).await.unwrap(), json!(4));
    assert_eq!(generator.call_count(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_logs_read_back_by_day_and_clear() {
    let h = setup(adder(), Settings::default());

    h.conjure.invoke("add", vec![json!(1), json!(1)]).await.unwrap();
    let day = h.log.records()[0].day();
    let records = h.conjure.read_logs(day).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].result, Some(json!(2)));

    h.conjure.clear_logs().await.unwrap();
    assert!(h.conjure.read_logs(day).await.unwrap().is_empty());
}
