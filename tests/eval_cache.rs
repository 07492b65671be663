// tests/eval_cache.rs

//! Caching behaviour across consecutive runs: hits, idempotence,
//! invalidation on input changes.

use std::sync::Arc;

use cachedag::engine::Evaluator;
use cachedag::hash::{json_hash, ordered_hash};
use cachedag::model::{value, Segments, TaskArena, TaskBuilder, TaskId};
use cachedag_test_utils::builders::as_i32;
use cachedag_test_utils::{init_tracing, GraphBuilder};

fn evaluator(out: &std::path::Path) -> Evaluator {
    Evaluator::new(out.parent().unwrap(), out).with_jobs(1)
}

#[test]
fn single_task_caches_on_second_run() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");

    let mut graph = GraphBuilder::new();
    let a = graph.named_constant("app.a", 42, 1);
    let arena = graph.build();

    let evaluator = evaluator(&out);

    let first = evaluator.evaluate(arena.clone(), &[a]).unwrap();
    assert_eq!(as_i32(first.raw_values[0].value().unwrap()), 42);
    assert_eq!(first.timings.len(), 1);
    assert_eq!(first.timings[0].terminal.render(), "app.a");
    assert!(!first.timings[0].cached);
    assert_eq!(first.evaluated, vec![a]);

    // The persisted record carries the exact fingerprint formula:
    // orderedHash(upstream) + orderedHash(side hashes) + logic hash.
    let meta_path = out.join("app").join("a").join("meta.json");
    let meta: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&meta_path).unwrap()).unwrap();
    let expected_inputs_hash = ordered_hash([]).wrapping_add(ordered_hash([1]));
    assert_eq!(meta["inputsHash"], serde_json::json!(expected_inputs_hash));
    assert_eq!(meta["value"], serde_json::json!(42));
    assert_eq!(
        meta["valueHash"],
        serde_json::json!(json_hash(&serde_json::json!(42)))
    );

    let second = evaluator.evaluate(arena, &[a]).unwrap();
    assert_eq!(as_i32(second.raw_values[0].value().unwrap()), 42);
    assert!(second.timings[0].cached);
    assert!(second.evaluated.is_empty());
}

#[test]
fn logic_hash_feeds_the_fingerprint() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");

    let mut graph = GraphBuilder::new();
    let a = graph.named_constant("app.a", 7, 3);
    let arena = graph.build();

    Evaluator::new(dir.path(), &out)
        .with_jobs(1)
        .with_logic_hash(99)
        .evaluate(arena, &[a])
        .unwrap();

    let meta: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(out.join("app").join("a").join("meta.json")).unwrap(),
    )
    .unwrap();
    let expected = ordered_hash([])
        .wrapping_add(ordered_hash([3]))
        .wrapping_add(99);
    assert_eq!(meta["inputsHash"], serde_json::json!(expected));
}

/// A -> B chain: mutate A's side hash, both groups re-evaluate.
#[test]
fn side_hash_change_invalidates_downstream() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");

    fn chain(a_side: i32) -> (Arc<TaskArena>, TaskId, TaskId) {
        let mut arena = TaskArena::new();
        let a = arena.add(
            TaskBuilder::new(|_ctx| Ok(value(7i32)))
                .named(Segments::parse("app.a"))
                .json_format::<i32>()
                .side_hash(a_side)
                .build(),
        );
        let b = arena.add(
            TaskBuilder::new(|ctx| Ok(value(ctx.arg_as::<i32>(0)? * 2)))
                .input(a)
                .named(Segments::parse("app.b"))
                .json_format::<i32>()
                .side_hash(10)
                .build(),
        );
        (Arc::new(arena), a, b)
    }

    let evaluator = evaluator(&out);

    let (arena, _a, b) = chain(1);
    let first = evaluator.evaluate(arena, &[b]).unwrap();
    assert_eq!(as_i32(first.raw_values[0].value().unwrap()), 14);
    assert_eq!(first.evaluated.len(), 2);

    // Unchanged: both cached.
    let (arena, _a, b) = chain(1);
    let second = evaluator.evaluate(arena, &[b]).unwrap();
    assert!(second.evaluated.is_empty());
    assert!(second.timings.iter().all(|t| t.cached));

    // A's side hash changes: A misses. Its re-run produces the same
    // value, so B's fingerprint (built from value hashes) still matches
    // and B stays cached.
    let (arena, a, b) = chain(2);
    let third = evaluator.evaluate(arena, &[b]).unwrap();
    assert!(third.evaluated.contains(&a));
    assert!(!third.evaluated.contains(&b));
    assert_eq!(as_i32(third.raw_values[0].value().unwrap()), 14);
    assert!(third
        .timings
        .iter()
        .any(|t| t.terminal.render() == "app.b" && t.cached));
}

/// Changing an upstream *value* invalidates every downstream group.
#[test]
fn value_change_invalidates_downstream() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");

    fn chain(a_value: i32) -> (Arc<TaskArena>, TaskId, TaskId) {
        let mut arena = TaskArena::new();
        let a = arena.add(
            TaskBuilder::new(move |_ctx| Ok(value(a_value)))
                .named(Segments::parse("app.a"))
                .json_format::<i32>()
                .side_hash(a_value)
                .build(),
        );
        let b = arena.add(
            TaskBuilder::new(|ctx| Ok(value(ctx.arg_as::<i32>(0)? * 2)))
                .input(a)
                .named(Segments::parse("app.b"))
                .json_format::<i32>()
                .side_hash(10)
                .build(),
        );
        (Arc::new(arena), a, b)
    }

    let evaluator = evaluator(&out);

    let (arena, _a, b) = chain(7);
    assert_eq!(
        as_i32(evaluator.evaluate(arena, &[b]).unwrap().raw_values[0].value().unwrap()),
        14
    );

    let (arena, a, b) = chain(8);
    let rerun = evaluator.evaluate(arena, &[b]).unwrap();
    assert_eq!(as_i32(rerun.raw_values[0].value().unwrap()), 16);
    assert!(rerun.evaluated.contains(&a));
    assert!(rerun.evaluated.contains(&b));
    assert!(rerun.timings.iter().all(|t| !t.cached));
}

#[test]
fn anonymous_goals_are_never_disk_cached() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");

    let mut graph = GraphBuilder::new();
    let a = graph.constant(5, 1);
    let arena = graph.build();

    let evaluator = evaluator(&out);

    let first = evaluator.evaluate(arena.clone(), &[a]).unwrap();
    assert_eq!(as_i32(first.raw_values[0].value().unwrap()), 5);
    assert!(!first.timings[0].cached);

    // No disk record, so the second run evaluates again.
    let second = evaluator.evaluate(arena, &[a]).unwrap();
    assert!(!second.timings[0].cached);
    assert_eq!(second.evaluated, vec![a]);
}

#[test]
fn corrupt_meta_files_force_a_miss_not_a_crash() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");

    let mut graph = GraphBuilder::new();
    let a = graph.named_constant("app.a", 42, 1);
    let arena = graph.build();

    let evaluator = evaluator(&out);
    evaluator.evaluate(arena.clone(), &[a]).unwrap();

    let meta_path = out.join("app").join("a").join("meta.json");
    std::fs::write(&meta_path, "{ definitely not json").unwrap();

    let rerun = evaluator.evaluate(arena, &[a]).unwrap();
    assert_eq!(as_i32(rerun.raw_values[0].value().unwrap()), 42);
    assert!(!rerun.timings[0].cached);

    // And the record heals.
    let meta: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&meta_path).unwrap()).unwrap();
    assert_eq!(meta["value"], serde_json::json!(42));
}

#[test]
fn profile_file_is_written_per_run() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");

    let mut graph = GraphBuilder::new();
    let a = graph.named_constant("app.a", 1, 1);
    let arena = graph.build();

    let evaluator = evaluator(&out);
    evaluator.evaluate(arena, &[a]).unwrap();

    let profile: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(out.join("cachedag-profile.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(profile[0]["label"], "app.a");
    assert_eq!(profile[0]["cached"], false);
}
