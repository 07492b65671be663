// tests/eval_failures.rs

//! Failure semantics: skips, fail-fast aborts, partial values, and the
//! failing-results report.

use std::sync::Arc;

use cachedag::engine::Evaluator;
use cachedag::model::{value, Segments, TaskBuilder, TaskFailure, TaskResult};
use cachedag_test_utils::builders::as_i32;
use cachedag_test_utils::{init_tracing, GraphBuilder, MemoryLogger};

#[test]
fn independent_groups_still_run_without_fail_fast() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    let mut graph = GraphBuilder::new();
    let a = graph.named_panicking("app.a", "boom", 1);
    let b = graph.named_constant("app.b", 2, 2);
    let c = graph.named_constant("app.c", 3, 3);
    let arena = graph.build();

    let results = Evaluator::new(dir.path(), dir.path().join("out"))
        .with_jobs(1)
        .with_fail_fast(false)
        .evaluate(arena, &[a, b, c])
        .unwrap();

    assert!(matches!(results.raw_values[0], TaskResult::Exception { .. }));
    assert_eq!(as_i32(results.raw_values[1].value().unwrap()), 2);
    assert_eq!(as_i32(results.raw_values[2].value().unwrap()), 3);

    // The failing report maps A's terminal to its exception.
    let (terminal, failures) = results
        .failing
        .iter()
        .next()
        .expect("one failing terminal");
    assert_eq!(terminal.render(), "app.a");
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0], TaskResult::Exception { ref error, .. } if error == "boom"));
}

#[test]
fn fail_fast_aborts_the_remainder_sequentially() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    let mut graph = GraphBuilder::new();
    let a = graph.named_failing("app.a", "bad input", 1);
    let b = graph.named_constant("app.b", 2, 2);
    let c = graph.named_constant("app.c", 3, 3);
    let arena = graph.build();

    let results = Evaluator::new(dir.path(), dir.path().join("out"))
        .with_jobs(1)
        .with_fail_fast(true)
        .evaluate(arena, &[a, b, c])
        .unwrap();

    assert!(matches!(results.raw_values[0], TaskResult::Failure { .. }));
    assert!(matches!(results.raw_values[1], TaskResult::Aborted));
    assert!(matches!(results.raw_values[2], TaskResult::Aborted));
}

#[test]
fn failed_inputs_skip_downstream_tasks() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    let mut graph = GraphBuilder::new();
    let a = graph.named_failing("app.a", "nope", 1);
    let b = graph.named_sum("app.b", &[a], 2);
    let arena = graph.build();

    let results = Evaluator::new(dir.path(), dir.path().join("out"))
        .with_jobs(1)
        .with_fail_fast(false)
        .evaluate(arena, &[b])
        .unwrap();

    assert!(matches!(results.raw_values[0], TaskResult::Skipped));
    // No stale record may survive a failed terminal.
    assert!(!dir
        .path()
        .join("out")
        .join("app")
        .join("b")
        .join("meta.json")
        .exists());
}

/// A partial failure persists its best-effort value for inspection, but
/// the next run still misses.
#[test]
fn partial_failure_is_persisted_but_never_hits() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");

    let mut graph = GraphBuilder::new();
    let g = graph.add(
        TaskBuilder::new(|_ctx| {
            Err(TaskFailure::with_partial("bad", value(99i32)))
        })
        .named(Segments::parse("app.partial"))
        .json_format::<i32>()
        .side_hash(5),
    );
    let arena = graph.build();

    let evaluator = Evaluator::new(dir.path(), &out)
        .with_jobs(1)
        .with_fail_fast(false);

    let first = evaluator.evaluate(arena.clone(), &[g]).unwrap();
    assert!(matches!(
        first.raw_values[0],
        TaskResult::Failure { ref msg, partial: Some(_) } if msg == "bad"
    ));

    let meta_path = out.join("app").join("partial").join("meta.json");
    let meta: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&meta_path).unwrap()).unwrap();
    assert_eq!(meta["value"], serde_json::json!(99));

    let second = evaluator.evaluate(arena, &[g]).unwrap();
    assert!(!second.timings[0].cached);
    assert_eq!(second.evaluated.len(), 1);
}

#[test]
fn group_failures_are_reported_on_the_run_logger() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    let mut graph = GraphBuilder::new();
    let a = graph.named_failing("app.a", "broken", 1);
    let arena = graph.build();

    let logger = Arc::new(MemoryLogger::new());
    Evaluator::new(dir.path(), dir.path().join("out"))
        .with_jobs(1)
        .with_fail_fast(false)
        .with_logger(logger.clone())
        .evaluate(arena, &[a])
        .unwrap();

    assert!(logger.contains("app.a failed"));
    assert!(logger.contains("[1/1] app.a"));
}

#[test]
fn dest_is_exclusive_within_a_group() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    let mut graph = GraphBuilder::new();
    // An anonymous input that grabs dest first, then a named terminal
    // that wants it too.
    let grabber = graph.add(TaskBuilder::new(|ctx| {
        ctx.dest()?;
        Ok(value(1i32))
    }));
    let terminal = graph.add(
        TaskBuilder::new(|ctx| {
            ctx.dest()?;
            Ok(value(2i32))
        })
        .input(grabber)
        .named(Segments::parse("app.greedy"))
        .json_format::<i32>(),
    );
    let arena = graph.build();

    let results = Evaluator::new(dir.path(), dir.path().join("out"))
        .with_jobs(1)
        .with_fail_fast(false)
        .evaluate(arena, &[terminal])
        .unwrap();

    match &results.raw_values[0] {
        TaskResult::Failure { msg, .. } => {
            assert!(msg.contains("already acquired"));
            assert!(msg.contains("first acquired at:"));
        }
        other => panic!("expected a dest conflict failure, got {other:?}"),
    }
}

#[test]
fn anonymous_goals_cannot_take_dest() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    let mut graph = GraphBuilder::new();
    let anon = graph.add(TaskBuilder::new(|ctx| {
        ctx.dest()?;
        Ok(value(1i32))
    }));
    let arena = graph.build();

    let results = Evaluator::new(dir.path(), dir.path().join("out"))
        .with_jobs(1)
        .with_fail_fast(false)
        .evaluate(arena, &[anon])
        .unwrap();

    assert!(matches!(
        results.raw_values[0],
        TaskResult::Failure { ref msg, .. } if msg.contains("no scratch directory")
    ));
}

#[test]
fn flush_dest_clears_the_scratch_directory() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");

    let mut graph = GraphBuilder::new();
    let t = graph.add(
        TaskBuilder::new(|ctx| {
            let dest = ctx.dest()?;
            let marker = dest.join("marker");
            let existed = marker.exists();
            std::fs::write(&marker, b"x").map_err(|e| TaskFailure::new(e.to_string()))?;
            Ok(value(existed))
        })
        .named(Segments::parse("app.flushed"))
        .flush_dest()
        .side_hash(1),
    );
    let arena = graph.build();

    let evaluator = Evaluator::new(dir.path(), &out).with_jobs(1);

    let first = evaluator.evaluate(arena.clone(), &[t]).unwrap();
    assert_eq!(
        cachedag::model::value_as::<bool>(first.raw_values[0].value().unwrap()),
        Some(&false)
    );

    // No value format on this task, so the next run misses and re-runs;
    // flush_dest must have wiped the marker in between.
    let second = evaluator.evaluate(arena, &[t]).unwrap();
    assert_eq!(
        cachedag::model::value_as::<bool>(second.raw_values[0].value().unwrap()),
        Some(&false)
    );
}
