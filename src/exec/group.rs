// src/exec/group.rs

//! Cached evaluation of one group.
//!
//! A group is evaluated at most once per run. Labelled terminals get the
//! full treatment: worker short-circuit, lenient disk probe, scratch
//! directory management and metadata writes. Anonymous terminals are
//! evaluated directly with no persistent state.

use std::backtrace::Backtrace;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::{meta, CachedRecord, TaskPaths};
use crate::engine::EvalContext;
use crate::exec::context::{DestScope, TaskContext};
use crate::hash::{json_hash, ordered_hash};
use crate::logging::{FileLogger, Logger, MultiLogger, PrefixLogger};
use crate::model::{Task, TaskId, TaskResult, TaskValue};
use crate::plan::Terminal;

/// Outcome of evaluating (or cache-hitting) one group.
pub struct GroupEvaluated {
    /// Result per group member, in group-topological order. On a cache
    /// hit only the terminal is present.
    pub new_results: Vec<(TaskId, TaskResult)>,
    /// Tasks whose bodies were actually driven this run.
    pub new_evaluated: Vec<TaskId>,
    pub cached: bool,
}

/// Input fingerprint of a group: ordered hash of the upstream success
/// value-hashes, plus the ordered hash of the members' side hashes, plus
/// the run-wide build-logic fingerprint.
pub(crate) fn group_inputs_hash(
    ctx: &EvalContext,
    group: &[TaskId],
    upstream: &HashMap<TaskId, TaskResult>,
) -> i32 {
    let members: HashSet<TaskId> = group.iter().copied().collect();
    let mut seen: HashSet<TaskId> = HashSet::new();
    let mut external_hashes: Vec<i32> = Vec::new();

    for &id in group {
        for &input in ctx.arena.get(id).inputs() {
            if !members.contains(&input) && seen.insert(input) {
                if let Some(hash) = upstream.get(&input).and_then(TaskResult::value_hash) {
                    external_hashes.push(hash);
                }
            }
        }
    }

    let side_hashes: Vec<i32> = group.iter().map(|&id| ctx.arena.get(id).side_hash()).collect();

    ordered_hash(external_hashes)
        .wrapping_add(ordered_hash(side_hashes))
        .wrapping_add(ctx.logic_hash)
}

/// Decide cache hit vs miss for a group, evaluating on miss.
pub(crate) fn evaluate_group_cached(
    ctx: &EvalContext,
    terminal: &Terminal,
    group: &[TaskId],
    upstream: &HashMap<TaskId, TaskResult>,
    counter_msg: &str,
) -> GroupEvaluated {
    let inputs_hash = group_inputs_hash(ctx, group, upstream);
    let label = terminal.render();

    let (task, segments) = match terminal {
        Terminal::Task(_) => {
            // Requested anonymous task: no caching, no paths.
            let (new_results, new_evaluated) =
                evaluate_group(ctx, group, upstream, inputs_hash, None, &label, counter_msg);
            return GroupEvaluated {
                new_results,
                new_evaluated,
                cached: false,
            };
        }
        Terminal::Labelled { task, segments } => (*task, segments),
    };

    let terminal_task = ctx.arena.get(task);
    let external = terminal_task.named().map(|n| n.external).unwrap_or(false);
    let paths = TaskPaths::resolve(
        &ctx.out,
        &ctx.external_out,
        ctx.foreign_prefix.as_ref(),
        segments,
        external,
    );

    if let Err(err) = fs::create_dir_all(&paths.out) {
        let error = format!("creating output directory {:?}: {err}", paths.out);
        warn!(terminal = %label, error = %error, "group setup failed");
        let new_results = group
            .iter()
            .map(|&id| {
                let result = if id == task {
                    TaskResult::Exception {
                        error: error.clone(),
                        backtrace: String::new(),
                    }
                } else {
                    TaskResult::Skipped
                };
                (id, result)
            })
            .collect();
        return GroupEvaluated {
            new_results,
            new_evaluated: Vec::new(),
            cached: false,
        };
    }

    if terminal_task.is_worker() {
        let key = segments.render();
        if let Some(value) = ctx.worker_cache.get(&key, inputs_hash) {
            debug!(terminal = %label, inputs_hash, "worker cache hit");
            return GroupEvaluated {
                new_results: vec![(
                    task,
                    TaskResult::Success {
                        value,
                        value_hash: inputs_hash,
                    },
                )],
                new_evaluated: Vec::new(),
                cached: true,
            };
        }

        let (new_results, new_evaluated) =
            evaluate_group(ctx, group, upstream, inputs_hash, Some(&paths), &label, counter_msg);
        if let Some((_, TaskResult::Success { value, .. })) =
            new_results.iter().find(|(id, _)| *id == task)
        {
            ctx.worker_cache.put(&key, inputs_hash, value.clone());
        }
        return GroupEvaluated {
            new_results,
            new_evaluated,
            cached: false,
        };
    }

    if let Some(record) = meta::read_record(&paths.meta) {
        if record.inputs_hash == inputs_hash {
            if let Some(format) = terminal_task.format() {
                if let Some(value) = format.read(&record.value) {
                    debug!(terminal = %label, inputs_hash, "disk cache hit");
                    return GroupEvaluated {
                        new_results: vec![(
                            task,
                            TaskResult::Success {
                                value,
                                value_hash: record.value_hash,
                            },
                        )],
                        new_evaluated: Vec::new(),
                        cached: true,
                    };
                }
            }
        }
    }

    // Miss: run the group against a fresh (or flushed) scratch area.
    if terminal_task.flush_dest() {
        match fs::remove_dir_all(&paths.dest) {
            Ok(()) => debug!(terminal = %label, "flushed scratch directory"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(terminal = %label, error = %err, "failed to flush scratch directory"),
        }
    }

    let (new_results, new_evaluated) =
        evaluate_group(ctx, group, upstream, inputs_hash, Some(&paths), &label, counter_msg);

    match new_results.iter().find(|(id, _)| *id == task).map(|(_, r)| r) {
        Some(TaskResult::Success { value, value_hash }) => {
            write_terminal_record(terminal_task, &paths, value, *value_hash, inputs_hash);
        }
        Some(TaskResult::Failure {
            partial: Some((value, value_hash)),
            ..
        }) => {
            // Keep the best-effort value inspectable. The recorded
            // inputs hash is offset by one so the next probe misses:
            // a failed terminal must re-run even on unchanged inputs.
            write_terminal_record(
                terminal_task,
                &paths,
                value,
                *value_hash,
                inputs_hash.wrapping_add(1),
            );
        }
        _ => meta::remove_record(&paths.meta),
    }

    GroupEvaluated {
        new_results,
        new_evaluated,
        cached: false,
    }
}

fn write_terminal_record(
    task: &Task,
    paths: &TaskPaths,
    value: &TaskValue,
    value_hash: i32,
    inputs_hash: i32,
) {
    let Some(format) = task.format() else {
        // Unserializable value: nothing to persist, and a stale record
        // must not shadow this run.
        meta::remove_record(&paths.meta);
        return;
    };

    match format.write(value) {
        Some(json) => {
            let record = CachedRecord {
                value: json,
                value_hash,
                inputs_hash,
            };
            if let Err(err) = meta::write_record(&paths.meta, &record) {
                warn!(path = %paths.meta.display(), error = %err, "failed to persist cache record");
            }
        }
        None => meta::remove_record(&paths.meta),
    }
}

/// Drive each task body of the group in group-topological order.
pub(crate) fn evaluate_group(
    ctx: &EvalContext,
    group: &[TaskId],
    upstream: &HashMap<TaskId, TaskResult>,
    inputs_hash: i32,
    paths: Option<&TaskPaths>,
    label: &str,
    counter_msg: &str,
) -> (Vec<(TaskId, TaskResult)>, Vec<TaskId>) {
    ctx.logger.ticker(&format!("[{counter_msg}] {label}"));

    // Task output goes through the scoped logger only; with parallel
    // workers a process-global stdio swap would interleave groups.
    let file_logger: Option<Arc<FileLogger>> =
        paths.map(|p| Arc::new(FileLogger::new(false, &p.log, true, true)));
    let base: Arc<dyn Logger> = match &file_logger {
        Some(capture) => Arc::new(MultiLogger::new(
            ctx.logger.colored(),
            ctx.logger.clone(),
            capture.clone(),
        )),
        None => ctx.logger.clone(),
    };
    let group_logger = PrefixLogger::new(base, format!("[{counter_msg}] {label}"));

    let dest_scope = DestScope::new(paths.map(|p| p.dest.clone()));
    let mut new_results: Vec<(TaskId, TaskResult)> = Vec::new();
    let mut local: HashMap<TaskId, TaskResult> = HashMap::new();
    let mut new_evaluated: Vec<TaskId> = Vec::new();
    let mut any_failed = false;

    for &id in group {
        new_evaluated.push(id);
        let task = ctx.arena.get(id);

        let mut args: Vec<TaskValue> = Vec::with_capacity(task.inputs().len());
        let mut skipped = false;
        for input in task.inputs() {
            let result = local.get(input).or_else(|| upstream.get(input));
            match result {
                Some(TaskResult::Success { value, .. }) => args.push(value.clone()),
                _ => {
                    skipped = true;
                    break;
                }
            }
        }
        if skipped {
            any_failed = true;
            local.insert(id, TaskResult::Skipped);
            new_results.push((id, TaskResult::Skipped));
            continue;
        }

        let mut task_ctx = TaskContext {
            task: id,
            label: ctx.arena.label_of(id),
            args,
            dest: &dest_scope,
            logger: &group_logger,
            home: &ctx.home,
            env: &ctx.env,
            problems: ctx.problems.as_ref(),
            tests: ctx.tests.as_ref(),
            jobs: ctx.jobs,
        };

        let outcome = catch_unwind(AssertUnwindSafe(|| (task.body())(&mut task_ctx)));

        let result = match outcome {
            Ok(Ok(value)) => {
                let value_hash = task_value_hash(task, &value, inputs_hash);
                TaskResult::Success { value, value_hash }
            }
            Ok(Err(failure)) => {
                let partial = failure.partial.map(|value| {
                    let hash = task_value_hash(task, &value, inputs_hash);
                    (value, hash)
                });
                TaskResult::Failure {
                    msg: failure.msg,
                    partial,
                }
            }
            Err(panic) => TaskResult::Exception {
                error: panic_message(panic.as_ref()),
                backtrace: Backtrace::force_capture().to_string(),
            },
        };

        if result.is_failing() {
            any_failed = true;
        }
        local.insert(id, result.clone());
        new_results.push((id, result));
    }

    if any_failed && !ctx.fail_fast {
        ctx.logger.error(&format!("[{counter_msg}] {label} failed"));
    }
    if let Some(capture) = file_logger {
        capture.close();
    }

    (new_results, new_evaluated)
}

/// Workers and opaque values are identity-cached on inputs; everything
/// else hashes structurally through its serialized form.
fn task_value_hash(task: &Task, value: &TaskValue, inputs_hash: i32) -> i32 {
    if task.is_worker() {
        return inputs_hash;
    }
    match task.format().and_then(|f| f.write(value)) {
        Some(json) => json_hash(&json),
        None => inputs_hash,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task body panicked".to_string()
    }
}
