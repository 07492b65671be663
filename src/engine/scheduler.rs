// src/engine/scheduler.rs

//! Parallel driver: a single-owner scheduling loop over a fixed worker
//! pool.
//!
//! The loop owns all scheduling state (`pending`, `in_progress`, `done`)
//! and is the only writer of the shared result map. Jobs run group
//! bodies on a bounded blocking pool and report back over an mpsc
//! channel, so no locks guard the scheduling decisions themselves.
//!
//! Ordering guarantees:
//! - a group is dispatched only after every prerequisite group is done;
//! - within a group, tasks run sequentially on one worker;
//! - two groups whose terminals render to the same segments are never in
//!   flight together.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;
use std::time::Instant;

use anyhow::Context as _;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, warn};

use crate::engine::{DriverState, EvalContext, GroupTiming};
use crate::errors::Result;
use crate::exec::group::{evaluate_group_cached, GroupEvaluated};
use crate::logging::{FileLogger, Logger};
use crate::model::{TaskId, TaskResult};
use crate::plan::{Plan, Terminal};
use crate::profile::{ChromeTraceWriter, TraceEvent, PAR_PROFILE_FILE, TASKS_PAR_LOG};

enum JobOutcome {
    Evaluated(GroupEvaluated),
    /// Fail-fast tripped before the job body ran; every member maps to
    /// `Aborted`.
    Aborted(Vec<(TaskId, TaskResult)>),
    /// The job itself died (executor-level failure, not a task body
    /// failure).
    Crashed(String),
}

struct JobDone {
    group: usize,
    outcome: JobOutcome,
    start_us: u64,
    dur_us: u64,
    millis: u64,
    tid: i64,
}

/// Inputs to one work-selection pass; see [`select_ready`].
struct SelectState<'a> {
    pending: &'a mut Vec<usize>,
    in_progress: &'a HashSet<usize>,
    done: &'a HashSet<usize>,
    deps: &'a [Vec<usize>],
    segments: &'a [Option<String>],
    worker_count: usize,
}

/// Pick dependency-free groups from `pending`, in planner order.
///
/// Groups whose rendered segments match anything in flight (or already
/// taken this pass) are skipped and flag the pass as colliding. Scanning
/// stops once at least one group is taken and either a collision was
/// seen (dispatch what is eligible so the collider can clear) or the
/// overscan bound of twice the worker count is reached.
fn select_ready(state: &mut SelectState<'_>) -> Vec<usize> {
    if state.pending.is_empty() || state.in_progress.len() > state.worker_count {
        return Vec::new();
    }

    let old_seen: HashSet<&str> = state
        .in_progress
        .iter()
        .filter_map(|g| state.segments[*g].as_deref())
        .collect();
    let mut new_seen: HashSet<String> = HashSet::new();
    let mut taken: Vec<usize> = Vec::new();
    let mut collisions_free = true;

    let mut index = 0;
    while index < state.pending.len() {
        if !taken.is_empty() && (!collisions_free || taken.len() >= 2 * state.worker_count) {
            break;
        }

        let group = state.pending[index];
        let segment = state.segments[group].as_deref();

        if let Some(segment) = segment {
            if old_seen.contains(segment) || new_seen.contains(segment) {
                collisions_free = false;
                index += 1;
                continue;
            }
        }

        if !state.deps[group].iter().all(|dep| state.done.contains(dep)) {
            index += 1;
            continue;
        }

        state.pending.remove(index);
        if let Some(segment) = segment {
            new_seen.insert(segment.to_string());
        }
        taken.push(group);
    }

    taken
}

/// Everything a dispatched job needs, cloneable into the job future.
struct Dispatcher {
    ctx: Arc<EvalContext>,
    groups: Arc<Vec<(Terminal, Vec<TaskId>)>>,
    total: usize,
    tx: mpsc::UnboundedSender<JobDone>,
    semaphore: Arc<Semaphore>,
    some_task_failed: Arc<AtomicBool>,
    next_counter: Arc<AtomicUsize>,
    epoch: Instant,
    tids: Arc<Mutex<HashMap<ThreadId, i64>>>,
    par_log: Arc<FileLogger>,
}

impl Dispatcher {
    fn dispatch(&self, group_index: usize, upstream: HashMap<TaskId, TaskResult>) {
        let counter_msg = format!(
            "{}/{}",
            self.next_counter.fetch_add(1, Ordering::SeqCst) + 1,
            self.total
        );
        let ctx = self.ctx.clone();
        let (terminal, members) = self.groups[group_index].clone();
        let tx = self.tx.clone();
        let semaphore = self.semaphore.clone();
        let some_task_failed = self.some_task_failed.clone();
        let epoch = self.epoch;
        let tids = self.tids.clone();
        let par_log = self.par_log.clone();

        tokio::spawn(async move {
            // The permit bounds how many group bodies run at once; the
            // submission itself queues like a completion service.
            let _permit = semaphore.acquire_owned().await.ok();

            let start_us = epoch.elapsed().as_micros() as u64;
            let start = Instant::now();
            let fail_fast = ctx.fail_fast;

            let join = tokio::task::spawn_blocking(move || {
                let tid = tid_of(&tids);
                if fail_fast && some_task_failed.load(Ordering::SeqCst) {
                    let aborted = members
                        .iter()
                        .map(|&id| (id, TaskResult::Aborted))
                        .collect();
                    return (JobOutcome::Aborted(aborted), tid);
                }

                par_log.debug(&format!("[{counter_msg}] {} started", terminal.render()));
                let evaluated =
                    evaluate_group_cached(&ctx, &terminal, &members, &upstream, &counter_msg);
                (JobOutcome::Evaluated(evaluated), tid)
            })
            .await;

            let dur_us = epoch.elapsed().as_micros() as u64 - start_us;
            let millis = start.elapsed().as_millis() as u64;
            let (outcome, tid) = match join {
                Ok(pair) => pair,
                Err(err) => (JobOutcome::Crashed(err.to_string()), 0),
            };

            // The receiver is gone once the scheduler stops draining;
            // late completions are dropped on purpose.
            let _ = tx.send(JobDone {
                group: group_index,
                outcome,
                start_us,
                dur_us,
                millis,
                tid,
            });
        });
    }
}

/// Stable small-integer id for the current worker thread, for the trace
/// viewer's lane assignment.
fn tid_of(registry: &Mutex<HashMap<ThreadId, i64>>) -> i64 {
    let id = std::thread::current().id();
    let Ok(mut guard) = registry.lock() else {
        return 0;
    };
    let next = guard.len() as i64 + 1;
    *guard.entry(id).or_insert(next)
}

pub(crate) fn run(
    ctx: Arc<EvalContext>,
    plan: &Plan,
    worker_count: usize,
    eval_log: Arc<FileLogger>,
) -> Result<DriverState> {
    let total = plan.sorted_groups.len();
    let mut state = DriverState::default();
    if total == 0 {
        return Ok(state);
    }

    let groups: Arc<Vec<(Terminal, Vec<TaskId>)>> = Arc::new(
        plan.sorted_groups
            .iter()
            .map(|(terminal, members)| (terminal.clone(), members.to_vec()))
            .collect(),
    );

    // Prerequisite groups and external inputs, precomputed per group.
    let mut inter_group_deps: Vec<Vec<usize>> = Vec::with_capacity(total);
    let mut external_inputs: Vec<Vec<TaskId>> = Vec::with_capacity(total);
    for (_, members) in groups.iter() {
        let member_set: HashSet<TaskId> = members.iter().copied().collect();
        let mut deps: Vec<usize> = Vec::new();
        let mut dep_seen: HashSet<usize> = HashSet::new();
        let mut inputs: Vec<TaskId> = Vec::new();
        let mut input_seen: HashSet<TaskId> = HashSet::new();

        for &id in members {
            for &input in ctx.arena.get(id).inputs() {
                if member_set.contains(&input) || !input_seen.insert(input) {
                    continue;
                }
                inputs.push(input);
                if let Some(owner) = plan.sorted_groups.key_of(&input) {
                    if let Some(owner_index) = plan.sorted_groups.index_of(owner) {
                        if dep_seen.insert(owner_index) {
                            deps.push(owner_index);
                        }
                    }
                }
            }
        }
        inter_group_deps.push(deps);
        external_inputs.push(inputs);
    }

    let group_segments: Vec<Option<String>> = groups
        .iter()
        .map(|(terminal, _)| terminal.label().map(|s| s.render()))
        .collect();

    let par_log = Arc::new(FileLogger::new(
        false,
        ctx.out.join(TASKS_PAR_LOG),
        true,
        false,
    ));
    let mut trace = ChromeTraceWriter::create(&ctx.out.join(PAR_PROFILE_FILE))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .max_blocking_threads(worker_count.max(1))
        .thread_name("cachedag-worker")
        .enable_time()
        .build()
        .context("building scheduler runtime")?;

    let some_task_failed = Arc::new(AtomicBool::new(false));
    let loop_result: Result<()> = runtime.block_on(async {
        let (tx, mut rx) = mpsc::unbounded_channel::<JobDone>();
        let dispatcher = Dispatcher {
            ctx: ctx.clone(),
            groups: groups.clone(),
            total,
            tx,
            semaphore: Arc::new(Semaphore::new(worker_count.max(1))),
            some_task_failed: some_task_failed.clone(),
            next_counter: Arc::new(AtomicUsize::new(0)),
            epoch: Instant::now(),
            tids: Arc::new(Mutex::new(HashMap::new())),
            par_log: par_log.clone(),
        };

        let mut pending: Vec<usize> = (0..total).collect();
        let mut in_progress: HashSet<usize> = HashSet::new();
        let mut done: HashSet<usize> = HashSet::new();

        let schedule = |trigger: &str,
                            pending: &mut Vec<usize>,
                            in_progress: &mut HashSet<usize>,
                            done: &HashSet<usize>,
                            results: &HashMap<TaskId, TaskResult>| {
            let selected = select_ready(&mut SelectState {
                pending,
                in_progress,
                done,
                deps: &inter_group_deps,
                segments: &group_segments,
                worker_count,
            });
            if !selected.is_empty() {
                par_log.debug(&format!(
                    "scheduling {} group(s) after {trigger}",
                    selected.len()
                ));
            }
            for group_index in selected {
                in_progress.insert(group_index);
                // Jobs get a stable snapshot of exactly the upstream
                // results their group consumes.
                let upstream: HashMap<TaskId, TaskResult> = external_inputs[group_index]
                    .iter()
                    .filter_map(|id| results.get(id).map(|r| (*id, r.clone())))
                    .collect();
                dispatcher.dispatch(group_index, upstream);
            }
        };

        schedule("initial", &mut pending, &mut in_progress, &done, &state.results);

        while !in_progress.is_empty() {
            let Some(msg) = rx.recv().await else {
                break;
            };
            let group_index = msg.group;
            in_progress.remove(&group_index);
            done.insert(group_index);
            let (terminal, _) = &groups[group_index];

            match msg.outcome {
                JobOutcome::Evaluated(evaluated) => {
                    if evaluated
                        .new_results
                        .iter()
                        .any(|(_, result)| result.is_failing())
                    {
                        some_task_failed.store(true, Ordering::SeqCst);
                    }
                    for (id, result) in evaluated.new_results {
                        state.results.insert(id, result);
                    }
                    state.evaluated.extend(evaluated.new_evaluated);
                    state.timings.push(GroupTiming {
                        terminal: terminal.clone(),
                        millis: msg.millis,
                        cached: evaluated.cached,
                    });
                    trace.event(&TraceEvent::complete(
                        terminal.render(),
                        msg.start_us,
                        msg.dur_us,
                        msg.tid,
                        evaluated.cached,
                    ))?;
                    debug!(
                        group = %terminal.render(),
                        millis = msg.millis,
                        cached = evaluated.cached,
                        "group finished"
                    );
                }
                JobOutcome::Aborted(results) => {
                    for (id, result) in results {
                        state.results.insert(id, result);
                    }
                    par_log.debug(&format!("{} aborted by fail-fast", terminal.render()));
                }
                JobOutcome::Crashed(err) => {
                    // Executor-level failure: record it, keep draining.
                    some_task_failed.store(true, Ordering::SeqCst);
                    error!(group = %terminal.render(), error = %err, "group job crashed");
                    eval_log.error(&format!("group job for {} crashed: {err}", terminal.render()));
                }
            }

            if ctx.fail_fast && some_task_failed.load(Ordering::SeqCst) {
                warn!("fail-fast tripped; aborting unstarted goals");
                break;
            }

            schedule(
                &terminal.render(),
                &mut pending,
                &mut in_progress,
                &done,
                &state.results,
            );
        }

        Ok(())
    });

    // Dropping the runtime interrupts idle workers and lets in-flight
    // jobs finish their current group.
    drop(runtime);

    if ctx.fail_fast && some_task_failed.load(Ordering::SeqCst) {
        for &goal in &plan.goals {
            state.results.entry(goal).or_insert(TaskResult::Aborted);
        }
    }

    trace.finish()?;
    par_log.close();
    loop_result?;

    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn select(
        pending: &mut Vec<usize>,
        in_progress: &[usize],
        done: &[usize],
        deps: &[Vec<usize>],
        segments: &[Option<String>],
        worker_count: usize,
    ) -> Vec<usize> {
        let in_progress: HashSet<usize> = in_progress.iter().copied().collect();
        let done: HashSet<usize> = done.iter().copied().collect();
        select_ready(&mut SelectState {
            pending,
            in_progress: &in_progress,
            done: &done,
            deps,
            segments,
            worker_count,
        })
    }

    fn label(s: &str) -> Option<String> {
        Some(s.to_string())
    }

    #[test]
    fn takes_dependency_free_groups_in_plan_order() {
        let deps = vec![vec![], vec![], vec![0, 1]];
        let segments = vec![label("a"), label("b"), label("c")];
        let mut pending = vec![0, 1, 2];

        let taken = select(&mut pending, &[], &[], &deps, &segments, 2);
        assert_eq!(taken, vec![0, 1]);
        assert_eq!(pending, vec![2]);
    }

    #[test]
    fn dependencies_gate_selection() {
        let deps = vec![vec![], vec![0]];
        let segments = vec![label("a"), label("b")];

        let mut pending = vec![0, 1];
        assert_eq!(select(&mut pending, &[], &[], &deps, &segments, 4), vec![0]);

        // Once group 0 is done, group 1 becomes eligible.
        let mut pending = vec![1];
        assert_eq!(select(&mut pending, &[], &[0], &deps, &segments, 4), vec![1]);
    }

    #[test]
    fn equal_segments_never_run_together() {
        let deps = vec![vec![], vec![], vec![]];
        let segments = vec![label("dup"), label("dup"), label("other")];

        // Group 0 in flight: group 1 collides, group 2 is dispatched and
        // the collision stops further overscan.
        let mut pending = vec![1, 2];
        let taken = select(&mut pending, &[0], &[], &deps, &segments, 4);
        assert_eq!(taken, vec![2]);
        assert_eq!(pending, vec![1]);
    }

    #[test]
    fn collision_within_one_pass_is_also_blocked() {
        let deps = vec![vec![], vec![]];
        let segments = vec![label("dup"), label("dup")];

        let mut pending = vec![0, 1];
        let taken = select(&mut pending, &[], &[], &deps, &segments, 4);
        assert_eq!(taken, vec![0]);
        assert_eq!(pending, vec![1]);
    }

    #[test]
    fn overscan_is_bounded_at_twice_the_workers() {
        let deps: Vec<Vec<usize>> = (0..8).map(|_| Vec::new()).collect();
        let segments: Vec<Option<String>> =
            (0..8).map(|i| label(&format!("g{i}"))).collect();

        let mut pending: Vec<usize> = (0..8).collect();
        let taken = select(&mut pending, &[], &[], &deps, &segments, 2);
        assert_eq!(taken, vec![0, 1, 2, 3]);
        assert_eq!(pending, vec![4, 5, 6, 7]);
    }

    #[test]
    fn saturated_pool_defers_scheduling() {
        let deps = vec![vec![], vec![]];
        let segments = vec![label("a"), label("b")];

        let mut pending = vec![1];
        // in_progress strictly above worker_count: early exit.
        let taken = select(&mut pending, &[0, 2, 3], &[], &deps, &segments, 2);
        assert!(taken.is_empty());
        assert_eq!(pending, vec![1]);
    }

    #[test]
    fn anonymous_groups_never_collide() {
        let deps = vec![vec![], vec![]];
        let segments: Vec<Option<String>> = vec![None, None];

        let mut pending = vec![0, 1];
        let taken = select(&mut pending, &[], &[], &deps, &segments, 4);
        assert_eq!(taken, vec![0, 1]);
    }
}
