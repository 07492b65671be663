// src/engine/sequential.rs

//! In-order driver used when the run has a single worker.
//!
//! Groups evaluate one after another in planner order. Under fail-fast,
//! the first failing task marks every remaining group `Aborted` without
//! invoking any more bodies.

use std::time::Instant;

use tracing::debug;

use crate::engine::{DriverState, EvalContext, GroupTiming};
use crate::exec::group::evaluate_group_cached;
use crate::logging::Logger;
use crate::model::TaskResult;
use crate::plan::Plan;

pub(crate) fn run(ctx: &EvalContext, plan: &Plan, eval_log: &dyn Logger) -> DriverState {
    let total = plan.sorted_groups.len();
    let mut state = DriverState::default();
    let mut some_task_failed = false;

    for (index, (terminal, group)) in plan.sorted_groups.iter().enumerate() {
        let counter_msg = format!("{}/{}", index + 1, total);
        let label = terminal.render();

        if ctx.fail_fast && some_task_failed {
            eval_log.debug(&format!("[{counter_msg}] {label} aborted by fail-fast"));
            for &id in group {
                state.results.insert(id, TaskResult::Aborted);
            }
            continue;
        }

        let start = Instant::now();
        let evaluated = evaluate_group_cached(ctx, terminal, group, &state.results, &counter_msg);
        let millis = start.elapsed().as_millis() as u64;

        if evaluated
            .new_results
            .iter()
            .any(|(_, result)| result.is_failing())
        {
            some_task_failed = true;
        }

        for (id, result) in evaluated.new_results {
            state.results.insert(id, result);
        }
        state.evaluated.extend(evaluated.new_evaluated);

        debug!(
            group = %label,
            millis,
            cached = evaluated.cached,
            "group finished"
        );
        eval_log.debug(&format!(
            "[{counter_msg}] {label} finished in {millis}ms (cached={})",
            evaluated.cached
        ));

        state.timings.push(GroupTiming {
            terminal: terminal.clone(),
            millis,
            cached: evaluated.cached,
        });
    }

    state
}
