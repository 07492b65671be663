// src/engine/mod.rs

//! Evaluation drivers and result assembly.
//!
//! [`Evaluator`] is the entry point: it plans the requested goals,
//! picks a driver (sequential for one worker, the parallel scheduler
//! otherwise), and assembles the per-run [`Results`].

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use tracing::info;

use crate::cache::WorkerCache;
use crate::errors::{CachedagError, Result};
use crate::exec::{BuildProblemReporter, SilentReporter, TestReporter};
use crate::logging::{FileLogger, Logger, SilentLogger};
use crate::model::{Segments, TaskArena, TaskId, TaskResult};
use crate::plan::{plan, ModuleDiscovery, NoDiscovery, Plan, Terminal};
use crate::profile;

pub mod scheduler;
pub mod sequential;

/// Wall-clock spent on one group, and whether it was a cache hit.
#[derive(Debug, Clone)]
pub struct GroupTiming {
    pub terminal: Terminal,
    pub millis: u64,
    pub cached: bool,
}

/// Shared, read-only evaluation parameters handed to both drivers and
/// every worker job.
pub(crate) struct EvalContext {
    pub arena: Arc<TaskArena>,
    pub home: PathBuf,
    pub out: PathBuf,
    pub external_out: PathBuf,
    pub foreign_prefix: Option<Segments>,
    pub env: HashMap<String, String>,
    pub logic_hash: i32,
    pub fail_fast: bool,
    pub jobs: usize,
    pub worker_cache: WorkerCache,
    pub logger: Arc<dyn Logger>,
    pub problems: Arc<dyn BuildProblemReporter>,
    pub tests: Arc<dyn TestReporter>,
}

/// What a driver accumulates while draining the plan.
#[derive(Default)]
pub(crate) struct DriverState {
    pub results: HashMap<TaskId, TaskResult>,
    pub evaluated: Vec<TaskId>,
    pub timings: Vec<GroupTiming>,
}

/// Collated outcome of one run.
pub struct Results {
    /// Result per requested goal, in request order.
    pub raw_values: Vec<TaskResult>,
    /// Result of every task touched by the run.
    pub results: HashMap<TaskId, TaskResult>,
    /// Tasks whose bodies were actually driven (cache misses).
    pub evaluated: Vec<TaskId>,
    /// Failing results of each group, keyed by its terminal.
    pub failing: HashMap<Terminal, Vec<TaskResult>>,
    pub timings: Vec<GroupTiming>,
}

impl Results {
    /// Values of the requested goals; `None` for failing goals.
    pub fn values(&self) -> Vec<Option<&crate::model::TaskValue>> {
        self.raw_values.iter().map(TaskResult::value).collect()
    }
}

/// The execution core. Construct once per workspace, configure with the
/// `with_*` methods, then [`evaluate`](Evaluator::evaluate) goal sets.
pub struct Evaluator {
    home: PathBuf,
    out: PathBuf,
    external_out: PathBuf,
    foreign_prefix: Option<Segments>,
    env: HashMap<String, String>,
    logic_hash: i32,
    fail_fast: bool,
    jobs: Option<usize>,
    worker_cache: WorkerCache,
    logger: Arc<dyn Logger>,
    discovery: Arc<dyn ModuleDiscovery>,
    problems: Arc<dyn BuildProblemReporter>,
    tests: Arc<dyn TestReporter>,
}

impl Evaluator {
    pub fn new(home: impl Into<PathBuf>, out: impl Into<PathBuf>) -> Self {
        let out = out.into();
        Evaluator {
            home: home.into(),
            external_out: out.join("external"),
            out,
            foreign_prefix: None,
            env: HashMap::new(),
            logic_hash: 0,
            fail_fast: true,
            jobs: None,
            worker_cache: WorkerCache::new(),
            logger: Arc::new(SilentLogger),
            discovery: Arc::new(NoDiscovery),
            problems: Arc::new(SilentReporter),
            tests: Arc::new(SilentReporter),
        }
    }

    pub fn with_external_out(mut self, path: impl Into<PathBuf>) -> Self {
        self.external_out = path.into();
        self
    }

    /// Prefix applied to every resolved segment path, for cross-module
    /// references into this workspace.
    pub fn with_foreign_prefix(mut self, prefix: Segments) -> Self {
        self.foreign_prefix = Some(prefix);
        self
    }

    /// Environment visible to task bodies. The core itself reads none.
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Fingerprint of the build logic itself; changing it invalidates
    /// every cached group.
    pub fn with_logic_hash(mut self, hash: i32) -> Self {
        self.logic_hash = hash;
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Worker count; defaults to the logical processor count. One worker
    /// selects the sequential driver.
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = Some(jobs.max(1));
        self
    }

    /// Share a process-lived worker cache across evaluators.
    pub fn with_worker_cache(mut self, cache: WorkerCache) -> Self {
        self.worker_cache = cache;
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_discovery(mut self, discovery: Arc<dyn ModuleDiscovery>) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn with_problem_reporter(mut self, reporter: Arc<dyn BuildProblemReporter>) -> Self {
        self.problems = reporter;
        self
    }

    pub fn with_test_reporter(mut self, reporter: Arc<dyn TestReporter>) -> Self {
        self.tests = reporter;
        self
    }

    pub fn out(&self) -> &Path {
        &self.out
    }

    pub fn worker_cache(&self) -> &WorkerCache {
        &self.worker_cache
    }

    /// Plan without evaluating, for callers that want to inspect the
    /// grouping.
    pub fn plan(&self, arena: &TaskArena, goals: &[TaskId]) -> Result<Plan> {
        plan(arena, goals, self.discovery.as_ref())
    }

    /// Evaluate `goals`: resolve the graph, drain every group at most
    /// once, and collate results. Cached groups are not re-run.
    pub fn evaluate(&self, arena: Arc<TaskArena>, goals: &[TaskId]) -> Result<Results> {
        let plan = plan(&arena, goals, self.discovery.as_ref())?;

        let jobs = self.jobs.unwrap_or_else(default_parallelism);
        fs::create_dir_all(&self.out)
            .with_context(|| format!("creating output root {:?}", self.out))?;

        let ctx = Arc::new(EvalContext {
            arena,
            home: self.home.clone(),
            out: self.out.clone(),
            external_out: self.external_out.clone(),
            foreign_prefix: self.foreign_prefix.clone(),
            env: self.env.clone(),
            logic_hash: self.logic_hash,
            fail_fast: self.fail_fast,
            jobs,
            worker_cache: self.worker_cache.clone(),
            logger: self.logger.clone(),
            problems: self.problems.clone(),
            tests: self.tests.clone(),
        });

        let eval_log = Arc::new(FileLogger::new(
            false,
            self.out.join(profile::EVALUATOR_LOG),
            true,
            false,
        ));
        eval_log.debug(&format!(
            "evaluating {} goals across {} groups with {} workers (fail_fast={})",
            plan.goals.len(),
            plan.sorted_groups.len(),
            jobs,
            self.fail_fast,
        ));
        info!(
            goals = plan.goals.len(),
            groups = plan.sorted_groups.len(),
            jobs,
            "starting evaluation"
        );

        let state = if jobs <= 1 {
            sequential::run(&ctx, &plan, eval_log.as_ref())
        } else {
            scheduler::run(ctx.clone(), &plan, jobs, eval_log.clone())?
        };
        eval_log.close();

        self.assemble(&plan, state)
    }

    fn assemble(&self, plan: &Plan, state: DriverState) -> Result<Results> {
        let mut raw_values = Vec::with_capacity(plan.goals.len());
        for &goal in &plan.goals {
            let result = state.results.get(&goal).cloned().ok_or_else(|| {
                CachedagError::MissingGoal(format!("{goal} has no recorded result"))
            })?;
            raw_values.push(result);
        }

        let mut failing: HashMap<Terminal, Vec<TaskResult>> = HashMap::new();
        for (terminal, members) in plan.sorted_groups.iter() {
            for id in members {
                if let Some(result) = state.results.get(id) {
                    if result.is_failing() {
                        failing
                            .entry(terminal.clone())
                            .or_default()
                            .push(result.clone());
                    }
                }
            }
        }

        profile::write_profile(&self.out.join(profile::PROFILE_FILE), &state.timings)?;

        Ok(Results {
            raw_values,
            results: state.results,
            evaluated: state.evaluated,
            failing,
            timings: state.timings,
        })
    }
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}
