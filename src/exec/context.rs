// src/exec/context.rs

//! The context object handed to task bodies, and the per-group scratch
//! directory guard.

use std::backtrace::Backtrace;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::logging::{Logger, OutputWriter};
use crate::model::{value_as, TaskFailure, TaskId, TaskValue};

/// External collaborator receiving build problems raised by task bodies.
pub trait BuildProblemReporter: Send + Sync {
    fn report_problem(&self, problem: &str);
}

/// External collaborator receiving test events raised by task bodies.
pub trait TestReporter: Send + Sync {
    fn report_event(&self, event: &str);
}

/// Reporter that swallows everything.
pub struct SilentReporter;

impl BuildProblemReporter for SilentReporter {
    fn report_problem(&self, _problem: &str) {}
}

impl TestReporter for SilentReporter {
    fn report_event(&self, _event: &str) {}
}

struct DestHolder {
    task: TaskId,
    label: String,
    backtrace: String,
}

/// Guards the group's scratch directory.
///
/// `dest` may be acquired by at most one task per group invocation. The
/// first caller's stack is remembered so a second caller's error can
/// point at who already holds it.
pub struct DestScope {
    dest: Option<PathBuf>,
    holder: Mutex<Option<DestHolder>>,
}

impl DestScope {
    pub fn new(dest: Option<PathBuf>) -> Self {
        DestScope {
            dest,
            holder: Mutex::new(None),
        }
    }

    /// Acquire the scratch directory for `task`, creating it on first
    /// use. Repeat calls from the same task return the same path.
    pub fn acquire(&self, task: TaskId, label: &str) -> Result<PathBuf, DestError> {
        let dest = self.dest.as_ref().ok_or_else(|| DestError {
            msg: format!("task {label} has no scratch directory (anonymous group)"),
            earlier_backtrace: None,
        })?;

        let mut guard = self.holder.lock().map_err(|_| DestError {
            msg: "scratch directory state poisoned".to_string(),
            earlier_backtrace: None,
        })?;

        match guard.as_ref() {
            Some(holder) if holder.task == task => Ok(dest.clone()),
            Some(holder) => Err(DestError {
                msg: format!(
                    "scratch directory already acquired by task {} in this group",
                    holder.label
                ),
                earlier_backtrace: Some(holder.backtrace.clone()),
            }),
            None => {
                fs::create_dir_all(dest).map_err(|err| DestError {
                    msg: format!("creating scratch directory {:?}: {err}", dest),
                    earlier_backtrace: None,
                })?;
                *guard = Some(DestHolder {
                    task,
                    label: label.to_string(),
                    backtrace: Backtrace::force_capture().to_string(),
                });
                Ok(dest.clone())
            }
        }
    }
}

/// Error from [`DestScope::acquire`]; carries the first acquirer's stack
/// when the conflict is a second task in the same group.
#[derive(Debug)]
pub struct DestError {
    pub msg: String,
    pub earlier_backtrace: Option<String>,
}

impl fmt::Display for DestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.earlier_backtrace {
            Some(backtrace) => {
                write!(f, "{}\nfirst acquired at:\n{}", self.msg, backtrace)
            }
            None => f.write_str(&self.msg),
        }
    }
}

impl std::error::Error for DestError {}

impl From<DestError> for TaskFailure {
    fn from(err: DestError) -> Self {
        TaskFailure::new(err.to_string())
    }
}

/// Everything a task body may touch while running.
pub struct TaskContext<'a> {
    pub(crate) task: TaskId,
    pub(crate) label: String,
    pub(crate) args: Vec<TaskValue>,
    pub(crate) dest: &'a DestScope,
    pub(crate) logger: &'a dyn Logger,
    pub(crate) home: &'a Path,
    pub(crate) env: &'a HashMap<String, String>,
    pub(crate) problems: &'a dyn BuildProblemReporter,
    pub(crate) tests: &'a dyn TestReporter,
    pub(crate) jobs: usize,
}

impl<'a> TaskContext<'a> {
    /// Input values, in the task's declared input order.
    pub fn args(&self) -> &[TaskValue] {
        &self.args
    }

    pub fn arg(&self, index: usize) -> Option<&TaskValue> {
        self.args.get(index)
    }

    /// Input `index` downcast to `T`, as a body-level failure when the
    /// input is missing or of another type.
    pub fn arg_as<T: 'static>(&self, index: usize) -> Result<&T, TaskFailure> {
        let arg = self
            .args
            .get(index)
            .ok_or_else(|| TaskFailure::new(format!("{}: no input #{index}", self.label)))?;
        value_as::<T>(arg).ok_or_else(|| {
            TaskFailure::new(format!("{}: input #{index} has an unexpected type", self.label))
        })
    }

    /// Lazy scratch directory; at most one task per group may take it.
    pub fn dest(&self) -> Result<PathBuf, TaskFailure> {
        self.dest
            .acquire(self.task, &self.label)
            .map_err(TaskFailure::from)
    }

    pub fn logger(&self) -> &dyn Logger {
        self.logger
    }

    /// Replacement for process stdout; bytes land in the group's log.
    pub fn out(&self) -> OutputWriter<'_> {
        OutputWriter::stdout(self.logger)
    }

    /// Replacement for process stderr.
    pub fn err(&self) -> OutputWriter<'_> {
        OutputWriter::stderr(self.logger)
    }

    /// Workspace home directory.
    pub fn home(&self) -> &Path {
        self.home
    }

    pub fn env(&self) -> &HashMap<String, String> {
        self.env
    }

    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str)
    }

    pub fn problem_reporter(&self) -> &dyn BuildProblemReporter {
        self.problems
    }

    pub fn test_reporter(&self) -> &dyn TestReporter {
        self.tests
    }

    /// How many workers this run may use; tasks spawning their own
    /// parallelism should respect it.
    pub fn jobs(&self) -> usize {
        self.jobs
    }
}
