// src/model/result.rs

//! Task outcomes and value serialization contracts.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Value produced by a task body.
///
/// Tasks are heterogeneous, so products are type-erased and shared. Cached
/// and worker results hand the same `Arc` to every consumer.
pub type TaskValue = Arc<dyn Any + Send + Sync>;

/// Wrap a concrete value as a [`TaskValue`].
pub fn value<T: Send + Sync + 'static>(v: T) -> TaskValue {
    Arc::new(v)
}

/// Borrow a [`TaskValue`] as a concrete type, if it is one.
pub fn value_as<T: 'static>(v: &TaskValue) -> Option<&T> {
    v.downcast_ref::<T>()
}

/// Failure returned by a task body, optionally carrying a best-effort
/// partial value.
pub struct TaskFailure {
    pub msg: String,
    pub partial: Option<TaskValue>,
}

impl TaskFailure {
    pub fn new(msg: impl Into<String>) -> Self {
        TaskFailure {
            msg: msg.into(),
            partial: None,
        }
    }

    pub fn with_partial(msg: impl Into<String>, partial: TaskValue) -> Self {
        TaskFailure {
            msg: msg.into(),
            partial: Some(partial),
        }
    }
}

impl fmt::Debug for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFailure")
            .field("msg", &self.msg)
            .field("partial", &self.partial.is_some())
            .finish()
    }
}

/// What a task body returns.
pub type BodyResult = std::result::Result<TaskValue, TaskFailure>;

/// Recorded outcome of one task within a run.
#[derive(Clone)]
pub enum TaskResult {
    /// The body produced a value; `value_hash` is the structural hash of
    /// the value (or the group's inputs hash for workers and opaque
    /// values).
    Success { value: TaskValue, value_hash: i32 },
    /// The body failed, possibly with a partial value worth persisting.
    Failure {
        msg: String,
        partial: Option<(TaskValue, i32)>,
    },
    /// An input of this task was not successful.
    Skipped,
    /// Fail-fast cut this task short before it started.
    Aborted,
    /// The body panicked or was torn down.
    Exception { error: String, backtrace: String },
}

impl TaskResult {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskResult::Success { .. })
    }

    /// Failure, Exception, Skipped or Aborted.
    pub fn is_failing(&self) -> bool {
        !self.is_success()
    }

    pub fn value(&self) -> Option<&TaskValue> {
        match self {
            TaskResult::Success { value, .. } => Some(value),
            _ => None,
        }
    }

    /// The hash downstream fingerprints consume. Only successful results
    /// contribute.
    pub fn value_hash(&self) -> Option<i32> {
        match self {
            TaskResult::Success { value_hash, .. } => Some(*value_hash),
            _ => None,
        }
    }

    /// Short human-readable description for logs and failure reports.
    pub fn describe(&self) -> String {
        match self {
            TaskResult::Success { .. } => "success".to_string(),
            TaskResult::Failure { msg, .. } => format!("failure: {msg}"),
            TaskResult::Skipped => "skipped".to_string(),
            TaskResult::Aborted => "aborted".to_string(),
            TaskResult::Exception { error, .. } => format!("exception: {error}"),
        }
    }
}

impl fmt::Debug for TaskResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskResult::Success { value_hash, .. } => f
                .debug_struct("Success")
                .field("value_hash", value_hash)
                .finish(),
            TaskResult::Failure { msg, partial } => f
                .debug_struct("Failure")
                .field("msg", msg)
                .field("partial", &partial.is_some())
                .finish(),
            TaskResult::Skipped => f.write_str("Skipped"),
            TaskResult::Aborted => f.write_str("Aborted"),
            TaskResult::Exception { error, .. } => {
                f.debug_struct("Exception").field("error", error).finish()
            }
        }
    }
}

/// Serialization contract for a task's value.
///
/// Provided per task; tasks without a format are never disk-cached (every
/// probe of their metadata misses).
pub trait ValueFormat: Send + Sync {
    /// Serialize the value, or `None` if it is not of the expected type.
    fn write(&self, value: &TaskValue) -> Option<serde_json::Value>;

    /// Deserialize a stored value, or `None` if the stored shape no
    /// longer matches.
    fn read(&self, json: &serde_json::Value) -> Option<TaskValue>;
}

/// [`ValueFormat`] for any serde-capable type.
pub struct JsonFormat<T>(PhantomData<fn() -> T>);

impl<T> JsonFormat<T> {
    pub fn new() -> Self {
        JsonFormat(PhantomData)
    }
}

impl<T> Default for JsonFormat<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ValueFormat for JsonFormat<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn write(&self, value: &TaskValue) -> Option<serde_json::Value> {
        let concrete = value.downcast_ref::<T>()?;
        serde_json::to_value(concrete).ok()
    }

    fn read(&self, json: &serde_json::Value) -> Option<TaskValue> {
        let concrete: T = serde_json::from_value(json.clone()).ok()?;
        Some(Arc::new(concrete))
    }
}
