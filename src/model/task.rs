// src/model/task.rs

//! Task nodes and the arena that owns them.
//!
//! Tasks form a DAG. Nodes live in a [`TaskArena`] and reference each
//! other by [`TaskId`], which sidesteps cyclic ownership and keeps the
//! graph walkers allocation-light. Tasks are immutable once added.

use std::fmt;
use std::sync::Arc;

use crate::exec::TaskContext;
use crate::model::result::{BodyResult, ValueFormat};
use crate::model::segments::Segments;

/// Stable index of a task within its arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u32);

impl TaskId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The operation a task performs when its group is evaluated.
pub type TaskBody = Arc<dyn Fn(&mut TaskContext<'_>) -> BodyResult + Send + Sync>;

/// Extra identity a named task carries: its place in the hierarchical
/// namespace, its override depth, and whether its outputs route to the
/// external workspace.
#[derive(Clone)]
pub struct NamedInfo {
    pub segments: Segments,
    pub overrides: u32,
    pub external: bool,
    /// Declaration path used to disambiguate parallel override chains.
    pub enclosing: Option<Segments>,
}

impl fmt::Debug for NamedInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedInfo")
            .field("segments", &self.segments.render())
            .field("overrides", &self.overrides)
            .field("external", &self.external)
            .finish_non_exhaustive()
    }
}

/// One node of the task DAG.
pub struct Task {
    pub(crate) inputs: Vec<TaskId>,
    pub(crate) side_hash: i32,
    pub(crate) flush_dest: bool,
    pub(crate) worker: bool,
    pub(crate) named: Option<NamedInfo>,
    pub(crate) format: Option<Arc<dyn ValueFormat>>,
    pub(crate) body: TaskBody,
}

impl Task {
    pub fn inputs(&self) -> &[TaskId] {
        &self.inputs
    }

    pub fn side_hash(&self) -> i32 {
        self.side_hash
    }

    pub fn flush_dest(&self) -> bool {
        self.flush_dest
    }

    pub fn is_worker(&self) -> bool {
        self.worker
    }

    pub fn named(&self) -> Option<&NamedInfo> {
        self.named.as_ref()
    }

    pub fn format(&self) -> Option<&Arc<dyn ValueFormat>> {
        self.format.as_ref()
    }

    pub(crate) fn body(&self) -> &TaskBody {
        &self.body
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("inputs", &self.inputs)
            .field("side_hash", &self.side_hash)
            .field("worker", &self.worker)
            .field("named", &self.named)
            .finish_non_exhaustive()
    }
}

/// Fluent construction of a [`Task`].
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new<F>(body: F) -> Self
    where
        F: Fn(&mut TaskContext<'_>) -> BodyResult + Send + Sync + 'static,
    {
        TaskBuilder {
            task: Task {
                inputs: Vec::new(),
                side_hash: 0,
                flush_dest: false,
                worker: false,
                named: None,
                format: None,
                body: Arc::new(body),
            },
        }
    }

    pub fn input(mut self, id: TaskId) -> Self {
        self.task.inputs.push(id);
        self
    }

    pub fn inputs<I: IntoIterator<Item = TaskId>>(mut self, ids: I) -> Self {
        self.task.inputs.extend(ids);
        self
    }

    pub fn side_hash(mut self, hash: i32) -> Self {
        self.task.side_hash = hash;
        self
    }

    pub fn flush_dest(mut self) -> Self {
        self.task.flush_dest = true;
        self
    }

    pub fn worker(mut self) -> Self {
        self.task.worker = true;
        self
    }

    /// Make this a named task at the given segment path.
    pub fn named(mut self, segments: Segments) -> Self {
        self.task.named = Some(NamedInfo {
            segments,
            overrides: 0,
            external: false,
            enclosing: None,
        });
        self
    }

    /// Override depth of the named task's declaration.
    pub fn overrides(mut self, count: u32) -> Self {
        if let Some(named) = self.task.named.as_mut() {
            named.overrides = count;
        }
        self
    }

    /// Route this named task's outputs to the external workspace.
    pub fn external(mut self) -> Self {
        if let Some(named) = self.task.named.as_mut() {
            named.external = true;
        }
        self
    }

    /// Declaration path, used when override chains need disambiguation.
    pub fn enclosing(mut self, segments: Segments) -> Self {
        if let Some(named) = self.task.named.as_mut() {
            named.enclosing = Some(segments);
        }
        self
    }

    pub fn format(mut self, format: Arc<dyn ValueFormat>) -> Self {
        self.task.format = Some(format);
        self
    }

    /// Shortcut for a [`crate::model::JsonFormat`] over `T`.
    pub fn json_format<T>(self) -> Self
    where
        T: serde::Serialize + serde::de::DeserializeOwned + Send + Sync + 'static,
    {
        self.format(Arc::new(crate::model::result::JsonFormat::<T>::new()))
    }

    pub fn build(self) -> Task {
        self.task
    }
}

/// Owner of every task in a run.
#[derive(Default)]
pub struct TaskArena {
    tasks: Vec<Task>,
}

impl TaskArena {
    pub fn new() -> Self {
        TaskArena { tasks: Vec::new() }
    }

    pub fn add(&mut self, task: Task) -> TaskId {
        let id = TaskId(self.tasks.len() as u32);
        self.tasks.push(task);
        id
    }

    pub fn get(&self, id: TaskId) -> &Task {
        &self.tasks[id.index()]
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        (0..self.tasks.len() as u32).map(TaskId)
    }

    /// Display label for diagnostics: the segment path for named tasks,
    /// the arena index otherwise.
    pub fn label_of(&self, id: TaskId) -> String {
        match self.get(id).named() {
            Some(named) => named.segments.render(),
            None => format!("{id}"),
        }
    }
}

impl fmt::Debug for TaskArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskArena")
            .field("tasks", &self.tasks.len())
            .finish()
    }
}
