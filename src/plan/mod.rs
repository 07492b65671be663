// src/plan/mod.rs

//! Task-graph planning: closure, ordering, terminal classification and
//! grouping.
//!
//! The planner turns a set of requested goals into an ordered mapping
//! from terminal to group members. Named tasks are the "important" nodes
//! groups form around; requested anonymous tasks head their own group;
//! everything else joins the group of its nearest downstream consumer.

use std::collections::HashSet;

use tracing::debug;

use crate::errors::{CachedagError, Result};
use crate::graph::{group_around, topo_sort, transitive, Classify, MultiBiMap};
use crate::model::{Segments, TaskArena, TaskId};

/// Head of a group: an explicitly requested anonymous task, or a named
/// task with its resolved segment path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Terminal {
    Task(TaskId),
    Labelled { task: TaskId, segments: Segments },
}

impl Terminal {
    pub fn task_id(&self) -> TaskId {
        match self {
            Terminal::Task(id) => *id,
            Terminal::Labelled { task, .. } => *task,
        }
    }

    /// Segment path of a labelled terminal.
    pub fn label(&self) -> Option<&Segments> {
        match self {
            Terminal::Task(_) => None,
            Terminal::Labelled { segments, .. } => Some(segments),
        }
    }

    /// Display string for logs and profiles.
    pub fn render(&self) -> String {
        match self {
            Terminal::Task(id) => format!("{id}"),
            Terminal::Labelled { segments, .. } => segments.render(),
        }
    }
}

/// External collaborator resolving the final override depth of a named
/// task's declaration, by walking the build-logic hierarchy.
///
/// Tasks whose declaration is unknown to the discovery table resolve to
/// depth 0. External modules are not properly supported here; they take
/// the same fallback.
pub trait ModuleDiscovery: Send + Sync {
    fn final_override_count(&self, segments: &Segments) -> Option<u32>;
}

/// Discovery table that knows nothing; every lookup falls back to 0.
pub struct NoDiscovery;

impl ModuleDiscovery for NoDiscovery {
    fn final_override_count(&self, _segments: &Segments) -> Option<u32> {
        None
    }
}

/// Output of the planner: the transitive closure in discovery order and
/// the ordered groups keyed by terminal.
#[derive(Debug)]
pub struct Plan {
    pub sorted_groups: MultiBiMap<Terminal, TaskId>,
    pub transitive: Vec<TaskId>,
    pub goals: Vec<TaskId>,
}

/// Resolve the terminal segments of a named task, disambiguating
/// parallel override chains with an `overriden` suffix plus the
/// enclosing declaration path.
fn resolve_segments(named: &crate::model::NamedInfo, discovery: &dyn ModuleDiscovery) -> Segments {
    let resolved = discovery
        .final_override_count(&named.segments)
        .unwrap_or(0);

    if resolved == named.overrides {
        named.segments.clone()
    } else {
        let mut segments = named.segments.with_label("overriden");
        if let Some(enclosing) = &named.enclosing {
            segments = segments.with_suffix(enclosing);
        }
        segments
    }
}

/// Plan the evaluation of `goals`: transitive closure, stable topological
/// order, grouping around named and requested tasks.
pub fn plan(
    arena: &TaskArena,
    goals: &[TaskId],
    discovery: &dyn ModuleDiscovery,
) -> Result<Plan> {
    let closure = transitive(arena, goals);
    let sorted = topo_sort(arena, &closure)?;
    let goal_set: HashSet<TaskId> = goals.iter().copied().collect();

    let sorted_groups = group_around(arena, &sorted, |id| {
        if let Some(named) = arena.get(id).named() {
            Classify::Important(Terminal::Labelled {
                task: id,
                segments: resolve_segments(named, discovery),
            })
        } else if goal_set.contains(&id) {
            Classify::Requested(Terminal::Task(id))
        } else {
            Classify::Anonymous
        }
    });

    // Two distinct named tasks must never share a rendered path; the
    // overriden suffix is supposed to have separated them by now.
    let mut rendered: HashSet<String> = HashSet::new();
    for terminal in sorted_groups.keys() {
        if let Some(segments) = terminal.label() {
            let path = segments.render();
            if !rendered.insert(path.clone()) {
                return Err(CachedagError::DuplicateSegments(path));
            }
        }
    }

    debug!(
        goals = goals.len(),
        tasks = sorted.len(),
        groups = sorted_groups.len(),
        "planned task graph"
    );

    Ok(Plan {
        sorted_groups,
        transitive: sorted,
        goals: goals.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{value, Segments, TaskBuilder};

    struct FixedDiscovery(u32);

    impl ModuleDiscovery for FixedDiscovery {
        fn final_override_count(&self, _segments: &Segments) -> Option<u32> {
            Some(self.0)
        }
    }

    fn named(path: &str) -> TaskBuilder {
        TaskBuilder::new(|_ctx| Ok(value(()))).named(Segments::parse(path))
    }

    #[test]
    fn named_tasks_head_their_own_groups() {
        let mut arena = TaskArena::new();
        let a = arena.add(named("app.a").build());
        let mid = arena.add(TaskBuilder::new(|_ctx| Ok(value(()))).input(a).build());
        let b = arena.add(named("app.b").input(mid).build());

        let plan = plan(&arena, &[b], &NoDiscovery).unwrap();
        assert_eq!(plan.sorted_groups.len(), 2);

        let terminals: Vec<String> =
            plan.sorted_groups.keys().map(Terminal::render).collect();
        assert_eq!(terminals, vec!["app.a", "app.b"]);

        let b_terminal = plan.sorted_groups.key_of(&mid).unwrap();
        assert_eq!(b_terminal.render(), "app.b");
    }

    #[test]
    fn requested_anonymous_goal_is_a_terminal() {
        let mut arena = TaskArena::new();
        let anon = arena.add(TaskBuilder::new(|_ctx| Ok(value(()))).build());

        let plan = plan(&arena, &[anon], &NoDiscovery).unwrap();
        assert_eq!(plan.sorted_groups.len(), 1);
        assert!(matches!(
            plan.sorted_groups.keys().next().unwrap(),
            Terminal::Task(id) if *id == anon
        ));
    }

    #[test]
    fn override_mismatch_appends_disambiguation() {
        let mut arena = TaskArena::new();
        let t = arena.add(
            named("core.compile")
                .overrides(1)
                .enclosing(Segments::parse("app.build"))
                .build(),
        );

        // Discovery says the final override depth is 2, the task carries 1.
        let plan = plan(&arena, &[t], &FixedDiscovery(2)).unwrap();
        let terminal = plan.sorted_groups.keys().next().unwrap();
        assert_eq!(terminal.render(), "core.compile.overriden.app.build");
    }

    #[test]
    fn unknown_declarations_resolve_to_zero() {
        let mut arena = TaskArena::new();
        let t = arena.add(named("core.compile").build());

        // overrides == 0 matches the fallback, so no suffix.
        let plan = plan(&arena, &[t], &NoDiscovery).unwrap();
        assert_eq!(
            plan.sorted_groups.keys().next().unwrap().render(),
            "core.compile"
        );
    }

    #[test]
    fn duplicate_rendered_segments_are_fatal() {
        let mut arena = TaskArena::new();
        let a = arena.add(named("dup.path").build());
        let b = arena.add(named("dup.path").input(a).build());

        let err = plan(&arena, &[b], &NoDiscovery).unwrap_err();
        assert!(matches!(err, CachedagError::DuplicateSegments(_)));
    }
}
