// src/graph/walk.rs

//! Pure walks over the task DAG: transitive closure, stable topological
//! order, and grouping around designated terminals.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::errors::{CachedagError, Result};
use crate::graph::multibimap::MultiBiMap;
use crate::model::{TaskArena, TaskId};

/// Breadth-first closure over task inputs, preserving first-discovery
/// order.
pub fn transitive(arena: &TaskArena, goals: &[TaskId]) -> Vec<TaskId> {
    let mut seen: HashSet<TaskId> = HashSet::new();
    let mut order: Vec<TaskId> = Vec::new();
    let mut queue: VecDeque<TaskId> = VecDeque::new();

    for &goal in goals {
        if seen.insert(goal) {
            order.push(goal);
            queue.push_back(goal);
        }
    }

    while let Some(id) = queue.pop_front() {
        for &input in arena.get(id).inputs() {
            if seen.insert(input) {
                order.push(input);
                queue.push_back(input);
            }
        }
    }

    order
}

/// Stable Kahn topological sort of `tasks` (dependencies first).
///
/// The data model forbids cycles, but a cycle smuggled in through task
/// construction is a fatal error, not undefined behaviour. The petgraph
/// check runs first so the error can name an involved task.
pub fn topo_sort(arena: &TaskArena, tasks: &[TaskId]) -> Result<Vec<TaskId>> {
    validate_acyclic(arena, tasks)?;

    let members: HashSet<TaskId> = tasks.iter().copied().collect();
    let mut indegree: HashMap<TaskId, usize> = HashMap::new();
    let mut dependents: HashMap<TaskId, Vec<TaskId>> = HashMap::new();

    for &id in tasks {
        let mut degree = 0;
        for &input in arena.get(id).inputs() {
            if members.contains(&input) {
                degree += 1;
                dependents.entry(input).or_default().push(id);
            }
        }
        indegree.insert(id, degree);
    }

    // Seed the queue in input order; newly-ready tasks append in
    // discovery order, keeping the result stable across runs.
    let mut queue: VecDeque<TaskId> = tasks
        .iter()
        .copied()
        .filter(|id| indegree[id] == 0)
        .collect();
    let mut order: Vec<TaskId> = Vec::with_capacity(tasks.len());

    while let Some(id) = queue.pop_front() {
        order.push(id);
        if let Some(deps) = dependents.get(&id) {
            for &dep in deps {
                let degree = indegree
                    .get_mut(&dep)
                    .ok_or_else(|| CachedagError::Internal(format!("unknown task {dep}")))?;
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(dep);
                }
            }
        }
    }

    if order.len() != tasks.len() {
        // validate_acyclic should have caught this.
        return Err(CachedagError::Internal(
            "topological sort did not drain; graph changed mid-walk?".to_string(),
        ));
    }

    Ok(order)
}

/// Build a petgraph view of the subset and let its toposort name a task
/// on any cycle.
fn validate_acyclic(arena: &TaskArena, tasks: &[TaskId]) -> Result<()> {
    let members: HashSet<TaskId> = tasks.iter().copied().collect();
    let mut graph: DiGraphMap<u32, ()> = DiGraphMap::new();

    for &id in tasks {
        graph.add_node(id.index() as u32);
    }
    for &id in tasks {
        for &input in arena.get(id).inputs() {
            if members.contains(&input) {
                graph.add_edge(input.index() as u32, id.index() as u32, ());
            }
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => {
            let id = TaskId(cycle.node_id());
            Err(CachedagError::GraphCycle(arena.label_of(id)))
        }
    }
}

/// How the planner sees a task when forming groups.
pub enum Classify<K> {
    /// A named task; heads its own group under the given terminal key.
    Important(K),
    /// A user-requested anonymous task; also heads a group.
    Requested(K),
    /// An intermediate task; joins the group of its nearest downstream
    /// Important/Requested consumer.
    Anonymous,
}

/// Coalesce `sorted` tasks into groups around Important/Requested nodes.
///
/// Terminals are visited in topological order; each collects the not yet
/// assigned anonymous tasks it transitively consumes. The terminal is
/// always the last member of its own group, and every task lands in
/// exactly one group.
pub fn group_around<K, F>(
    arena: &TaskArena,
    sorted: &[TaskId],
    classify: F,
) -> MultiBiMap<K, TaskId>
where
    K: Hash + Eq + Clone,
    F: Fn(TaskId) -> Classify<K>,
{
    let position: HashMap<TaskId, usize> = sorted
        .iter()
        .enumerate()
        .map(|(pos, &id)| (id, pos))
        .collect();

    let mut map: MultiBiMap<K, TaskId> = MultiBiMap::new();

    for &terminal in sorted {
        let key = match classify(terminal) {
            Classify::Important(k) | Classify::Requested(k) => k,
            Classify::Anonymous => continue,
        };

        let mut members: HashSet<TaskId> = HashSet::new();
        let mut stack: Vec<TaskId> = arena.get(terminal).inputs().to_vec();
        while let Some(id) = stack.pop() {
            if members.contains(&id) || map.contains_value(&id) {
                continue;
            }
            if !matches!(classify(id), Classify::Anonymous) {
                continue;
            }
            members.insert(id);
            stack.extend(arena.get(id).inputs().iter().copied());
        }

        let mut ordered: Vec<TaskId> = members.into_iter().collect();
        ordered.sort_by_key(|id| position[id]);
        ordered.push(terminal);
        map.add_all(key, ordered);
    }

    map
}
