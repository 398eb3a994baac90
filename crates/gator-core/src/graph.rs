//! Pure, in-memory dependency graph: cycle detection, execution levels,
//! and serial-chain detection over a set of tasks.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::task::Task;

/// Adjacency + reverse adjacency + cycle/level/chain analysis over a set of
/// live tasks.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// task id -> its declared dependency ids (edges verified to exist).
    pub adjacency: HashMap<String, BTreeSet<String>>,
    /// dep id -> ids that depend on it.
    pub reverse_adjacency: HashMap<String, BTreeSet<String>>,
    /// Every task id participating in at least one cycle.
    pub cyclic_nodes: HashSet<String>,
}

impl DependencyGraph {
    /// Build a graph from `tasks`. Dependencies on an id missing from both
    /// `tasks` and `global_ids` are dropped with a warning; dependencies on
    /// an id present in `global_ids` (but not `tasks`) are dropped silently
    /// (it is assumed to already be resolved outside this subgraph).
    pub fn build(tasks: &[Task], global_ids: &HashSet<String>) -> Self {
        let local_ids: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();

        let mut adjacency: HashMap<String, BTreeSet<String>> = HashMap::new();
        let mut reverse_adjacency: HashMap<String, BTreeSet<String>> = HashMap::new();

        for task in tasks {
            reverse_adjacency.entry(task.id.clone()).or_default();
            let mut deps = BTreeSet::new();
            for dep in &task.dependencies {
                if local_ids.contains(dep.as_str()) {
                    deps.insert(dep.clone());
                    reverse_adjacency
                        .entry(dep.clone())
                        .or_default()
                        .insert(task.id.clone());
                } else if global_ids.contains(dep) {
                    // Known to exist elsewhere; drop the edge silently.
                } else {
                    tracing::warn!(
                        task_id = %task.id,
                        missing_dependency = %dep,
                        "dependency on unknown task id, dropping edge"
                    );
                }
            }
            adjacency.insert(task.id.clone(), deps);
        }

        let cyclic_nodes = detect_cycles(&adjacency);

        Self {
            adjacency,
            reverse_adjacency,
            cyclic_nodes,
        }
    }

    pub fn is_unschedulable(&self, task_id: &str) -> bool {
        self.cyclic_nodes.contains(task_id)
    }

    /// Kahn's-algorithm execution levels over the schedulable (acyclic)
    /// subset. Level 0 = tasks with no remaining in-edges.
    pub fn execution_levels(&self) -> Vec<Vec<String>> {
        let schedulable: Vec<&String> = self
            .adjacency
            .keys()
            .filter(|id| !self.cyclic_nodes.contains(*id))
            .collect();

        let mut remaining_deps: HashMap<String, BTreeSet<String>> = schedulable
            .iter()
            .map(|id| {
                let deps = self.adjacency[*id]
                    .iter()
                    .filter(|d| !self.cyclic_nodes.contains(*d))
                    .cloned()
                    .collect();
                ((*id).clone(), deps)
            })
            .collect();

        let mut levels = Vec::new();
        let mut placed: HashSet<String> = HashSet::new();

        while placed.len() < remaining_deps.len() {
            let mut level: Vec<String> = remaining_deps
                .iter()
                .filter(|(id, deps)| !placed.contains(*id) && deps.is_empty())
                .map(|(id, _)| id.clone())
                .collect();
            level.sort();

            if level.is_empty() {
                // Shouldn't happen: cyclic nodes were already excluded.
                break;
            }

            for id in &level {
                placed.insert(id.clone());
            }
            for deps in remaining_deps.values_mut() {
                for id in &level {
                    deps.remove(id);
                }
            }
            levels.push(level);
        }

        levels
    }

    /// Maximal chains A -> B -> ... -> K where every intermediate node has
    /// exactly one dependent and exactly one dependency. Only chains of
    /// length >= 2 are returned.
    pub fn serial_chains(&self) -> Vec<Vec<String>> {
        let mut chains = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();

        let mut ids: Vec<&String> = self.adjacency.keys().collect();
        ids.sort();

        for id in ids {
            if visited.contains(id) || self.cyclic_nodes.contains(id) {
                continue;
            }
            if !self.is_chain_start(id) {
                continue;
            }

            let mut chain = vec![id.clone()];
            visited.insert(id.clone());
            let mut current = id.clone();

            loop {
                let dependents = &self.reverse_adjacency[&current];
                if dependents.len() != 1 {
                    break;
                }
                let next = dependents.iter().next().unwrap().clone();
                if self.cyclic_nodes.contains(&next) || visited.contains(&next) {
                    break;
                }
                if self.adjacency[&next].len() != 1 {
                    break;
                }
                chain.push(next.clone());
                visited.insert(next.clone());
                current = next;
            }

            if chain.len() >= 2 {
                chains.push(chain);
            }
        }

        chains
    }

    /// True if `id` can begin a serial chain: it has exactly one dependent
    /// (so the forward walk has somewhere to go) and it is not itself
    /// backward-extendable, i.e. there is no earlier node that the chain
    /// should have started from instead. `id` is backward-extendable when
    /// it has exactly one dependency and that dependency, in turn, has
    /// `id` as its only dependent -- in that case `id` is an interior link,
    /// not a head, and the true head is found when that dependency is
    /// visited.
    fn is_chain_start(&self, id: &str) -> bool {
        let dependents = self.reverse_adjacency.get(id).map(|d| d.len()).unwrap_or(0);
        if dependents != 1 {
            return false;
        }
        if let Some(deps) = self.adjacency.get(id) {
            if deps.len() == 1 {
                let dep = deps.iter().next().unwrap();
                let dep_dependents = self.reverse_adjacency.get(dep).map(|d| d.len()).unwrap_or(0);
                if dep_dependents == 1 {
                    return false;
                }
            }
        }
        true
    }
}

fn detect_cycles(adjacency: &HashMap<String, BTreeSet<String>>) -> HashSet<String> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InStack,
        Done,
    }

    let mut marks: HashMap<&str, Mark> = adjacency.keys().map(|k| (k.as_str(), Mark::Unvisited)).collect();
    let mut stack: Vec<String> = Vec::new();
    let mut cyclic = HashSet::new();

    fn visit<'a>(
        node: &'a str,
        adjacency: &'a HashMap<String, BTreeSet<String>>,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<String>,
        cyclic: &mut HashSet<String>,
    ) {
        match marks.get(node) {
            Some(Mark::Done) | None => return,
            Some(Mark::InStack) => {
                // Found a back-edge: everything from `node`'s first
                // occurrence in `stack` to the top participates in the cycle.
                if let Some(pos) = stack.iter().position(|n| n == node) {
                    for n in &stack[pos..] {
                        cyclic.insert(n.clone());
                    }
                }
                return;
            }
            Some(Mark::Unvisited) => {}
        }

        marks.insert(node, Mark::InStack);
        stack.push(node.to_string());

        if let Some(deps) = adjacency.get(node) {
            for dep in deps {
                visit(dep.as_str(), adjacency, marks, stack, cyclic);
            }
        }

        stack.pop();
        marks.insert(node, Mark::Done);
    }

    let mut ids: Vec<&str> = adjacency.keys().map(|s| s.as_str()).collect();
    ids.sort();
    for id in ids {
        visit(id, adjacency, &mut marks, &mut stack, &mut cyclic);
    }

    cyclic
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskType;
    use chrono::Utc;

    fn task(id: &str, deps: &[&str]) -> Task {
        Task::new(
            id,
            "repo",
            format!("feat/{id}"),
            "main",
            "acceptance",
            "context",
            TaskType::Implementation,
            deps.iter().map(|s| s.to_string()).collect(),
            "s1",
            "s1",
            Utc::now(),
        )
    }

    #[test]
    fn diamond_dependency_levels() {
        let tasks = vec![
            task("t1", &[]),
            task("t2", &["t1"]),
            task("t3", &["t1"]),
            task("t4", &["t2", "t3"]),
        ];
        let graph = DependencyGraph::build(&tasks, &HashSet::new());
        let levels = graph.execution_levels();
        assert_eq!(levels[0], vec!["t1".to_string()]);
        assert_eq!(levels[1], vec!["t2".to_string(), "t3".to_string()]);
        assert_eq!(levels[2], vec!["t4".to_string()]);
    }

    #[test]
    fn cycle_detection_returns_all_participants() {
        let tasks = vec![task("a", &["c"]), task("b", &["a"]), task("c", &["b"])];
        let graph = DependencyGraph::build(&tasks, &HashSet::new());
        assert_eq!(graph.cyclic_nodes.len(), 3);
        assert!(graph.is_unschedulable("a"));
        assert!(graph.is_unschedulable("b"));
        assert!(graph.is_unschedulable("c"));
    }

    #[test]
    fn missing_dependency_is_dropped_with_warning() {
        let tasks = vec![task("t1", &["ghost"])];
        let graph = DependencyGraph::build(&tasks, &HashSet::new());
        assert!(graph.adjacency["t1"].is_empty());
    }

    #[test]
    fn missing_dependency_suppressed_by_global_ids() {
        let tasks = vec![task("t1", &["elsewhere"])];
        let mut global = HashSet::new();
        global.insert("elsewhere".to_string());
        let graph = DependencyGraph::build(&tasks, &global);
        assert!(graph.adjacency["t1"].is_empty());
    }

    #[test]
    fn serial_chain_of_length_three() {
        let tasks = vec![
            task("a", &[]),
            task("b", &["a"]),
            task("c", &["b"]),
        ];
        let graph = DependencyGraph::build(&tasks, &HashSet::new());
        let chains = graph.serial_chains();
        assert_eq!(chains, vec![vec!["a".to_string(), "b".to_string(), "c".to_string()]]);
    }

    #[test]
    fn no_chain_when_fan_out() {
        let tasks = vec![task("a", &[]), task("b", &["a"]), task("c", &["a"])];
        let graph = DependencyGraph::build(&tasks, &HashSet::new());
        assert!(graph.serial_chains().is_empty());
    }

    #[test]
    fn serial_chain_is_maximal_even_when_interior_id_sorts_first() {
        // Chain order is z -> a -> b, but "a" sorts before "z": a naive scan
        // in id order must not pick "a" as the start and truncate the chain.
        let tasks = vec![task("z", &[]), task("a", &["z"]), task("b", &["a"])];
        let graph = DependencyGraph::build(&tasks, &HashSet::new());
        let chains = graph.serial_chains();
        assert_eq!(
            chains,
            vec![vec!["z".to_string(), "a".to_string(), "b".to_string()]]
        );
    }
}
