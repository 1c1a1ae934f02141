//! Dependency graph construction and queries.
//!
//! `TaskGraph::build` validates a list of tasks and constructs the directed
//! acyclic graph (DAG) that the scheduler queries for ready sets.

use crate::errors::GraphError;
use crate::task::{StatusMap, Task, TaskStatus};
use std::collections::{HashMap, HashSet, VecDeque};

/// Index into the task list.
pub type TaskIndex = usize;

/// An immutable directed acyclic graph of tasks.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    /// Tasks in insertion order
    tasks: Vec<Task>,
    /// Map from task id to index
    index_map: HashMap<String, TaskIndex>,
    /// Forward edges: index -> tasks that depend on it
    forward_edges: Vec<Vec<TaskIndex>>,
    /// Reverse edges: index -> tasks it depends on
    reverse_edges: Vec<Vec<TaskIndex>>,
    /// A topological order, stable with respect to insertion order
    topo_order: Vec<TaskIndex>,
}

impl TaskGraph {
    /// Build a graph from a list of tasks.
    ///
    /// Task ids must be unique, every dependency must name an existing task,
    /// and the dependency edges must not form a cycle.
    pub fn build(tasks: Vec<Task>) -> Result<Self, GraphError> {
        let mut index_map = HashMap::new();
        for (i, task) in tasks.iter().enumerate() {
            if index_map.insert(task.id.clone(), i).is_some() {
                return Err(GraphError::DuplicateTask {
                    id: task.id.clone(),
                });
            }
        }

        let mut forward_edges: Vec<Vec<TaskIndex>> = vec![Vec::new(); tasks.len()];
        let mut reverse_edges: Vec<Vec<TaskIndex>> = vec![Vec::new(); tasks.len()];

        for (to_idx, task) in tasks.iter().enumerate() {
            for dep in &task.dependencies {
                let from_idx =
                    *index_map
                        .get(dep)
                        .ok_or_else(|| GraphError::UnknownDependency {
                            task: task.id.clone(),
                            dependency: dep.clone(),
                        })?;

                // Listing a dependency twice adds nothing
                if reverse_edges[to_idx].contains(&from_idx) {
                    continue;
                }
                forward_edges[from_idx].push(to_idx);
                reverse_edges[to_idx].push(from_idx);
            }
        }

        let mut graph = TaskGraph {
            tasks,
            index_map,
            forward_edges,
            reverse_edges,
            topo_order: Vec::new(),
        };

        graph.topo_order = graph.topological_sort()?;
        Ok(graph)
    }

    /// Get the number of tasks in the graph.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Check if the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Get a task by its id.
    pub fn get(&self, id: &str) -> Option<&Task> {
        self.index_map.get(id).and_then(|&i| self.tasks.get(i))
    }

    /// Check if a task id is part of the graph.
    pub fn contains(&self, id: &str) -> bool {
        self.index_map.contains_key(id)
    }

    /// Get all tasks in insertion order.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Get all task ids in insertion order.
    pub fn task_ids(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.id.clone()).collect()
    }

    /// Get tasks that depend on the given task (forward edges).
    pub fn dependents(&self, index: TaskIndex) -> &[TaskIndex] {
        self.forward_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    /// Get tasks that the given task depends on (reverse edges).
    pub fn dependencies(&self, index: TaskIndex) -> &[TaskIndex] {
        self.reverse_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    /// Task ids in a dependency-respecting order.
    pub fn topological_order(&self) -> Vec<&str> {
        self.topo_order
            .iter()
            .map(|&i| self.tasks[i].id.as_str())
            .collect()
    }

    /// Get tasks with no dependencies (entry points).
    pub fn root_tasks(&self) -> Vec<TaskIndex> {
        self.reverse_edges
            .iter()
            .enumerate()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(i, _)| i)
            .collect()
    }

    /// Get tasks that no other task depends on (exit points).
    pub fn leaf_tasks(&self) -> Vec<TaskIndex> {
        self.forward_edges
            .iter()
            .enumerate()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(i, _)| i)
            .collect()
    }

    fn status_of(&self, index: TaskIndex, statuses: &StatusMap) -> TaskStatus {
        statuses
            .get(&self.tasks[index].id)
            .copied()
            .unwrap_or_default()
    }

    /// Pending tasks whose every dependency has succeeded.
    ///
    /// Ordered by descending priority, then insertion order. Tasks absent
    /// from `statuses` are treated as pending.
    pub fn ready_set(&self, statuses: &StatusMap) -> Vec<&Task> {
        let mut ready: Vec<TaskIndex> = (0..self.tasks.len())
            .filter(|&i| self.status_of(i, statuses) == TaskStatus::Pending)
            .filter(|&i| {
                self.dependencies(i)
                    .iter()
                    .all(|&dep| self.status_of(dep, statuses).is_success())
            })
            .collect();

        // Stable sort keeps insertion order among equal priorities
        ready.sort_by_key(|&i| std::cmp::Reverse(self.tasks[i].priority));
        ready.into_iter().map(|i| &self.tasks[i]).collect()
    }

    /// True when no task is pending or running.
    pub fn is_terminal(&self, statuses: &StatusMap) -> bool {
        (0..self.tasks.len()).all(|i| {
            !matches!(
                self.status_of(i, statuses),
                TaskStatus::Pending | TaskStatus::Running
            )
        })
    }

    /// Every task reachable through dependent edges, in insertion order.
    pub fn transitive_dependents(&self, id: &str) -> Vec<String> {
        let Some(&start) = self.index_map.get(id) else {
            return Vec::new();
        };

        let mut seen: HashSet<TaskIndex> = HashSet::new();
        let mut stack: Vec<TaskIndex> = self.dependents(start).to_vec();
        while let Some(node) = stack.pop() {
            if seen.insert(node) {
                stack.extend_from_slice(self.dependents(node));
            }
        }

        let mut found: Vec<TaskIndex> = seen.into_iter().collect();
        found.sort_unstable();
        found
            .into_iter()
            .map(|i| self.tasks[i].id.clone())
            .collect()
    }

    /// Pending tasks that can never become ready because an ancestor
    /// failed, was blocked, or was skipped. Returned in insertion order.
    pub fn blockable(&self, statuses: &StatusMap) -> Vec<String> {
        let doomed: HashSet<String> = self
            .tasks
            .iter()
            .filter(|t| {
                statuses
                    .get(&t.id)
                    .is_some_and(TaskStatus::blocks_dependents)
            })
            .flat_map(|t| self.transitive_dependents(&t.id))
            .collect();

        (0..self.tasks.len())
            .filter(|&i| self.status_of(i, statuses) == TaskStatus::Pending)
            .map(|i| &self.tasks[i].id)
            .filter(|id| doomed.contains(id.as_str()))
            .cloned()
            .collect()
    }

    /// Compute execution waves: groups of tasks that could run in parallel
    /// once all previous waves complete.
    pub fn compute_waves(&self) -> Vec<Vec<String>> {
        let mut waves = Vec::new();
        let mut level = vec![0usize; self.tasks.len()];

        for &i in &self.topo_order {
            level[i] = self
                .dependencies(i)
                .iter()
                .map(|&dep| level[dep] + 1)
                .max()
                .unwrap_or(0);
            if waves.len() <= level[i] {
                waves.resize_with(level[i] + 1, Vec::new);
            }
        }

        for (i, task) in self.tasks.iter().enumerate() {
            waves[level[i]].push(task.id.clone());
        }
        waves
    }

    /// Order the graph with Kahn's algorithm, reporting a concrete cycle on failure.
    fn topological_sort(&self) -> Result<Vec<TaskIndex>, GraphError> {
        let mut in_degree: Vec<usize> = self.reverse_edges.iter().map(|deps| deps.len()).collect();

        let mut queue: VecDeque<TaskIndex> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, deg)| *deg == 0)
            .map(|(i, _)| i)
            .collect();

        let mut order = Vec::with_capacity(self.len());

        while let Some(node) = queue.pop_front() {
            order.push(node);

            for &dependent in self.dependents(node) {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        if order.len() != self.len() {
            return Err(GraphError::Cycle {
                path: self.find_cycle(&in_degree),
            });
        }

        Ok(order)
    }

    /// Walk dependency edges among the unsorted nodes until one repeats.
    ///
    /// Every node Kahn's algorithm left behind still has an unsorted
    /// dependency, so the walk always closes a loop.
    fn find_cycle(&self, in_degree: &[usize]) -> Vec<String> {
        let remaining = |i: TaskIndex| in_degree[i] > 0;

        let Some(start) = (0..self.len()).find(|&i| remaining(i)) else {
            return Vec::new();
        };

        let mut path: Vec<TaskIndex> = Vec::new();
        let mut position: HashMap<TaskIndex, usize> = HashMap::new();
        let mut current = start;

        loop {
            if let Some(&at) = position.get(&current) {
                let mut cycle: Vec<String> = path[at..]
                    .iter()
                    .map(|&i| self.tasks[i].id.clone())
                    .collect();
                cycle.push(self.tasks[current].id.clone());
                return cycle;
            }
            position.insert(current, path.len());
            path.push(current);

            match self
                .dependencies(current)
                .iter()
                .copied()
                .find(|&dep| remaining(dep))
            {
                Some(next) => current = next,
                None => {
                    return path.iter().map(|&i| self.tasks[i].id.clone()).collect();
                }
            }
        }
    }
}
