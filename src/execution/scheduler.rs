//! Task ordering and per-component scheduling strategy

use crate::core::task::TaskDescriptor;
use crate::execution::PipelineError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How components are processed within one task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingStrategy {
    /// One component at a time, in target order
    Sequential,

    /// All components at once
    Parallel,

    /// At most N components at once
    LimitedParallel(usize),
}

impl Default for SchedulingStrategy {
    fn default() -> Self {
        SchedulingStrategy::Sequential
    }
}

impl SchedulingStrategy {
    /// Strategy for a configured concurrency level (0 = unbounded)
    pub fn from_concurrency(concurrency: usize) -> Self {
        match concurrency {
            0 => SchedulingStrategy::Parallel,
            1 => SchedulingStrategy::Sequential,
            n => SchedulingStrategy::LimitedParallel(n),
        }
    }
}

/// Order tasks by (phase, order, registration index).
///
/// Returns indices into `tasks`. Rejects duplicate names and dependencies
/// that are unknown or not ordered strictly before the dependent.
pub fn order_tasks(tasks: &[&TaskDescriptor]) -> Result<Vec<usize>, PipelineError> {
    let mut by_name: HashMap<&str, usize> = HashMap::new();
    for (index, task) in tasks.iter().enumerate() {
        if by_name.insert(task.name.as_str(), index).is_some() {
            return Err(PipelineError::DuplicateTask(task.name.clone()));
        }
    }

    let mut order: Vec<usize> = (0..tasks.len()).collect();
    // stable: ties keep registration order
    order.sort_by_key(|&i| (tasks[i].phase, tasks[i].order));

    let position: HashMap<usize, usize> = order
        .iter()
        .enumerate()
        .map(|(pos, &index)| (index, pos))
        .collect();

    for &index in &order {
        let task = tasks[index];
        for dependency in &task.depends_on {
            let Some(&dep_index) = by_name.get(dependency.as_str()) else {
                return Err(PipelineError::UnknownDependency {
                    task: task.name.clone(),
                    dependency: dependency.clone(),
                });
            };
            if position[&dep_index] >= position[&index] {
                return Err(PipelineError::UnresolvableOrdering {
                    task: task.name.clone(),
                    dependency: dependency.clone(),
                });
            }
        }
    }

    Ok(order)
}
