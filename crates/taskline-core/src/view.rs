use std::collections::BTreeSet;

use crate::filter::{FilterDescriptor, active_filter_count, apply_filters};
use crate::order::sorted_by_order;
use crate::task::Task;

/// What a list screen renders: the filtered tasks in display order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibleTasks {
    pub tasks: Vec<Task>,
    pub total: usize,
    pub active_filters: usize,
}

impl VisibleTasks {
    pub fn hidden(&self) -> usize {
        self.total - self.tasks.len()
    }
}

/// Filter first, then order.
pub fn compose(tasks: &[Task], filters: &FilterDescriptor) -> VisibleTasks {
    VisibleTasks {
        tasks: sorted_by_order(&apply_filters(tasks, filters)),
        total: tasks.len(),
        active_filters: active_filter_count(filters),
    }
}

/// Sorted, de-duplicated tags across every task, for the tag picker.
pub fn available_tags(tasks: &[Task]) -> Vec<String> {
    tasks
        .iter()
        .flat_map(|task| task.tags.iter().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
