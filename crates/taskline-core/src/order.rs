//! Client-side display order of tasks.
//!
//! `order` is never sent to the server. Every operation that changes it
//! renumbers the whole list densely from zero.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::task::Task;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum SortCriterion {
    Created,
    Alphabetical,
    Category,
    #[default]
    Custom,
}

pub fn sorted_by_order(tasks: &[Task]) -> Vec<Task> {
    let mut sorted = tasks.to_vec();
    sorted.sort_by_key(|task| task.order);
    sorted
}

/// Moves `source` into `target`'s slot of the ordered sequence: ahead of
/// the target when moving up, behind it when moving down.
///
/// Returns `None` when nothing moves: no target, the target is the source,
/// or either id is unknown.
pub fn reorder(tasks: &[Task], source: &str, target: Option<&str>) -> Option<Vec<Task>> {
    let target = target?;
    if source == target {
        return None;
    }

    let mut sorted = sorted_by_order(tasks);
    let from = sorted.iter().position(|t| t.id == source)?;
    let to = sorted.iter().position(|t| t.id == target)?;

    let moved = sorted.remove(from);
    sorted.insert(to, moved);
    debug!(source, target, from, to, "task moved");

    Some(renumber(sorted))
}

/// `Custom` keeps the existing `order` values.
pub fn sort_by(tasks: &[Task], criterion: SortCriterion) -> Vec<Task> {
    let mut sorted = tasks.to_vec();
    match criterion {
        SortCriterion::Created => sorted.sort_by_key(|t| t.created_at),
        SortCriterion::Alphabetical => sorted.sort_by(|a, b| compare_text(&a.text, &b.text)),
        SortCriterion::Category => sorted.sort_by(|a, b| {
            compare_text(
                a.category_id.as_deref().unwrap_or(""),
                b.category_id.as_deref().unwrap_or(""),
            )
        }),
        SortCriterion::Custom => {
            sorted.sort_by_key(|t| t.order);
            return sorted;
        }
    }
    debug!(?criterion, count = sorted.len(), "tasks re-sorted");
    renumber(sorted)
}

pub fn reset_order(tasks: &[Task]) -> Vec<Task> {
    sort_by(tasks, SortCriterion::Created)
}

fn renumber(mut tasks: Vec<Task>) -> Vec<Task> {
    for (idx, task) in tasks.iter_mut().enumerate() {
        task.order = i64::try_from(idx).unwrap_or(i64::MAX);
    }
    tasks
}

fn compare_text(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}
