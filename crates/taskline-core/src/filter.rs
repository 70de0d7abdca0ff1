use std::collections::BTreeSet;

use serde::{
  Deserialize,
  Serialize
};
use tracing::trace;

use crate::task::Task;

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  clap::ValueEnum
)]
#[serde(rename_all = "lowercase")]
pub enum CompletionStatus {
  #[default]
  All,
  Completed,
  Incomplete
}

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  clap::ValueEnum
)]
#[serde(rename_all = "lowercase")]
pub enum TagCondition {
  #[default]
  Any,
  All
}

/// Declarative filter state. Every empty
/// or default dimension passes everything.
#[derive(
  Debug,
  Clone,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize
)]
#[serde(
  rename_all = "camelCase",
  default
)]
pub struct FilterDescriptor {
  pub completion_status:
    CompletionStatus,
  pub category_ids: BTreeSet<String>,
  pub tags: BTreeSet<String>,
  pub tag_condition: TagCondition,
  pub search_text: String
}

/// Partial change to a [`FilterDescriptor`];
/// `None` leaves the field alone.
#[derive(Debug, Clone, Default)]
pub struct FilterUpdate {
  pub completion_status:
    Option<CompletionStatus>,
  pub category_ids:
    Option<BTreeSet<String>>,
  pub tags: Option<BTreeSet<String>>,
  pub tag_condition:
    Option<TagCondition>,
  pub search_text: Option<String>
}

impl FilterDescriptor {
  pub fn update(
    &mut self,
    update: FilterUpdate
  ) {
    if let Some(status) =
      update.completion_status
    {
      self.completion_status = status;
    }
    if let Some(ids) =
      update.category_ids
    {
      self.category_ids = ids;
    }
    if let Some(tags) = update.tags {
      self.tags = tags;
    }
    if let Some(condition) =
      update.tag_condition
    {
      self.tag_condition = condition;
    }
    if let Some(text) =
      update.search_text
    {
      self.search_text = text;
    }
  }

  pub fn reset(&mut self) {
    *self = Self::default();
  }

  pub fn is_default(&self) -> bool {
    active_filter_count(self) == 0
  }

  pub fn matches(
    &self,
    task: &Task
  ) -> bool {
    matches_completion(
      task,
      self.completion_status
    ) && matches_categories(
      task,
      &self.category_ids
    ) && matches_tags(
      task,
      &self.tags,
      self.tag_condition
    ) && matches_search(
      task,
      &self.search_text
    )
  }
}

fn matches_completion(
  task: &Task,
  status: CompletionStatus
) -> bool {
  match status {
    | CompletionStatus::All => true,
    | CompletionStatus::Completed => {
      task.completed
    }
    | CompletionStatus::Incomplete => {
      !task.completed
    }
  }
}

/// A task without a category is compared
/// as the empty id.
fn matches_categories(
  task: &Task,
  category_ids: &BTreeSet<String>
) -> bool {
  category_ids.is_empty()
    || category_ids.contains(
      task
        .category_id
        .as_deref()
        .unwrap_or("")
    )
}

fn matches_tags(
  task: &Task,
  tags: &BTreeSet<String>,
  condition: TagCondition
) -> bool {
  if tags.is_empty() {
    return true;
  }
  match condition {
    | TagCondition::All => {
      tags.iter().all(|t| task.has_tag(t))
    }
    | TagCondition::Any => {
      tags.iter().any(|t| task.has_tag(t))
    }
  }
}

fn matches_search(
  task: &Task,
  search_text: &str
) -> bool {
  let needle = search_text.trim();
  if needle.is_empty() {
    return true;
  }
  task
    .text
    .to_lowercase()
    .contains(&needle.to_lowercase())
}

fn retain(
  tasks: &[Task],
  keep: impl Fn(&Task) -> bool
) -> Vec<Task> {
  tasks
    .iter()
    .filter(|task| keep(task))
    .cloned()
    .collect()
}

pub fn filter_by_completion(
  tasks: &[Task],
  status: CompletionStatus
) -> Vec<Task> {
  retain(tasks, |t| {
    matches_completion(t, status)
  })
}

pub fn filter_by_categories(
  tasks: &[Task],
  category_ids: &BTreeSet<String>
) -> Vec<Task> {
  retain(tasks, |t| {
    matches_categories(t, category_ids)
  })
}

pub fn filter_by_tags(
  tasks: &[Task],
  tags: &BTreeSet<String>,
  condition: TagCondition
) -> Vec<Task> {
  retain(tasks, |t| {
    matches_tags(t, tags, condition)
  })
}

pub fn filter_by_search(
  tasks: &[Task],
  search_text: &str
) -> Vec<Task> {
  retain(tasks, |t| {
    matches_search(t, search_text)
  })
}

/// Keeps input order; each dimension is an
/// intersection so stage order is irrelevant.
#[tracing::instrument(skip_all, fields(
  input = tasks.len()
))]
pub fn apply_filters(
  tasks: &[Task],
  filters: &FilterDescriptor
) -> Vec<Task> {
  let out = retain(tasks, |t| {
    filters.matches(t)
  });
  trace!(output = out.len(), "filters applied");
  out
}

/// One per non-default dimension, however
/// many values it holds.
pub fn active_filter_count(
  filters: &FilterDescriptor
) -> usize {
  [
    filters.completion_status
      != CompletionStatus::All,
    !filters.category_ids.is_empty(),
    !filters.tags.is_empty(),
    !filters
      .search_text
      .trim()
      .is_empty()
  ]
  .into_iter()
  .filter(|active| *active)
  .count()
}
