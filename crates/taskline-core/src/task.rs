use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, temp_id};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: String,

    pub text: String,

    #[serde(default)]
    pub completed: bool,

    #[serde(default)]
    pub category_id: Option<String>,

    /// Client-side only; the server never stores tags.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Display position. Client-side only.
    #[serde(default)]
    pub order: i64,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewTask {
    pub text: String,
    pub category_id: Option<String>,
    pub tags: Vec<String>,
    pub completed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub text: Option<String>,
    pub completed: Option<bool>,
    pub category_id: Option<Option<String>>,
    pub tags: Option<Vec<String>>,
}

/// The fields an edit form submits as a whole.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditTask {
    pub text: String,
    pub category_id: Option<String>,
    pub tags: Vec<String>,
}

impl Task {
    pub fn new_optimistic(draft: &NewTask, order: i64, now: DateTime<Utc>) -> Self {
        Self {
            id: temp_id(),
            text: draft.text.clone(),
            completed: draft.completed,
            category_id: draft.category_id.clone(),
            tags: draft.tags.clone(),
            order,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

impl TaskPatch {
    pub fn completed(completed: bool) -> Self {
        Self {
            completed: Some(completed),
            ..Self::default()
        }
    }

    /// True when the patch touches a field the server stores.
    pub fn has_remote_fields(&self) -> bool {
        self.text.is_some() || self.completed.is_some() || self.category_id.is_some()
    }
}

impl From<EditTask> for TaskPatch {
    fn from(edit: EditTask) -> Self {
        Self {
            text: Some(edit.text.trim().to_string()),
            completed: None,
            category_id: Some(edit.category_id),
            tags: Some(edit.tags),
        }
    }
}

impl Entity for Task {
    type Draft = NewTask;
    type Patch = TaskPatch;

    const KIND: &'static str = "task";

    fn id(&self) -> &str {
        &self.id
    }

    fn apply_patch(&mut self, patch: &TaskPatch, now: DateTime<Utc>) {
        if let Some(text) = &patch.text {
            self.text = text.clone();
        }
        if let Some(completed) = patch.completed {
            self.completed = completed;
        }
        if let Some(category_id) = &patch.category_id {
            self.category_id = category_id.clone();
        }
        if let Some(tags) = &patch.tags {
            self.tags = tags.clone();
        }
        self.updated_at = now;
    }

    fn reconcile(&mut self, confirmed: Self) {
        self.id = confirmed.id;
        self.text = confirmed.text;
        self.completed = confirmed.completed;
        self.category_id = confirmed.category_id;
        self.created_at = confirmed.created_at;
        self.updated_at = confirmed.updated_at;
    }

    fn revert_remote(&mut self, before: Self) {
        self.text = before.text;
        self.completed = before.completed;
        self.category_id = before.category_id;
        self.updated_at = before.updated_at;
    }
}
