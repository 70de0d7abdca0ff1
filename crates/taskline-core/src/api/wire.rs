//! JSON shapes exchanged with the backend and their mapping onto entities.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::category::{Category, default_color};
use crate::task::{NewTask, Task, TaskPatch};

#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
}

/// Ids arrive as numbers from the database but are opaque strings locally.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum WireId {
    Number(i64),
    Text(String),
}

impl fmt::Display for WireId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireTodo {
    pub id: WireId,
    pub text: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub category_id: Option<WireId>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub order: Option<i64>,
}

impl WireTodo {
    /// `position` is the record's index in the response and stands in for a
    /// missing `order`.
    pub fn into_task(self, position: usize) -> Task {
        let fallback_order = i64::try_from(position).unwrap_or(i64::MAX);
        Task {
            id: self.id.to_string(),
            text: self.text,
            completed: self.completed,
            category_id: self.category_id.map(|id| id.to_string()),
            tags: self.tags.unwrap_or_default(),
            order: self.order.unwrap_or(fallback_order),
            created_at: self.created_at,
            updated_at: self.updated_at.unwrap_or(self.created_at),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireCategory {
    pub id: WireId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl WireCategory {
    pub fn into_category(self) -> Category {
        Category {
            id: self.id.to_string(),
            name: self.name,
            color: default_color(),
            created_at: self.created_at,
            updated_at: self.updated_at.unwrap_or(self.created_at),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct UsageCounts {
    #[serde(default)]
    pub todos: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct WireUsage {
    pub in_use: bool,
    #[serde(default)]
    pub counts: UsageCounts,
}

#[derive(Debug, Clone, Serialize)]
pub struct TodoCreateBody<'a> {
    pub text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<&'a str>,
    pub completed: bool,
}

impl<'a> From<&'a NewTask> for TodoCreateBody<'a> {
    fn from(draft: &'a NewTask) -> Self {
        Self {
            text: &draft.text,
            category_id: draft.category_id.as_deref(),
            completed: draft.completed,
        }
    }
}

/// `category_id: Some(None)` is sent as an explicit `null`.
#[derive(Debug, Clone, Serialize)]
pub struct TodoPatchBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<Option<&'a str>>,
}

impl<'a> From<&'a TaskPatch> for TodoPatchBody<'a> {
    fn from(patch: &'a TaskPatch) -> Self {
        Self {
            text: patch.text.as_deref(),
            completed: patch.completed,
            category_id: patch.category_id.as_ref().map(|id| id.as_deref()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryBody<'a> {
    pub name: &'a str,
}
