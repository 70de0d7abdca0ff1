use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, temp_id};

/// The server does not store colors yet, so every category starts with this.
pub const DEFAULT_CATEGORY_COLOR: &str = "#1976d2";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(default = "default_color")]
    pub color: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewCategory {
    pub name: String,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryPatch {
    pub name: Option<String>,
    pub color: Option<String>,
}

impl Category {
    pub fn new_optimistic(draft: &NewCategory, now: DateTime<Utc>) -> Self {
        Self {
            id: temp_id(),
            name: draft.name.clone(),
            color: draft.color.clone().unwrap_or_else(default_color),
            created_at: now,
            updated_at: now,
        }
    }
}

impl Entity for Category {
    type Draft = NewCategory;
    type Patch = CategoryPatch;

    const KIND: &'static str = "category";

    fn id(&self) -> &str {
        &self.id
    }

    fn apply_patch(&mut self, patch: &CategoryPatch, now: DateTime<Utc>) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(color) = &patch.color {
            self.color = color.clone();
        }
        self.updated_at = now;
    }

    fn reconcile(&mut self, confirmed: Self) {
        self.id = confirmed.id;
        self.name = confirmed.name;
        self.created_at = confirmed.created_at;
        self.updated_at = confirmed.updated_at;
    }

    fn revert_remote(&mut self, before: Self) {
        self.name = before.name;
        self.updated_at = before.updated_at;
    }
}

pub(crate) fn default_color() -> String {
    DEFAULT_CATEGORY_COLOR.to_string()
}
