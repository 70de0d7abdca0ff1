use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::sync::{LoadState, Messages, Outcome, Pending, StoreError, SyncStore};
use super::tasks::TaskStore;
use crate::api::{ApiResult, Remote, UsageCheck};
use crate::category::{Category, CategoryPatch, NewCategory};
use crate::prefs::{self, CategoryColors};

pub const CATEGORY_MESSAGES: Messages = Messages {
    load: "Failed to load categories",
    create: "Failed to add category",
    update: "Failed to update category",
    delete: "Failed to delete category, please retry",
};

pub const USAGE_CHECK_MESSAGE: &str = "Failed to check category usage";

/// Result of a gated category delete. Exactly one per call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteCategoryResult {
    Success,
    InUse,
    UsageCheckFailed,
    NotFound,
    Error(String),
}

#[derive(Clone)]
pub struct CategoryStore {
    sync: SyncStore<Category>,
    usage: Arc<dyn UsageCheck>,
}

impl CategoryStore {
    pub fn new(remote: Arc<dyn Remote<Category>>, usage: Arc<dyn UsageCheck>) -> Self {
        Self {
            sync: SyncStore::new(remote, CATEGORY_MESSAGES),
            usage,
        }
    }

    pub fn with_offline(self, offline: watch::Receiver<bool>) -> Self {
        Self {
            sync: self.sync.with_offline(offline),
            usage: self.usage,
        }
    }

    pub fn activate(&self) -> Option<Pending<()>> {
        self.sync.activate()
    }

    pub fn teardown(&self) {
        self.sync.teardown();
    }

    pub fn load_state(&self) -> LoadState {
        self.sync.load_state()
    }

    pub fn error(&self) -> Option<StoreError> {
        self.sync.error()
    }

    /// Cancels whatever is in flight for `id`; see [`SyncStore::cancel`].
    pub fn cancel(&self, id: &str) {
        self.sync.cancel(id);
    }

    pub fn categories(&self) -> Vec<Category> {
        self.sync.items()
    }

    pub fn get(&self, id: &str) -> Option<Category> {
        self.sync.get(id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<Category> {
        self.sync
            .with_items(|items| items.iter().find(|c| c.name == name).cloned())
    }

    /// Re-applies locally saved colors after a load.
    pub fn restore_colors(&self, colors: &CategoryColors) -> bool {
        if colors.is_empty() {
            return false;
        }
        self.sync
            .rewrite_local(|items| prefs::apply_category_colors(items, colors))
    }

    pub fn colors(&self) -> CategoryColors {
        self.sync.with_items(prefs::capture_category_colors)
    }

    /// A name already present in the replica is rejected silently: no
    /// state change and no network call.
    #[instrument(skip(self, draft), fields(name = %draft.name))]
    pub fn create(&self, draft: NewCategory) -> Pending<Outcome<Category>> {
        let now = Utc::now();
        let optimistic_draft = draft.clone();
        self.sync.create_with(draft, move |items| {
            if items.iter().any(|c| c.name == optimistic_draft.name) {
                debug!("category name already exists");
                return None;
            }
            Some(Category::new_optimistic(&optimistic_draft, now))
        })
    }

    #[instrument(skip(self, patch))]
    pub fn update(&self, id: &str, patch: CategoryPatch) -> Pending<Outcome<Category>> {
        self.sync.update(id, patch)
    }

    pub fn rename(
        &self,
        id: &str,
        name: impl Into<String>,
        color: Option<String>,
    ) -> Pending<Outcome<Category>> {
        self.update(
            id,
            CategoryPatch {
                name: Some(name.into()),
                color,
            },
        )
    }

    /// Deletes only after the usage check reports the category unused. The
    /// check runs before any optimistic removal.
    #[instrument(skip(self))]
    pub fn delete(&self, id: &str) -> Pending<DeleteCategoryResult> {
        if self.sync.get(id).is_none() {
            debug!(id, "delete of unknown category");
            return futures::future::ready(DeleteCategoryResult::NotFound).boxed();
        }

        let store = self.clone();
        let id = id.to_string();
        async move {
            let cancel = CancellationToken::new();
            match store.usage.is_in_use(&id, &cancel).await {
                Err(err) => {
                    store.sync.report(&err, USAGE_CHECK_MESSAGE);
                    DeleteCategoryResult::UsageCheckFailed
                }
                Ok(true) => {
                    info!(id = %id, "category in use; not deleting");
                    DeleteCategoryResult::InUse
                }
                Ok(false) => match store.sync.delete(&id).await {
                    Outcome::Confirmed(()) => DeleteCategoryResult::Success,
                    Outcome::Rejected => DeleteCategoryResult::NotFound,
                    Outcome::RolledBack(_) | Outcome::Superseded | Outcome::Cancelled => {
                        DeleteCategoryResult::Error(CATEGORY_MESSAGES.delete.to_string())
                    }
                },
            }
        }
        .boxed()
    }
}

/// Answers usage from the local task replica instead of the server.
#[derive(Clone)]
pub struct TaskReplicaUsage {
    tasks: TaskStore,
}

impl TaskReplicaUsage {
    pub fn new(tasks: TaskStore) -> Self {
        Self { tasks }
    }
}

#[async_trait]
impl UsageCheck for TaskReplicaUsage {
    async fn is_in_use(&self, id: &str, _cancel: &CancellationToken) -> ApiResult<bool> {
        Ok(self.tasks.any_in_category(id))
    }
}
