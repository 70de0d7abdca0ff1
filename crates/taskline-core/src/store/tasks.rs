use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, instrument};

use super::sync::{LoadState, Messages, Outcome, Pending, StoreError, SyncStore};
use crate::api::Remote;
use crate::filter::FilterDescriptor;
use crate::order::{self, SortCriterion};
use crate::prefs::{self, TaskOverlay};
use crate::task::{EditTask, NewTask, Task, TaskPatch};
use crate::view::{self, VisibleTasks};

pub const TASK_MESSAGES: Messages = Messages {
    load: "Failed to load tasks",
    create: "Failed to add task",
    update: "Failed to update task",
    delete: "Failed to delete task, please retry",
};

#[derive(Clone)]
pub struct TaskStore {
    sync: SyncStore<Task>,
}

impl TaskStore {
    pub fn new(remote: Arc<dyn Remote<Task>>) -> Self {
        Self {
            sync: SyncStore::new(remote, TASK_MESSAGES),
        }
    }

    pub fn with_offline(self, offline: watch::Receiver<bool>) -> Self {
        Self {
            sync: self.sync.with_offline(offline),
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

    pub fn pending_count(&self) -> usize {
        self.sync.pending_count()
    }

    /// The replica in storage order.
    pub fn tasks(&self) -> Vec<Task> {
        self.sync.items()
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        self.sync.get(id)
    }

    /// The replica in display order.
    pub fn sorted(&self) -> Vec<Task> {
        self.sync.with_items(order::sorted_by_order)
    }

    pub fn visible(&self, filters: &FilterDescriptor) -> VisibleTasks {
        self.sync.with_items(|tasks| view::compose(tasks, filters))
    }

    pub fn any_in_category(&self, category_id: &str) -> bool {
        self.sync.with_items(|tasks| {
            tasks
                .iter()
                .any(|task| task.category_id.as_deref() == Some(category_id))
        })
    }

    /// Appends the task at the end of the display order.
    #[instrument(skip(self, draft), fields(text_len = draft.text.len()))]
    pub fn create(&self, draft: NewTask) -> Pending<Outcome<Task>> {
        let now = Utc::now();
        let optimistic_draft = draft.clone();
        self.sync.create_with(draft, move |tasks| {
            let next_order = tasks.iter().map(|t| t.order).max().map_or(0, |max| max + 1);
            Some(Task::new_optimistic(&optimistic_draft, next_order, now))
        })
    }

    /// Patches that only touch client-side fields never reach the server.
    #[instrument(skip(self, patch))]
    pub fn update(&self, id: &str, patch: TaskPatch) -> Pending<Outcome<Task>> {
        if !patch.has_remote_fields() {
            debug!(id, "local-only task patch");
            return match self.sync.patch_local(id, &patch) {
                Some(task) => Outcome::Confirmed(task).ready(),
                None => Outcome::Rejected.ready(),
            };
        }
        self.sync.update(id, patch)
    }

    #[instrument(skip(self))]
    pub fn toggle(&self, id: &str) -> Pending<Outcome<Task>> {
        self.sync
            .update_with(id, |task| Some(TaskPatch::completed(!task.completed)))
    }

    /// Edits with blank text are rejected without touching the replica.
    #[instrument(skip(self, edit))]
    pub fn edit(&self, id: &str, edit: EditTask) -> Pending<Outcome<Task>> {
        if edit.text.trim().is_empty() {
            debug!(id, "rejecting edit with empty text");
            return Outcome::Rejected.ready();
        }
        self.sync.update(id, TaskPatch::from(edit))
    }

    #[instrument(skip(self))]
    pub fn delete(&self, id: &str) -> Pending<Outcome<()>> {
        self.sync.delete(id)
    }

    /// Drag-and-drop: moves `source` onto `target`'s slot. Returns whether
    /// anything changed.
    #[instrument(skip(self))]
    pub fn reorder(&self, source: &str, target: Option<&str>) -> bool {
        self.sync
            .rewrite_local(|tasks| order::reorder(tasks, source, target))
    }

    #[instrument(skip(self))]
    pub fn sort_by(&self, criterion: SortCriterion) {
        self.sync.rewrite_local(|tasks| {
            if tasks.is_empty() {
                None
            } else {
                Some(order::sort_by(tasks, criterion))
            }
        });
    }

    /// Back to creation order, renumbered from zero.
    pub fn reset_order(&self) {
        self.sync.rewrite_local(|tasks| {
            if tasks.is_empty() {
                None
            } else {
                Some(order::reset_order(tasks))
            }
        });
    }

    /// Re-applies locally saved tags and order after a load.
    pub fn restore_local_fields(&self, overlay: &TaskOverlay) -> bool {
        if overlay.is_empty() {
            return false;
        }
        self.sync
            .rewrite_local(|tasks| prefs::apply_overlay(tasks, overlay))
    }

    pub fn local_fields(&self) -> TaskOverlay {
        self.sync.with_items(prefs::capture_overlay)
    }
}
