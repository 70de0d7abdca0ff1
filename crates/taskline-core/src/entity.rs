use std::fmt::Debug;

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub const TEMP_ID_PREFIX: &str = "temp-";

/// A record replicated from the server into a [`crate::store::SyncStore`].
pub trait Entity: Clone + Debug + Send + Sync + 'static {
    /// Payload sent to the server on create.
    type Draft: Clone + Debug + Send + Sync + 'static;
    /// Partial change applied locally and sent to the server on update.
    type Patch: Clone + Debug + Send + Sync + 'static;

    const KIND: &'static str;

    fn id(&self) -> &str;

    fn apply_patch(&mut self, patch: &Self::Patch, now: DateTime<Utc>);

    /// Adopts the server-owned fields of `confirmed` (including its id) and
    /// keeps fields the server never echoes.
    fn reconcile(&mut self, confirmed: Self);

    /// Undoes a failed remote update by restoring the server-owned fields
    /// of `before`. Client-only fields keep their current values, since
    /// local edits made after the snapshot never went through the server.
    fn revert_remote(&mut self, before: Self);
}

pub fn temp_id() -> String {
    format!("{TEMP_ID_PREFIX}{}", Uuid::new_v4())
}

pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}
