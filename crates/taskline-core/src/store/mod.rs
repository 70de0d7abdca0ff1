pub mod categories;
pub mod sync;
pub mod tasks;

pub use categories::{CategoryStore, DeleteCategoryResult, TaskReplicaUsage};
pub use sync::{LoadState, Messages, Outcome, Pending, StoreError, SyncStore};
pub use tasks::TaskStore;
