//! Remote gateway: a typed client for the REST backend.

pub mod categories;
pub mod client;
pub mod error;
pub mod todos;
pub mod wire;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::entity::Entity;

pub use categories::HttpCategoryApi;
pub use client::ApiClient;
pub use error::{ApiError, ApiResult, ErrorKind};
pub use todos::HttpTodoApi;

/// CRUD surface for one entity kind. Stores depend on this, never on HTTP.
#[async_trait]
pub trait Remote<E: Entity>: Send + Sync {
    async fn list(&self, cancel: &CancellationToken) -> ApiResult<Vec<E>>;

    async fn create(&self, draft: &E::Draft, cancel: &CancellationToken) -> ApiResult<E>;

    async fn update(&self, id: &str, patch: &E::Patch, cancel: &CancellationToken)
    -> ApiResult<E>;

    async fn delete(&self, id: &str, cancel: &CancellationToken) -> ApiResult<()>;
}

/// Answers whether a category is still referenced before it may be deleted.
#[async_trait]
pub trait UsageCheck: Send + Sync {
    async fn is_in_use(&self, id: &str, cancel: &CancellationToken) -> ApiResult<bool>;
}
