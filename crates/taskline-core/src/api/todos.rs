use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::client::ApiClient;
use super::error::ApiResult;
use super::wire::{Envelope, TodoCreateBody, TodoPatchBody, WireTodo};
use super::Remote;
use crate::task::{NewTask, Task, TaskPatch};

#[derive(Debug, Clone)]
pub struct HttpTodoApi {
    client: Arc<ApiClient>,
}

impl HttpTodoApi {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Remote<Task> for HttpTodoApi {
    #[instrument(skip_all)]
    async fn list(&self, cancel: &CancellationToken) -> ApiResult<Vec<Task>> {
        let envelope: Envelope<Vec<WireTodo>> = self.client.get("/todos", cancel).await?;
        Ok(envelope
            .data
            .into_iter()
            .enumerate()
            .map(|(position, todo)| todo.into_task(position))
            .collect())
    }

    #[instrument(skip_all, fields(text_len = draft.text.len()))]
    async fn create(&self, draft: &NewTask, cancel: &CancellationToken) -> ApiResult<Task> {
        let body = TodoCreateBody::from(draft);
        let envelope: Envelope<WireTodo> = self.client.post("/todos", &body, cancel).await?;
        Ok(envelope.data.into_task(0))
    }

    #[instrument(skip(self, patch, cancel))]
    async fn update(
        &self,
        id: &str,
        patch: &TaskPatch,
        cancel: &CancellationToken,
    ) -> ApiResult<Task> {
        let body = TodoPatchBody::from(patch);
        let envelope: Envelope<WireTodo> = self
            .client
            .patch(&format!("/todos/{id}"), &body, cancel)
            .await?;
        Ok(envelope.data.into_task(0))
    }

    #[instrument(skip(self, cancel))]
    async fn delete(&self, id: &str, cancel: &CancellationToken) -> ApiResult<()> {
        self.client.delete(&format!("/todos/{id}"), cancel).await
    }
}
