use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::client::ApiClient;
use super::error::ApiResult;
use super::wire::{CategoryBody, Envelope, WireCategory, WireUsage};
use super::{Remote, UsageCheck};
use crate::category::{Category, CategoryPatch, NewCategory};

#[derive(Debug, Clone)]
pub struct HttpCategoryApi {
    client: Arc<ApiClient>,
}

impl HttpCategoryApi {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Remote<Category> for HttpCategoryApi {
    #[instrument(skip_all)]
    async fn list(&self, cancel: &CancellationToken) -> ApiResult<Vec<Category>> {
        let envelope: Envelope<Vec<WireCategory>> =
            self.client.get("/categories", cancel).await?;
        Ok(envelope
            .data
            .into_iter()
            .map(WireCategory::into_category)
            .collect())
    }

    #[instrument(skip_all, fields(name = %draft.name))]
    async fn create(
        &self,
        draft: &NewCategory,
        cancel: &CancellationToken,
    ) -> ApiResult<Category> {
        let body = CategoryBody { name: &draft.name };
        let envelope: Envelope<WireCategory> =
            self.client.post("/categories", &body, cancel).await?;
        Ok(envelope.data.into_category())
    }

    /// Only the name is stored remotely; a color-only patch still round-trips
    /// so the server stays the source of `updated_at`.
    #[instrument(skip(self, patch, cancel))]
    async fn update(
        &self,
        id: &str,
        patch: &CategoryPatch,
        cancel: &CancellationToken,
    ) -> ApiResult<Category> {
        let path = format!("/categories/{id}");
        let envelope: Envelope<WireCategory> = match patch.name.as_deref() {
            Some(name) => {
                self.client
                    .patch(&path, &CategoryBody { name }, cancel)
                    .await?
            }
            None => self.client.patch(&path, &serde_json::json!({}), cancel).await?,
        };
        Ok(envelope.data.into_category())
    }

    #[instrument(skip(self, cancel))]
    async fn delete(&self, id: &str, cancel: &CancellationToken) -> ApiResult<()> {
        self.client.delete(&format!("/categories/{id}"), cancel).await
    }
}

#[async_trait]
impl UsageCheck for HttpCategoryApi {
    #[instrument(skip(self, cancel))]
    async fn is_in_use(&self, id: &str, cancel: &CancellationToken) -> ApiResult<bool> {
        let envelope: Envelope<WireUsage> = self
            .client
            .get(&format!("/categories/{id}/usage"), cancel)
            .await?;
        debug!(
            id,
            in_use = envelope.data.in_use,
            todos = envelope.data.counts.todos,
            "category usage checked"
        );
        Ok(envelope.data.in_use)
    }
}
