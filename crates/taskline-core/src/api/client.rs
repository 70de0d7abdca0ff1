use std::time::Duration;

use anyhow::Context;
use reqwest::Method;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::error::{ApiError, ApiResult};

/// Thin JSON client over a fixed base URL.
///
/// Every call races the request against its cancellation token; a cancelled
/// call resolves to [`ApiError::Aborted`] and drops the in-flight request.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            base_url: base_url.to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> ApiResult<T> {
        let body = self.send(Method::GET, path, None, cancel).await?;
        decode(&body)
    }

    pub async fn post<B, T>(&self, path: &str, body: &B, cancel: &CancellationToken) -> ApiResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let payload = encode(body)?;
        let body = self.send(Method::POST, path, Some(payload), cancel).await?;
        decode(&body)
    }

    pub async fn patch<B, T>(&self, path: &str, body: &B, cancel: &CancellationToken) -> ApiResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let payload = encode(body)?;
        let body = self.send(Method::PATCH, path, Some(payload), cancel).await?;
        decode(&body)
    }

    /// Any 2xx is success; the body (usually empty on 204) is ignored.
    pub async fn delete(&self, path: &str, cancel: &CancellationToken) -> ApiResult<()> {
        self.send(Method::DELETE, path, None, cancel).await?;
        Ok(())
    }

    #[instrument(skip(self, method, payload, cancel), fields(method = %method))]
    async fn send(
        &self,
        method: Method,
        path: &str,
        payload: Option<Vec<u8>>,
        cancel: &CancellationToken,
    ) -> ApiResult<Vec<u8>> {
        if cancel.is_cancelled() {
            return Err(ApiError::Aborted);
        }

        let url = build_url(&self.base_url, path);
        let mut request = self
            .http
            .request(method, &url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json");
        if let Some(payload) = payload {
            request = request.body(payload);
        }

        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, body))
        };

        let (status, body) = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(%url, "request cancelled");
                return Err(ApiError::Aborted);
            }
            result = exchange => result.map_err(|err| {
                let classified = ApiError::from_transport(&err, cancel);
                if !classified.is_abort() {
                    warn!(%url, error = %err, "request failed");
                }
                classified
            })?,
        };

        if cancel.is_cancelled() {
            return Err(ApiError::Aborted);
        }

        if !status.is_success() {
            let err = ApiError::from_status(status.as_u16(), status.canonical_reason(), &body);
            warn!(%url, status = status.as_u16(), message = err.message(), "request rejected");
            return Err(err);
        }

        debug!(%url, status = status.as_u16(), bytes = body.len(), "request succeeded");
        Ok(body.to_vec())
    }
}

pub fn build_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

fn encode<B: Serialize + ?Sized>(body: &B) -> ApiResult<Vec<u8>> {
    serde_json::to_vec(body)
        .map_err(|err| ApiError::Unknown(format!("failed to encode request body: {err}")))
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> ApiResult<T> {
    serde_json::from_slice(body)
        .map_err(|err| ApiError::Unknown(format!("invalid response body: {err}")))
}
