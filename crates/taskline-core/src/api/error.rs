use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_ERROR_MESSAGE: &str = "Request failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Abort,
    Network,
    Http,
    Unknown,
}

/// Every failure a gateway call can end in.
///
/// `Aborted` is an outcome, not a fault: callers must handle it apart from
/// the other variants and never show it to the user.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ApiError {
    #[error("request aborted")]
    Aborted,

    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("{0}")]
    Unknown(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Error body shape returned by the backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorEnvelope {
    #[serde(default)]
    pub errors: Vec<ErrorItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorItem {
    pub message: String,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Aborted => ErrorKind::Abort,
            Self::Network(_) => ErrorKind::Network,
            Self::Http { .. } => ErrorKind::Http,
            Self::Unknown(_) => ErrorKind::Unknown,
        }
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    pub fn is_validation(&self) -> bool {
        self.status() == Some(422)
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Aborted => "Request aborted",
            Self::Network(message) | Self::Unknown(message) => message.as_str(),
            Self::Http { message, .. } => message.as_str(),
        }
    }

    pub(crate) fn from_status(status: u16, status_text: Option<&str>, body: &[u8]) -> Self {
        Self::Http {
            status,
            message: extract_error_message(body, status_text),
            details: serde_json::from_slice(body).ok(),
        }
    }

    /// Classifies a transport failure. A cancelled token wins over whatever
    /// the transport reported.
    pub(crate) fn from_transport(err: &reqwest::Error, cancel: &CancellationToken) -> Self {
        if cancel.is_cancelled() {
            return Self::Aborted;
        }

        if err.is_connect() || err.is_timeout() || err.is_request() || err.is_body() {
            Self::Network(err.to_string())
        } else {
            Self::Unknown(err.to_string())
        }
    }
}

/// First structured error message, then the status text, then a fixed
/// default. An unparseable body is not an error.
pub fn extract_error_message(body: &[u8], status_text: Option<&str>) -> String {
    let structured = serde_json::from_slice::<ErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.errors.into_iter().next())
        .map(|item| item.message)
        .filter(|message| !message.is_empty());

    if let Some(message) = structured {
        return message;
    }

    status_text
        .filter(|text| !text.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_string())
}
