use reqwest::StatusCode;
use serde::Deserialize;
use std::error::Error as StdError;

use crate::models::chat::ErrorKind;

/// Failure surfaced by a [`ChatClient`](super::chat::ChatClient).
///
/// Raw transport and HTTP failures are always folded into one of the
/// [`ErrorKind`] classes before they leave the client.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct CompletionError {
    pub kind: ErrorKind,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn StdError + Send + Sync>>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl CompletionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn no_api_key() -> Self {
        Self::new(ErrorKind::NoApiKey, "No API key configured. Set one with /key <key>.")
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "Request was cancelled")
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, ErrorKind::Network | ErrorKind::RateLimit | ErrorKind::Server)
    }

    /// Re-prompting for credentials is the only sensible recovery.
    pub fn needs_credentials(&self) -> bool {
        matches!(self.kind, ErrorKind::Auth | ErrorKind::NoApiKey)
    }

    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let kind = classify_status(status);
        let detail = serde_json::from_str::<ApiErrorBody>(body)
            .map(|b| b.error.message)
            .unwrap_or_else(|_| body.trim().to_string());

        let headline = match kind {
            ErrorKind::Auth => "Authentication failed. Check your API key.",
            ErrorKind::RateLimit => "Rate limit exceeded. Please wait and try again.",
            ErrorKind::Server => "The completion service is unavailable.",
            ErrorKind::Validation => "The request was rejected.",
            _ => "Unexpected response from the completion service.",
        };

        let message = if detail.is_empty() {
            format!("{} (HTTP {})", headline, status.as_u16())
        } else {
            format!("{} (HTTP {}: {})", headline, status.as_u16(), detail)
        };
        Self::new(kind, message)
    }

    pub fn timeout(after: std::time::Duration) -> Self {
        Self::new(ErrorKind::Network, format!("Request timed out after {:?}", after))
    }
}

impl From<reqwest::Error> for CompletionError {
    fn from(err: reqwest::Error) -> Self {
        let (kind, message) = if err.is_timeout() {
            (ErrorKind::Network, format!("Request timed out: {}", err))
        } else if err.is_connect() || err.is_request() || err.is_body() {
            (ErrorKind::Network, format!("Network error: {}", err))
        } else if let Some(status) = err.status() {
            (classify_status(status), format!("HTTP error: {}", err))
        } else if err.is_decode() {
            (ErrorKind::Unknown, format!("Failed to decode response: {}", err))
        } else {
            (ErrorKind::Unknown, format!("Unexpected error: {}", err))
        };
        Self::new(kind, message).with_source(err)
    }
}

impl From<serde_json::Error> for CompletionError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorKind::Unknown, format!("Malformed response: {}", err)).with_source(err)
    }
}

pub fn classify_status(status: StatusCode) -> ErrorKind {
    match status.as_u16() {
        401 | 403 => ErrorKind::Auth,
        429 => ErrorKind::RateLimit,
        500..=599 => ErrorKind::Server,
        400..=499 => ErrorKind::Validation,
        _ => ErrorKind::Unknown,
    }
}
