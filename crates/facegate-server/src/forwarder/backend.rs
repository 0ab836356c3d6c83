//! Inference backend abstraction and its HTTP implementation.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Longest upstream body excerpt carried in an error message.
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Why a backend call produced no usable payload.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The request never got a response (connect, reset, DNS, ...).
    #[error("backend unreachable: {message}")]
    Transport {
        /// Transport error text.
        message: String,
    },

    /// The backend answered with a non-success status.
    #[error("backend returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Truncated response body.
        body: String,
    },

    /// The backend answered 2xx but the body was not JSON.
    #[error("malformed backend response: {0}")]
    Malformed(String),
}

impl BackendError {
    /// Whether retrying the same call might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Malformed(_) => false,
        }
    }

    /// Short label for metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "transport",
            Self::Status { .. } => "status",
            Self::Malformed(_) => "malformed",
        }
    }
}

/// A service that turns a request body into a JSON result.
///
/// The returned value is opaque to the gateway and forwarded verbatim.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Perform one call. Deadlines and retries are applied by the caller.
    async fn infer(&self, body: &Value) -> Result<Value, BackendError>;
}

/// JSON-over-HTTP backend: `POST <url>` with the request body.
pub struct HttpBackend {
    client: reqwest::Client,
    url: String,
}

impl HttpBackend {
    /// Create a backend posting to `url`.
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl InferenceBackend for HttpBackend {
    async fn infer(&self, body: &Value) -> Result<Value, BackendError> {
        let response = self
            .client
            .post(&self.url)
            .json(body)
            .send()
            .await
            .map_err(|e| BackendError::Transport {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            debug!(url = %self.url, status = status.as_u16(), "backend returned error status");
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: truncate(&text, MAX_ERROR_BODY_CHARS),
            });
        }

        let bytes = response.bytes().await.map_err(|e| BackendError::Transport {
            message: e.to_string(),
        })?;
        serde_json::from_slice(&bytes).map_err(|e| BackendError::Malformed(e.to_string()))
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_owned(),
    }
}
