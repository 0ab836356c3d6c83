//! Passthrough REST surface onto the recognition service.
//!
//! | Gateway route                      | Upstream                |
//! |------------------------------------|-------------------------|
//! | `GET /api/metadata/last-registered`| `GET /metadata/last`    |
//! | `GET /api/metadata/count`          | `GET /metadata/count`   |
//! | `POST /register`                   | `POST /register`        |
//!
//! Upstream status and body are relayed unchanged. Only failures to reach
//! the upstream at all are translated.

use std::time::Duration;

use axum::Json;
use axum::body::{Body, Bytes};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use facegate_settings::BackendSettings;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};

use crate::metrics::PROXY_REQUESTS_TOTAL;

/// Why a passthrough call produced no upstream response.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The upstream did not answer before the deadline.
    #[error("Timeout")]
    Timeout,
    /// The upstream could not be reached.
    #[error("recognition service unreachable: {0}")]
    Unreachable(String),
}

impl ProxyError {
    fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Unreachable(err.to_string())
        }
    }

    /// HTTP status reported to the caller.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Unreachable(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// An upstream response, relayed as-is.
#[derive(Debug)]
pub struct Relayed {
    /// Upstream status.
    pub status: StatusCode,
    /// Upstream `Content-Type`, if any.
    pub content_type: Option<HeaderValue>,
    /// Upstream body bytes.
    pub body: Bytes,
}

impl IntoResponse for Relayed {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        if let Some(content_type) = self.content_type {
            let _ = response
                .headers_mut()
                .insert(header::CONTENT_TYPE, content_type);
        }
        response
    }
}

/// HTTP client for the passthrough routes.
pub struct PassthroughClient {
    client: reqwest::Client,
    upstream: BackendSettings,
}

impl PassthroughClient {
    /// Create a client relaying to `upstream`.
    pub fn new(client: reqwest::Client, upstream: BackendSettings) -> Self {
        Self { client, upstream }
    }

    /// Deadline applied to every passthrough call.
    pub fn deadline(&self) -> Duration {
        self.upstream.deadline()
    }

    /// `GET /metadata/last`.
    pub async fn last_registered(&self) -> Result<Relayed, ProxyError> {
        self.relay("last_registered", self.client.get(self.upstream.endpoint("/metadata/last")))
            .await
    }

    /// `GET /metadata/count`.
    pub async fn registered_count(&self) -> Result<Relayed, ProxyError> {
        self.relay("count", self.client.get(self.upstream.endpoint("/metadata/count")))
            .await
    }

    /// `POST /register` with `body`.
    pub async fn register(&self, body: &Value) -> Result<Relayed, ProxyError> {
        self.relay(
            "register",
            self.client.post(self.upstream.endpoint("/register")).json(body),
        )
        .await
    }

    async fn relay(
        &self,
        route: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<Relayed, ProxyError> {
        let result = async {
            let response = request.timeout(self.deadline()).send().await?;
            let status = StatusCode::from_u16(response.status().as_u16())
                .unwrap_or(StatusCode::BAD_GATEWAY);
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| HeaderValue::from_bytes(v.as_bytes()).ok());
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>(Relayed {
                status,
                content_type,
                body,
            })
        }
        .await;

        match result {
            Ok(relayed) => {
                debug!(route, status = relayed.status.as_u16(), "passthrough relayed");
                metrics::counter!(PROXY_REQUESTS_TOTAL, "route" => route, "outcome" => "relayed")
                    .increment(1);
                Ok(relayed)
            }
            Err(e) => {
                let err = ProxyError::from_reqwest(&e);
                warn!(route, error = %e, "passthrough failed");
                let outcome = if matches!(err, ProxyError::Timeout) { "timeout" } else { "unreachable" };
                metrics::counter!(PROXY_REQUESTS_TOTAL, "route" => route, "outcome" => outcome)
                    .increment(1);
                Err(err)
            }
        }
    }
}
