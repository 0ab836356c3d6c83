//! Server-level errors. Per-request failures never surface here; they are
//! reported to the client as typed failure results.

use thiserror::Error;

/// Errors raised while constructing or starting the gateway.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The outbound HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
    /// The listener could not be bound.
    #[error("failed to bind listener: {0}")]
    Bind(#[from] std::io::Error),
}
