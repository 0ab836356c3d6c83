//! Error taxonomy shared across the gateway.
//!
//! [`DecodeError`] never leaves the gateway: it is logged and the message
//! dropped. [`FailureKind`] is the client-visible category carried by a
//! failure result.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Why an inbound frame could not be turned into a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Binary frame that is not valid UTF-8.
    #[error("message is not valid UTF-8")]
    NotUtf8,

    /// Not well-formed JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// Well-formed JSON, but not an object.
    #[error("message must be a JSON object")]
    NotAnObject,

    /// The `type` discriminator is absent or not a string.
    #[error("missing \"type\" discriminator")]
    MissingType,

    /// The `type` discriminator names no known request.
    #[error("unknown message type \"{0}\"")]
    UnknownType(String),

    /// A required field is absent, not a string, or empty.
    #[error("\"{message_type}\" message requires a non-empty \"{field}\" string")]
    MissingField {
        /// Message type being decoded.
        message_type: &'static str,
        /// Name of the offending field.
        field: &'static str,
    },
}

/// Category of a failure reported to the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// A request of the same kind is already in flight on this connection.
    Busy,
    /// The backend did not answer before the deadline.
    Timeout,
    /// The backend was unreachable or returned an error.
    BackendError,
}

impl FailureKind {
    /// Label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Busy => "Busy",
            Self::Timeout => "Timeout",
            Self::BackendError => "BackendError",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
