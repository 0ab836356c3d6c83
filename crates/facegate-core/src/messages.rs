//! Typed inbound requests and outbound results.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::errors::FailureKind;
use crate::ids::ConnectionId;

/// The lane a request travels on. Each connection has one lane per kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Face recognition of a still frame.
    Recognition,
    /// Retrieval-augmented chat query.
    Chat,
}

impl RequestKind {
    /// Every kind, in lane order.
    pub const ALL: [Self; 2] = [Self::Recognition, Self::Chat];

    /// Short label used in logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Recognition => "recognition",
            Self::Chat => "chat",
        }
    }

    /// The `type` discriminator of outbound messages answering this kind.
    pub fn response_type(self) -> &'static str {
        match self {
            Self::Recognition => "recognition",
            Self::Chat => "chat_response",
        }
    }

    /// Stable lane index (`0..ALL.len()`).
    pub fn index(self) -> usize {
        match self {
            Self::Recognition => 0,
            Self::Chat => 1,
        }
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded, validated client message. Immutable once decoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundRequest {
    /// A camera frame to recognise.
    Frame {
        /// Base64 data-URL of a still image.
        image: String,
    },
    /// A natural-language question for the chat service.
    ChatQuery {
        /// Query text.
        query: String,
    },
}

impl InboundRequest {
    /// The lane this request travels on.
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::Frame { .. } => RequestKind::Recognition,
            Self::ChatQuery { .. } => RequestKind::Chat,
        }
    }

    /// JSON body sent to the backend service for this request.
    pub fn backend_body(&self) -> Value {
        match self {
            Self::Frame { image } => json!({ "image": image }),
            Self::ChatQuery { query } => json!({ "query": query }),
        }
    }
}

/// A typed failure reported to the client in place of a payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Failure {
    /// Failure category.
    pub kind: FailureKind,
    /// Short client-facing message.
    pub message: String,
}

impl Failure {
    /// Admission rejected: a request of the same kind is already in flight.
    pub fn busy() -> Self {
        Self {
            kind: FailureKind::Busy,
            message: FailureKind::Busy.to_string(),
        }
    }

    /// The backend did not answer before the deadline.
    pub fn timeout() -> Self {
        Self {
            kind: FailureKind::Timeout,
            message: FailureKind::Timeout.to_string(),
        }
    }

    /// The backend was unreachable or answered with an error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::BackendError,
            message: message.into(),
        }
    }
}

/// Either the backend payload, forwarded verbatim, or a failure.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// Opaque backend JSON.
    Payload(Value),
    /// Typed failure.
    Failure(Failure),
}

/// A result addressed to one connection, answering one request kind.
#[derive(Clone, Debug, PartialEq)]
pub struct OutboundResult {
    /// Connection the result belongs to.
    pub connection_id: ConnectionId,
    /// Lane the result answers.
    pub kind: RequestKind,
    /// Payload or failure.
    pub outcome: Outcome,
}

impl OutboundResult {
    /// Wrap a successful backend payload.
    pub fn payload(connection_id: ConnectionId, kind: RequestKind, payload: Value) -> Self {
        Self {
            connection_id,
            kind,
            outcome: Outcome::Payload(payload),
        }
    }

    /// Wrap a failure.
    pub fn failure(connection_id: ConnectionId, kind: RequestKind, failure: Failure) -> Self {
        Self {
            connection_id,
            kind,
            outcome: Outcome::Failure(failure),
        }
    }

    /// The failure kind, if this result is a failure.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match &self.outcome {
            Outcome::Failure(f) => Some(f.kind),
            Outcome::Payload(_) => None,
        }
    }
}
