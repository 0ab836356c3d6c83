//! Backend forwarding.
//!
//! An [`InferenceForwarder`] serves one request kind. For each admitted
//! request it races three things:
//!
//! 1. the request's cancel token (connection gone: nothing is produced)
//! 2. the request's deadline (a `Timeout` failure)
//! 3. the backend call, with optional retries (payload or backend failure)
//!
//! Exactly one of them decides the outcome.

pub mod backend;
pub mod retry;

use std::sync::Arc;
use std::time::Instant;

use facegate_core::{Failure, InboundRequest, OutboundResult, RequestKind};
use facegate_settings::BackendSettings;
use tracing::{debug, info, instrument, warn};

use crate::metrics::{
    GATEWAY_BACKEND_ERRORS_TOTAL, GATEWAY_REQUEST_DURATION_SECONDS, GATEWAY_TIMEOUTS_TOTAL,
};
use crate::sequencer::PendingRequest;
pub use backend::{BackendError, HttpBackend, InferenceBackend};
pub use retry::RetryPolicy;

/// Outcome of [`InferenceForwarder::forward`].
#[derive(Debug, Clone, PartialEq)]
pub enum Forwarded {
    /// A result addressed to the requesting connection.
    Completed(OutboundResult),
    /// The connection went away first; nothing may be delivered.
    Cancelled,
}

/// Backend path for `kind`.
pub fn endpoint_path(kind: RequestKind) -> &'static str {
    match kind {
        RequestKind::Recognition => "/recognize",
        RequestKind::Chat => "/query",
    }
}

/// Forwards requests of one kind to one backend.
pub struct InferenceForwarder {
    kind: RequestKind,
    backend: Arc<dyn InferenceBackend>,
    retry: RetryPolicy,
}

impl InferenceForwarder {
    /// Create a forwarder over any backend.
    pub fn new(kind: RequestKind, backend: Arc<dyn InferenceBackend>, retry: RetryPolicy) -> Self {
        Self {
            kind,
            backend,
            retry,
        }
    }

    /// Create a forwarder posting to the kind's endpoint on `settings.base_url`.
    pub fn http(
        kind: RequestKind,
        client: reqwest::Client,
        settings: &BackendSettings,
        retry: RetryPolicy,
    ) -> Self {
        let url = settings.endpoint(endpoint_path(kind));
        Self::new(kind, Arc::new(HttpBackend::new(client, url)), retry)
    }

    /// Forward one admitted request.
    ///
    /// Never outlives `pending.deadline`. Returns [`Forwarded::Cancelled`]
    /// if the cancel token fires before or while the call is in flight.
    #[instrument(skip_all, fields(connection_id = %pending.connection_id, kind = %self.kind))]
    pub async fn forward(&self, request: &InboundRequest, pending: &PendingRequest) -> Forwarded {
        if pending.cancel.is_cancelled() {
            return Forwarded::Cancelled;
        }

        let started = Instant::now();
        let body = request.backend_body();
        let call = retry::call_with_retry(self.backend.as_ref(), &body, &self.retry, self.kind);

        let failure = tokio::select! {
            biased;
            () = pending.cancel.cancelled() => {
                debug!("request cancelled before the backend answered");
                return Forwarded::Cancelled;
            }
            () = tokio::time::sleep_until(pending.deadline) => {
                metrics::counter!(GATEWAY_TIMEOUTS_TOTAL, "kind" => self.kind.as_str()).increment(1);
                warn!(elapsed_ms = elapsed_ms(started), "backend deadline exceeded");
                Failure::timeout()
            }
            result = call => match result {
                Ok(payload) => {
                    info!(elapsed_ms = elapsed_ms(started), "backend answered");
                    metrics::histogram!(GATEWAY_REQUEST_DURATION_SECONDS, "kind" => self.kind.as_str())
                        .record(started.elapsed().as_secs_f64());
                    if pending.cancel.is_cancelled() {
                        return Forwarded::Cancelled;
                    }
                    return Forwarded::Completed(OutboundResult::payload(
                        pending.connection_id.clone(),
                        self.kind,
                        payload,
                    ));
                }
                Err(err) => {
                    metrics::counter!(
                        GATEWAY_BACKEND_ERRORS_TOTAL,
                        "kind" => self.kind.as_str(),
                        "category" => err.category()
                    )
                    .increment(1);
                    warn!(error = %err, elapsed_ms = elapsed_ms(started), "backend call failed");
                    Failure::backend(err.to_string())
                }
            },
        };

        if pending.cancel.is_cancelled() {
            return Forwarded::Cancelled;
        }
        Forwarded::Completed(OutboundResult::failure(
            pending.connection_id.clone(),
            self.kind,
            failure,
        ))
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
