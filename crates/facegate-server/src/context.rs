//! Shared state handed to every WebSocket session.

use std::sync::Arc;
use std::time::Duration;

use facegate_core::RequestKind;
use facegate_settings::GatewaySettings;
use tokio_util::task::TaskTracker;

use crate::dispatcher::ResultDispatcher;
use crate::forwarder::{InferenceForwarder, RetryPolicy};
use crate::registry::ConnectionRegistry;

/// One forwarder per request kind.
#[derive(Clone)]
pub struct Forwarders {
    /// Recognition service forwarder.
    pub recognition: Arc<InferenceForwarder>,
    /// Chat service forwarder.
    pub chat: Arc<InferenceForwarder>,
}

impl Forwarders {
    /// HTTP forwarders for both configured backends, sharing `client`.
    pub fn http(client: &reqwest::Client, settings: &GatewaySettings) -> Self {
        let retry = RetryPolicy::from_settings(&settings.retry);
        Self {
            recognition: Arc::new(InferenceForwarder::http(
                RequestKind::Recognition,
                client.clone(),
                &settings.recognition,
                retry.clone(),
            )),
            chat: Arc::new(InferenceForwarder::http(
                RequestKind::Chat,
                client.clone(),
                &settings.chat,
                retry,
            )),
        }
    }

    /// Forwarder serving `kind`.
    pub fn for_kind(&self, kind: RequestKind) -> &Arc<InferenceForwarder> {
        match kind {
            RequestKind::Recognition => &self.recognition,
            RequestKind::Chat => &self.chat,
        }
    }
}

/// Heartbeat timing for sessions.
#[derive(Clone, Copy, Debug)]
pub struct Heartbeat {
    /// Interval between server pings.
    pub interval: Duration,
    /// Silence after which a client is disconnected.
    pub timeout: Duration,
}

/// Everything a session needs, shared across connections.
pub struct GatewayContext {
    /// Live connections.
    pub registry: Arc<ConnectionRegistry>,
    /// Result routing.
    pub dispatcher: ResultDispatcher,
    /// Backend forwarders.
    pub forwarders: Forwarders,
    /// Ping cadence.
    pub heartbeat: Heartbeat,
    /// Sessions and forward tasks, drained on shutdown.
    pub tasks: TaskTracker,
}
