//! Result delivery.
//!
//! A result is written only if its connection is still registered at the
//! moment of dispatch. Anything else is dropped silently: the client has no
//! channel to be told about it.

use std::sync::Arc;

use facegate_core::{OutboundResult, codec};
use tracing::debug;

use crate::metrics::GATEWAY_RESULTS_DROPPED_TOTAL;
use crate::registry::ConnectionRegistry;

/// What happened to a dispatched result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Queued for the connection's writer.
    Delivered,
    /// The connection was no longer registered.
    ConnectionGone,
    /// The connection is registered but its queue is full or closed.
    NotWritable,
}

/// Routes results to the connection that issued the request.
#[derive(Clone)]
pub struct ResultDispatcher {
    registry: Arc<ConnectionRegistry>,
}

impl ResultDispatcher {
    /// Create a dispatcher over `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Encode and queue `result` for its connection, if still live.
    pub fn dispatch(&self, result: &OutboundResult) -> DispatchOutcome {
        let Some(connection) = self.registry.lookup(&result.connection_id) else {
            debug!(
                connection_id = %result.connection_id,
                kind = %result.kind,
                "connection gone, result dropped"
            );
            metrics::counter!(GATEWAY_RESULTS_DROPPED_TOTAL, "reason" => "gone").increment(1);
            return DispatchOutcome::ConnectionGone;
        };

        if connection.send(codec::encode(result)) {
            DispatchOutcome::Delivered
        } else {
            debug!(
                connection_id = %result.connection_id,
                kind = %result.kind,
                "connection not writable, result dropped"
            );
            metrics::counter!(GATEWAY_RESULTS_DROPPED_TOTAL, "reason" => "not_writable").increment(1);
            DispatchOutcome::NotWritable
        }
    }
}
