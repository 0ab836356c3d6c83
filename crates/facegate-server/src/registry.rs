//! Live connection registry.
//!
//! Maps each [`ConnectionId`] to its [`ClientConnection`]. An ID is present
//! from successful upgrade until teardown; lookups after removal miss. The
//! map is the single place that decides whether a connection is still live.

use std::collections::HashMap;
use std::sync::Arc;

use facegate_core::ConnectionId;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::sequencer::{Deadlines, RequestSequencer};
use crate::websocket::connection::ClientConnection;

/// Registry of live WebSocket connections.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<ClientConnection>>>,
    send_queue_capacity: usize,
    deadlines: Deadlines,
    /// Parent of every connection's cancel token.
    shutdown: CancellationToken,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new(send_queue_capacity: usize, deadlines: Deadlines, shutdown: CancellationToken) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            send_queue_capacity: send_queue_capacity.max(1),
            deadlines,
            shutdown,
        }
    }

    /// Allocate a fresh ID and record the connection as live.
    ///
    /// Returns the connection and the receiving end of its outbound queue,
    /// which the session's write task drains.
    pub fn register(&self) -> (Arc<ClientConnection>, mpsc::Receiver<String>) {
        let id = ConnectionId::generate();
        let (tx, rx) = mpsc::channel(self.send_queue_capacity);
        let sequencer = RequestSequencer::new(id.clone(), self.deadlines, &self.shutdown);
        let connection = Arc::new(ClientConnection::new(id.clone(), tx, sequencer));

        let mut conns = self.connections.write();
        let _ = conns.insert(id.clone(), connection.clone());
        debug!(connection_id = %id, total = conns.len(), "connection registered");
        (connection, rx)
    }

    /// Remove a connection. Idempotent.
    pub fn unregister(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        let removed = self.connections.write().remove(id);
        if removed.is_some() {
            debug!(connection_id = %id, "connection unregistered");
        }
        removed
    }

    /// Find a live connection.
    pub fn lookup(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.connections.read().get(id).cloned()
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Whether no connection is live.
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }
}
