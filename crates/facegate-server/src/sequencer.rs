//! Per-connection admission control.
//!
//! Each connection has one lane per [`RequestKind`]. A lane is either idle
//! or holds exactly one pending request; a second request of the same kind
//! is rejected with `Busy` and leaves the pending one untouched. Lanes of
//! different kinds are independent.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use facegate_core::{ConnectionId, RequestKind};
use facegate_settings::GatewaySettings;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Per-kind deadlines applied at admission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadlines {
    /// Recognition lane deadline.
    pub recognition: Duration,
    /// Chat lane deadline.
    pub chat: Duration,
}

impl Deadlines {
    /// Deadlines configured for both backends.
    pub fn from_settings(settings: &GatewaySettings) -> Self {
        Self {
            recognition: settings.recognition.deadline(),
            chat: settings.chat.deadline(),
        }
    }

    /// Deadline for `kind`.
    pub fn for_kind(&self, kind: RequestKind) -> Duration {
        match kind {
            RequestKind::Recognition => self.recognition,
            RequestKind::Chat => self.chat,
        }
    }
}

impl Default for Deadlines {
    fn default() -> Self {
        Self {
            recognition: Duration::from_secs(10),
            chat: Duration::from_secs(30),
        }
    }
}

/// An admitted request occupying its lane until resolved.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    /// Owning connection.
    pub connection_id: ConnectionId,
    /// Lane this request occupies.
    pub kind: RequestKind,
    /// Instant after which the request times out.
    pub deadline: Instant,
    /// Cancelled when the connection goes away.
    pub cancel: CancellationToken,
    ticket: u64,
}

impl PendingRequest {
    /// Time left before the deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// Result of [`RequestSequencer::admit`].
#[derive(Debug)]
pub enum Admission {
    /// The lane was idle and is now occupied.
    Admitted(PendingRequest),
    /// The lane already holds a pending request.
    Busy,
}

struct Slot {
    ticket: u64,
    cancel: CancellationToken,
}

/// Admission control for one connection.
pub struct RequestSequencer {
    connection_id: ConnectionId,
    deadlines: Deadlines,
    /// Connection-wide token; every pending request holds a child.
    cancel: CancellationToken,
    lanes: Mutex<[Option<Slot>; 2]>,
    next_ticket: AtomicU64,
}

impl RequestSequencer {
    /// Create a sequencer whose requests are cancelled along with `parent`.
    pub fn new(connection_id: ConnectionId, deadlines: Deadlines, parent: &CancellationToken) -> Self {
        Self {
            connection_id,
            deadlines,
            cancel: parent.child_token(),
            lanes: Mutex::new([None, None]),
            next_ticket: AtomicU64::new(1),
        }
    }

    /// Try to occupy the lane for `kind`.
    ///
    /// Check-and-set happens under one lock, so two concurrent calls for the
    /// same kind can never both be admitted.
    pub fn admit(&self, kind: RequestKind) -> Admission {
        let mut lanes = self.lanes.lock();
        let lane = &mut lanes[kind.index()];
        if lane.is_some() {
            return Admission::Busy;
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let cancel = self.cancel.child_token();
        *lane = Some(Slot {
            ticket,
            cancel: cancel.clone(),
        });

        Admission::Admitted(PendingRequest {
            connection_id: self.connection_id.clone(),
            kind,
            deadline: Instant::now() + self.deadlines.for_kind(kind),
            cancel,
            ticket,
        })
    }

    /// Free the lane held by `pending`.
    ///
    /// Returns `false` if the lane was already cleared (by [`cancel_all`] or
    /// an earlier resolve), in which case nothing changes.
    ///
    /// [`cancel_all`]: Self::cancel_all
    pub fn resolve(&self, pending: &PendingRequest) -> bool {
        let mut lanes = self.lanes.lock();
        let lane = &mut lanes[pending.kind.index()];
        if lane.as_ref().is_some_and(|slot| slot.ticket == pending.ticket) {
            *lane = None;
            true
        } else {
            false
        }
    }

    /// Cancel every pending request and clear all lanes.
    ///
    /// Returns the number of requests that were pending.
    pub fn cancel_all(&self) -> usize {
        self.cancel.cancel();
        let mut lanes = self.lanes.lock();
        lanes
            .iter_mut()
            .filter_map(Option::take)
            .inspect(|slot| slot.cancel.cancel())
            .count()
    }

    /// Whether the lane for `kind` is occupied.
    #[cfg(test)]
    pub(crate) fn is_pending(&self, kind: RequestKind) -> bool {
        self.lanes.lock()[kind.index()].is_some()
    }

    /// Resolves once the connection-wide token is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}
