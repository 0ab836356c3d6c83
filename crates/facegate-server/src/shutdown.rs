//! Gateway shutdown.
//!
//! The root token parents every connection token, which in turn parents
//! every pending request token. Sessions and forward tasks run on the
//! coordinator's [`TaskTracker`], so a drain only completes once each session
//! has cancelled its lanes and left the registry.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// How a drain ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Drain {
    /// The listener stopped and every tracked task finished.
    Complete,
    /// The grace period ran out with tracked tasks still live.
    Abandoned {
        /// Tasks still running when the grace period elapsed.
        remaining: usize,
    },
}

/// Owns the root cancellation token and the session task set.
#[derive(Default)]
pub struct ShutdownCoordinator {
    root: CancellationToken,
    tasks: TaskTracker,
}

impl ShutdownCoordinator {
    /// Create a coordinator with no tracked tasks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Root token; connection tokens are its children.
    pub fn token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Tracker for sessions and forward tasks.
    pub fn tasks(&self) -> TaskTracker {
        self.tasks.clone()
    }

    /// Cancel every connection and close the task tracker.
    ///
    /// Idempotent.
    pub fn begin(&self) {
        self.root.cancel();
        let _ = self.tasks.close();
    }

    /// Whether [`begin`](Self::begin) has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Begin shutdown, then wait up to `grace` for the listener and every
    /// tracked session to finish.
    pub async fn drain(&self, listener: JoinHandle<()>, grace: Duration) -> Drain {
        self.begin();
        info!(
            live_tasks = self.tasks.len(),
            grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
            "draining sessions"
        );

        let settled = async {
            if let Err(e) = listener.await {
                warn!(error = %e, "listener task failed");
            }
            self.tasks.wait().await;
        };

        if tokio::time::timeout(grace, settled).await.is_ok() {
            info!("drain complete");
            Drain::Complete
        } else {
            let remaining = self.tasks.len();
            warn!(remaining, "grace period elapsed with tasks still running");
            Drain::Abandoned { remaining }
        }
    }
}
