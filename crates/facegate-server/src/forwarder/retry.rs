//! Bounded retry with exponential backoff.
//!
//! Retrying never extends a request past its deadline: the whole retry loop
//! runs inside the forwarder's deadline race, so a pending backoff sleep is
//! dropped the moment the deadline fires or the connection goes away.

use std::time::Duration;

use facegate_core::RequestKind;
use facegate_settings::RetrySettings;
use serde_json::Value;
use tracing::{debug, warn};

use super::backend::{BackendError, InferenceBackend};
use crate::metrics::BACKEND_RETRIES_TOTAL;

/// Retry parameters for backend calls.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. `0` disables retrying.
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    pub base_delay: Duration,
    /// Cap on a single backoff delay.
    pub max_delay: Duration,
    /// Jitter range, 0.0 to 1.0.
    pub jitter_factor: f64,
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_factor: 0.0,
        }
    }

    /// Build from settings.
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            jitter_factor: settings.jitter_factor.clamp(0.0, 1.0),
        }
    }

    /// Backoff before retry number `attempt` (zero-based).
    ///
    /// `min(max_delay, base_delay * 2^attempt) * (1 + (2r - 1) * jitter)`,
    /// with `random` in `[0.0, 1.0)`.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn backoff_delay(&self, attempt: u32, random: f64) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;
        let capped = base_ms.saturating_mul(1u64 << attempt.min(31)).min(max_ms);
        let jitter = 1.0 + (random * 2.0 - 1.0) * self.jitter_factor;
        Duration::from_millis(((capped as f64) * jitter).round().max(0.0) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Call `backend`, retrying retryable failures per `policy`.
pub async fn call_with_retry(
    backend: &dyn InferenceBackend,
    body: &Value,
    policy: &RetryPolicy,
    kind: RequestKind,
) -> Result<Value, BackendError> {
    let mut attempt = 0u32;
    loop {
        match backend.infer(body).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.backoff_delay(attempt, rand::random::<f64>());
                attempt += 1;
                metrics::counter!(BACKEND_RETRIES_TOTAL, "kind" => kind.as_str()).increment(1);
                warn!(
                    %kind,
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "backend call failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                debug!(%kind, attempts = attempt + 1, error = %err, "backend call failed");
                return Err(err);
            }
        }
    }
}
