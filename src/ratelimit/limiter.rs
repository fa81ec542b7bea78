//! Core admission decider.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use super::backend::{Admission, CounterBackend};
use super::window::LimiterSettings;
use crate::error::Result;

/// Per-key fixed-window admission decider.
///
/// Holds only its fixed settings and a shared handle to a counting backend,
/// so it can be cloned or shared across tasks freely. Backend errors are
/// returned unchanged; whether to fail open or closed is up to the caller.
#[derive(Clone)]
pub struct RateLimiter {
    /// Counter storage, possibly shared with other limiters
    backend: Arc<dyn CounterBackend>,
    /// Window and limit, validated at construction
    settings: LimiterSettings,
}

impl RateLimiter {
    /// Create a rate limiter from validated settings.
    pub fn new(backend: Arc<dyn CounterBackend>, settings: LimiterSettings) -> Self {
        Self { backend, settings }
    }

    /// Create a rate limiter admitting `max_requests` per `window`.
    ///
    /// Fails with a configuration error if either value is zero or the
    /// window is too long to track.
    pub fn with_limits(
        backend: Arc<dyn CounterBackend>,
        window: Duration,
        max_requests: u64,
    ) -> Result<Self> {
        Ok(Self::new(backend, LimiterSettings::new(window, max_requests)?))
    }

    /// Decide whether the current request for `key` is admitted.
    pub async fn is_allowed(&self, key: &str) -> Result<bool> {
        Ok(self.check(key).await?.is_allowed())
    }

    /// Decide on the current request for `key`, returning counter details.
    ///
    /// The first request of a window always starts a fresh count. Admitted
    /// requests are counted; rejected ones leave the window untouched.
    pub async fn check(&self, key: &str) -> Result<Admission> {
        trace!(key = %key, "Checking admission");

        let admission = self.backend.try_admit(key, &self.settings).await?;

        match admission {
            Admission::WindowStarted { window } => {
                debug!(key = %key, window = ?window, "Started new window");
            }
            Admission::Counted { count, .. } => {
                trace!(key = %key, count, limit = self.settings.max_requests(), "Request counted");
            }
            Admission::Rejected { count, reset_after } => {
                debug!(
                    key = %key,
                    count,
                    limit = self.settings.max_requests(),
                    reset_after = ?reset_after,
                    "Rate limit exceeded"
                );
            }
        }

        Ok(admission)
    }

    /// The limiter's window and request limit.
    pub fn settings(&self) -> &LimiterSettings {
        &self.settings
    }

    /// The counting backend this limiter writes to.
    pub fn backend(&self) -> &Arc<dyn CounterBackend> {
        &self.backend
    }
}
