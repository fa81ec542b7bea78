//! Counting backend trait for abstracting local and remote counter storage.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::info;

use crate::config::BackendConfig;
use crate::error::Result;

use super::local::LocalBackend;
use super::redis::RedisBackend;
use super::window::LimiterSettings;

/// Live counter state for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientState {
    /// Requests counted in the current window
    pub count: u64,
    /// When the current window ends, if the backend can tell
    pub window_expires_at: Option<Instant>,
}

impl ClientState {
    /// Time left in the window as seen from `now`.
    pub fn time_until_reset(&self, now: Instant) -> Option<Duration> {
        self.window_expires_at
            .map(|expires_at| expires_at.saturating_duration_since(now))
    }
}

/// Outcome of one atomic admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// No live window existed; a new one was started with this request as #1.
    WindowStarted {
        /// Length of the window just started
        window: Duration,
    },
    /// The request was counted in the live window.
    Counted {
        /// Count after this request
        count: u64,
        /// Time until the window resets, if known
        reset_after: Option<Duration>,
    },
    /// The live window is exhausted; nothing was written.
    Rejected {
        /// Count of the exhausted window
        count: u64,
        /// Time until the window resets, if known
        reset_after: Option<Duration>,
    },
}

impl Admission {
    /// Whether the request is admitted.
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Admission::Rejected { .. })
    }

    /// Requests counted in the window after this decision.
    pub fn count(&self) -> u64 {
        match self {
            Admission::WindowStarted { .. } => 1,
            Admission::Counted { count, .. } | Admission::Rejected { count, .. } => *count,
        }
    }

    /// Best-effort hint for when the window resets.
    pub fn reset_after(&self) -> Option<Duration> {
        match self {
            Admission::WindowStarted { window } => Some(*window),
            Admission::Counted { reset_after, .. } | Admission::Rejected { reset_after, .. } => {
                *reset_after
            }
        }
    }

    /// Requests still admissible in the window.
    pub fn remaining(&self, max_requests: u64) -> u64 {
        max_requests.saturating_sub(self.count())
    }
}

/// Storage for per-key request counters.
///
/// Implementations must be safe to call concurrently, and calls against the
/// same key must be linearizable. The backend is the only authority on window
/// expiry: an expired record is never reported as present.
#[async_trait]
pub trait CounterBackend: Send + Sync {
    /// Replace any record for `key` with a fresh window holding one request.
    async fn init_client_data(&self, key: &str, window: Duration) -> Result<()>;

    /// Add one request to an existing record. A missing key is left untouched.
    async fn increment(&self, key: &str) -> Result<()>;

    /// Read the live record for `key`, or `None` if absent or expired.
    async fn get_client_state(&self, key: &str) -> Result<Option<ClientState>>;

    /// Read, decide and write as one atomic step.
    ///
    /// This is the primitive the limiter uses; composing the three calls
    /// above from the outside lets concurrent callers over-admit.
    async fn try_admit(&self, key: &str, settings: &LimiterSettings) -> Result<Admission>;
}

/// Build the backend selected by configuration.
pub async fn build_backend(config: &BackendConfig) -> Result<Arc<dyn CounterBackend>> {
    match config {
        BackendConfig::Local { sweep_interval_ms } => {
            let backend = Arc::new(LocalBackend::new());
            if let Some(interval_ms) = sweep_interval_ms.filter(|ms| *ms > 0) {
                backend.spawn_sweeper(Duration::from_millis(interval_ms));
            }
            info!(sweep_interval_ms = ?sweep_interval_ms, "Using local counting backend");
            Ok(backend)
        }
        BackendConfig::Redis(redis_config) => {
            let backend = RedisBackend::connect(redis_config).await?;
            Ok(Arc::new(backend))
        }
    }
}
