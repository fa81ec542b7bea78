//! Fixed-window limits and the admission policy applied to them.

use std::time::{Duration, Instant};

use crate::config::LimiterConfig;
use crate::error::{Result, TurnstileError};

use super::backend::ClientState;

/// Smallest window the limiter accepts.
///
/// The Redis backend expresses windows as millisecond TTLs.
pub const MIN_WINDOW: Duration = Duration::from_millis(1);

/// Largest window in milliseconds; Redis TTLs are signed 64-bit.
pub const MAX_WINDOW_MS: u64 = i64::MAX as u64;

/// Validated window duration and per-window request limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterSettings {
    window: Duration,
    max_requests: u64,
}

/// What the fixed-window policy wants done with a key's counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WindowDecision {
    /// No live window: start a new one holding this request.
    StartWindow,
    /// Room left in the live window: count this request.
    Increment,
    /// The live window is exhausted. Nothing is written.
    Reject,
}

impl LimiterSettings {
    /// Create settings, rejecting a zero limit or a window outside
    /// [`MIN_WINDOW`] to [`MAX_WINDOW_MS`].
    pub fn new(window: Duration, max_requests: u64) -> Result<Self> {
        if window < MIN_WINDOW {
            return Err(TurnstileError::Config(format!(
                "window must be at least {MIN_WINDOW:?}, got {window:?}"
            )));
        }
        if window.as_millis() > u128::from(MAX_WINDOW_MS)
            || Instant::now().checked_add(window).is_none()
        {
            return Err(TurnstileError::Config(format!(
                "window {window:?} is too long to track"
            )));
        }
        if max_requests == 0 {
            return Err(TurnstileError::Config(
                "max_requests must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            window,
            max_requests,
        })
    }

    /// Length of each window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Requests admitted per window.
    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    /// Apply the fixed-window policy to the live state of a key.
    ///
    /// `state` must already exclude expired windows; backends own expiry.
    pub(crate) fn decide(&self, state: Option<&ClientState>) -> WindowDecision {
        match state {
            None => WindowDecision::StartWindow,
            Some(state) if state.count < self.max_requests => WindowDecision::Increment,
            Some(_) => WindowDecision::Reject,
        }
    }
}

impl TryFrom<&LimiterConfig> for LimiterSettings {
    type Error = TurnstileError;

    fn try_from(config: &LimiterConfig) -> Result<Self> {
        Self::new(Duration::from_millis(config.window_ms), config.max_requests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(count: u64) -> ClientState {
        ClientState {
            count,
            window_expires_at: None,
        }
    }

    #[test]
    fn test_rejects_zero_limit() {
        let err = LimiterSettings::new(Duration::from_secs(1), 0).unwrap_err();
        assert!(matches!(err, TurnstileError::Config(_)));
    }

    #[test]
    fn test_rejects_zero_window() {
        let err = LimiterSettings::new(Duration::ZERO, 5).unwrap_err();
        assert!(matches!(err, TurnstileError::Config(_)));

        assert!(LimiterSettings::new(Duration::from_micros(999), 5).is_err());
        assert!(LimiterSettings::new(MIN_WINDOW, 5).is_ok());
    }

    #[test]
    fn test_rejects_unrepresentable_window() {
        let err = LimiterSettings::new(Duration::MAX, 5).unwrap_err();
        assert!(matches!(err, TurnstileError::Config(_)));

        let past_redis_ttl = Duration::from_millis(MAX_WINDOW_MS) + Duration::from_millis(1);
        assert!(LimiterSettings::new(past_redis_ttl, 5).is_err());

        assert!(LimiterSettings::new(Duration::from_secs(86_400 * 365), 5).is_ok());
    }

    #[test]
    fn test_missing_state_starts_window() {
        let settings = LimiterSettings::new(Duration::from_secs(1), 3).unwrap();
        assert_eq!(settings.decide(None), WindowDecision::StartWindow);
    }

    #[test]
    fn test_boundary_is_strictly_below_limit() {
        let settings = LimiterSettings::new(Duration::from_secs(1), 3).unwrap();

        assert_eq!(settings.decide(Some(&state(1))), WindowDecision::Increment);
        assert_eq!(settings.decide(Some(&state(2))), WindowDecision::Increment);
        assert_eq!(settings.decide(Some(&state(3))), WindowDecision::Reject);
        assert_eq!(settings.decide(Some(&state(4))), WindowDecision::Reject);
    }

    #[test]
    fn test_limit_of_one_rejects_second_request() {
        let settings = LimiterSettings::new(Duration::from_secs(1), 1).unwrap();
        assert_eq!(settings.decide(Some(&state(1))), WindowDecision::Reject);
    }

    #[test]
    fn test_from_limiter_config() {
        let config = LimiterConfig {
            max_requests: 7,
            window_ms: 1500,
        };
        let settings = LimiterSettings::try_from(&config).unwrap();

        assert_eq!(settings.max_requests(), 7);
        assert_eq!(settings.window(), Duration::from_millis(1500));

        let invalid = LimiterConfig {
            max_requests: 7,
            window_ms: 0,
        };
        assert!(LimiterSettings::try_from(&invalid).is_err());
    }
}
