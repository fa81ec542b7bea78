//! In-process counting backend.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::{Result, TurnstileError};

use super::backend::{Admission, ClientState, CounterBackend};
use super::window::{LimiterSettings, WindowDecision};

/// Counter record for one key.
#[derive(Debug, Clone)]
struct ClientRecord {
    key: String,
    count: u64,
    window_expires_at: Instant,
}

impl ClientRecord {
    fn new(key: &str, window: Duration, now: Instant) -> Result<Self> {
        let window_expires_at = now.checked_add(window).ok_or_else(|| {
            TurnstileError::Config(format!("window {window:?} overflows the clock"))
        })?;

        Ok(Self {
            key: key.to_string(),
            count: 1,
            window_expires_at,
        })
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.window_expires_at
    }

    fn state(&self) -> ClientState {
        ClientState {
            count: self.count,
            window_expires_at: Some(self.window_expires_at),
        }
    }
}

/// Counting backend that keeps every record in process memory.
///
/// A single mutex guards the whole keyspace and every operation, reads
/// included, holds it for its full duration. Calls for unrelated keys
/// therefore serialize briefly; that is the scalability ceiling of this
/// backend. State is not shared across processes.
///
/// Expired records stay in the map until they are overwritten by a new
/// window or removed by [`LocalBackend::purge_expired`].
#[derive(Debug, Default)]
pub struct LocalBackend {
    records: Mutex<HashMap<String, ClientRecord>>,
}

impl LocalBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, expired ones included.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether no records are stored.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Drop every record whose window has ended. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut records = self.records.lock();
        let before = records.len();

        records.retain(|_, record| {
            let keep = !record.is_expired(now);
            if !keep {
                trace!(key = %record.key, count = record.count, "Purging expired window");
            }
            keep
        });

        before - records.len()
    }

    /// Run [`LocalBackend::purge_expired`] every `interval` on the tokio runtime.
    ///
    /// The task holds only a weak reference and exits once the backend is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let backend: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(live) = backend.upgrade() else {
                    break;
                };
                let purged = live.purge_expired();
                if purged > 0 {
                    debug!(purged, "Swept expired windows");
                }
            }
        })
    }

    fn live_state(
        records: &HashMap<String, ClientRecord>,
        key: &str,
        now: Instant,
    ) -> Option<ClientState> {
        records
            .get(key)
            .filter(|record| !record.is_expired(now))
            .map(ClientRecord::state)
    }

    fn start_window(
        records: &mut HashMap<String, ClientRecord>,
        key: &str,
        settings: &LimiterSettings,
        now: Instant,
    ) -> Result<Admission> {
        let record = ClientRecord::new(key, settings.window(), now)?;
        records.insert(key.to_string(), record);
        Ok(Admission::WindowStarted {
            window: settings.window(),
        })
    }
}

#[async_trait]
impl CounterBackend for LocalBackend {
    async fn init_client_data(&self, key: &str, window: Duration) -> Result<()> {
        let record = ClientRecord::new(key, window, Instant::now())?;
        self.records.lock().insert(key.to_string(), record);
        Ok(())
    }

    async fn increment(&self, key: &str) -> Result<()> {
        let now = Instant::now();
        if let Some(record) = self
            .records
            .lock()
            .get_mut(key)
            .filter(|record| !record.is_expired(now))
        {
            record.count += 1;
        }
        Ok(())
    }

    async fn get_client_state(&self, key: &str) -> Result<Option<ClientState>> {
        let records = self.records.lock();
        Ok(Self::live_state(&records, key, Instant::now()))
    }

    async fn try_admit(&self, key: &str, settings: &LimiterSettings) -> Result<Admission> {
        let mut records = self.records.lock();
        let now = Instant::now();
        let state = Self::live_state(&records, key, now);

        let admission = match settings.decide(state.as_ref()) {
            WindowDecision::StartWindow => Self::start_window(&mut records, key, settings, now)?,
            WindowDecision::Increment => match records.get_mut(key) {
                Some(record) => {
                    record.count += 1;
                    Admission::Counted {
                        count: record.count,
                        reset_after: record.state().time_until_reset(now),
                    }
                }
                None => Self::start_window(&mut records, key, settings, now)?,
            },
            WindowDecision::Reject => Admission::Rejected {
                count: state.map_or(settings.max_requests(), |state| state.count),
                reset_after: state.and_then(|state| state.time_until_reset(now)),
            },
        };

        Ok(admission)
    }
}
