//! Redis counting backend.
//!
//! Each key maps to a single Redis string holding the request count. The
//! window is the key's millisecond TTL, so Redis removes the record when the
//! window ends and no timestamp is stored alongside the count.

use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisResult, Script};
use tracing::{info, trace};

use crate::config::RedisBackendConfig;
use crate::error::{Result, TurnstileError};

use super::backend::{Admission, ClientState, CounterBackend};
use super::window::{LimiterSettings, MAX_WINDOW_MS};

/// Read-decide-write for one key, executed atomically by Redis.
///
/// Returns `{status, count, pttl_ms}`. A present key without a TTL would
/// never reset, so it is treated as a stale window and restarted.
const TRY_ADMIT_SCRIPT: &str = r#"
local key = KEYS[1]
local window_ms = tonumber(ARGV[1])
local max_requests = tonumber(ARGV[2])

local count = tonumber(redis.call("GET", key))
local ttl = redis.call("PTTL", key)

if count == nil or ttl < 0 then
    redis.call("SET", key, 1, "PX", window_ms)
    return {"started", 1, window_ms}
end

if count < max_requests then
    count = redis.call("INCR", key)
    return {"counted", count, ttl}
end

return {"rejected", count, ttl}
"#;

/// INCR that never creates a key, so no TTL-less record can appear.
const INCREMENT_EXISTING_SCRIPT: &str = r#"
if redis.call("EXISTS", KEYS[1]) == 1 then
    return redis.call("INCR", KEYS[1])
end
return 0
"#;

/// Counting backend that stores counters in Redis with native expiry.
///
/// Every call is bounded by the configured timeout. Connection loss and
/// timeouts are returned to the caller, never turned into a decision.
#[derive(Clone)]
pub struct RedisBackend {
    connection_manager: ConnectionManager,
    prefix: String,
    timeout: Duration,
    try_admit_script: Script,
    increment_script: Script,
}

impl RedisBackend {
    /// Connect using the URL, prefix and timeout from configuration.
    pub async fn connect(config: &RedisBackendConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| TurnstileError::Config(format!("invalid Redis URL: {e}")))?;
        let timeout = config.timeout();

        let connection_manager = tokio::time::timeout(timeout, client.get_connection_manager())
            .await
            .map_err(|_| TurnstileError::Timeout {
                operation: "connect",
                after: timeout,
            })??;

        info!(
            prefix = %config.prefix,
            timeout_ms = config.timeout_ms,
            "Connected to Redis counting backend"
        );

        Ok(Self::new(connection_manager, config.prefix.clone(), timeout))
    }

    /// Wrap an existing connection manager.
    pub fn new(
        connection_manager: ConnectionManager,
        prefix: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            connection_manager,
            prefix: prefix.into(),
            timeout,
            try_admit_script: Script::new(TRY_ADMIT_SCRIPT),
            increment_script: Script::new(INCREMENT_EXISTING_SCRIPT),
        }
    }

    /// Redis key holding the counter for `key`.
    pub fn key_for(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        with_deadline(operation, self.timeout, fut).await
    }
}

async fn with_deadline<T, F>(operation: &'static str, after: Duration, fut: F) -> Result<T>
where
    F: Future<Output = RedisResult<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(TurnstileError::Timeout { operation, after }),
    }
}

fn window_millis(window: Duration) -> Result<u64> {
    u64::try_from(window.as_millis())
        .ok()
        .filter(|ms| (1..=MAX_WINDOW_MS).contains(ms))
        .ok_or_else(|| {
            TurnstileError::Config(format!("window {window:?} cannot be expressed as a Redis TTL"))
        })
}

fn ttl_to_duration(pttl_ms: i64) -> Option<Duration> {
    u64::try_from(pttl_ms).ok().map(Duration::from_millis)
}

#[async_trait]
impl CounterBackend for RedisBackend {
    async fn init_client_data(&self, key: &str, window: Duration) -> Result<()> {
        let window_ms = window_millis(window)?;
        let redis_key = self.key_for(key);
        let mut conn = self.connection_manager.clone();

        self.bounded(
            "init_client_data",
            conn.pset_ex::<_, _, ()>(redis_key, 1u64, window_ms),
        )
        .await
    }

    async fn increment(&self, key: &str) -> Result<()> {
        let mut conn = self.connection_manager.clone();
        let invocation = self.increment_script.key(self.key_for(key));

        let _count: u64 = self
            .bounded("increment", invocation.invoke_async(&mut conn))
            .await?;
        Ok(())
    }

    async fn get_client_state(&self, key: &str) -> Result<Option<ClientState>> {
        let redis_key = self.key_for(key);
        let mut conn = self.connection_manager.clone();
        let mut pipeline = redis::pipe();
        pipeline.atomic().get(&redis_key).pttl(&redis_key);

        let (count, pttl_ms): (Option<u64>, i64) = self
            .bounded("get_client_state", pipeline.query_async(&mut conn))
            .await?;
        let now = Instant::now();

        Ok(count.map(|count| ClientState {
            count,
            window_expires_at: ttl_to_duration(pttl_ms).map(|ttl| now + ttl),
        }))
    }

    async fn try_admit(&self, key: &str, settings: &LimiterSettings) -> Result<Admission> {
        let window_ms = window_millis(settings.window())?;
        let mut conn = self.connection_manager.clone();
        let mut invocation = self.try_admit_script.key(self.key_for(key));
        invocation.arg(window_ms).arg(settings.max_requests());

        let (status, count, pttl_ms): (String, u64, i64) = self
            .bounded("try_admit", invocation.invoke_async(&mut conn))
            .await?;

        trace!(key = %key, status = %status, count, pttl_ms, "Redis admission reply");

        match status.as_str() {
            "started" => Ok(Admission::WindowStarted {
                window: settings.window(),
            }),
            "counted" => Ok(Admission::Counted {
                count,
                reset_after: ttl_to_duration(pttl_ms),
            }),
            "rejected" => Ok(Admission::Rejected {
                count,
                reset_after: ttl_to_duration(pttl_ms),
            }),
            other => Err(TurnstileError::Protocol(format!(
                "unknown admission status `{other}`"
            ))),
        }
    }
}
