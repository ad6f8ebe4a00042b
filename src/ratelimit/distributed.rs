//! Sliding-window rate limiting over a shared Redis backend.
//!
//! Every node talks to the same Redis, so a caller's quota is enforced across
//! the whole fleet. The window is approximated from two fixed sub-windows: the
//! previous sub-window's count is weighted by how much of it still overlaps the
//! sliding window, then added to the current sub-window's count. No per-request
//! timestamps are stored.
//!
//! Errors are never swallowed here. Deciding what to do when Redis is down is
//! the job of [`Fallback`](super::Fallback).

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::{IntoConnectionInfo, Script};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, trace};

use super::counter::{Counter, RateLimitResult};
use super::rules::{LimitRule, LimitTable, LimitType};
use crate::clock::{Clock, SystemClock};
use crate::config::RedisConfig;
use crate::error::{Result, TollgateError};

/// Weighted two-window check-and-increment.
///
/// KEYS: current sub-window, previous sub-window.
/// ARGV: limit, now (ms), window (ms).
/// Returns the remaining quota after this request, or -1 when rejected.
const SLIDING_WINDOW_SCRIPT: &str = r#"
local current_key = KEYS[1]
local previous_key = KEYS[2]
local limit = tonumber(ARGV[1])
local now = tonumber(ARGV[2])
local window = tonumber(ARGV[3])

local current = tonumber(redis.call("GET", current_key) or "0")
local previous = tonumber(redis.call("GET", previous_key) or "0")
local overlap = 1 - ((now % window) / window)
local weighted = math.floor(overlap * previous)

if weighted + current >= limit then
  return -1
end

current = redis.call("INCR", current_key)
if current == 1 then
  redis.call("PEXPIRE", current_key, window * 2 + 1000)
end

return limit - (current + weighted)
"#;

/// Process-wide handle to the shared backend.
///
/// The connection is opened on first use and reused afterwards; a failed
/// attempt leaves it unopened so the next call tries again.
pub struct RedisBackend {
    client: redis::Client,
    connection: OnceCell<ConnectionManager>,
    timeout: Duration,
    key_prefix: String,
}

impl RedisBackend {
    /// Build a backend handle. Does not connect.
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let mut info = config.url.as_str().into_connection_info()?;
        if !config.token.is_empty() {
            info.redis.password = Some(config.token.clone());
        }

        Ok(Self {
            client: redis::Client::open(info)?,
            connection: OnceCell::new(),
            timeout: config.timeout(),
            key_prefix: config.key_prefix.clone(),
        })
    }

    /// The per-call deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        let connection = self
            .connection
            .get_or_try_init(|| async {
                let connection = ConnectionManager::new(self.client.clone()).await?;
                info!("Connected to shared rate limit backend");
                Ok::<_, TollgateError>(connection)
            })
            .await?;
        Ok(connection.clone())
    }

    fn counter_key(&self, limit_type: LimitType, identifier: &str, window_index: u64) -> String {
        format!("{}:{}:{}:{}", self.key_prefix, limit_type, identifier, window_index)
    }
}

/// Sliding-window limiter for a single limit type.
///
/// Holds no counting state of its own; everything lives in Redis.
pub struct SlidingWindow {
    backend: Arc<RedisBackend>,
    limit_type: LimitType,
    rule: LimitRule,
    script: Script,
}

impl SlidingWindow {
    /// Create the limiter for one limit type.
    pub fn new(backend: Arc<RedisBackend>, limit_type: LimitType, rule: LimitRule) -> Self {
        Self {
            backend,
            limit_type,
            rule,
            script: Script::new(SLIDING_WINDOW_SCRIPT),
        }
    }

    /// Count one request at `now_millis` and decide it.
    pub async fn take(&self, identifier: &str, now_millis: u64) -> Result<RateLimitResult> {
        let window = self.rule.window_millis().max(1);
        let current_window = now_millis / window;

        let current_key = self
            .backend
            .counter_key(self.limit_type, identifier, current_window);
        let previous_key = self.backend.counter_key(
            self.limit_type,
            identifier,
            current_window.saturating_sub(1),
        );

        let mut connection = self.backend.connection().await?;
        let mut invocation = self.script.prepare_invoke();
        invocation
            .key(&current_key)
            .key(&previous_key)
            .arg(self.rule.requests)
            .arg(now_millis)
            .arg(window);
        let reply: i64 = invocation.invoke_async(&mut connection).await?;

        let remaining = decode_reply(reply, self.rule.requests)?;

        if remaining.is_none() {
            debug!(
                limit_type = %self.limit_type,
                identifier = %identifier,
                "Distributed rate limit exceeded"
            );
        }

        Ok(RateLimitResult::new(
            remaining.is_some(),
            self.rule.requests,
            remaining.unwrap_or(0),
            (current_window + 1) * window,
            true,
        ))
    }
}

/// Map the script's reply to the remaining quota, `None` when rejected.
fn decode_reply(reply: i64, limit: u64) -> Result<Option<u64>> {
    match reply {
        -1 => Ok(None),
        n if n >= 0 => Ok(Some((n as u64).min(limit))),
        n => Err(TollgateError::BackendProtocol(format!(
            "sliding window script returned {}",
            n
        ))),
    }
}

/// Distributed limiter across all limit types.
///
/// Per limit type [`SlidingWindow`]s are built on first use and cached; all of
/// them share one [`RedisBackend`].
pub struct DistributedLimiter {
    backend: Arc<RedisBackend>,
    limits: Arc<LimitTable>,
    clock: Arc<dyn Clock>,
    windows: DashMap<LimitType, Arc<SlidingWindow>>,
}

impl DistributedLimiter {
    /// Create a distributed limiter using the system clock.
    pub fn new(config: &RedisConfig, limits: Arc<LimitTable>) -> Result<Self> {
        Self::with_clock(config, limits, Arc::new(SystemClock))
    }

    /// Create a distributed limiter reading time from `clock`.
    pub fn with_clock(
        config: &RedisConfig,
        limits: Arc<LimitTable>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        Ok(Self {
            backend: Arc::new(RedisBackend::new(config)?),
            limits,
            clock,
            windows: DashMap::new(),
        })
    }

    /// Get or build the limiter for a limit type.
    fn window(&self, limit_type: LimitType) -> Arc<SlidingWindow> {
        self.windows
            .entry(limit_type)
            .or_insert_with(|| {
                let rule = self.limits.get(limit_type);
                debug!(
                    limit_type = %limit_type,
                    requests = rule.requests,
                    window = ?rule.window,
                    "Creating sliding window limiter"
                );
                Arc::new(SlidingWindow::new(
                    Arc::clone(&self.backend),
                    limit_type,
                    rule,
                ))
            })
            .value()
            .clone()
    }

    /// Number of limit types that have been used so far.
    pub fn window_count(&self) -> usize {
        self.windows.len()
    }
}

#[async_trait]
impl Counter for DistributedLimiter {
    async fn take(&self, limit_type: LimitType, identifier: &str) -> Result<RateLimitResult> {
        let window = self.window(limit_type);
        let now = self.clock.now_millis();
        let timeout = self.backend.timeout();

        trace!(
            limit_type = %limit_type,
            identifier = %identifier,
            "Checking distributed rate limit"
        );

        tokio::time::timeout(timeout, window.take(identifier, now))
            .await
            .map_err(|_| TollgateError::BackendTimeout(timeout))?
    }
}
