//! The counter capability shared by the local and distributed limiters.

use async_trait::async_trait;
use serde::Serialize;

use super::rules::LimitType;
use crate::error::Result;

/// Outcome of one rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitResult {
    /// Whether the request may proceed
    pub success: bool,
    /// Requests allowed per window
    pub limit: u64,
    /// Requests left in the current window, always within `0..=limit`
    pub remaining: u64,
    /// When the current window resets, in unix seconds rounded up
    pub reset: u64,
    /// Whether the shared backend made this decision
    pub is_distributed: bool,
    /// When the current window resets, in unix milliseconds
    #[serde(skip)]
    pub reset_millis: u64,
}

impl RateLimitResult {
    /// Build a result whose window closes at `reset_millis`.
    pub fn new(
        success: bool,
        limit: u64,
        remaining: u64,
        reset_millis: u64,
        is_distributed: bool,
    ) -> Self {
        Self {
            success,
            limit,
            remaining: remaining.min(limit),
            reset: reset_millis.div_ceil(1000),
            is_distributed,
            reset_millis,
        }
    }

    /// Seconds a rejected caller should wait before retrying.
    ///
    /// Rounded up from the exact window end, so waiting this long always lands
    /// at or after the reset, and at least one second so a `Retry-After` of
    /// zero is never sent while the window is still closed.
    pub fn retry_after_secs(&self, now_millis: u64) -> u64 {
        let wait_millis = self.reset_millis.saturating_sub(now_millis);
        wait_millis.div_ceil(1000).max(1)
    }
}

/// Something that can count a request against a limit type.
///
/// Implemented by the in-process store, the shared-backend adapter, and the
/// [`Fallback`](super::Fallback) combinator that joins them.
#[async_trait]
pub trait Counter: Send + Sync {
    /// Count one request for `identifier` under `limit_type` and report the decision.
    async fn take(&self, limit_type: LimitType, identifier: &str) -> Result<RateLimitResult>;
}
