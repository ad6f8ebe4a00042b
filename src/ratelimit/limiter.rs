//! The rate limit decision entry point.

use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

use super::counter::{Counter, RateLimitResult};
use super::distributed::DistributedLimiter;
use super::fallback::Fallback;
use super::local::LocalCounterStore;
use super::rules::{LimitTable, LimitType};
use crate::clock::{Clock, SystemClock};
use crate::config::TollgateConfig;

/// The rate limiter handed to request handlers.
///
/// Owns its local counter map and, when a shared backend is configured, its
/// distributed limiter. Construct one per process and share it behind an `Arc`.
pub struct RateLimiter {
    limits: Arc<LimitTable>,
    local: Arc<LocalCounterStore>,
    counter: Box<dyn Counter>,
    clock: Arc<dyn Clock>,
    distributed: bool,
}

impl RateLimiter {
    /// Create a rate limiter using the system clock.
    pub fn new(config: TollgateConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a rate limiter reading time from `clock`.
    ///
    /// A backend config that cannot even be turned into a client is logged
    /// and treated like no backend at all.
    pub fn with_clock(config: TollgateConfig, clock: Arc<dyn Clock>) -> Self {
        let limits = Arc::new(config.limits);
        let local = Arc::new(LocalCounterStore::with_clock(
            Arc::clone(&limits),
            Arc::clone(&clock),
        ));

        let distributed = config.redis.and_then(|redis| {
            DistributedLimiter::with_clock(&redis, Arc::clone(&limits), Arc::clone(&clock))
                .map_err(|e| warn!(error = %e, "Invalid shared backend config, counting locally"))
                .ok()
        });

        let (counter, distributed): (Box<dyn Counter>, bool) = match distributed {
            Some(distributed) => {
                info!("Rate limiter using shared backend with local fallback");
                (Box::new(Fallback::new(distributed, Arc::clone(&local))), true)
            }
            None => {
                debug!("Rate limiter using local counters only");
                (Box::new(Arc::clone(&local)), false)
            }
        };

        Self {
            limits,
            local,
            counter,
            clock,
            distributed,
        }
    }

    /// Count one request for `identifier` under `limit_type` and decide it.
    ///
    /// Always returns a decision. Backend trouble degrades to local counting
    /// for this call only.
    pub async fn check_rate_limit(
        &self,
        identifier: &str,
        limit_type: LimitType,
    ) -> RateLimitResult {
        let result = match self.counter.take(limit_type, identifier).await {
            Ok(result) => result,
            Err(e) => {
                error!(
                    limit_type = %limit_type,
                    error = %e,
                    "Rate limit check failed, using local counter"
                );
                self.local.take_sync(limit_type, identifier)
            }
        };

        trace!(
            limit_type = %limit_type,
            identifier = %identifier,
            success = result.success,
            remaining = result.remaining,
            distributed = result.is_distributed,
            "Rate limit decision made"
        );

        result
    }

    /// Whether a shared backend is configured.
    pub fn is_distributed(&self) -> bool {
        self.distributed
    }

    /// The quota table in effect.
    pub fn limits(&self) -> &LimitTable {
        &self.limits
    }

    /// Current time according to this limiter's clock, in unix milliseconds.
    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(TollgateConfig::default())
    }
}
