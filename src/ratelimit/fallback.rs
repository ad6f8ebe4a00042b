//! Primary/secondary counter composition.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use super::counter::{Counter, RateLimitResult};
use super::rules::LimitType;
use crate::error::Result;

/// Counts with `primary`, and with `secondary` whenever the primary reports
/// its backend unavailable.
///
/// The switch is per call: there is no retry and no sticky failover, so the
/// primary is tried again on the very next request. Any other error from the
/// primary is returned as is.
pub struct Fallback<P, S> {
    primary: P,
    secondary: S,
}

impl<P, S> Fallback<P, S> {
    pub fn new(primary: P, secondary: S) -> Self {
        Self { primary, secondary }
    }
}

#[async_trait]
impl<P: Counter, S: Counter> Counter for Fallback<P, S> {
    async fn take(&self, limit_type: LimitType, identifier: &str) -> Result<RateLimitResult> {
        match self.primary.take(limit_type, identifier).await {
            Err(e) if e.is_backend_unavailable() => {
                warn!(
                    limit_type = %limit_type,
                    error = %e,
                    "Shared rate limit backend unavailable, using local counter"
                );
                self.secondary.take(limit_type, identifier).await
            }
            other => other,
        }
    }
}

#[async_trait]
impl<T: Counter + ?Sized> Counter for Arc<T> {
    async fn take(&self, limit_type: LimitType, identifier: &str) -> Result<RateLimitResult> {
        (**self).take(limit_type, identifier).await
    }
}
