//! Tollgate - per-caller request throttling
//!
//! This crate decides whether a caller may invoke a protected operation, using
//! a sliding window shared through Redis across stateless server processes.
//! When Redis is not configured, or fails during a call, it degrades to an
//! in-process fixed window instead of failing the request.

pub mod clock;
pub mod config;
pub mod error;
pub mod ratelimit;
pub mod response;
pub mod telemetry;

pub use crate::config::{RedisConfig, TollgateConfig};
pub use crate::error::{Result, TollgateError};
pub use crate::ratelimit::{get_identifier, LimitType, RateLimitResult, RateLimiter};
