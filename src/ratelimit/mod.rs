//! Rate limiting logic and state management.

mod counter;
mod distributed;
mod fallback;
mod identifier;
mod limiter;
mod local;
mod rules;
mod window;

pub use counter::{Counter, RateLimitResult};
pub use distributed::{DistributedLimiter, RedisBackend, SlidingWindow};
pub use fallback::Fallback;
pub use identifier::{get_identifier, API_KEY_HEADER, FORWARDED_FOR_HEADER, UNKNOWN_IDENTIFIER};
pub use limiter::RateLimiter;
pub use local::LocalCounterStore;
pub use rules::{LimitRule, LimitTable, LimitType};
pub use window::{parse_window, WindowUnit, DEFAULT_WINDOW};
