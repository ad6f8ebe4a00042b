//! Tracing setup for hosts that do not install their own subscriber.

use tracing_subscriber::EnvFilter;

use crate::error::{Result, TollgateError};

/// Install a global `fmt` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Fails rather than panicking when a subscriber is already installed.
pub fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| {
        TollgateError::Config(format!("Failed to install tracing subscriber: {}", e))
    })
}
