//! Parsing of human-readable window durations such as `"1 m"` or `"30s"`.

use std::time::Duration;
use tracing::warn;

/// Window used whenever a duration string cannot be parsed.
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(60_000);

/// Unit suffix of a window string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowUnit {
    /// `s`
    Second,
    /// `m`
    Minute,
    /// `h`
    Hour,
    /// `d`
    Day,
}

impl WindowUnit {
    /// Get the duration of one unit.
    pub fn duration(&self) -> Duration {
        match self {
            WindowUnit::Second => Duration::from_secs(1),
            WindowUnit::Minute => Duration::from_secs(60),
            WindowUnit::Hour => Duration::from_secs(3600),
            WindowUnit::Day => Duration::from_secs(86400),
        }
    }

    /// Convert from the single-letter suffix.
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "s" => Some(WindowUnit::Second),
            "m" => Some(WindowUnit::Minute),
            "h" => Some(WindowUnit::Hour),
            "d" => Some(WindowUnit::Day),
            _ => None,
        }
    }
}

/// Parse `<integer><optional space><unit>` into a duration.
///
/// Never fails: malformed input (unknown unit, missing or zero amount,
/// overflow) yields [`DEFAULT_WINDOW`] so a bad config line cannot block
/// request handling.
pub fn parse_window(spec: &str) -> Duration {
    match try_parse_window(spec) {
        Some(window) => window,
        None => {
            warn!(window = %spec, "Malformed window, using default of 60s");
            DEFAULT_WINDOW
        }
    }
}

fn try_parse_window(spec: &str) -> Option<Duration> {
    let spec = spec.trim();
    let split = spec.find(|c: char| !c.is_ascii_digit())?;
    let (amount, rest) = spec.split_at(split);

    let unit = rest.strip_prefix(' ').unwrap_or(rest);
    let unit = WindowUnit::from_suffix(unit)?;

    let amount: u32 = amount.parse().ok()?;
    if amount == 0 {
        return None;
    }

    unit.duration().checked_mul(amount)
}
