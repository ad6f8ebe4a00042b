//! Limit types and their quotas.
//!
//! Each [`LimitType`] maps to one immutable [`LimitRule`]. The table is built
//! once at startup, either from the built-in defaults or from a YAML override,
//! and is read-only afterwards.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use super::window::parse_window;
use crate::error::{Result, TollgateError};

/// The protected operation class a request is counted against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitType {
    Render,
    Carousel,
    Template,
    Booking,
    Upload,
    Airspace,
    #[default]
    Default,
}

impl LimitType {
    /// Every limit type, in table order.
    pub const ALL: [LimitType; 7] = [
        LimitType::Render,
        LimitType::Carousel,
        LimitType::Template,
        LimitType::Booking,
        LimitType::Upload,
        LimitType::Airspace,
        LimitType::Default,
    ];

    /// The lowercase name used in counter keys and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitType::Render => "render",
            LimitType::Carousel => "carousel",
            LimitType::Template => "template",
            LimitType::Booking => "booking",
            LimitType::Upload => "upload",
            LimitType::Airspace => "airspace",
            LimitType::Default => "default",
        }
    }
}

impl fmt::Display for LimitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LimitType {
    type Err = TollgateError;

    fn from_str(s: &str) -> Result<Self> {
        LimitType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| TollgateError::Config(format!("Unknown limit type: {}", s)))
    }
}

/// Quota for one limit type: at most `requests` per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitRule {
    pub requests: u64,
    pub window: Duration,
}

impl LimitRule {
    /// Build a rule from a request count and a window string like `"1 m"`.
    pub fn new(requests: u64, window: &str) -> Self {
        Self {
            requests,
            window: parse_window(window),
        }
    }

    /// Window length in whole milliseconds.
    pub fn window_millis(&self) -> u64 {
        self.window.as_millis() as u64
    }
}

/// A rule as written in a YAML override file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RuleSpec {
    requests: u64,
    window: String,
}

/// The full limit-type to rule mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitTable {
    rules: HashMap<LimitType, LimitRule>,
}

impl Default for LimitTable {
    fn default() -> Self {
        let rules = [
            (LimitType::Render, LimitRule::new(50, "1 m")),
            (LimitType::Carousel, LimitRule::new(20, "1 m")),
            (LimitType::Template, LimitRule::new(100, "1 m")),
            (LimitType::Booking, LimitRule::new(30, "1 m")),
            (LimitType::Upload, LimitRule::new(10, "1 m")),
            (LimitType::Airspace, LimitRule::new(20, "1 m")),
            (LimitType::Default, LimitRule::new(100, "1 m")),
        ];

        Self {
            rules: rules.into_iter().collect(),
        }
    }
}

impl LimitTable {
    /// Look up the rule for a limit type.
    ///
    /// Every variant is always present, so this never misses.
    pub fn get(&self, limit_type: LimitType) -> LimitRule {
        self.rules
            .get(&limit_type)
            .copied()
            .unwrap_or_else(|| LimitRule::new(100, "1 m"))
    }

    /// Replace the rule for one limit type.
    pub fn with_rule(mut self, limit_type: LimitType, rule: LimitRule) -> Result<Self> {
        if rule.requests == 0 {
            return Err(TollgateError::Config(format!(
                "Limit type {} must allow at least one request",
                limit_type
            )));
        }
        self.rules.insert(limit_type, rule);
        Ok(self)
    }

    /// Load overrides from a YAML file on top of the built-in table.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading limit table");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load overrides from a YAML mapping of limit type to `{requests, window}`.
    ///
    /// Limit types not mentioned keep their built-in rule.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let specs: HashMap<String, RuleSpec> = serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(format!("Failed to parse limit table: {}", e)))?;

        specs.into_iter().try_fold(Self::default(), |table, (name, spec)| {
            let limit_type = name.parse::<LimitType>()?;
            table.with_rule(limit_type, LimitRule::new(spec.requests, &spec.window))
        })
    }
}
