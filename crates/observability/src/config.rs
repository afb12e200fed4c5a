//! Observability configuration.

use serde::{Deserialize, Serialize};

/// Environment variable selecting the log format (`json` or `plain`).
pub const LOG_FORMAT_ENV: &str = "HRGATE_LOG_FORMAT";

const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Json,
    Plain,
}

impl LogFormat {
    /// Unknown values fall back to JSON.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "plain" | "text" | "pretty" => LogFormat::Plain,
            _ => LogFormat::Json,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// `EnvFilter` directive, e.g. `info,hrgate::audit=warn`.
    pub filter: String,
    pub format: LogFormat,
    /// Include the event target (e.g. `hrgate::audit`) in output.
    pub with_target: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            format: LogFormat::default(),
            with_target: true,
        }
    }
}

impl ObservabilityConfig {
    /// Read `RUST_LOG` and [`LOG_FORMAT_ENV`], falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            filter: lookup("RUST_LOG")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.filter),
            format: lookup(LOG_FORMAT_ENV)
                .map(|v| LogFormat::parse(&v))
                .unwrap_or(defaults.format),
            with_target: defaults.with_target,
        }
    }
}
