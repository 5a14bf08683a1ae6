//! Environment-backed runtime configuration for `utd-replay`.

use std::{env, error::Error, fmt, path::PathBuf, time::Duration};

use utd_core::{DEFAULT_GRACE_PERIOD_MS, TrackerConfig};
use utd_runtime::{DEFAULT_CHECK_INTERVAL, DEFAULT_TRACK_INTERVAL, TrackerRuntimeConfig};

const STDIN_INPUT: &str = "-";

/// Where timeline events are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayInput {
    Stdin,
    File(PathBuf),
}

/// Runtime configuration used by the replay tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayConfig {
    /// JSON-lines source of timeline events.
    pub input: ReplayInput,
    /// Tracker and timer tuning forwarded to the runtime.
    pub runtime: TrackerRuntimeConfig,
    /// Optional JSON file remembering reported events across runs.
    pub reported_store: Option<PathBuf>,
    /// Whether to report every outstanding failure once input is exhausted.
    pub flush_on_eof: bool,
}

impl ReplayConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let input = match optional_trimmed_env("UTD_REPLAY_INPUT", &mut lookup) {
            None => ReplayInput::Stdin,
            Some(value) if value == STDIN_INPUT => ReplayInput::Stdin,
            Some(value) => ReplayInput::File(PathBuf::from(value)),
        };
        let reported_store =
            optional_trimmed_env("UTD_REPORTED_STORE", &mut lookup).map(PathBuf::from);

        let grace_period_ms =
            parse_u64_with_default("UTD_GRACE_PERIOD_MS", DEFAULT_GRACE_PERIOD_MS, &mut lookup)?;
        let check_interval_ms = parse_u64_with_default(
            "UTD_CHECK_INTERVAL_MS",
            DEFAULT_CHECK_INTERVAL.as_millis() as u64,
            &mut lookup,
        )?;
        let track_interval_ms = parse_u64_with_default(
            "UTD_TRACK_INTERVAL_MS",
            DEFAULT_TRACK_INTERVAL.as_millis() as u64,
            &mut lookup,
        )?;
        let flush_on_eof = parse_bool_with_default("UTD_FLUSH_ON_EOF", true, &mut lookup)?;

        if check_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "UTD_CHECK_INTERVAL_MS",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        if track_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "UTD_TRACK_INTERVAL_MS",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        Ok(Self {
            input,
            runtime: TrackerRuntimeConfig {
                tracker: TrackerConfig { grace_period_ms },
                check_interval: Duration::from_millis(check_interval_ms),
                track_interval: Duration::from_millis(track_interval_ms),
            },
            reported_store,
            flush_on_eof,
        })
    }

    /// How long to let the timers run after EOF when not flushing.
    ///
    /// A failure observed at EOF becomes eligible just after the grace period
    /// and timer ticks are aligned to runtime start, so allow one extra check
    /// pass on top of the worst case.
    pub fn settle_window(&self) -> Duration {
        Duration::from_millis(self.runtime.tracker.grace_period_ms)
            + self.runtime.check_interval * 2
            + self.runtime.track_interval
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_u64_with_default<F>(
    key: &'static str,
    default: u64,
    lookup: &mut F,
) -> Result<u64, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    value
        .parse::<u64>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_bool_with_default<F>(
    key: &'static str,
    default: bool,
    lookup: &mut F,
) -> Result<bool, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value,
            reason: "expected a boolean".to_owned(),
        }),
    }
}
