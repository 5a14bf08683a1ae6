//! Tracing/logging bootstrap for the replay tool.

use std::{env, io};

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,utd_replay=debug,utd_runtime=info";

/// Initialize global tracing subscriber with severity gating from environment.
///
/// Logs go to stderr so stdout only carries reports.
///
/// Precedence:
/// 1) `RUST_LOG`
/// 2) `UTD_REPLAY_LOG`
/// 3) `UTD_LOG`
/// 4) internal default filter
pub fn init() {
    let env_filter = filter_from_env();
    let _ = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_target(true)
        .with_env_filter(env_filter)
        .try_init();
}

fn filter_from_env() -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    for key in ["UTD_REPLAY_LOG", "UTD_LOG"] {
        if let Some(value) = env::var(key).ok().filter(|v| !v.trim().is_empty())
            && let Ok(filter) = EnvFilter::try_new(value)
        {
            return filter;
        }
    }

    EnvFilter::new(DEFAULT_FILTER)
}
