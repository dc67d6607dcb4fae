//! Daemon settings read from the environment at startup.
//!
//! - `ACADEMYD_WORKSPACE`: workspace directory opened before the first request.
//! - `ACADEMYD_LOG`: log filter (falls back to `RUST_LOG`, then `warn`).

use std::path::PathBuf;

pub const WORKSPACE_ENV: &str = "ACADEMYD_WORKSPACE";
pub const LOG_ENV: &str = "ACADEMYD_LOG";
const DEFAULT_LOG_FILTER: &str = "warn";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DaemonConfig {
    pub workspace: Option<PathBuf>,
    pub log_filter: String,
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            workspace: non_empty(WORKSPACE_ENV).map(PathBuf::from),
            log_filter: non_empty(LOG_ENV)
                .or_else(|| non_empty("RUST_LOG"))
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
        }
    }
}
