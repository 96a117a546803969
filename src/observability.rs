//! Logging infrastructure for the environment layer.
//!
//! All events go through `tracing` with target "leveldb_env" and carry an
//! `event` field for filtering.
//!
//! ## Library Integration
//!
//! This crate never initializes a global subscriber. Applications configure
//! tracing via `tracing_subscriber` or similar.
//!
//! ## Conventions
//!
//! - `event`: snake_case event name (required)
//! - `component`: subsystem (e.g., "file", "lock", "backup", "background")
//! - Use `%` for Display, `?` for Debug formatting

/// Target for all environment log events.
pub(crate) const ENV_TARGET: &str = "leveldb_env";

/// Macro for info-level log events.
///
/// # Example
/// ```ignore
/// log_info!(
///     component = "backup",
///     event = "table_restored",
///     table = %name,
/// );
/// ```
macro_rules! log_info {
    ($($field:tt)*) => {
        ::tracing::info!(target: $crate::observability::ENV_TARGET, $($field)*)
    };
}

/// Macro for debug-level log events.
macro_rules! log_debug {
    ($($field:tt)*) => {
        ::tracing::debug!(target: $crate::observability::ENV_TARGET, $($field)*)
    };
}

/// Macro for warn-level log events.
macro_rules! log_warn {
    ($($field:tt)*) => {
        ::tracing::warn!(target: $crate::observability::ENV_TARGET, $($field)*)
    };
}

/// Macro for error-level log events.
macro_rules! log_error {
    ($($field:tt)*) => {
        ::tracing::error!(target: $crate::observability::ENV_TARGET, $($field)*)
    };
}

pub(crate) use log_debug;
pub(crate) use log_error;
pub(crate) use log_info;
pub(crate) use log_warn;
