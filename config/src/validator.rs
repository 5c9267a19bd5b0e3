//! # Configuration Validation
//!
//! Provides validation for the fixture configuration using the `validator`
//! crate.

use crate::config::FixtureConfig;
use validator::Validate;

/// Validate a fixture configuration.
///
/// ## Validation Rules
/// ### Container
/// - `image`: 1-255 characters, `tag`: 1-128 characters
/// - `stop_timeout_seconds`: 1-300
///
/// ### Ports
/// - `range_start`, `range_end`: unprivileged (>= 1024), start <= end
/// - `collision_retries`: 0-20
///
/// ### Readiness
/// - `timeout_seconds`: 1-1800
/// - `interval_ms`, `connect_timeout_ms`: 10-60000
///
/// ### Observability
/// - `logging_level`: must be "trace", "debug", "info", "warn", or "error"
pub fn validate(config: &FixtureConfig) -> Result<(), validator::ValidationErrors> {
    config.validate()
}
