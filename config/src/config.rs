//! Settings for the emulator container, its ports, readiness polling, scope
//! sharing and the endpoint data handed to clients.
//!
//! Every section deserializes with per-field defaults, so a partial file or
//! an empty one yields a usable configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use validator::Validate;

/// Everything the fixture needs to run an emulated cloud backend.
///
/// ```rust,no_run
/// use config::FixtureConfig;
///
/// let config = FixtureConfig::default();
/// println!("image: {}", config.container.image_ref());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default, PartialEq)]
pub struct FixtureConfig {
    #[serde(default)]
    #[validate(nested)]
    pub container: ContainerConfig,

    #[serde(default)]
    #[validate(nested)]
    pub ports: PortPoolConfig,

    #[serde(default)]
    #[validate(nested)]
    pub readiness: ReadinessConfig,

    #[serde(default)]
    #[validate(nested)]
    pub scope: ScopeConfig,

    #[serde(default)]
    #[validate(nested)]
    pub endpoint: EndpointConfig,

    #[serde(default)]
    #[validate(nested)]
    pub observability: ObservabilityConfig
}

/// Emulator container settings.
///
/// ## Fields
/// - `image`: Image repository (default: "localstack/localstack")
/// - `tag`: Image tag (default: "0.10.9", the last line with one port per
///   service)
/// - `name_prefix`: Prefix for container names, `None` lets the runtime pick
/// - `extra_env`: Additional environment passed to the container
/// - `stop_timeout_seconds`: Grace period before a stop becomes a force
///   removal (default: 10)
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct ContainerConfig {
    #[serde(default = "default_container_image")]
    #[validate(length(min = 1, max = 255))]
    pub image: String,

    #[serde(default = "default_container_tag")]
    #[validate(length(min = 1, max = 128))]
    pub tag: String,

    #[serde(default = "default_container_name_prefix")]
    pub name_prefix: Option<String>,

    #[serde(default)]
    pub extra_env: BTreeMap<String, String>,

    #[serde(default = "default_container_stop_timeout_seconds")]
    #[validate(range(min = 1, max = 300))]
    pub stop_timeout_seconds: u64
}

pub(crate) fn default_container_image() -> String {
    "localstack/localstack".to_string()
}

pub(crate) fn default_container_tag() -> String {
    "0.10.9".to_string()
}

pub(crate) fn default_container_name_prefix() -> Option<String> {
    Some("localstack-fixture".to_string())
}

pub(crate) fn default_container_stop_timeout_seconds() -> u64 {
    10
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            image: default_container_image(),
            tag: default_container_tag(),
            name_prefix: default_container_name_prefix(),
            extra_env: BTreeMap::new(),
            stop_timeout_seconds: default_container_stop_timeout_seconds()
        }
    }
}

impl ContainerConfig {
    /// `image:tag` reference.
    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_seconds)
    }
}

/// Host port pool.
///
/// Service ports are mapped onto ports drawn from `range_start..=range_end`.
/// A candidate rejected by the runtime as already bound is replaced and the
/// start is retried up to `collision_retries` times.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
#[validate(schema(function = "validate_port_range"))]
pub struct PortPoolConfig {
    #[serde(default = "default_ports_range_start")]
    #[validate(range(min = 1024))]
    pub range_start: u16,

    #[serde(default = "default_ports_range_end")]
    #[validate(range(min = 1024))]
    pub range_end: u16,

    #[serde(default = "default_ports_collision_retries")]
    #[validate(range(max = 20))]
    pub collision_retries: u32
}

pub(crate) fn default_ports_range_start() -> u16 {
    41000
}

pub(crate) fn default_ports_range_end() -> u16 {
    41999
}

pub(crate) fn default_ports_collision_retries() -> u32 {
    3
}

fn validate_port_range(value: &PortPoolConfig) -> Result<(), validator::ValidationError> {
    if value.range_start > value.range_end {
        return Err(validator::ValidationError::new("range_start must not exceed range_end"));
    }
    Ok(())
}

impl Default for PortPoolConfig {
    fn default() -> Self {
        Self {
            range_start: default_ports_range_start(),
            range_end: default_ports_range_end(),
            collision_retries: default_ports_collision_retries()
        }
    }
}

/// Readiness polling budget. A round sleeps `interval_ms` plus up to
/// `jitter_ms`; the whole wait gives up after `timeout_seconds` (default 60).
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct ReadinessConfig {
    #[serde(default = "default_readiness_timeout_seconds")]
    #[validate(range(min = 1, max = 1800))]
    pub timeout_seconds: u64,

    #[serde(default = "default_readiness_interval_ms")]
    #[validate(range(min = 10, max = 60000))]
    pub interval_ms: u64,

    #[serde(default = "default_readiness_jitter_ms")]
    #[validate(range(max = 60000))]
    pub jitter_ms: u64,

    #[serde(default = "default_readiness_connect_timeout_ms")]
    #[validate(range(min = 10, max = 60000))]
    pub connect_timeout_ms: u64
}

pub(crate) fn default_readiness_timeout_seconds() -> u64 {
    60
}

pub(crate) fn default_readiness_interval_ms() -> u64 {
    250
}

pub(crate) fn default_readiness_jitter_ms() -> u64 {
    100
}

pub(crate) fn default_readiness_connect_timeout_ms() -> u64 {
    1000
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_readiness_timeout_seconds(),
            interval_ms: default_readiness_interval_ms(),
            jitter_ms: default_readiness_jitter_ms(),
            connect_timeout_ms: default_readiness_connect_timeout_ms()
        }
    }
}

impl ReadinessConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_millis(self.jitter_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Scope sharing settings.
///
/// `drain_grace_ms` is how long an unreferenced scope keeps its container
/// before teardown. Zero tears down as soon as the last holder releases.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct ScopeConfig {
    #[serde(default = "default_scope_drain_grace_ms")]
    #[validate(range(max = 600000))]
    pub drain_grace_ms: u64
}

pub(crate) fn default_scope_drain_grace_ms() -> u64 {
    500
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            drain_grace_ms: default_scope_drain_grace_ms()
        }
    }
}

impl ScopeConfig {
    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }
}

/// Connection parameters handed to clients.
///
/// The credentials are placeholders; the emulator accepts anything.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct EndpointConfig {
    #[serde(default = "default_endpoint_host")]
    #[validate(length(min = 1, max = 255))]
    pub host: String,

    #[serde(default = "default_endpoint_region")]
    #[validate(length(min = 1, max = 64))]
    pub region: String,

    #[serde(default = "default_endpoint_access_key_id")]
    #[validate(length(min = 1))]
    pub access_key_id: String,

    #[serde(default = "default_endpoint_secret_access_key")]
    #[validate(length(min = 1))]
    pub secret_access_key: String,

    #[serde(default)]
    pub session_token: Option<String>
}

pub(crate) fn default_endpoint_host() -> String {
    "127.0.0.1".to_string()
}

pub(crate) fn default_endpoint_region() -> String {
    "us-east-1".to_string()
}

pub(crate) fn default_endpoint_access_key_id() -> String {
    "accesskey".to_string()
}

pub(crate) fn default_endpoint_secret_access_key() -> String {
    "secretkey".to_string()
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: default_endpoint_host(),
            region: default_endpoint_region(),
            access_key_id: default_endpoint_access_key_id(),
            secret_access_key: default_endpoint_secret_access_key(),
            session_token: None
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct ObservabilityConfig {
    #[serde(default = "default_observability_logging_level")]
    #[validate(custom(function = "validate_logging_level"))]
    pub logging_level: String,

    #[serde(default = "default_observability_metrics_enabled")]
    pub metrics_enabled: bool
}

pub(crate) fn default_observability_logging_level() -> String {
    "info".to_string()
}

pub(crate) fn default_observability_metrics_enabled() -> bool {
    true
}

fn validate_logging_level(value: &str) -> Result<(), validator::ValidationError> {
    match value {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(validator::ValidationError::new("Invalid logging level"))
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            logging_level: default_observability_logging_level(),
            metrics_enabled: default_observability_metrics_enabled()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = FixtureConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.container.image_ref(), "localstack/localstack:0.10.9");
        assert_eq!(config.endpoint.region, "us-east-1");
        assert_eq!(config.scope.drain_grace(), Duration::from_millis(500));
    }

    #[test]
    fn test_inverted_port_range_rejected() {
        let mut config = FixtureConfig::default();
        config.ports.range_start = 42000;
        config.ports.range_end = 41000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_privileged_port_range_rejected() {
        let mut config = FixtureConfig::default();
        config.ports.range_start = 80;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_logging_level_rejected() {
        let mut config = FixtureConfig::default();
        config.observability.logging_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: FixtureConfig = toml::from_str(
            r#"
            [readiness]
            timeout_seconds = 30
            "#
        )
        .unwrap();
        assert_eq!(config.readiness.timeout_seconds, 30);
        assert_eq!(config.readiness.interval_ms, 250);
        assert_eq!(config.ports, PortPoolConfig::default());
    }
}
