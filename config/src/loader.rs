//! # Environment Variable Loader
//!
//! Loads fixture configuration from environment variables.
//!
//! # Naming Convention
//! - `LOCALSTACK_*`: container, port pool, readiness, scope and endpoint
//!   settings
//! - `OB_*`: observability settings
//!
//! Unset variables fall back to defaults. A set but malformed variable is an
//! error rather than a silent default.

use crate::config::{
    ContainerConfig, EndpointConfig, FixtureConfig, ObservabilityConfig, PortPoolConfig,
    ReadinessConfig, ScopeConfig,
};
use std::collections::BTreeMap;
use std::env;

/// Environment loading error.
#[derive(Debug, thiserror::Error)]
pub enum EnvConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: String,
        value: String,
        reason: String
    }
}

/// Load configuration from environment variables.
///
/// # M-CANONICAL-DOCS
///
/// ## Purpose
/// Builds a full [`FixtureConfig`] from the process environment. Values not
/// present in the environment keep their defaults.
///
/// ## Usage
/// ```rust,no_run
/// use config::load_from_env;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = load_from_env()?;
///     println!("region: {}", config.endpoint.region);
///     Ok(())
/// }
/// ```
///
/// ## Environment Variables
/// ### Container
/// - `LOCALSTACK_IMAGE`: Image repository (default: "localstack/localstack")
/// - `LOCALSTACK_TAG`: Image tag (default: "0.10.9")
/// - `LOCALSTACK_NAME_PREFIX`: Container name prefix, empty disables naming
/// - `LOCALSTACK_EXTRA_ENV`: Extra container environment as `K=V,K2=V2`
/// - `LOCALSTACK_STOP_TIMEOUT_SECONDS`: Stop grace period (default: 10)
///
/// ### Port pool
/// - `LOCALSTACK_PORT_RANGE_START` / `LOCALSTACK_PORT_RANGE_END`
///   (default: 41000-41999)
/// - `LOCALSTACK_PORT_COLLISION_RETRIES` (default: 3)
///
/// ### Readiness
/// - `LOCALSTACK_READY_TIMEOUT_SECONDS` (default: 60)
/// - `LOCALSTACK_READY_INTERVAL_MS` (default: 250)
/// - `LOCALSTACK_READY_JITTER_MS` (default: 100)
/// - `LOCALSTACK_CONNECT_TIMEOUT_MS` (default: 1000)
///
/// ### Scope
/// - `LOCALSTACK_DRAIN_GRACE_MS` (default: 500)
///
/// ### Endpoint
/// - `LOCALSTACK_HOST` (default: "127.0.0.1")
/// - `LOCALSTACK_REGION` (default: "us-east-1")
/// - `LOCALSTACK_ACCESS_KEY_ID` / `LOCALSTACK_SECRET_ACCESS_KEY`
/// - `LOCALSTACK_SESSION_TOKEN` (optional)
///
/// ### Observability
/// - `OB_LOGGING_LEVEL` (default: "info")
/// - `OB_METRICS_ENABLED` (default: true)
pub fn load_from_env() -> Result<FixtureConfig, EnvConfigError> {
    Ok(FixtureConfig {
        container: load_container_from_env()?,
        ports: load_ports_from_env()?,
        readiness: load_readiness_from_env()?,
        scope: load_scope_from_env()?,
        endpoint: load_endpoint_from_env(),
        observability: load_observability_from_env()?
    })
}

fn load_container_from_env() -> Result<ContainerConfig, EnvConfigError> {
    let defaults = ContainerConfig::default();
    let name_prefix = match env::var("LOCALSTACK_NAME_PREFIX") {
        Ok(prefix) if prefix.is_empty() => None,
        Ok(prefix) => Some(prefix),
        Err(_) => defaults.name_prefix
    };
    let extra_env = match env::var("LOCALSTACK_EXTRA_ENV") {
        Ok(raw) => parse_env_pairs("LOCALSTACK_EXTRA_ENV", &raw)?,
        Err(_) => BTreeMap::new()
    };

    Ok(ContainerConfig {
        image: env::var("LOCALSTACK_IMAGE").unwrap_or(defaults.image),
        tag: env::var("LOCALSTACK_TAG").unwrap_or(defaults.tag),
        name_prefix,
        extra_env,
        stop_timeout_seconds: parse_env_or(
            "LOCALSTACK_STOP_TIMEOUT_SECONDS",
            defaults.stop_timeout_seconds
        )?
    })
}

fn load_ports_from_env() -> Result<PortPoolConfig, EnvConfigError> {
    let defaults = PortPoolConfig::default();
    Ok(PortPoolConfig {
        range_start: parse_env_or("LOCALSTACK_PORT_RANGE_START", defaults.range_start)?,
        range_end: parse_env_or("LOCALSTACK_PORT_RANGE_END", defaults.range_end)?,
        collision_retries: parse_env_or(
            "LOCALSTACK_PORT_COLLISION_RETRIES",
            defaults.collision_retries
        )?
    })
}

fn load_readiness_from_env() -> Result<ReadinessConfig, EnvConfigError> {
    let defaults = ReadinessConfig::default();
    Ok(ReadinessConfig {
        timeout_seconds: parse_env_or("LOCALSTACK_READY_TIMEOUT_SECONDS", defaults.timeout_seconds)?,
        interval_ms: parse_env_or("LOCALSTACK_READY_INTERVAL_MS", defaults.interval_ms)?,
        jitter_ms: parse_env_or("LOCALSTACK_READY_JITTER_MS", defaults.jitter_ms)?,
        connect_timeout_ms: parse_env_or(
            "LOCALSTACK_CONNECT_TIMEOUT_MS",
            defaults.connect_timeout_ms
        )?
    })
}

fn load_scope_from_env() -> Result<ScopeConfig, EnvConfigError> {
    let defaults = ScopeConfig::default();
    Ok(ScopeConfig {
        drain_grace_ms: parse_env_or("LOCALSTACK_DRAIN_GRACE_MS", defaults.drain_grace_ms)?
    })
}

fn load_endpoint_from_env() -> EndpointConfig {
    let defaults = EndpointConfig::default();
    EndpointConfig {
        host: env::var("LOCALSTACK_HOST").unwrap_or(defaults.host),
        region: env::var("LOCALSTACK_REGION").unwrap_or(defaults.region),
        access_key_id: env::var("LOCALSTACK_ACCESS_KEY_ID").unwrap_or(defaults.access_key_id),
        secret_access_key: env::var("LOCALSTACK_SECRET_ACCESS_KEY")
            .unwrap_or(defaults.secret_access_key),
        session_token: env::var("LOCALSTACK_SESSION_TOKEN").ok()
    }
}

fn load_observability_from_env() -> Result<ObservabilityConfig, EnvConfigError> {
    let defaults = ObservabilityConfig::default();
    Ok(ObservabilityConfig {
        logging_level: env::var("OB_LOGGING_LEVEL").unwrap_or(defaults.logging_level),
        metrics_enabled: parse_env_or("OB_METRICS_ENABLED", defaults.metrics_enabled)?
    })
}

fn parse_env_or<T>(key: &str, default: T) -> Result<T, EnvConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|e| EnvConfigError::Invalid {
            key: key.to_string(),
            value: raw.clone(),
            reason: e.to_string()
        }),
        Err(_) => Ok(default)
    }
}

fn parse_env_pairs(key: &str, raw: &str) -> Result<BTreeMap<String, String>, EnvConfigError> {
    let mut pairs = BTreeMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (name, value) = entry.split_once('=').ok_or_else(|| EnvConfigError::Invalid {
            key: key.to_string(),
            value: raw.to_string(),
            reason: format!("entry {entry:?} is not NAME=VALUE")
        })?;
        pairs.insert(name.trim().to_string(), value.trim().to_string());
    }
    Ok(pairs)
}
