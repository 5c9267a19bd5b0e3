//! # Configuration Precedence
//!
//! Merges configuration from multiple sources with precedence rules.
//!
//! # Precedence Order
//! 1. Environment variables (highest priority)
//! 2. Configuration file
//! 3. Default values (lowest priority)
//!
//! A source only overrides a field when it carries a non-default value, so a
//! file setting survives an environment that leaves the variable unset.

use crate::config::{
    ContainerConfig, EndpointConfig, FixtureConfig, ObservabilityConfig, PortPoolConfig,
    ReadinessConfig, ScopeConfig,
};
use std::fmt::Debug;

/// Merge configuration sources, later layers winning field by field.
///
/// ```rust,no_run
/// use config::{FixtureConfig, load_from_env, load_from_file, merge_configs};
/// use std::path::Path;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = merge_configs(
///         FixtureConfig::default(),
///         load_from_file(Path::new("localstack.toml"))?,
///         "file",
///         load_from_env()?,
///         "env",
///     );
///     println!("{}", config.container.image_ref());
///     Ok(())
/// }
/// ```
pub fn merge_configs(
    defaults: FixtureConfig,
    file_config: FixtureConfig,
    file_source_name: &str,
    env_config: FixtureConfig,
    env_source_name: &str,
) -> FixtureConfig {
    let config = merge_with_logging(defaults, &file_config, file_source_name);
    merge_with_logging(config, &env_config, env_source_name)
}

fn merge_with_logging(
    mut base: FixtureConfig,
    override_config: &FixtureConfig,
    source_name: &str,
) -> FixtureConfig {
    let mut changes = Vec::new();

    merge_container(&mut base.container, &override_config.container, &mut changes);
    merge_ports(&mut base.ports, &override_config.ports, &mut changes);
    merge_readiness(&mut base.readiness, &override_config.readiness, &mut changes);
    merge_scope(&mut base.scope, &override_config.scope, &mut changes);
    merge_endpoint(&mut base.endpoint, &override_config.endpoint, &mut changes);
    merge_observability(
        &mut base.observability,
        &override_config.observability,
        &mut changes,
    );

    if !changes.is_empty() {
        tracing::info!("Configuration from {}: {:?}", source_name, changes);
    }

    base
}

fn merge_field<T>(base: &mut T, over: &T, default: &T, path: &str, changes: &mut Vec<String>)
where
    T: PartialEq + Clone + Debug,
{
    if over != default && over != base {
        changes.push(format!("{path} = {over:?}"));
        *base = over.clone();
    }
}

fn merge_secret(base: &mut String, over: &String, default: &String, path: &str, changes: &mut Vec<String>) {
    if over != default && over != base {
        changes.push(format!("{path} = ***"));
        base.clone_from(over);
    }
}

fn merge_container(base: &mut ContainerConfig, over: &ContainerConfig, changes: &mut Vec<String>) {
    let d = ContainerConfig::default();
    merge_field(&mut base.image, &over.image, &d.image, "container.image", changes);
    merge_field(&mut base.tag, &over.tag, &d.tag, "container.tag", changes);
    merge_field(
        &mut base.name_prefix,
        &over.name_prefix,
        &d.name_prefix,
        "container.name_prefix",
        changes,
    );
    for (key, value) in &over.extra_env {
        if base.extra_env.get(key) != Some(value) {
            changes.push(format!("container.extra_env.{key} = {value:?}"));
            base.extra_env.insert(key.clone(), value.clone());
        }
    }
    merge_field(
        &mut base.stop_timeout_seconds,
        &over.stop_timeout_seconds,
        &d.stop_timeout_seconds,
        "container.stop_timeout_seconds",
        changes,
    );
}

fn merge_ports(base: &mut PortPoolConfig, over: &PortPoolConfig, changes: &mut Vec<String>) {
    let d = PortPoolConfig::default();
    merge_field(&mut base.range_start, &over.range_start, &d.range_start, "ports.range_start", changes);
    merge_field(&mut base.range_end, &over.range_end, &d.range_end, "ports.range_end", changes);
    merge_field(
        &mut base.collision_retries,
        &over.collision_retries,
        &d.collision_retries,
        "ports.collision_retries",
        changes,
    );
}

fn merge_readiness(base: &mut ReadinessConfig, over: &ReadinessConfig, changes: &mut Vec<String>) {
    let d = ReadinessConfig::default();
    merge_field(
        &mut base.timeout_seconds,
        &over.timeout_seconds,
        &d.timeout_seconds,
        "readiness.timeout_seconds",
        changes,
    );
    merge_field(&mut base.interval_ms, &over.interval_ms, &d.interval_ms, "readiness.interval_ms", changes);
    merge_field(&mut base.jitter_ms, &over.jitter_ms, &d.jitter_ms, "readiness.jitter_ms", changes);
    merge_field(
        &mut base.connect_timeout_ms,
        &over.connect_timeout_ms,
        &d.connect_timeout_ms,
        "readiness.connect_timeout_ms",
        changes,
    );
}

fn merge_scope(base: &mut ScopeConfig, over: &ScopeConfig, changes: &mut Vec<String>) {
    let d = ScopeConfig::default();
    merge_field(
        &mut base.drain_grace_ms,
        &over.drain_grace_ms,
        &d.drain_grace_ms,
        "scope.drain_grace_ms",
        changes,
    );
}

fn merge_endpoint(base: &mut EndpointConfig, over: &EndpointConfig, changes: &mut Vec<String>) {
    let d = EndpointConfig::default();
    merge_field(&mut base.host, &over.host, &d.host, "endpoint.host", changes);
    merge_field(&mut base.region, &over.region, &d.region, "endpoint.region", changes);
    merge_field(
        &mut base.access_key_id,
        &over.access_key_id,
        &d.access_key_id,
        "endpoint.access_key_id",
        changes,
    );
    merge_secret(
        &mut base.secret_access_key,
        &over.secret_access_key,
        &d.secret_access_key,
        "endpoint.secret_access_key",
        changes,
    );
    if over.session_token.is_some() && over.session_token != base.session_token {
        changes.push("endpoint.session_token = ***".to_string());
        base.session_token.clone_from(&over.session_token);
    }
}

fn merge_observability(
    base: &mut ObservabilityConfig,
    over: &ObservabilityConfig,
    changes: &mut Vec<String>,
) {
    let d = ObservabilityConfig::default();
    merge_field(
        &mut base.logging_level,
        &over.logging_level,
        &d.logging_level,
        "observability.logging_level",
        changes,
    );
    merge_field(
        &mut base.metrics_enabled,
        &over.metrics_enabled,
        &d.metrics_enabled,
        "observability.metrics_enabled",
        changes,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_overrides_file() {
        let mut file = FixtureConfig::default();
        file.container.tag = "0.11.0".to_string();
        file.readiness.timeout_seconds = 90;

        let mut env = FixtureConfig::default();
        env.container.tag = "0.11.6".to_string();

        let merged = merge_configs(FixtureConfig::default(), file, "file", env, "env");
        assert_eq!(merged.container.tag, "0.11.6");
        assert_eq!(merged.readiness.timeout_seconds, 90);
    }

    #[test]
    fn test_default_env_keeps_file_values() {
        let mut file = FixtureConfig::default();
        file.endpoint.region = "ap-south-1".to_string();
        file.scope.drain_grace_ms = 0;

        let merged = merge_configs(
            FixtureConfig::default(),
            file,
            "file",
            FixtureConfig::default(),
            "env",
        );
        assert_eq!(merged.endpoint.region, "ap-south-1");
        assert_eq!(merged.scope.drain_grace_ms, 0);
    }

    #[test]
    fn test_extra_env_is_unioned() {
        let mut file = FixtureConfig::default();
        file.container.extra_env.insert("DEBUG".to_string(), "1".to_string());
        let mut env = FixtureConfig::default();
        env.container
            .extra_env
            .insert("LAMBDA_EXECUTOR".to_string(), "local".to_string());

        let merged = merge_configs(FixtureConfig::default(), file, "file", env, "env");
        assert_eq!(merged.container.extra_env.len(), 2);
    }

    #[test]
    fn test_session_token_override() {
        let mut env = FixtureConfig::default();
        env.endpoint.session_token = Some("token".to_string());
        let merged = merge_configs(
            FixtureConfig::default(),
            FixtureConfig::default(),
            "file",
            env,
            "env",
        );
        assert_eq!(merged.endpoint.session_token.as_deref(), Some("token"));
    }
}
