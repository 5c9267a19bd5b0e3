//! # Fixture Configuration
//!
//! Configuration management for the emulated cloud-stack fixture.
//!
//! This crate provides:
//! - Configuration structures for the container, port pool, readiness
//!   probing, scope sharing and endpoint publishing
//! - Environment variable loading (`LOCALSTACK_*`, `OB_*`)
//! - Configuration file loading (TOML/YAML)
//! - Configuration precedence (env > file > defaults)
//! - Configuration validation

pub mod config;
pub mod file_loader;
pub mod loader;
pub mod precedence;
pub mod validator;

use std::path::Path;

pub use config::{
    ContainerConfig, EndpointConfig, FixtureConfig, ObservabilityConfig, PortPoolConfig,
    ReadinessConfig, ScopeConfig,
};
pub use file_loader::{ConfigFileError, load_from_file, load_from_toml, load_from_yaml};
pub use loader::{EnvConfigError, load_from_env};
pub use precedence::merge_configs;
pub use crate::validator::validate;

/// Errors from [`load`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    File(#[from] ConfigFileError),

    #[error(transparent)]
    Env(#[from] EnvConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] ::validator::ValidationErrors)
}

/// Load defaults, an optional file and the environment, merged and
/// validated.
pub fn load(file: Option<&Path>) -> Result<FixtureConfig, ConfigError> {
    let file_config = match file {
        Some(path) => load_from_file(path)?,
        None => FixtureConfig::default()
    };
    let env_config = load_from_env()?;
    let merged = merge_configs(FixtureConfig::default(), file_config, "file", env_config, "env");
    validate(&merged)?;
    Ok(merged)
}
