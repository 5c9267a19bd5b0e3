//! Fixture configuration files.
//!
//! The format follows the extension: `.toml`, `.yaml` or `.yml`. Sections
//! and fields a file leaves out keep their defaults.

use crate::config::FixtureConfig;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("Cannot read config file {0}")]
    FileNotFound(String),

    #[error("Invalid TOML in config file: {0}")]
    TomlParse(String),

    #[error("Invalid YAML in config file: {0}")]
    YamlParse(String),

    #[error("Config file has no extension to pick a format from")]
    NoExtension,

    #[error("Config file format '{0}' is not supported (use toml, yaml or yml)")]
    UnsupportedFormat(String)
}

fn read(path: &Path) -> Result<String, ConfigFileError> {
    std::fs::read_to_string(path).map_err(|_| ConfigFileError::FileNotFound(path.display().to_string()))
}

pub fn load_from_toml(path: &Path) -> Result<FixtureConfig, ConfigFileError> {
    toml::from_str(&read(path)?).map_err(|e| ConfigFileError::TomlParse(e.to_string()))
}

pub fn load_from_yaml(path: &Path) -> Result<FixtureConfig, ConfigFileError> {
    serde_yaml::from_str(&read(path)?).map_err(|e| ConfigFileError::YamlParse(e.to_string()))
}

/// Load a config file, choosing the parser from its extension.
///
/// ```rust,no_run
/// use config::load_from_file;
/// use std::path::Path;
///
/// let config = load_from_file(Path::new("localstack.toml")).unwrap();
/// assert!(!config.container.tag.is_empty());
/// ```
pub fn load_from_file(path: &Path) -> Result<FixtureConfig, ConfigFileError> {
    let Some(extension) = path.extension().and_then(|s| s.to_str()) else {
        return Err(ConfigFileError::NoExtension);
    };

    match extension.to_ascii_lowercase().as_str() {
        "toml" => load_from_toml(path),
        "yaml" | "yml" => load_from_yaml(path),
        other => Err(ConfigFileError::UnsupportedFormat(other.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_from_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fixture.toml");
        fs::write(
            &path,
            r#"
[container]
tag = "0.11.6"
stop_timeout_seconds = 5

[container.extra_env]
DEBUG = "1"

[ports]
range_start = 45000
range_end = 45100

[scope]
drain_grace_ms = 0

[endpoint]
region = "eu-central-1"
"#
        )
        .unwrap();

        let config = load_from_toml(&path).unwrap();
        assert_eq!(config.container.tag, "0.11.6");
        assert_eq!(config.container.image, "localstack/localstack");
        assert_eq!(config.container.stop_timeout_seconds, 5);
        assert_eq!(config.container.extra_env.get("DEBUG").map(String::as_str), Some("1"));
        assert_eq!(config.ports.range_start, 45000);
        assert_eq!(config.ports.range_end, 45100);
        assert_eq!(config.scope.drain_grace_ms, 0);
        assert_eq!(config.endpoint.region, "eu-central-1");
    }

    #[test]
    fn test_load_from_yaml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fixture.yml");
        fs::write(
            &path,
            r#"
readiness:
  timeout_seconds: 30
  interval_ms: 100
observability:
  logging_level: debug
"#
        )
        .unwrap();

        let config = load_from_file(&path).unwrap();
        assert_eq!(config.readiness.timeout_seconds, 30);
        assert_eq!(config.readiness.interval_ms, 100);
        assert_eq!(config.observability.logging_level, "debug");
    }

    #[test]
    fn test_format_detection_failures() {
        let dir = TempDir::new().unwrap();
        let json = dir.path().join("fixture.json");
        let bare = dir.path().join("fixture");
        fs::write(&json, "{}").unwrap();
        fs::write(&bare, "").unwrap();

        assert!(matches!(
            load_from_file(&json),
            Err(ConfigFileError::UnsupportedFormat(format)) if format == "json"
        ));
        assert!(matches!(load_from_file(&bare), Err(ConfigFileError::NoExtension)));
    }

    #[test]
    fn test_unreadable_or_malformed_toml() {
        let dir = TempDir::new().unwrap();
        let broken = dir.path().join("fixture.TOML");
        fs::write(&broken, "[container\n").unwrap();

        assert!(matches!(load_from_file(&broken), Err(ConfigFileError::TomlParse(_))));
        assert!(matches!(
            load_from_toml(&dir.path().join("missing.toml")),
            Err(ConfigFileError::FileNotFound(_))
        ));
    }
}
