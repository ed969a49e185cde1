//! Configuration loading and parsing for decloak
//!
//! Provides functionality to load and parse `decloak.toml` configuration files.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::transforms::pipeline::DEFAULT_MAX_PASSES;

pub const CONFIG_FILENAME: &str = "decloak.toml";

const KNOWN_TOP_LEVEL_KEYS: &[&str] = &["jsx", "unpack", "deobfuscate", "mangle", "max_passes", "transforms"];
const KNOWN_TRANSFORMS_KEYS: &[&str] = &["disabled"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid TOML in '{path}': {message}")]
    ParseError { path: PathBuf, message: String },
}

#[derive(Debug, Clone, Default)]
pub struct ConfigResult {
    pub config: Config,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Turn `React.createElement` calls back into JSX.
    pub jsx: bool,
    /// Split recognized bundles into modules.
    pub unpack: bool,
    /// Run the deobfuscate group.
    pub deobfuscate: bool,
    /// Shorten every binding name.
    pub mangle: bool,
    pub max_passes: usize,
    pub transforms: TransformsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            jsx: true,
            unpack: true,
            deobfuscate: true,
            mangle: false,
            max_passes: DEFAULT_MAX_PASSES,
            transforms: TransformsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransformsConfig {
    /// Transform or group names.
    pub disabled: Vec<String>,
}

pub fn find_config_file(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir.to_path_buf();
    loop {
        let config_path = current.join(CONFIG_FILENAME);
        if config_path.exists() {
            return Some(config_path);
        }
        if !current.pop() {
            return None;
        }
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })
}

fn parse(path: &Path, content: &str) -> Result<Config, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        message: e.message().to_string(),
    })
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = read(path)?;
    parse(path, &content)
}

pub fn load_config_with_warnings(path: &Path) -> Result<ConfigResult, ConfigError> {
    let content = read(path)?;
    let config = parse(path, &content)?;
    let warnings = detect_unknown_keys(&content);
    Ok(ConfigResult { config, warnings })
}

fn detect_unknown_keys(content: &str) -> Vec<String> {
    let mut warnings = Vec::new();

    let table: toml::Table = match content.parse() {
        Ok(t) => t,
        Err(_) => return warnings,
    };

    let known_top: HashSet<&str> = KNOWN_TOP_LEVEL_KEYS.iter().copied().collect();
    for key in table.keys() {
        if !known_top.contains(key.as_str()) {
            warnings.push(format!("Unknown config option: '{}'", key));
        }
    }

    if let Some(toml::Value::Table(transforms)) = table.get("transforms") {
        let known: HashSet<&str> = KNOWN_TRANSFORMS_KEYS.iter().copied().collect();
        for key in transforms.keys() {
            if !known.contains(key.as_str()) {
                warnings.push(format!("Unknown config option in [transforms]: '{}'", key));
            }
        }
    }

    warnings
}

pub fn load_config_or_default(start_dir: &Path) -> Config {
    find_config_file(start_dir)
        .and_then(|path| load_config(&path).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn create_temp_dir() -> tempfile::TempDir {
        tempfile::tempdir().expect("Failed to create temp dir")
    }

    #[test]
    fn load_config_from_file() {
        let dir = create_temp_dir();
        let config_path = dir.path().join(CONFIG_FILENAME);
        fs::write(
            &config_path,
            r#"
jsx = false
mangle = true
max_passes = 4

[transforms]
disabled = ["control-flow-switch", "unminify"]
"#,
        )
        .unwrap();

        let config = load_config(&config_path).unwrap();

        assert!(!config.jsx);
        assert!(config.mangle);
        assert!(config.unpack);
        assert!(config.deobfuscate);
        assert_eq!(config.max_passes, 4);
        assert_eq!(config.transforms.disabled, vec!["control-flow-switch", "unminify"]);
    }

    #[test]
    fn default_config_when_missing() {
        let dir = create_temp_dir();
        let config = load_config_or_default(dir.path());

        assert_eq!(config, Config::default());
        assert!(config.jsx);
        assert!(config.unpack);
        assert!(!config.mangle);
        assert_eq!(config.max_passes, 10);
        assert!(config.transforms.disabled.is_empty());
    }

    #[test]
    fn error_on_invalid_toml() {
        let dir = create_temp_dir();
        let config_path = dir.path().join(CONFIG_FILENAME);
        fs::write(&config_path, "this is not valid { toml }").unwrap();

        let err = load_config(&config_path).unwrap_err();
        match err {
            ConfigError::ParseError { path, message } => {
                assert_eq!(path, config_path);
                assert!(!message.is_empty());
            }
            other => panic!("expected a parse error, got {other:?}"),
        }
    }

    #[test]
    fn read_error_names_the_path() {
        let dir = create_temp_dir();
        let missing = dir.path().join("missing.toml");
        let err = load_config(&missing).unwrap_err();
        assert!(err.to_string().contains("missing.toml"));
    }

    #[test]
    fn find_config_walks_up() {
        let dir = create_temp_dir();
        let nested = dir.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();
        fs::write(dir.path().join(CONFIG_FILENAME), "mangle = true").unwrap();

        let found = find_config_file(&nested).unwrap();
        assert_eq!(found, dir.path().join(CONFIG_FILENAME));
        assert!(load_config_or_default(&nested).mangle);
    }

    #[test]
    fn unknown_keys_are_reported() {
        let dir = create_temp_dir();
        let config_path = dir.path().join(CONFIG_FILENAME);
        fs::write(
            &config_path,
            r#"
jsx = true
colour = "red"

[transforms]
disabled = []
enabled = ["jsx"]
"#,
        )
        .unwrap();

        let result = load_config_with_warnings(&config_path).unwrap();
        assert!(result.config.jsx);
        assert_eq!(
            result.warnings,
            vec![
                "Unknown config option: 'colour'",
                "Unknown config option in [transforms]: 'enabled'",
            ]
        );
    }
}
