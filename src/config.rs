use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    /// Bounded wait for the mapping document lock.
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            lock_timeout_secs: default_lock_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_source_root")]
    pub source_root: PathBuf,
    #[serde(default = "default_target_root")]
    pub target_root: PathBuf,
    /// The mapping document. Its containing directory is watched for
    /// external edits.
    #[serde(default = "default_mapping_path")]
    pub mapping_path: PathBuf,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            source_root: default_source_root(),
            target_root: default_target_root(),
            mapping_path: default_mapping_path(),
        }
    }
}

fn default_lock_timeout() -> u64 {
    5
}
fn default_source_root() -> PathBuf {
    PathBuf::from("./source")
}
fn default_target_root() -> PathBuf {
    PathBuf::from("./target")
}
fn default_mapping_path() -> PathBuf {
    PathBuf::from("./mapping/mapping.json")
}

impl Config {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.general.lock_timeout_secs)
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    let dir = dirs::config_dir().context("Could not determine config directory")?;
    Ok(dir.join("mapsyncd").join("config.toml"))
}

/// Load the configuration. An explicitly passed path must exist; when no
/// path is given and the default config file is absent, the built-in
/// layout (./source, ./target, ./mapping/mapping.json) is used.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let (path, required) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (default_config_path()?, false),
    };

    let content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(_) if !required => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return validate(Config::default());
        }
        Err(e) => {
            return Err(e)
                .with_context(|| format!("Failed to read config file: {}", path.display()));
        }
    };

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    validate(config)
}

fn validate(config: Config) -> Result<Config> {
    if config.sync.source_root == config.sync.target_root {
        anyhow::bail!("sync.source_root and sync.target_root must differ");
    }
    if config.general.lock_timeout_secs == 0 {
        anyhow::bail!("general.lock_timeout_secs must be greater than zero");
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.sync.source_root, PathBuf::from("./source"));
        assert_eq!(config.sync.target_root, PathBuf::from("./target"));
        assert_eq!(
            config.sync.mapping_path,
            PathBuf::from("./mapping/mapping.json")
        );
        assert_eq!(config.general.lock_timeout_secs, 5);
    }

    #[test]
    fn test_parse_full() {
        let config: Config = toml::from_str(
            r#"
            [general]
            lock_timeout_secs = 10

            [sync]
            source_root = "/data/in"
            target_root = "/data/out"
            mapping_path = "/data/mapping/mapping.json"
            "#,
        )
        .unwrap();
        assert_eq!(config.sync.source_root, PathBuf::from("/data/in"));
        assert_eq!(config.general.lock_timeout_secs, 10);
    }

    #[test]
    fn test_same_roots_rejected() {
        let config: Config = toml::from_str(
            r#"
            [sync]
            source_root = "/data/x"
            target_root = "/data/x"
            "#,
        )
        .unwrap();
        assert!(validate(config).is_err());
    }
}
