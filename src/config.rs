//! Configuration file support for tagup
//!
//! Supports `.tagup.toml` and `tagup.toml` configuration files.
//!
//! Example configuration:
//! ```toml
//! # Fail instead of reporting "up to date" when ignore rules hide every update
//! strict = false
//!
//! [registry]
//! connect_timeout_secs = 2
//! read_timeout_secs = 60
//!
//! # Hold back tags younger than a week
//! [cooldown]
//! default_days = 7
//! include = ["library/*"]
//!
//! # Official Docker Hub images are named `library/<image>`
//! [[ignore]]
//! dependency = "library/node"
//! versions = [">= 21"]
//! ```

use crate::cooldown::{CooldownOptions, matches_pattern};
use crate::error::DockerError;
use crate::ignore::IgnoreRule;
use crate::registry::RegistryTimeouts;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Maximum size for config files (1 MB) to prevent DoS
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

const CONFIG_NAMES: [&str; 2] = [".tagup.toml", "tagup.toml"];

/// Registry connection settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistrySettings {
    pub connect_timeout_secs: Option<u64>,
    pub read_timeout_secs: Option<u64>,
}

/// Version ranges to skip for dependencies matching a name pattern
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IgnoreEntry {
    /// Dependency name, `*` wildcards allowed
    pub dependency: String,
    pub versions: Vec<String>,
}

/// Configuration loaded from .tagup.toml or tagup.toml
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TagupConfig {
    #[serde(default)]
    pub strict: bool,

    #[serde(default)]
    pub registry: RegistrySettings,

    #[serde(default)]
    pub cooldown: Option<CooldownOptions>,

    #[serde(default)]
    pub ignore: Vec<IgnoreEntry>,
}

impl TagupConfig {
    /// Load configuration by searching for config files in the given directory and parents
    pub fn discover(start_dir: &Path) -> Option<(Self, PathBuf)> {
        let mut current = Some(start_dir);
        while let Some(dir) = current {
            for name in &CONFIG_NAMES {
                let config_path = dir.join(name);
                if config_path.exists()
                    && let Some(config) = Self::load_from_path(&config_path)
                {
                    return Some((config, config_path));
                }
            }
            current = dir.parent();
        }

        None
    }

    /// Load configuration from a specific file path (silent failure for auto-discovery)
    pub fn load_from_path(path: &Path) -> Option<Self> {
        Self::load_from_path_with_error(path).ok()
    }

    /// Load configuration from a specific file path with detailed error messages
    pub fn load_from_path_with_error(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Err(format!("Config file not found: {}", path.display()));
        }

        match std::fs::metadata(path) {
            Ok(metadata) => {
                if metadata.len() > MAX_CONFIG_FILE_SIZE {
                    return Err(format!(
                        "Config file too large: {} bytes (max {} MB)",
                        metadata.len(),
                        MAX_CONFIG_FILE_SIZE / 1024 / 1024
                    ));
                }
            }
            Err(e) => {
                return Err(format!(
                    "Cannot read config file metadata: {}. Check file permissions.",
                    e
                ));
            }
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                format!(
                    "Permission denied reading config file: {}. Check file permissions.",
                    path.display()
                )
            } else {
                format!("Failed to read config file {}: {}", path.display(), e)
            }
        })?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| format!("Invalid TOML in config file {}:\n  {}", path.display(), e))?;

        // Surface bad version ranges at load time rather than mid-check
        config
            .validate()
            .map_err(|e| format!("Invalid config file {}: {}", path.display(), e))?;

        Ok(config)
    }

    fn validate(&self) -> Result<(), DockerError> {
        for entry in &self.ignore {
            for rule in &entry.versions {
                IgnoreRule::parse(rule)?;
            }
        }
        Ok(())
    }

    /// Parsed ignore rules for every entry whose pattern matches `dependency`
    pub fn ignore_rules_for(&self, dependency: &str) -> Result<Vec<IgnoreRule>, DockerError> {
        self.ignore
            .iter()
            .filter(|entry| matches_pattern(&entry.dependency, dependency))
            .flat_map(|entry| entry.versions.iter())
            .map(|rule| IgnoreRule::parse(rule))
            .collect()
    }

    /// Timeouts from the `[registry]` table over the defaults. Environment
    /// variables still win over both.
    pub fn registry_timeouts(&self) -> RegistryTimeouts {
        let defaults = RegistryTimeouts::default();
        RegistryTimeouts {
            connect: self
                .registry
                .connect_timeout_secs
                .map_or(defaults.connect, Duration::from_secs),
            read: self
                .registry
                .read_timeout_secs
                .map_or(defaults.read, Duration::from_secs),
        }
        .with_env_overrides()
    }

    /// Check if any configuration is present
    pub fn has_config(&self) -> bool {
        self.strict
            || self.cooldown.is_some()
            || !self.ignore.is_empty()
            || self.registry != RegistrySettings::default()
    }

    /// Merge another configuration into this one (other takes precedence)
    pub fn merge(&mut self, other: Self) {
        self.strict |= other.strict;
        if other.registry.connect_timeout_secs.is_some() {
            self.registry.connect_timeout_secs = other.registry.connect_timeout_secs;
        }
        if other.registry.read_timeout_secs.is_some() {
            self.registry.read_timeout_secs = other.registry.read_timeout_secs;
        }
        if other.cooldown.is_some() {
            self.cooldown = other.cooldown;
        }
        for entry in other.ignore {
            if !self.ignore.contains(&entry) {
                self.ignore.push(entry);
            }
        }
    }
}
