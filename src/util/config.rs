//! Configuration file support for dagen.
//!
//! dagen supports two configuration file locations:
//! - Global: `<config dir>/config.toml` - User-wide defaults
//! - Project: `<source dir>/.dagen/config.toml` - Project-specific overrides
//!
//! Project config takes precedence over global config. Values in `[flags]`
//! are the lowest-priority flag overrides, below the persisted flag file and
//! the command line.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Name of the project-local configuration directory.
pub const PROJECT_CONFIG_DIR: &str = ".dagen";

/// dagen configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Generation settings
    pub generate: GenerateConfig,

    /// Workspace flag values (name -> value)
    pub flags: BTreeMap<String, toml::Value>,
}

/// Generation-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerateConfig {
    /// Default build directory, relative to the source directory
    pub build_dir: Option<PathBuf>,

    /// Whether resolved flags are persisted (None = yes)
    pub persist_flags: Option<bool>,
}

impl Config {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Load configuration with fallback to defaults if file doesn't exist.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            Self::load(path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {}: {}", path.display(), e);
                Self::default()
            })
        } else {
            Self::default()
        }
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(&mut self, other: Config) {
        if other.generate.build_dir.is_some() {
            self.generate.build_dir = other.generate.build_dir;
        }
        if other.generate.persist_flags.is_some() {
            self.generate.persist_flags = other.generate.persist_flags;
        }
        self.flags.extend(other.flags);
    }

    /// Whether resolved flags should be persisted.
    pub fn persist_flags(&self) -> bool {
        self.generate.persist_flags.unwrap_or(true)
    }

    /// Workspace flag values as raw strings.
    pub fn flag_values(&self) -> BTreeMap<String, String> {
        self.flags
            .iter()
            .map(|(name, value)| {
                let raw = match value {
                    toml::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (name.clone(), raw)
            })
            .collect()
    }
}

/// Load merged configuration from global and project locations.
///
/// Order of precedence (highest to lowest):
/// 1. Project config (.dagen/config.toml)
/// 2. Global config
/// 3. Defaults
pub fn load_config(global_path: Option<&Path>, project_path: &Path) -> Config {
    let mut config = Config::default();

    // Load global config first
    if let Some(global_path) = global_path {
        config.merge(Config::load_or_default(global_path));
    }

    // Project config overrides global
    config.merge(Config::load_or_default(project_path));

    config
}

/// Get the project config path (`<root>/.dagen/config.toml`).
pub fn project_config_path(project_root: &Path) -> PathBuf {
    project_root.join(PROJECT_CONFIG_DIR).join("config.toml")
}
