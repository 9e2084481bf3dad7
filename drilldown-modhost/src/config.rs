//! Host configuration.
//!
//! The host reads `$XDG_CONFIG_HOME/drilldown/modhost.toml`. On first start a
//! commented file holding the defaults is written there.

use anyhow::{Context, Result};
use drilldown_mod_api::{LoaderConfig, Side};
use drilldown_mod_runtime::capability::default_blocked_namespaces;
use drilldown_mod_runtime::discovery::user_mods_dir;
use drilldown_mod_runtime::Version;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main host configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    /// Host-specific configuration
    pub host: HostConfig,
    /// Mod discovery configuration
    #[serde(default)]
    pub mods: ModsConfig,
    /// Capability policy configuration
    #[serde(default)]
    pub policy: PolicyConfig,
}

/// Host configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostConfig {
    /// Host version checked against mod version bounds
    /// Default: "1.0.0"
    pub version: String,
    /// Which side this host runs as (client, server, integrated)
    /// Default: "integrated"
    #[serde(default)]
    pub side: Side,
    /// One of trace, debug, info, warn, error
    /// Default: "info"
    pub log_level: String,
}

/// Mod discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModsConfig {
    /// Directory scanned for mod packages
    /// If None, uses XDG_DATA_HOME/drilldown/mods
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    /// Public asset directories mods may read from
    #[serde(default)]
    pub asset_dirs: Vec<PathBuf>,
    /// Install the bundled example package if it is missing
    /// Default: true
    #[serde(default = "default_true")]
    pub install_example: bool,
}

/// Capability policy configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyConfig {
    /// The host's internal namespace, closed to mod introspection
    /// Default: "drilldown."
    pub host_namespace: String,
    /// Namespace prefixes mods may never load code from
    #[serde(default = "default_blocked_namespaces")]
    pub blocked_namespaces: Vec<String>,
}

/// A configuration read from disk.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    /// The file it was read from
    pub path: PathBuf,
    /// Whether the file was written with defaults on this start
    pub created: bool,
}

fn default_true() -> bool {
    true
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            side: Side::Integrated,
            log_level: "info".to_string(),
        }
    }
}

impl Default for ModsConfig {
    fn default() -> Self {
        Self {
            directory: None,
            asset_dirs: Vec::new(),
            install_example: true,
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            host_namespace: "drilldown.".to_string(),
            blocked_namespaces: default_blocked_namespaces(),
        }
    }
}

impl Config {
    /// Read, parse and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load `modhost.toml` from the user config directory, writing the
    /// defaults there first if it is missing.
    pub fn load_default() -> Result<LoadedConfig> {
        Self::load_or_create(Self::default_config_path()?)
    }

    /// Load a configuration file, writing the defaults there first if it is
    /// missing. Nothing is logged here; callers report `created` once
    /// logging is set up.
    pub fn load_or_create(path: impl Into<PathBuf>) -> Result<LoadedConfig> {
        let path = path.into();
        let created = !path.exists();
        if created {
            Self::create_default_file(&path)?;
        }

        Ok(LoadedConfig {
            config: Self::load(&path)?,
            path,
            created,
        })
    }

    /// `$XDG_CONFIG_HOME/drilldown/modhost.toml`
    pub fn default_config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("de", "dakror", "drilldown")
            .context("Failed to determine project directories")?;

        Ok(dirs.config_dir().join("modhost.toml"))
    }

    fn create_default_file(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, Self::default_config_content())
            .with_context(|| format!("Failed to write default config file: {}", path.display()))?;
        Ok(())
    }

    /// The commented default file. Parses to `Config::default()`.
    fn default_config_content() -> String {
        r#"# DrillDown Mod Host Configuration
# This file configures the drilldown-modhost behavior.

[host]
# Host version, checked against each mod's min/max_host_version
# Default: "1.0.0"
version = "1.0.0"

# Which side this host runs as: client, server, integrated
# Client hosts skip server_only mods, server hosts skip client_only mods.
# Default: "integrated"
side = "integrated"

# One of: trace, debug, info, warn, error
# RUST_LOG takes precedence when set.
# Default: "info"
log_level = "info"

[mods]
# Directory scanned for mod packages
# If not specified, defaults to $XDG_DATA_HOME/drilldown/mods
# directory = "/path/to/mods"

# Public asset directories mods may read from
# asset_dirs = ["/path/to/assets"]

# Install the bundled example package into the mods directory if missing
# Default: true
install_example = true

[policy]
# The host's internal namespace; mods may not introspect it
# Default: "drilldown."
host_namespace = "drilldown."

# Namespace prefixes mods may never load code from
blocked_namespaces = [
    "drilldown.internal.",
    "host.management.",
    "host.instrument.",
    "sys.",
]
"#
        .to_string()
    }

    /// Reject values the loader could not work with.
    pub fn validate(&self) -> Result<()> {
        if Version::parse(&self.host.version).is_none() {
            anyhow::bail!("Invalid host.version: {}", self.host.version);
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.host.log_level.as_str()) {
            anyhow::bail!(
                "Invalid log_level: {}. Must be one of: {}",
                self.host.log_level,
                valid_log_levels.join(", ")
            );
        }

        if !self.policy.host_namespace.ends_with('.') || self.policy.host_namespace.len() < 2 {
            anyhow::bail!(
                "policy.host_namespace must be a dotted prefix such as \"drilldown.\", got {:?}",
                self.policy.host_namespace
            );
        }

        if self.policy.blocked_namespaces.iter().any(|ns| ns.is_empty()) {
            anyhow::bail!("policy.blocked_namespaces must not contain empty prefixes");
        }

        Ok(())
    }

    /// The configured mods directory, or `$XDG_DATA_HOME/drilldown/mods`.
    pub fn mods_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.mods.directory {
            return Ok(dir.clone());
        }

        user_mods_dir().context("Failed to determine project directories")
    }

    /// Build the loader configuration
    pub fn loader_config(&self) -> Result<LoaderConfig> {
        Ok(LoaderConfig {
            mods_dir: self.mods_dir()?,
            host_version: self.host.version.clone(),
            side: self.host.side,
            asset_dirs: self.mods.asset_dirs.clone(),
            host_namespace: self.policy.host_namespace.clone(),
            blocked_namespaces: self.policy.blocked_namespaces.clone(),
        })
    }
}
