//! Mod manifest parsing.
//!
//! Each mod package has a manifest naming its entry point and describing
//! its metadata. Two formats are accepted:
//!
//! - `mod.toml`, with a `[mod]` table
//! - `mod.json`, with a `"mod"` object (the entry may be given as `main`)
//!
//! Only `entry` and `id` are required. Every other field is optional; when a
//! field is absent the value reported by the mod's entry object is used.

use crate::error::{RuntimeError, RuntimeResult};
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// File name of a TOML manifest.
pub const TOML_MANIFEST: &str = "mod.toml";

/// File name of a JSON manifest.
pub const JSON_MANIFEST: &str = "mod.json";

/// Mod manifest structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModManifest {
    /// Mod metadata.
    #[serde(rename = "mod")]
    pub module: ModSection,
}

/// The `[mod]` table of a manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModSection {
    /// Fully-qualified name of the entry type.
    #[serde(default, alias = "main")]
    pub entry: String,

    /// Unique identifier for the mod.
    #[serde(default)]
    pub id: String,

    /// Human-readable name.
    #[serde(default)]
    pub name: Option<String>,

    /// Version string.
    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub author: Option<String>,

    /// Ids of mods this mod expects to be present.
    #[serde(default)]
    pub dependencies: Option<Vec<String>>,

    /// Lowest host version this mod runs on (inclusive).
    #[serde(default)]
    pub min_host_version: Option<String>,

    /// Highest host version this mod runs on (inclusive).
    #[serde(default)]
    pub max_host_version: Option<String>,

    #[serde(default)]
    pub client_only: Option<bool>,

    #[serde(default)]
    pub server_only: Option<bool>,

    /// Initialization order, lower loads first.
    #[serde(default)]
    pub load_priority: Option<i32>,

    /// Name of the code unit holding the mod's code. Defaults to the
    /// package directory name.
    #[serde(default)]
    pub code: Option<String>,
}

impl ModManifest {
    /// Find and load the manifest of a package directory.
    ///
    /// `mod.toml` takes precedence over `mod.json`.
    pub fn from_package(dir: &Path) -> RuntimeResult<Self> {
        let toml_path = dir.join(TOML_MANIFEST);
        if toml_path.is_file() {
            return Self::from_file(&toml_path);
        }

        let json_path = dir.join(JSON_MANIFEST);
        if json_path.is_file() {
            return Self::from_file(&json_path);
        }

        Err(RuntimeError::InvalidManifest(format!(
            "No {} or {} found in {}",
            TOML_MANIFEST,
            JSON_MANIFEST,
            dir.display()
        )))
    }

    /// Load a manifest from a file, choosing the format by extension.
    pub fn from_file(path: &Path) -> RuntimeResult<Self> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_toml(&content),
        }
    }

    /// Parse a manifest from a TOML string.
    pub fn from_toml(content: &str) -> RuntimeResult<Self> {
        let manifest: ModManifest = toml::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Parse a manifest from a JSON string.
    pub fn from_json(content: &str) -> RuntimeResult<Self> {
        let manifest: ModManifest = serde_json::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Validate the manifest.
    fn validate(&self) -> RuntimeResult<()> {
        if self.module.entry.trim().is_empty() {
            return Err(RuntimeError::InvalidManifest(
                "Mod entry point cannot be empty".to_string(),
            ));
        }

        if self.module.id.trim().is_empty() {
            return Err(RuntimeError::InvalidManifest(
                "Mod ID cannot be empty".to_string(),
            ));
        }

        for bound in [&self.module.min_host_version, &self.module.max_host_version]
            .into_iter()
            .flatten()
        {
            if Version::parse(bound).is_none() {
                return Err(RuntimeError::InvalidManifest(format!(
                    "Invalid host version bound '{}'",
                    bound
                )));
            }
        }

        Ok(())
    }

    /// Get the mod ID.
    pub fn id(&self) -> &str {
        &self.module.id
    }

    /// Get the entry point name.
    pub fn entry(&self) -> &str {
        &self.module.entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_toml_manifest() {
        let toml = r#"
[mod]
entry = "mod.example.ExampleMod"
id = "example"
name = "Example Mod"
version = "1.0.0"
author = "ModLoader Example"
dependencies = ["core"]
min_host_version = "1.0.0"
max_host_version = "2.0.0"
load_priority = 50
"#;

        let manifest = ModManifest::from_toml(toml).unwrap();
        assert_eq!(manifest.id(), "example");
        assert_eq!(manifest.entry(), "mod.example.ExampleMod");
        assert_eq!(manifest.module.name.as_deref(), Some("Example Mod"));
        assert_eq!(manifest.module.dependencies, Some(vec!["core".to_string()]));
        assert_eq!(manifest.module.load_priority, Some(50));
        assert!(manifest.module.client_only.is_none());
        assert!(manifest.module.code.is_none());
    }

    #[test]
    fn test_parse_json_manifest_with_main_alias() {
        let json = r#"{ "mod": { "main": "com.example.mod.ExampleMod", "id": "example" } }"#;

        let manifest = ModManifest::from_json(json).unwrap();
        assert_eq!(manifest.entry(), "com.example.mod.ExampleMod");
        assert!(manifest.module.version.is_none());
    }

    #[test]
    fn test_missing_entry_point() {
        let toml = r#"
[mod]
id = "no-entry"
"#;

        let err = ModManifest::from_toml(toml).unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidManifest(_)));
    }

    #[test]
    fn test_missing_id() {
        let toml = r#"
[mod]
entry = "mod.x.X"
"#;

        assert!(ModManifest::from_toml(toml).is_err());
    }

    #[test]
    fn test_invalid_version_bound() {
        let toml = r#"
[mod]
entry = "mod.x.X"
id = "x"
min_host_version = "soon"
"#;

        assert!(ModManifest::from_toml(toml).is_err());
    }

    #[test]
    fn test_missing_mod_table() {
        assert!(ModManifest::from_toml("title = 'nothing'").is_err());
    }
}
