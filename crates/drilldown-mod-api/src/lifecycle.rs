//! The mod lifecycle contract.
//!
//! Every mod entry type implements [`Mod`]. A mod package exports a
//! [`ModEntry`] that constructs it; the loader creates exactly one instance
//! per load and drives it through [`ModState`].

use crate::error::HookResult;
use crate::events::Subscriptions;
use crate::host::ModContext;
use drilldown_mod_runtime::ModManifest;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Load priority used when neither manifest nor mod declares one.
pub const DEFAULT_LOAD_PRIORITY: i32 = 100;

/// The contract every mod entry type implements.
///
/// Hooks take `&self`; mods that keep state use interior mutability, since
/// the host may query an instance from several threads.
pub trait Mod: Send + Sync {
    /// Unique identifier.
    fn id(&self) -> &str;

    /// Human-readable name.
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn author(&self) -> &str {
        ""
    }

    /// Ids of mods this mod expects to be loaded. Advisory only.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Lowest compatible host version, inclusive.
    fn min_host_version(&self) -> Option<&str> {
        None
    }

    /// Highest compatible host version, inclusive.
    fn max_host_version(&self) -> Option<&str> {
        None
    }

    fn is_client_only(&self) -> bool {
        false
    }

    fn is_server_only(&self) -> bool {
        false
    }

    /// Initialization order; lower loads earlier.
    fn load_priority(&self) -> i32 {
        DEFAULT_LOAD_PRIORITY
    }

    /// Called once the mod has passed validation.
    fn on_load(&self, _ctx: &ModContext) -> HookResult {
        Ok(())
    }

    /// Called before the mod is removed.
    fn on_unload(&self, _ctx: &ModContext) -> HookResult {
        Ok(())
    }

    /// Called when the host configuration changes.
    fn on_config_reload(&self, _ctx: &ModContext) -> HookResult {
        Ok(())
    }

    /// Event handlers this mod wants registered while it is active.
    fn subscriptions(self: Arc<Self>) -> Subscriptions {
        Subscriptions::new()
    }
}

type ModFactory = Box<dyn Fn() -> Arc<dyn Mod> + Send + Sync>;

/// The exported entry point of a mod package.
pub struct ModEntry {
    factory: ModFactory,
}

impl ModEntry {
    /// Create an entry from a constructor.
    pub fn new<M, F>(constructor: F) -> Self
    where
        M: Mod + 'static,
        F: Fn() -> M + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(move || Arc::new(constructor()) as Arc<dyn Mod>),
        }
    }

    /// Construct a fresh mod instance.
    pub fn instantiate(&self) -> Arc<dyn Mod> {
        (self.factory)()
    }
}

impl fmt::Debug for ModEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModEntry").finish_non_exhaustive()
    }
}

/// Where the host is running. Decides which side-restricted mods apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Client,
    Server,
    /// Client and server in one process; every mod applies.
    #[default]
    Integrated,
}

impl Side {
    /// Check whether a mod with the given flags applies on this side.
    pub fn accepts(&self, client_only: bool, server_only: bool) -> bool {
        match self {
            Side::Client => !server_only,
            Side::Server => !client_only,
            Side::Integrated => true,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Client => "client",
            Side::Server => "server",
            Side::Integrated => "integrated",
        })
    }
}

/// Lifecycle state of a mod id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModState {
    /// Package found and manifest read.
    Discovered,
    /// Entry instantiated and metadata resolved.
    MetadataLoaded,
    /// Host compatibility validated.
    VersionChecked,
    /// Load hook returned; registered and subscribed.
    Active,
    /// Unload hook ran; removed from the registry and the bus.
    Unloaded,
    /// Terminal failure for this load.
    Failed,
}

/// Resolved metadata of a mod.
///
/// Manifest fields take precedence; anything the manifest leaves out is
/// taken from the instance's accessors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModDescriptor {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    pub dependencies: Vec<String>,
    pub min_host_version: Option<String>,
    pub max_host_version: Option<String>,
    pub client_only: bool,
    pub server_only: bool,
    pub load_priority: i32,
    /// Name of the entry type.
    pub entry: String,
}

impl ModDescriptor {
    /// Merge a manifest with the instance it describes.
    pub fn resolve(manifest: &ModManifest, instance: &dyn Mod) -> Self {
        let m = &manifest.module;
        Self {
            id: m.id.clone(),
            name: m.name.clone().unwrap_or_else(|| instance.name().to_string()),
            version: m
                .version
                .clone()
                .unwrap_or_else(|| instance.version().to_string()),
            description: m
                .description
                .clone()
                .unwrap_or_else(|| instance.description().to_string()),
            author: m
                .author
                .clone()
                .unwrap_or_else(|| instance.author().to_string()),
            dependencies: m
                .dependencies
                .clone()
                .unwrap_or_else(|| instance.dependencies()),
            min_host_version: m
                .min_host_version
                .clone()
                .or_else(|| instance.min_host_version().map(str::to_string)),
            max_host_version: m
                .max_host_version
                .clone()
                .or_else(|| instance.max_host_version().map(str::to_string)),
            client_only: m.client_only.unwrap_or_else(|| instance.is_client_only()),
            server_only: m.server_only.unwrap_or_else(|| instance.is_server_only()),
            load_priority: m.load_priority.unwrap_or_else(|| instance.load_priority()),
            entry: m.entry.clone(),
        }
    }
}
