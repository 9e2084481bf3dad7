//! Mods bundled with the host.
//!
//! The example mod is linked into the host binary. Its package (manifest and
//! settings) lives in the mods directory like any other package, so it goes
//! through discovery, validation and the sandbox unchanged.

use anyhow::{Context, Result};
use drilldown_mod_api::{
    Event, EventSource, HookResult, LogLevel, Mod, ModContext, ModEntry, Side,
    Subscriptions,
};
use drilldown_mod_runtime::{HostTypes, LinkedCodeLoader};
use std::fs;
use std::path::Path;
use parking_lot::Mutex;
use std::sync::Arc;

/// Code unit name of the example mod.
pub const EXAMPLE_UNIT: &str = "example";

/// Entry name exported by the example mod.
pub const EXAMPLE_ENTRY: &str = "com.example.mod.ExampleMod";

const EXAMPLE_MANIFEST: &str = r#"[mod]
entry = "com.example.mod.ExampleMod"
id = "example"
name = "Example Mod"
version = "1.0.0"
description = "A simple example mod that demonstrates the mod API"
author = "DrillDown"
code = "example"
"#;

const EXAMPLE_SETTINGS: &str = r#"# Settings for the example mod
greeting = "Hello from the example mod"
"#;

/// Name under which [`HostInfo`] is published to mods.
pub const HOST_INFO: &str = "modding.api.HostInfo";

/// Facts about the running host, readable by any mod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    pub version: String,
    pub side: Side,
}

/// Build the host symbol table published to mods.
pub fn host_types(info: HostInfo) -> HostTypes {
    let mut types = HostTypes::new();
    types.register(HOST_INFO, info);
    types
}

/// Posted by the host once start-up is complete.
#[derive(Debug, Clone)]
pub struct GameInitEvent {
    pub source: EventSource,
}

impl GameInitEvent {
    pub fn new() -> Self {
        Self {
            source: EventSource::Host,
        }
    }
}

impl Default for GameInitEvent {
    fn default() -> Self {
        Self::new()
    }
}

impl Event for GameInitEvent {
    fn source(&self) -> &EventSource {
        &self.source
    }
}

/// Example mod demonstrating the mod API.
#[derive(Default)]
pub struct ExampleMod {
    /// Set while loaded.
    context: Mutex<Option<ModContext>>,
    greeting: Mutex<String>,
}

impl ExampleMod {
    pub fn new() -> Self {
        Self::default()
    }

    /// The greeting read from the package's `settings.toml`.
    pub fn greeting(&self) -> String {
        self.greeting.lock().clone()
    }

    fn read_settings(&self, ctx: &ModContext) -> HookResult {
        let content = ctx.read_package_file("settings.toml")?;
        let settings: toml::Table = content.parse()?;
        let greeting = settings
            .get("greeting")
            .and_then(|v| v.as_str())
            .unwrap_or("Hello")
            .to_string();

        ctx.host()
            .log(LogLevel::Debug, &format!("Greeting set to {:?}", greeting));
        *self.greeting.lock() = greeting;
        Ok(())
    }

    fn with_context(&self, f: impl FnOnce(&ModContext)) {
        if let Some(ctx) = self.context.lock().as_ref() {
            f(ctx);
        }
    }
}

impl Mod for ExampleMod {
    fn id(&self) -> &str {
        "example"
    }

    fn name(&self) -> &str {
        "Example Mod"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn description(&self) -> &str {
        "A simple example mod that demonstrates the mod API"
    }

    fn author(&self) -> &str {
        "DrillDown"
    }

    fn dependencies(&self) -> Vec<String> {
        vec!["core".to_string()]
    }

    fn min_host_version(&self) -> Option<&str> {
        Some("1.0.0")
    }

    fn max_host_version(&self) -> Option<&str> {
        Some("2.0.0")
    }

    fn on_load(&self, ctx: &ModContext) -> HookResult {
        ctx.host().log(LogLevel::Info, "Loading mod...");
        let info = ctx.resolve(HOST_INFO)?.downcast::<HostInfo>()?;
        ctx.host().log(
            LogLevel::Info,
            &format!("Running on a {} host, version {}", info.side, info.version),
        );
        self.read_settings(ctx)?;
        *self.context.lock() = Some(ctx.clone());
        ctx.host().log(LogLevel::Info, "Mod loaded successfully!");
        Ok(())
    }

    fn on_unload(&self, ctx: &ModContext) -> HookResult {
        ctx.host().log(LogLevel::Info, "Unloading mod...");
        self.context.lock().take();
        Ok(())
    }

    fn on_config_reload(&self, ctx: &ModContext) -> HookResult {
        self.read_settings(ctx)?;
        ctx.host().log(LogLevel::Info, "Configuration reloaded");
        Ok(())
    }

    fn subscriptions(self: Arc<Self>) -> Subscriptions {
        Subscriptions::new().on(move |_event: &GameInitEvent| {
            let greeting = self.greeting();
            self.with_context(|ctx| {
                ctx.host()
                    .log(LogLevel::Info, &format!("Game initialized! {}", greeting));
            });
            Ok(())
        })
    }
}

/// Link the bundled mods' code units into a code loader.
pub fn register(code: &mut LinkedCodeLoader) {
    code.register(EXAMPLE_UNIT, |exports| {
        exports.export(EXAMPLE_ENTRY, ModEntry::new(ExampleMod::new));
    });
}

/// Write the example package into the mods directory unless it exists.
///
/// Returns whether the package was written.
pub fn install_example(mods_dir: &Path) -> Result<bool> {
    let package_dir = mods_dir.join(EXAMPLE_UNIT);
    if package_dir.exists() {
        return Ok(false);
    }

    fs::create_dir_all(&package_dir).with_context(|| {
        format!("Failed to create package directory: {}", package_dir.display())
    })?;
    fs::write(package_dir.join("mod.toml"), EXAMPLE_MANIFEST)
        .context("Failed to write example manifest")?;
    fs::write(package_dir.join("settings.toml"), EXAMPLE_SETTINGS)
        .context("Failed to write example settings")?;

    tracing::info!("Installed example mod at: {}", package_dir.display());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use drilldown_mod_api::{LoaderConfig, ModLoader, ModState};
    use tempfile::TempDir;

    fn loader(mods_dir: &Path) -> ModLoader {
        let mut code = LinkedCodeLoader::new();
        register(&mut code);
        let config = LoaderConfig {
            mods_dir: mods_dir.to_path_buf(),
            host_version: "1.0.0".to_string(),
            ..LoaderConfig::default()
        };
        ModLoader::new(config, Arc::new(code), Arc::new(test_host_types())).unwrap()
    }

    fn test_host_types() -> HostTypes {
        host_types(HostInfo {
            version: "1.0.0".to_string(),
            side: Side::Integrated,
        })
    }

    #[test]
    fn test_install_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        assert!(install_example(temp_dir.path()).unwrap());
        assert!(!install_example(temp_dir.path()).unwrap());
        assert!(temp_dir.path().join("example").join("mod.toml").is_file());
    }

    #[test]
    fn test_example_mod_loads_and_handles_events() {
        let temp_dir = TempDir::new().unwrap();
        install_example(temp_dir.path()).unwrap();
        let loader = loader(temp_dir.path());

        let report = loader.load_all().unwrap();
        assert_eq!(report.loaded, vec!["example"]);
        assert_eq!(loader.missing_dependencies("example"), vec!["core"]);
        assert_eq!(loader.state("example"), Some(ModState::Active));

        let delivery = loader.event_bus().post(&GameInitEvent::new());
        assert_eq!(delivery.delivered, 1);
        assert_eq!(delivery.failed, 0);

        loader.unload_all();
        assert_eq!(loader.event_bus().post(&GameInitEvent::new()).delivered, 0);
    }

    #[test]
    fn test_init_event_from_many_threads() {
        let temp_dir = TempDir::new().unwrap();
        install_example(temp_dir.path()).unwrap();
        let loader = loader(temp_dir.path());
        loader.load_all().unwrap();
        assert!(ExampleMod::new().greeting().is_empty());

        let bus = loader.event_bus();
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..50 {
                        let delivery = bus.post(&GameInitEvent::new());
                        assert_eq!((delivery.delivered, delivery.failed), (1, 0));
                    }
                });
            }
            s.spawn(|| {
                for _ in 0..20 {
                    assert!(loader.notify_config_reload().is_empty());
                }
            });
        });
        assert!(loader.is_active("example"));
    }

    #[test]
    fn test_example_mod_needs_host_info() {
        let temp_dir = TempDir::new().unwrap();
        install_example(temp_dir.path()).unwrap();
        let mut code = LinkedCodeLoader::new();
        register(&mut code);
        let config = LoaderConfig {
            mods_dir: temp_dir.path().to_path_buf(),
            host_version: "1.0.0".to_string(),
            ..LoaderConfig::default()
        };
        let loader = ModLoader::new(config, Arc::new(code), Arc::new(HostTypes::new())).unwrap();

        let report = loader.load_all().unwrap();
        assert!(report.loaded.is_empty());
        let errors = loader.errors();
        assert!(matches!(
            errors.get("example").map(|failure| &failure.error),
            Some(drilldown_mod_api::ModError::Lifecycle { .. })
        ));
    }

    #[test]
    fn test_config_reload_rereads_settings() {
        let temp_dir = TempDir::new().unwrap();
        install_example(temp_dir.path()).unwrap();
        let loader = loader(temp_dir.path());
        loader.load_all().unwrap();

        std::fs::write(
            temp_dir.path().join("example").join("settings.toml"),
            "greeting = \"Glück auf\"\n",
        )
        .unwrap();
        assert!(loader.notify_config_reload().is_empty());

        // Broken settings fail the hook but leave the mod active.
        std::fs::write(
            temp_dir.path().join("example").join("settings.toml"),
            "greeting = ",
        )
        .unwrap();
        assert_eq!(loader.notify_config_reload().len(), 1);
        assert!(loader.is_active("example"));
    }

    #[test]
    fn test_example_requires_compatible_host() {
        let temp_dir = TempDir::new().unwrap();
        install_example(temp_dir.path()).unwrap();
        let mut code = LinkedCodeLoader::new();
        register(&mut code);
        let config = LoaderConfig {
            mods_dir: temp_dir.path().to_path_buf(),
            host_version: "3.0".to_string(),
            ..LoaderConfig::default()
        };
        let loader =
            ModLoader::new(config, Arc::new(code), Arc::new(test_host_types())).unwrap();

        let report = loader.load_all().unwrap();
        assert!(report.loaded.is_empty());
        assert!(report.failed.contains_key("example"));
    }
}
