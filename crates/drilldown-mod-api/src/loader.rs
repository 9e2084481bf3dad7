//! The mod loader.
//!
//! [`ModLoader`] discovers mod packages, gives each one its own
//! [`LoadScope`], resolves and instantiates its entry, checks applicability
//! and host compatibility, and drives it through its lifecycle in ascending
//! load priority.
//!
//! A failing mod never stops the others. Package-level failures (unreadable
//! manifest, unusable entry, duplicate id) are kept by package path; failures
//! of a known id (side, version, hooks) are kept by id. After a load pass
//! every id that got past discovery is either active or failed.

use crate::content::{Identifiable, Registries, Registry};
use crate::error::{panic_message, HookResult, LifecyclePhase, ModError, ModResult};
use crate::events::{
    ConfigReloadedEvent, EventBus, EventSource, ModLoadedEvent, ModUnloadedEvent, SubscriberId,
};
use crate::host::{ModContext, SandboxedHost};
use crate::lifecycle::{Mod, ModDescriptor, ModEntry, ModState, Side};
use crate::registry::{LoadedMod, ModFailure, ModRegistry, ModStatus};
use drilldown_mod_runtime::{
    discover_package, discover_packages, CapabilityPolicy, CodeLoader, HostLinker, LoadScope,
    PackagePath, PolicyEnforcer, PolicyTable, Version,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Directory scanned for mod packages.
    pub mods_dir: PathBuf,

    /// Version of the running host, checked against mod bounds.
    pub host_version: String,

    pub side: Side,

    /// Public host asset directories mods may read.
    pub asset_dirs: Vec<PathBuf>,

    /// The host's internal namespace, closed to introspection.
    pub host_namespace: String,

    /// Namespace prefixes mods may never resolve.
    pub blocked_namespaces: Vec<String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        let policy = PolicyTable::default();
        Self {
            mods_dir: policy.mods_dir,
            host_version: env!("CARGO_PKG_VERSION").to_string(),
            side: Side::default(),
            asset_dirs: policy.asset_dirs,
            host_namespace: policy.host_namespace,
            blocked_namespaces: policy.blocked_namespaces,
        }
    }
}

impl LoaderConfig {
    /// The capability rule table for this configuration.
    pub fn policy_table(&self) -> PolicyTable {
        PolicyTable {
            mods_dir: self.mods_dir.clone(),
            asset_dirs: self.asset_dirs.clone(),
            host_namespace: self.host_namespace.clone(),
            blocked_namespaces: self.blocked_namespaces.clone(),
        }
    }
}

/// Outcome of a load pass.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// Ids that became active, in load order.
    pub loaded: Vec<String>,
    /// Ids that failed validation or their load hook.
    pub failed: HashMap<String, ModError>,
    /// Packages rejected before they produced a usable mod.
    pub rejected: HashMap<PathBuf, ModError>,
}

impl LoadReport {
    /// Whether every discovered package became active.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.rejected.is_empty()
    }
}

/// A package whose entry has been instantiated but not yet loaded.
struct Candidate {
    package: PackagePath,
    scope: Arc<LoadScope>,
    instance: Arc<dyn Mod>,
    descriptor: ModDescriptor,
}

/// Discovers, validates and drives mods through their lifecycle.
///
/// Transitions (load, unload, reload, config reload) are serialized; queries
/// may run concurrently from any thread. Lifecycle hooks and the handlers of
/// lifecycle events run while a transition is in progress and must not call
/// back into the loader's transition methods.
pub struct ModLoader {
    config: LoaderConfig,
    host_version: Version,
    code_loader: Arc<dyn CodeLoader>,
    linker: Arc<dyn HostLinker>,
    policy: Arc<dyn CapabilityPolicy>,
    bus: Arc<EventBus>,
    registry: ModRegistry,
    registries: Arc<Registries>,
    transition: Mutex<()>,
}

impl ModLoader {
    /// Create a loader. The capability policy is built from `config`.
    pub fn new(
        config: LoaderConfig,
        code_loader: Arc<dyn CodeLoader>,
        linker: Arc<dyn HostLinker>,
    ) -> ModResult<Self> {
        let host_version = Version::parse(&config.host_version).ok_or_else(|| {
            ModError::Config(format!("invalid host version '{}'", config.host_version))
        })?;
        let policy = Arc::new(PolicyEnforcer::new(config.policy_table()));

        Ok(Self {
            config,
            host_version,
            code_loader,
            linker,
            policy,
            bus: Arc::new(EventBus::new()),
            registry: ModRegistry::new(),
            registries: Arc::new(Registries::new()),
            transition: Mutex::new(()),
        })
    }

    /// Use a different capability policy.
    pub fn with_policy(mut self, policy: Arc<dyn CapabilityPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Share an existing event bus.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = bus;
        self
    }

    /// Publish a content registry to mods. One registry per content type.
    pub fn register_registry<T: Identifiable>(
        &self,
        registry: Registry<T>,
    ) -> ModResult<Arc<Registry<T>>> {
        let registry = Arc::new(registry);
        self.registries.insert(Arc::clone(&registry))?;
        info!("Published registry '{}'", registry.name());
        Ok(registry)
    }

    /// The published registry for content type `T`.
    pub fn registry<T: Identifiable>(&self) -> Option<Arc<Registry<T>>> {
        self.registries.get::<T>()
    }

    /// Discover and load every package in the mods directory.
    ///
    /// Fails only if the mods directory cannot be scanned; per-mod failures
    /// are reported in the returned [`LoadReport`] and kept in the registry.
    pub fn load_all(&self) -> ModResult<LoadReport> {
        let _transition = self.transition.lock();
        let mods_dir = &self.config.mods_dir;
        info!("Loading mods from {:?}", mods_dir);

        let found = discover_packages(mods_dir).map_err(|e| ModError::discovery(mods_dir, e))?;
        self.registry.clear_package_errors();

        let mut report = LoadReport::default();
        let mut candidates = Vec::new();

        for found in found {
            let package = match found.into_package() {
                Ok(package) => package,
                Err((path, e)) => {
                    let err = ModError::discovery(&path, e);
                    self.reject(&mut report, path, err);
                    continue;
                }
            };

            let id = package.id().to_string();
            if let Some(active) = self.registry.get(&id) {
                if active.package.path == package.path {
                    debug!(mod_id = %id, "Already active, skipping");
                    continue;
                }
            }
            if self.registry.is_active(&id) {
                let err = ModError::DuplicateId {
                    id,
                    package: package.path.display().to_string(),
                };
                self.reject(&mut report, package.path, err);
                continue;
            }

            self.registry.set_state(&id, ModState::Discovered);
            let path = package.path.clone();
            match self.prepare(package) {
                Ok(candidate) => candidates.push(candidate),
                Err(err) => {
                    self.registry.set_state(&id, ModState::Failed);
                    self.reject(&mut report, path, err);
                }
            }
        }

        // Stable: equal priorities keep discovery order.
        candidates.sort_by_key(|c| c.descriptor.load_priority);

        // Packages sharing an id are tried in load order until one is active.
        for candidate in candidates {
            let id = candidate.descriptor.id.clone();
            if self.registry.is_active(&id) {
                let path = candidate.package.path.clone();
                discard(candidate);
                let err = ModError::DuplicateId {
                    id,
                    package: path.display().to_string(),
                };
                self.reject(&mut report, path, err);
                continue;
            }
            match self.activate(candidate, None) {
                Ok(()) => {
                    report.failed.remove(&id);
                    report.loaded.push(id);
                }
                Err(err) => {
                    report.failed.insert(id, err);
                }
            }
        }

        for id in &report.loaded {
            let missing = self.missing_dependencies(id);
            if !missing.is_empty() {
                warn!(mod_id = %id, "Missing dependencies: {}", missing.join(", "));
            }
        }

        info!(
            "Loaded {} mod(s), {} failed, {} package(s) rejected",
            report.loaded.len(),
            report.failed.len(),
            report.rejected.len()
        );
        Ok(report)
    }

    /// Unload every active mod, last loaded first.
    ///
    /// Unload hook failures are logged and recorded; they never stop the
    /// remaining mods from unloading.
    pub fn unload_all(&self) {
        let _transition = self.transition.lock();
        let mut loaded = self.registry.take_all();
        loaded.reverse();
        let count = loaded.len();
        for loaded in loaded {
            self.teardown(loaded);
        }
        info!("Unloaded {} mod(s)", count);
    }

    /// Unload one active mod and tear down its load scope.
    pub fn unload(&self, id: &str) -> ModResult<()> {
        let _transition = self.transition.lock();
        let (loaded, _) = self
            .registry
            .remove(id)
            .ok_or_else(|| ModError::NotFound(id.to_string()))?;
        match self.teardown(loaded) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Run a mod's unload and load hooks again on the same instance.
    ///
    /// The manifest is not re-read and the package is not re-resolved; see
    /// [`reload_package`](Self::reload_package) for that.
    pub fn reload(&self, id: &str) -> ModResult<()> {
        let _transition = self.transition.lock();
        let (loaded, position) = self
            .registry
            .remove(id)
            .ok_or_else(|| ModError::NotFound(id.to_string()))?;
        info!(mod_id = %id, "Reloading mod");

        self.bus.unsubscribe(loaded.subscriber);
        let unloaded = run_hook(id, LifecyclePhase::Unload, || {
            loaded.instance.on_unload(&loaded.context)
        });
        self.bus.post(&ModUnloadedEvent {
            source: EventSource::Loader,
            mod_id: id.to_string(),
        });
        if let Err(err) = unloaded {
            warn!("{}", err);
            self.registry.record(id, err.clone(), ModState::Unloaded);
            release(loaded);
            return Err(err);
        }

        let loaded = match Arc::try_unwrap(loaded) {
            Ok(loaded) => loaded,
            // Someone still holds the entry; build a fresh one around the instance.
            Err(shared) => LoadedMod {
                descriptor: shared.descriptor.clone(),
                instance: Arc::clone(&shared.instance),
                package: shared.package.clone(),
                subscriber: shared.subscriber,
                context: shared.context.clone(),
                scope: Arc::clone(&shared.scope),
            },
        };
        let candidate = Candidate {
            package: loaded.package,
            scope: loaded.scope,
            instance: loaded.instance,
            descriptor: loaded.descriptor,
        };
        self.load(candidate, Some(position))
    }

    /// Fully reload a mod from its package.
    ///
    /// The mod is unloaded and its scope torn down; the manifest is read
    /// again and the entry resolved in a fresh scope before the usual
    /// validation and load sequence runs. Any failure is recorded under the
    /// original id.
    pub fn reload_package(&self, id: &str) -> ModResult<()> {
        let _transition = self.transition.lock();
        let (loaded, position) = self
            .registry
            .remove(id)
            .ok_or_else(|| ModError::NotFound(id.to_string()))?;
        info!(mod_id = %id, "Reloading mod package");

        let path = loaded.package.path.clone();
        if let Some(err) = self.teardown(loaded) {
            return Err(err);
        }

        let result = discover_package(&path)
            .map_err(|e| ModError::discovery(&path, e))
            .and_then(|package| {
                let new_id = package.id();
                if new_id != id && self.registry.is_active(new_id) {
                    return Err(ModError::DuplicateId {
                        id: new_id.to_string(),
                        package: path.display().to_string(),
                    });
                }
                self.prepare(package)
            });

        match result {
            Ok(candidate) => self.activate(candidate, Some(position)),
            Err(err) => {
                warn!("{}", err);
                self.registry.record_failure(id, err.clone());
                Err(err)
            }
        }
    }

    /// Tell every active mod that the host configuration changed.
    ///
    /// Mods are notified in load order. A failing hook is logged and
    /// returned; the mod stays active.
    pub fn notify_config_reload(&self) -> HashMap<String, ModError> {
        let _transition = self.transition.lock();
        let mut failures = HashMap::new();

        for loaded in self.registry.active() {
            let result = run_hook(loaded.id(), LifecyclePhase::ConfigReload, || {
                loaded.instance.on_config_reload(&loaded.context)
            });
            if let Err(err) = result {
                warn!("{}", err);
                failures.insert(loaded.id().to_string(), err);
            }
        }

        self.bus.post(&ConfigReloadedEvent {
            source: EventSource::Loader,
        });
        failures
    }

    /// Declared dependencies of a mod that are not active.
    pub fn missing_dependencies(&self, id: &str) -> Vec<String> {
        let Some(loaded) = self.registry.get(id) else {
            return Vec::new();
        };
        loaded
            .descriptor
            .dependencies
            .iter()
            .filter(|dep| !self.registry.is_active(dep))
            .cloned()
            .collect()
    }

    pub fn state(&self, id: &str) -> Option<ModState> {
        self.registry.state(id)
    }

    /// Activity, state and failure of an id, read together.
    pub fn status(&self, id: &str) -> ModStatus {
        self.registry.status(id)
    }

    /// Failures by mod id.
    pub fn errors(&self) -> HashMap<String, ModFailure> {
        self.registry.errors()
    }

    /// Rejected packages by path.
    pub fn package_errors(&self) -> HashMap<PathBuf, ModError> {
        self.registry.package_errors()
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.registry.is_active(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<LoadedMod>> {
        self.registry.get(id)
    }

    pub fn descriptor(&self, id: &str) -> Option<ModDescriptor> {
        self.registry.get(id).map(|loaded| loaded.descriptor.clone())
    }

    /// Active ids in load order.
    pub fn active_ids(&self) -> Vec<String> {
        self.registry.active_ids()
    }

    pub fn mod_registry(&self) -> &ModRegistry {
        &self.registry
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn policy(&self) -> &Arc<dyn CapabilityPolicy> {
        &self.policy
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    fn reject(&self, report: &mut LoadReport, path: PathBuf, err: ModError) {
        warn!("Rejected mod package {:?}: {}", path, err);
        self.registry.record_package_error(path.clone(), err.clone());
        report.rejected.insert(path, err);
    }

    /// Open a package's code in a fresh scope and instantiate its entry.
    fn prepare(&self, package: PackagePath) -> ModResult<Candidate> {
        let path = package.path.clone();
        let unit = self
            .code_loader
            .open(&package)
            .map_err(|e| ModError::discovery(&path, e))?;
        let scope = Arc::new(LoadScope::new(
            package.id(),
            unit,
            Arc::clone(&self.linker),
            Arc::clone(&self.policy),
        ));

        let entry_name = package.manifest.entry();
        let entry = scope
            .resolve(entry_name)
            .and_then(|handle| handle.downcast::<ModEntry>())
            .map_err(|e| ModError::discovery(&path, e))?;

        let instance = entry.instantiate();
        if instance.id() != package.id() {
            scope.unload();
            return Err(ModError::Discovery {
                package: path.display().to_string(),
                reason: format!(
                    "entry '{}' reports id '{}', manifest declares '{}'",
                    entry_name,
                    instance.id(),
                    package.id()
                ),
            });
        }

        let descriptor = ModDescriptor::resolve(&package.manifest, instance.as_ref());
        self.registry.set_state(&descriptor.id, ModState::MetadataLoaded);
        debug!(mod_id = %descriptor.id, "Instantiated {}", entry_name);

        Ok(Candidate {
            package,
            scope,
            instance,
            descriptor,
        })
    }

    /// Validate a candidate and load it, recording any failure by id.
    fn activate(&self, candidate: Candidate, position: Option<usize>) -> ModResult<()> {
        let id = candidate.descriptor.id.clone();
        let checked = self
            .check_side(&candidate.descriptor)
            .and_then(|()| self.check_version(&candidate.descriptor));

        if let Err(err) = checked {
            warn!("{}", err);
            self.registry.record_failure(&id, err.clone());
            candidate.scope.unload();
            return Err(err);
        }

        self.registry.set_state(&id, ModState::VersionChecked);
        self.load(candidate, position)
    }

    /// Run the load hook, subscribe and register.
    fn load(&self, candidate: Candidate, position: Option<usize>) -> ModResult<()> {
        let Candidate {
            package,
            scope,
            instance,
            descriptor,
        } = candidate;
        let id = descriptor.id.clone();

        let host = Arc::new(SandboxedHost::new(
            id.as_str(),
            Arc::clone(&self.policy),
            Arc::clone(&self.linker),
        ));
        let context = ModContext::new(
            id.as_str(),
            package.path.clone(),
            host,
            Arc::clone(&self.bus),
            Arc::clone(&scope),
            Arc::clone(&self.registries),
        );

        let subscriber = SubscriberId::new();
        let loaded = run_hook(&id, LifecyclePhase::Load, || instance.on_load(&context))
            .and_then(|()| {
                let subscriptions = contain(&id, LifecyclePhase::Load, || {
                    Arc::clone(&instance).subscriptions()
                })?;
                self.bus.subscribe(subscriber, subscriptions)
            });

        if let Err(err) = loaded {
            warn!("{}", err);
            self.registry.record_failure(&id, err.clone());
            drop(context);
            drop(instance);
            scope.unload();
            return Err(err);
        }

        let event = ModLoadedEvent {
            source: EventSource::Loader,
            mod_id: id.clone(),
            package: package.path.clone(),
        };
        self.registry.insert(
            Arc::new(LoadedMod {
                descriptor,
                instance,
                package,
                subscriber,
                context,
                scope,
            }),
            position,
        );
        info!(mod_id = %id, "Loaded mod");
        self.bus.post(&event);
        Ok(())
    }

    /// Run the unload hook of a mod already removed from the registry and
    /// release everything it held.
    fn teardown(&self, loaded: Arc<LoadedMod>) -> Option<ModError> {
        let id = loaded.id().to_string();
        let result = run_hook(&id, LifecyclePhase::Unload, || {
            loaded.instance.on_unload(&loaded.context)
        });
        self.bus.unsubscribe(loaded.subscriber);
        release(loaded);

        let failure = match result {
            Ok(()) => None,
            Err(err) => {
                error!("{}", err);
                self.registry.record(&id, err.clone(), ModState::Unloaded);
                Some(err)
            }
        };

        info!(mod_id = %id, "Unloaded mod");
        self.bus.post(&ModUnloadedEvent {
            source: EventSource::Loader,
            mod_id: id,
        });
        failure
    }

    fn check_side(&self, descriptor: &ModDescriptor) -> ModResult<()> {
        if self
            .config
            .side
            .accepts(descriptor.client_only, descriptor.server_only)
        {
            Ok(())
        } else {
            Err(ModError::NotApplicable {
                id: descriptor.id.clone(),
                side: self.config.side,
            })
        }
    }

    fn check_version(&self, descriptor: &ModDescriptor) -> ModResult<()> {
        let min = descriptor.min_host_version.as_deref();
        let max = descriptor.max_host_version.as_deref();
        let required = match (min, max) {
            (Some(min), Some(max)) => format!(">= {}, <= {}", min, max),
            (Some(min), None) => format!(">= {}", min),
            (None, Some(max)) => format!("<= {}", max),
            (None, None) => return Ok(()),
        };

        let incompatible = || ModError::VersionIncompatible {
            id: descriptor.id.clone(),
            required: required.clone(),
            host: self.config.host_version.clone(),
        };

        // Bounds from the instance have not been validated like manifest ones.
        let min = min.map(|v| Version::parse(v).ok_or_else(incompatible)).transpose()?;
        let max = max.map(|v| Version::parse(v).ok_or_else(incompatible)).transpose()?;

        if self.host_version.within(min.as_ref(), max.as_ref()) {
            Ok(())
        } else {
            Err(incompatible())
        }
    }
}

impl Drop for ModLoader {
    fn drop(&mut self) {
        if !self.registry.is_empty() {
            self.unload_all();
        }
    }
}

/// Drop a candidate that will never load, then unload its scope.
fn discard(candidate: Candidate) {
    let Candidate { scope, instance, .. } = candidate;
    drop(instance);
    scope.unload();
}

/// Drop a mod's instance and context, then unload its scope.
fn release(loaded: Arc<LoadedMod>) {
    let scope = Arc::clone(&loaded.scope);
    drop(loaded);
    scope.unload();
}

/// Run a lifecycle hook, containing errors and panics.
fn run_hook<F>(id: &str, phase: LifecyclePhase, hook: F) -> ModResult<()>
where
    F: FnOnce() -> HookResult,
{
    contain(id, phase, hook)?.map_err(|e| ModError::Lifecycle {
        id: id.to_string(),
        phase,
        message: e.to_string(),
    })
}

/// Run mod code, turning a panic into a lifecycle error.
fn contain<T, F>(id: &str, phase: LifecyclePhase, f: F) -> ModResult<T>
where
    F: FnOnce() -> T,
{
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| ModError::Lifecycle {
        id: id.to_string(),
        phase,
        message: format!("panicked: {}", panic_message(payload.as_ref())),
    })
}
