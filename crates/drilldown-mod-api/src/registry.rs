//! Registry of active mods and their failures.
//!
//! The registry is the loader's single source of truth: which mods are
//! active and in which order, which ids failed and why, which packages were
//! rejected before they had an id, and where each id stands in its
//! lifecycle. All of it sits behind one lock so concurrent readers never see
//! an id that is both active and failed.

use crate::error::ModError;
use crate::events::SubscriberId;
use crate::host::ModContext;
use crate::lifecycle::{Mod, ModDescriptor, ModState};
use chrono::{DateTime, Utc};
use drilldown_mod_runtime::{LoadScope, PackagePath};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// An active mod.
pub struct LoadedMod {
    pub descriptor: ModDescriptor,
    pub instance: Arc<dyn Mod>,
    pub package: PackagePath,
    /// Identity of the mod's handlers on the event bus.
    pub subscriber: SubscriberId,
    pub context: ModContext,
    pub(crate) scope: Arc<LoadScope>,
}

impl LoadedMod {
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    /// The load scope holding the mod's code.
    pub fn scope(&self) -> &LoadScope {
        &self.scope
    }
}

impl fmt::Debug for LoadedMod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedMod")
            .field("id", &self.descriptor.id)
            .field("version", &self.descriptor.version)
            .field("package", &self.package.path)
            .field("subscriber", &self.subscriber)
            .finish_non_exhaustive()
    }
}

/// A recorded failure of one mod id.
#[derive(Debug, Clone, PartialEq)]
pub struct ModFailure {
    pub error: ModError,
    pub at: DateTime<Utc>,
}

/// Where one id stands, read under a single lock.
#[derive(Debug, Clone, PartialEq)]
pub struct ModStatus {
    pub active: bool,
    pub state: Option<ModState>,
    pub failure: Option<ModFailure>,
}

#[derive(Default)]
struct RegistryState {
    mods: HashMap<String, Arc<LoadedMod>>,
    /// Active ids in load order.
    order: Vec<String>,
    errors: HashMap<String, ModFailure>,
    package_errors: HashMap<PathBuf, ModError>,
    states: HashMap<String, ModState>,
}

/// Active mods, failures and lifecycle states.
#[derive(Default)]
pub struct ModRegistry {
    state: RwLock<RegistryState>,
}

impl ModRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an active mod, at a position in the load order or last.
    ///
    /// Clears any failure recorded for the id.
    pub fn insert(&self, loaded: Arc<LoadedMod>, position: Option<usize>) {
        let id = loaded.id().to_string();
        let mut state = self.state.write();
        state.errors.remove(&id);
        state.states.insert(id.clone(), ModState::Active);
        state.order.retain(|existing| existing != &id);
        let index = position.unwrap_or(state.order.len()).min(state.order.len());
        state.order.insert(index, id.clone());
        state.mods.insert(id, loaded);
    }

    /// Remove an active mod. Returns it with its former load-order position.
    pub fn remove(&self, id: &str) -> Option<(Arc<LoadedMod>, usize)> {
        let mut state = self.state.write();
        let loaded = state.mods.remove(id)?;
        let index = state.order.iter().position(|existing| existing == id)?;
        state.order.remove(index);
        state.states.insert(id.to_string(), ModState::Unloaded);
        Some((loaded, index))
    }

    /// Remove every active mod, returned in load order.
    pub fn take_all(&self) -> Vec<Arc<LoadedMod>> {
        let mut state = self.state.write();
        let order = std::mem::take(&mut state.order);
        order
            .into_iter()
            .filter_map(|id| {
                let loaded = state.mods.remove(&id)?;
                state.states.insert(id, ModState::Unloaded);
                Some(loaded)
            })
            .collect()
    }

    /// Record a failure for an id and mark it `Failed`.
    pub fn record_failure(&self, id: &str, error: ModError) {
        self.record(id, error, ModState::Failed);
    }

    /// Record a failure for an id, leaving it in the given state.
    pub fn record(&self, id: &str, error: ModError, lifecycle: ModState) {
        let mut state = self.state.write();
        state.errors.insert(
            id.to_string(),
            ModFailure {
                error,
                at: Utc::now(),
            },
        );
        state.states.insert(id.to_string(), lifecycle);
    }

    /// Record a package that was rejected before it produced a usable id.
    pub fn record_package_error(&self, package: PathBuf, error: ModError) {
        self.state.write().package_errors.insert(package, error);
    }

    /// Forget package-level failures from an earlier pass.
    pub fn clear_package_errors(&self) {
        self.state.write().package_errors.clear();
    }

    pub fn set_state(&self, id: &str, lifecycle: ModState) {
        self.state.write().states.insert(id.to_string(), lifecycle);
    }

    pub fn get(&self, id: &str) -> Option<Arc<LoadedMod>> {
        self.state.read().mods.get(id).cloned()
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.state.read().mods.contains_key(id)
    }

    /// Active ids in load order.
    pub fn active_ids(&self) -> Vec<String> {
        self.state.read().order.clone()
    }

    /// Active mods in load order.
    pub fn active(&self) -> Vec<Arc<LoadedMod>> {
        let state = self.state.read();
        state
            .order
            .iter()
            .filter_map(|id| state.mods.get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().mods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().mods.is_empty()
    }

    /// Failures by mod id.
    pub fn errors(&self) -> HashMap<String, ModFailure> {
        self.state.read().errors.clone()
    }

    pub fn error(&self, id: &str) -> Option<ModFailure> {
        self.state.read().errors.get(id).cloned()
    }

    /// Rejected packages by path.
    pub fn package_errors(&self) -> HashMap<PathBuf, ModError> {
        self.state.read().package_errors.clone()
    }

    pub fn state(&self, id: &str) -> Option<ModState> {
        self.state.read().states.get(id).copied()
    }

    /// Activity, lifecycle state and failure of an id as one consistent view.
    pub fn status(&self, id: &str) -> ModStatus {
        let state = self.state.read();
        ModStatus {
            active: state.mods.contains_key(id),
            state: state.states.get(id).copied(),
            failure: state.errors.get(id).cloned(),
        }
    }
}
