//! Content registries shared between host and mods.
//!
//! The host creates one [`Registry`] per content type (items, blocks, ...)
//! and hands it to the loader with [`ModLoader::register_registry`]. Mods
//! look it up by type through [`ModContext::registry`] and add their entries
//! in `on_load`. Entries are not removed when a mod unloads; a mod that
//! registers content unregisters it in `on_unload`.
//!
//! [`ModLoader::register_registry`]: crate::ModLoader::register_registry
//! [`ModContext::registry`]: crate::ModContext::registry

use crate::error::{ModError, ModResult};
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Content that can be looked up by a unique id.
pub trait Identifiable: Send + Sync + 'static {
    /// The unique id.
    fn id(&self) -> &str;

    /// Display name.
    fn name(&self) -> &str;
}

/// A named, thread-safe table of content keyed by id.
pub struct Registry<T: Identifiable> {
    name: String,
    entries: RwLock<BTreeMap<String, Arc<T>>>,
}

impl<T: Identifiable> Registry<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Name used in logs and errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add an entry under its own id. Ids are never overwritten.
    pub fn register(&self, entry: T) -> ModResult<Arc<T>> {
        let id = entry.id().to_string();
        let mut entries = self.entries.write();
        if entries.contains_key(&id) {
            return Err(ModError::DuplicateEntry {
                registry: self.name.clone(),
                id,
            });
        }

        let entry = Arc::new(entry);
        entries.insert(id.clone(), Arc::clone(&entry));
        debug!(registry = %self.name, "Registered {} ({})", id, entry.name());
        Ok(entry)
    }

    pub fn get(&self, id: &str) -> Option<Arc<T>> {
        self.entries.read().get(id).cloned()
    }

    /// Every entry, sorted by id.
    pub fn all(&self) -> Vec<Arc<T>> {
        self.entries.read().values().cloned().collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.read().contains_key(id)
    }

    /// Remove an entry, returning it if it was registered.
    pub fn unregister(&self, id: &str) -> Option<Arc<T>> {
        let removed = self.entries.write().remove(id);
        if removed.is_some() {
            debug!(registry = %self.name, "Unregistered {}", id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// The registries published to mods, one per content type.
#[derive(Default)]
pub struct Registries {
    by_type: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl Registries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a registry. Fails if one for `T` is already published.
    pub fn insert<T: Identifiable>(&self, registry: Arc<Registry<T>>) -> ModResult<()> {
        let mut by_type = self.by_type.write();
        if by_type.contains_key(&TypeId::of::<T>()) {
            return Err(ModError::RegistryExists(registry.name().to_string()));
        }
        by_type.insert(TypeId::of::<T>(), registry);
        Ok(())
    }

    /// The registry for content type `T`, if one is published.
    pub fn get<T: Identifiable>(&self) -> Option<Arc<Registry<T>>> {
        let registry = self.by_type.read().get(&TypeId::of::<T>()).cloned()?;
        registry.downcast::<Registry<T>>().ok()
    }

    pub fn len(&self) -> usize {
        self.by_type.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.read().is_empty()
    }
}
