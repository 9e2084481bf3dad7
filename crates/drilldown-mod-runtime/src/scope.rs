//! Isolated load scopes.
//!
//! A [`LoadScope`] resolves code names for exactly one mod package. Names in
//! the mod namespace (starting with `mod.` or containing `.mod.`) come from
//! the package's own [`CodeUnit`]; every other name is delegated to the
//! host's [`HostLinker`], so all scopes share a single definition of each
//! host type.
//!
//! Every resolution is checked against the capability policy first. Results
//! are cached per scope. Unloading a scope clears the cache, closes the code
//! unit and invalidates every [`TypeHandle`] the scope produced.

use crate::capability::{CapabilityPolicy, Operation};
use crate::error::{RuntimeError, RuntimeResult};
use crate::linker::{CodeUnit, HostLinker};
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// A resolved code item.
pub type Symbol = Arc<dyn Any + Send + Sync>;

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a load scope, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u64);

impl ScopeId {
    fn next() -> Self {
        ScopeId(NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope-{}", self.0)
    }
}

/// Where a [`TypeHandle`] was defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Shared host code.
    Host,
    /// Code owned by one load scope.
    Scope(ScopeId),
}

/// A handle to a resolved code item.
///
/// Two handles are equal only if they come from the same origin and point at
/// the same symbol. Handles from a scope stop working once it is unloaded.
#[derive(Clone)]
pub struct TypeHandle {
    name: Arc<str>,
    origin: Origin,
    symbol: Symbol,
    alive: Arc<AtomicBool>,
}

impl TypeHandle {
    /// Create a host handle. Host handles never become invalid.
    pub fn host(name: &str, symbol: Symbol) -> Self {
        Self {
            name: Arc::from(name),
            origin: Origin::Host,
            symbol,
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    fn scoped(name: &str, scope: ScopeId, symbol: Symbol, alive: Arc<AtomicBool>) -> Self {
        Self {
            name: Arc::from(name),
            origin: Origin::Scope(scope),
            symbol,
            alive,
        }
    }

    /// The fully-qualified name this handle was resolved from.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Whether the owning scope is still loaded.
    pub fn is_valid(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Access the symbol as a concrete type.
    pub fn downcast<T: Any + Send + Sync>(&self) -> RuntimeResult<Arc<T>> {
        if !self.is_valid() {
            return Err(RuntimeError::ScopeUnloaded {
                scope: self.origin_label(),
                name: self.name.to_string(),
            });
        }

        Arc::clone(&self.symbol)
            .downcast::<T>()
            .map_err(|_| RuntimeError::TypeMismatch {
                name: self.name.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    fn origin_label(&self) -> String {
        match self.origin {
            Origin::Host => "host".to_string(),
            Origin::Scope(id) => id.to_string(),
        }
    }
}

impl PartialEq for TypeHandle {
    fn eq(&self, other: &Self) -> bool {
        self.origin == other.origin
            && std::ptr::eq(
                Arc::as_ptr(&self.symbol) as *const (),
                Arc::as_ptr(&other.symbol) as *const (),
            )
    }
}

impl Eq for TypeHandle {}

impl fmt::Debug for TypeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeHandle")
            .field("name", &self.name)
            .field("origin", &self.origin)
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// Check whether a name belongs to a mod's own namespace.
pub fn is_mod_namespace(name: &str) -> bool {
    name.starts_with("mod.") || name.contains(".mod.")
}

/// The isolation boundary for one mod package.
pub struct LoadScope {
    id: ScopeId,
    label: String,
    unit: RwLock<Option<Box<dyn CodeUnit>>>,
    cache: RwLock<HashMap<String, TypeHandle>>,
    alive: Arc<AtomicBool>,
    host: Arc<dyn HostLinker>,
    policy: Arc<dyn CapabilityPolicy>,
}

impl LoadScope {
    /// Create a scope over a package's code unit.
    pub fn new(
        label: impl Into<String>,
        unit: Box<dyn CodeUnit>,
        host: Arc<dyn HostLinker>,
        policy: Arc<dyn CapabilityPolicy>,
    ) -> Self {
        let scope = Self {
            id: ScopeId::next(),
            label: label.into(),
            unit: RwLock::new(Some(unit)),
            cache: RwLock::new(HashMap::new()),
            alive: Arc::new(AtomicBool::new(true)),
            host,
            policy,
        };
        debug!(scope = %scope.id, package = %scope.label, "Created load scope");
        scope
    }

    pub fn id(&self) -> ScopeId {
        self.id
    }

    /// The package this scope was created for.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_unloaded(&self) -> bool {
        !self.alive.load(Ordering::Acquire)
    }

    /// Number of names currently cached.
    pub fn resolved_count(&self) -> usize {
        self.cache.read().len()
    }

    /// Resolve a fully-qualified name.
    pub fn resolve(&self, name: &str) -> RuntimeResult<TypeHandle> {
        if self.is_unloaded() {
            return Err(self.unloaded_error(name));
        }

        if let Some(handle) = self.cache.read().get(name) {
            return Ok(handle.clone());
        }

        self.policy.check(&Operation::LoadCode(name.to_string()))?;

        let handle = if is_mod_namespace(name) {
            let unit = self.unit.read();
            let unit = unit.as_ref().ok_or_else(|| self.unloaded_error(name))?;
            let symbol = unit
                .lookup(name)
                .ok_or_else(|| RuntimeError::SymbolNotFound(name.to_string()))?;
            TypeHandle::scoped(name, self.id, symbol, Arc::clone(&self.alive))
        } else {
            self.host.resolve(name)?
        };

        // A concurrent resolve may have won; keep whichever handle got in first.
        let mut cache = self.cache.write();
        let handle = cache.entry(name.to_string()).or_insert(handle).clone();
        Ok(handle)
    }

    /// Unload the scope. Calling this more than once is a no-op.
    pub fn unload(&self) {
        if !self.alive.swap(false, Ordering::AcqRel) {
            return;
        }

        // Drop cached symbols before the code that defines them goes away.
        self.cache.write().clear();
        if let Some(unit) = self.unit.write().take() {
            unit.close();
        }
        debug!(scope = %self.id, package = %self.label, "Unloaded load scope");
    }

    fn unloaded_error(&self, name: &str) -> RuntimeError {
        RuntimeError::ScopeUnloaded {
            scope: self.label.clone(),
            name: name.to_string(),
        }
    }
}

impl Drop for LoadScope {
    fn drop(&mut self) {
        self.unload();
    }
}

impl fmt::Debug for LoadScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadScope")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("unloaded", &self.is_unloaded())
            .finish()
    }
}
