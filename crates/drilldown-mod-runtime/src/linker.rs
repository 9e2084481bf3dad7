//! Code units and the host loading path.
//!
//! A [`CodeUnit`] is the compiled code of one mod package, seen as a table of
//! named symbols. A [`CodeLoader`] opens the code unit for a discovered
//! package. The [`HostLinker`] is the host's own loading path, consulted by
//! every load scope for names outside the mod namespace.

use crate::discovery::PackagePath;
use crate::error::{RuntimeError, RuntimeResult};
use crate::scope::{Symbol, TypeHandle};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// The code of one mod package.
pub trait CodeUnit: Send + Sync {
    /// Look up a symbol by its fully-qualified name.
    fn lookup(&self, name: &str) -> Option<Symbol>;

    /// Release the underlying code. Called once, when the owning scope unloads.
    fn close(&self) {}
}

/// Opens the code unit of a package.
pub trait CodeLoader: Send + Sync {
    fn open(&self, package: &PackagePath) -> RuntimeResult<Box<dyn CodeUnit>>;
}

/// Resolves names on the host's own loading path.
pub trait HostLinker: Send + Sync {
    fn resolve(&self, name: &str) -> RuntimeResult<TypeHandle>;
}

/// A table of named symbols exported by a code unit.
#[derive(Default)]
pub struct ExportTable {
    symbols: HashMap<String, Symbol>,
}

impl ExportTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Export a value under a fully-qualified name.
    pub fn export<T: Any + Send + Sync>(&mut self, name: &str, value: T) -> &mut Self {
        self.symbols.insert(name.to_string(), Arc::new(value));
        self
    }

    /// Get the number of exported symbols.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

impl CodeUnit for ExportTable {
    fn lookup(&self, name: &str) -> Option<Symbol> {
        self.symbols.get(name).cloned()
    }
}

type UnitBuilder = Arc<dyn Fn(&mut ExportTable) + Send + Sync>;

/// Code units linked into the host binary.
///
/// Each registered unit is a builder that fills an [`ExportTable`]. Every
/// [`open`](CodeLoader::open) runs the builder again, so two scopes over the
/// same unit never share symbols.
#[derive(Default)]
pub struct LinkedCodeLoader {
    units: HashMap<String, UnitBuilder>,
}

impl LinkedCodeLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a code unit under a name.
    pub fn register<F>(&mut self, unit: &str, builder: F)
    where
        F: Fn(&mut ExportTable) + Send + Sync + 'static,
    {
        self.units.insert(unit.to_string(), Arc::new(builder));
    }

    /// Builder-style variant of [`register`](Self::register).
    pub fn with_unit<F>(mut self, unit: &str, builder: F) -> Self
    where
        F: Fn(&mut ExportTable) + Send + Sync + 'static,
    {
        self.register(unit, builder);
        self
    }

    /// Check if a code unit is registered.
    pub fn contains(&self, unit: &str) -> bool {
        self.units.contains_key(unit)
    }
}

impl CodeLoader for LinkedCodeLoader {
    fn open(&self, package: &PackagePath) -> RuntimeResult<Box<dyn CodeUnit>> {
        let unit = package.code_unit();
        let builder = self.units.get(&unit).ok_or_else(|| {
            RuntimeError::CodeUnit(format!("No linked code unit named '{}'", unit))
        })?;

        let mut exports = ExportTable::new();
        builder(&mut exports);
        debug!("Opened linked code unit '{}' ({} symbols)", unit, exports.len());
        Ok(Box::new(exports))
    }
}

/// The default [`HostLinker`]: a fixed table of host symbols.
///
/// Each name maps to exactly one [`TypeHandle`], created at registration
/// time, so every scope that delegates a name gets the identical handle.
#[derive(Default)]
pub struct HostTypes {
    types: HashMap<String, TypeHandle>,
}

impl HostTypes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a host symbol.
    pub fn register<T: Any + Send + Sync>(&mut self, name: &str, value: T) -> &mut Self {
        self.types
            .insert(name.to_string(), TypeHandle::host(name, Arc::new(value)));
        self
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl HostLinker for HostTypes {
    fn resolve(&self, name: &str) -> RuntimeResult<TypeHandle> {
        self.types
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::SymbolNotFound(name.to_string()))
    }
}

#[cfg(feature = "dylib")]
pub use native::{DylibCodeLoader, ExportsFn, EXPORTS_SYMBOL};

#[cfg(feature = "dylib")]
mod native {
    use super::*;
    use parking_lot::Mutex;

    /// Name of the registration function a native code unit must export.
    pub const EXPORTS_SYMBOL: &[u8] = b"drilldown_mod_exports";

    /// Signature of the registration function.
    ///
    /// The library must be built with the same compiler and crate versions
    /// as the host, since the table crosses the boundary as a Rust type.
    pub type ExportsFn = fn(&mut ExportTable);

    /// Loads code units from native libraries named by the manifest's `code`
    /// field, relative to the package directory.
    #[derive(Debug, Default)]
    pub struct DylibCodeLoader;

    impl DylibCodeLoader {
        pub fn new() -> Self {
            Self
        }
    }

    impl CodeLoader for DylibCodeLoader {
        fn open(&self, package: &PackagePath) -> RuntimeResult<Box<dyn CodeUnit>> {
            let file = package.manifest.module.code.as_deref().ok_or_else(|| {
                RuntimeError::CodeUnit(format!(
                    "Package {} does not name a library in `code`",
                    package.id()
                ))
            })?;
            let path = package.path.join(file);

            // SAFETY: loading a library runs its initialisers. Mod libraries
            // are trusted to the same degree as the rest of the package.
            let library = unsafe { libloading::Library::new(&path) }.map_err(|e| {
                RuntimeError::CodeUnit(format!("Failed to open {:?}: {}", path, e))
            })?;

            let mut exports = ExportTable::new();
            {
                // SAFETY: the symbol is declared with the `ExportsFn` signature.
                let register: libloading::Symbol<'_, ExportsFn> =
                    unsafe { library.get(EXPORTS_SYMBOL) }.map_err(|e| {
                        RuntimeError::CodeUnit(format!(
                            "{:?} does not export drilldown_mod_exports: {}",
                            path, e
                        ))
                    })?;
                (*register)(&mut exports);
            }

            debug!("Opened native code unit {:?} ({} symbols)", path, exports.len());
            Ok(Box::new(NativeUnit {
                exports: Mutex::new(Some(exports)),
                library: Mutex::new(Some(library)),
            }))
        }
    }

    struct NativeUnit {
        exports: Mutex<Option<ExportTable>>,
        library: Mutex<Option<libloading::Library>>,
    }

    impl CodeUnit for NativeUnit {
        fn lookup(&self, name: &str) -> Option<Symbol> {
            self.exports.lock().as_ref().and_then(|e| e.lookup(name))
        }

        fn close(&self) {
            // Symbols are dropped while their code is still mapped.
            self.exports.lock().take();
            self.library.lock().take();
        }
    }
}
