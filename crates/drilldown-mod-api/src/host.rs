//! Host functions exposed to mods.
//!
//! Mods reach the outside world only through [`HostFunctions`]. Every call
//! is checked against the capability policy before anything is touched; a
//! denied call fails with [`RuntimeError::AccessDenied`] and has no effect.

use crate::content::{Identifiable, Registries, Registry};
use crate::events::EventBus;
use drilldown_mod_runtime::{
    resolve_path, CapabilityPolicy, HostLinker, LoadScope, Operation, RuntimeError, RuntimeResult,
    TypeHandle,
};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::Arc;

/// Host functions available to mods.
pub trait HostFunctions: Send + Sync {
    /// Read a file.
    ///
    /// Requires: `Operation::FileRead`
    fn read_file(&self, path: &Path) -> RuntimeResult<Vec<u8>>;

    /// Read a file as UTF-8 text.
    ///
    /// Requires: `Operation::FileRead`
    fn read_to_string(&self, path: &Path) -> RuntimeResult<String>;

    /// Write a file.
    ///
    /// Requires: `Operation::FileWrite`
    fn write_file(&self, path: &Path, contents: &[u8]) -> RuntimeResult<()>;

    /// Delete a file.
    ///
    /// Requires: `Operation::FileDelete`
    fn delete_file(&self, path: &Path) -> RuntimeResult<()>;

    /// Open a TCP connection.
    ///
    /// Requires: `Operation::NetConnect`
    fn connect(&self, host: &str, port: u16) -> RuntimeResult<TcpStream>;

    /// Listen for TCP connections.
    ///
    /// Requires: `Operation::NetListen`
    fn listen(&self, addr: &str) -> RuntimeResult<TcpListener>;

    /// Run a program to completion.
    ///
    /// Requires: `Operation::ProcessExec`
    fn exec(&self, program: &str, args: &[&str]) -> RuntimeResult<Output>;

    /// Link a native library into the process.
    ///
    /// Requires: `Operation::NativeLink`
    fn link_native(&self, library: &str) -> RuntimeResult<()>;

    /// Look up a host type by fully-qualified name for inspection.
    ///
    /// Requires: `Operation::Introspect` on the name's namespace
    fn introspect(&self, name: &str) -> RuntimeResult<TypeHandle>;

    /// Log a message (always allowed).
    fn log(&self, level: LogLevel, message: &str);
}

/// Log level for mod logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Default host functions, checked against a capability policy.
pub struct SandboxedHost {
    /// Mod ID for logging.
    mod_id: String,

    policy: Arc<dyn CapabilityPolicy>,

    /// Host loading path, for introspection.
    linker: Arc<dyn HostLinker>,
}

impl SandboxedHost {
    pub fn new(
        mod_id: impl Into<String>,
        policy: Arc<dyn CapabilityPolicy>,
        linker: Arc<dyn HostLinker>,
    ) -> Self {
        Self {
            mod_id: mod_id.into(),
            policy,
            linker,
        }
    }

    fn check(&self, op: Operation) -> RuntimeResult<()> {
        self.policy.check(&op).map_err(|violation| {
            tracing::warn!(mod_id = %self.mod_id, "{}", violation);
            RuntimeError::AccessDenied(violation)
        })
    }
}

impl HostFunctions for SandboxedHost {
    // Reads open the resolved path that was checked, never the original.
    fn read_file(&self, path: &Path) -> RuntimeResult<Vec<u8>> {
        let path = resolve_path(path);
        self.check(Operation::FileRead(path.clone()))?;
        Ok(std::fs::read(&path)?)
    }

    fn read_to_string(&self, path: &Path) -> RuntimeResult<String> {
        let path = resolve_path(path);
        self.check(Operation::FileRead(path.clone()))?;
        Ok(std::fs::read_to_string(&path)?)
    }

    fn write_file(&self, path: &Path, contents: &[u8]) -> RuntimeResult<()> {
        self.check(Operation::FileWrite(path.to_path_buf()))?;
        Ok(std::fs::write(path, contents)?)
    }

    fn delete_file(&self, path: &Path) -> RuntimeResult<()> {
        self.check(Operation::FileDelete(path.to_path_buf()))?;
        Ok(std::fs::remove_file(path)?)
    }

    fn connect(&self, host: &str, port: u16) -> RuntimeResult<TcpStream> {
        self.check(Operation::NetConnect {
            host: host.to_string(),
            port,
        })?;
        Ok(TcpStream::connect((host, port))?)
    }

    fn listen(&self, addr: &str) -> RuntimeResult<TcpListener> {
        self.check(Operation::NetListen(addr.to_string()))?;
        Ok(TcpListener::bind(addr)?)
    }

    fn exec(&self, program: &str, args: &[&str]) -> RuntimeResult<Output> {
        self.check(Operation::ProcessExec(program.to_string()))?;
        Ok(Command::new(program).args(args).output()?)
    }

    fn link_native(&self, library: &str) -> RuntimeResult<()> {
        self.check(Operation::NativeLink(library.to_string()))?;
        Err(RuntimeError::CodeUnit(format!(
            "No native linker available for '{}'",
            library
        )))
    }

    fn introspect(&self, name: &str) -> RuntimeResult<TypeHandle> {
        let namespace = name.rsplit_once('.').map(|(ns, _)| ns).unwrap_or(name);
        self.check(Operation::Introspect(namespace.to_string()))?;
        self.linker.resolve(name)
    }

    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Trace => tracing::trace!(mod_id = %self.mod_id, "{}", message),
            LogLevel::Debug => tracing::debug!(mod_id = %self.mod_id, "{}", message),
            LogLevel::Info => tracing::info!(mod_id = %self.mod_id, "{}", message),
            LogLevel::Warn => tracing::warn!(mod_id = %self.mod_id, "{}", message),
            LogLevel::Error => tracing::error!(mod_id = %self.mod_id, "{}", message),
        }
    }
}

/// Everything a mod is handed by the loader.
#[derive(Clone)]
pub struct ModContext {
    mod_id: String,
    package_dir: PathBuf,
    host: Arc<dyn HostFunctions>,
    bus: Arc<EventBus>,
    scope: Arc<LoadScope>,
    registries: Arc<Registries>,
}

impl ModContext {
    pub fn new(
        mod_id: impl Into<String>,
        package_dir: PathBuf,
        host: Arc<dyn HostFunctions>,
        bus: Arc<EventBus>,
        scope: Arc<LoadScope>,
        registries: Arc<Registries>,
    ) -> Self {
        Self {
            mod_id: mod_id.into(),
            package_dir,
            host,
            bus,
            scope,
            registries,
        }
    }

    pub fn mod_id(&self) -> &str {
        &self.mod_id
    }

    /// The mod's package directory.
    pub fn package_dir(&self) -> &Path {
        &self.package_dir
    }

    /// Sandboxed host functions.
    pub fn host(&self) -> &dyn HostFunctions {
        self.host.as_ref()
    }

    /// The event bus shared by host and mods.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// The host's registry for content type `T`.
    pub fn registry<T: Identifiable>(&self) -> Option<Arc<Registry<T>>> {
        self.registries.get::<T>()
    }

    /// Resolve a name through the mod's own load scope.
    pub fn resolve(&self, name: &str) -> RuntimeResult<TypeHandle> {
        self.scope.resolve(name)
    }

    /// Read a file relative to the package directory.
    pub fn read_package_file(&self, relative: &str) -> RuntimeResult<String> {
        self.host.read_to_string(&self.package_dir.join(relative))
    }
}
