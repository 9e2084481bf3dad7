//! Capability policy for mods.
//!
//! Every security-sensitive operation is expressed as an [`Operation`] and
//! checked against a [`PolicyTable`] before it is performed. The policy is
//! deny-by-default with a handful of narrow allow rules:
//!
//! | Operation            | Allowed when                                        |
//! |----------------------|-----------------------------------------------------|
//! | File read            | path is under the mods directory or an asset dir    |
//! | File write / delete  | never                                               |
//! | Network connect/listen | never                                             |
//! | Process execution    | never                                               |
//! | Native linking       | never                                               |
//! | Introspection        | target namespace is not the host's internal one     |
//! | Code loading         | name is not under a blocked namespace               |
//! | Runtime operations   | operation is `set_io`                               |
//!
//! The table is fixed when the enforcer is constructed. Checks hold no state
//! between calls, so an enforcer can be shared freely across threads.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Runtime operations that are permitted.
const ALLOWED_RUNTIME_OPERATIONS: &[&str] = &["set_io"];

/// The kind of a sensitive operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Read a file.
    FileRead,

    /// Create or modify a file.
    FileWrite,

    /// Remove a file.
    FileDelete,

    /// Open an outbound network connection.
    NetConnect,

    /// Accept inbound network connections.
    NetListen,

    /// Spawn a subprocess.
    ProcessExec,

    /// Link a native library.
    NativeLink,

    /// Inspect the internals of another namespace.
    Introspect,

    /// Resolve a named code unit.
    LoadCode,

    /// Change process-wide runtime settings.
    Runtime,
}

impl OperationKind {
    /// Parse an operation kind from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "file_read" => Some(OperationKind::FileRead),
            "file_write" => Some(OperationKind::FileWrite),
            "file_delete" => Some(OperationKind::FileDelete),
            "net_connect" => Some(OperationKind::NetConnect),
            "net_listen" => Some(OperationKind::NetListen),
            "process_exec" => Some(OperationKind::ProcessExec),
            "native_link" => Some(OperationKind::NativeLink),
            "introspect" => Some(OperationKind::Introspect),
            "load_code" => Some(OperationKind::LoadCode),
            "runtime" => Some(OperationKind::Runtime),
            _ => None,
        }
    }

    /// Convert the operation kind to its string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::FileRead => "file_read",
            OperationKind::FileWrite => "file_write",
            OperationKind::FileDelete => "file_delete",
            OperationKind::NetConnect => "net_connect",
            OperationKind::NetListen => "net_listen",
            OperationKind::ProcessExec => "process_exec",
            OperationKind::NativeLink => "native_link",
            OperationKind::Introspect => "introspect",
            OperationKind::LoadCode => "load_code",
            OperationKind::Runtime => "runtime",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sensitive operation together with its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    FileRead(PathBuf),
    FileWrite(PathBuf),
    FileDelete(PathBuf),
    NetConnect { host: String, port: u16 },
    NetListen(String),
    ProcessExec(String),
    NativeLink(String),
    /// Introspective access into the given namespace.
    Introspect(String),
    /// Resolution of a fully-qualified code name.
    LoadCode(String),
    Runtime(String),
}

impl Operation {
    /// The kind of this operation.
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::FileRead(_) => OperationKind::FileRead,
            Operation::FileWrite(_) => OperationKind::FileWrite,
            Operation::FileDelete(_) => OperationKind::FileDelete,
            Operation::NetConnect { .. } => OperationKind::NetConnect,
            Operation::NetListen(_) => OperationKind::NetListen,
            Operation::ProcessExec(_) => OperationKind::ProcessExec,
            Operation::NativeLink(_) => OperationKind::NativeLink,
            Operation::Introspect(_) => OperationKind::Introspect,
            Operation::LoadCode(_) => OperationKind::LoadCode,
            Operation::Runtime(_) => OperationKind::Runtime,
        }
    }

    /// A printable rendering of the operation target.
    pub fn target(&self) -> String {
        match self {
            Operation::FileRead(path) | Operation::FileWrite(path) | Operation::FileDelete(path) => {
                path.display().to_string()
            }
            Operation::NetConnect { host, port } => format!("{}:{}", host, port),
            Operation::NetListen(target)
            | Operation::ProcessExec(target)
            | Operation::NativeLink(target)
            | Operation::Introspect(target)
            | Operation::LoadCode(target)
            | Operation::Runtime(target) => target.clone(),
        }
    }
}

/// A denied operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Security violation: {kind} denied for '{target}'")]
pub struct SecurityViolation {
    pub kind: OperationKind,
    pub target: String,
}

impl SecurityViolation {
    fn of(op: &Operation) -> Self {
        Self {
            kind: op.kind(),
            target: op.target(),
        }
    }
}

/// Decides whether an operation may proceed.
pub trait CapabilityPolicy: Send + Sync {
    /// Check an operation, failing with a [`SecurityViolation`] if it is denied.
    fn check(&self, op: &Operation) -> Result<(), SecurityViolation>;
}

/// The fixed rule table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyTable {
    /// Directory holding mod packages. Reads below it are allowed.
    pub mods_dir: PathBuf,

    /// Public host asset directories. Reads below them are allowed.
    pub asset_dirs: Vec<PathBuf>,

    /// The host's internal namespace, closed to introspection.
    pub host_namespace: String,

    /// Namespace prefixes that may never be resolved as code.
    pub blocked_namespaces: Vec<String>,
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self {
            mods_dir: PathBuf::from("mods"),
            asset_dirs: vec![PathBuf::from("assets")],
            host_namespace: "drilldown.".to_string(),
            blocked_namespaces: default_blocked_namespaces(),
        }
    }
}

/// Namespaces blocked from code resolution unless configured otherwise.
pub fn default_blocked_namespaces() -> Vec<String> {
    vec![
        "drilldown.internal.".to_string(),
        "host.management.".to_string(),
        "host.instrument.".to_string(),
        "sys.".to_string(),
    ]
}

/// The default [`CapabilityPolicy`], enforcing a [`PolicyTable`].
#[derive(Debug, Clone)]
pub struct PolicyEnforcer {
    mods_dir: PathBuf,
    asset_dirs: Vec<PathBuf>,
    host_namespace: String,
    blocked_namespaces: Vec<String>,
}

impl PolicyEnforcer {
    /// Create an enforcer for the given table.
    ///
    /// Directories are resolved to their real location once, here.
    pub fn new(table: PolicyTable) -> Self {
        Self {
            mods_dir: resolve_path(&table.mods_dir),
            asset_dirs: table.asset_dirs.iter().map(|d| resolve_path(d)).collect(),
            host_namespace: table.host_namespace,
            blocked_namespaces: table.blocked_namespaces,
        }
    }

    fn is_readable(&self, path: &Path) -> bool {
        let path = resolve_path(path);
        path.starts_with(&self.mods_dir) || self.asset_dirs.iter().any(|dir| path.starts_with(dir))
    }

    fn is_host_internal(&self, namespace: &str) -> bool {
        let root = self.host_namespace.trim_end_matches('.');
        namespace == root || namespace.starts_with(&self.host_namespace)
    }

    fn is_blocked(&self, name: &str) -> bool {
        self.blocked_namespaces
            .iter()
            .any(|prefix| name.starts_with(prefix.as_str()))
    }
}

impl CapabilityPolicy for PolicyEnforcer {
    fn check(&self, op: &Operation) -> Result<(), SecurityViolation> {
        let allowed = match op {
            Operation::FileRead(path) => self.is_readable(path),
            Operation::FileWrite(_)
            | Operation::FileDelete(_)
            | Operation::NetConnect { .. }
            | Operation::NetListen(_)
            | Operation::ProcessExec(_)
            | Operation::NativeLink(_) => false,
            Operation::Introspect(namespace) => !self.is_host_internal(namespace),
            Operation::LoadCode(name) => !self.is_blocked(name),
            Operation::Runtime(name) => ALLOWED_RUNTIME_OPERATIONS.contains(&name.as_str()),
        };

        if allowed {
            Ok(())
        } else {
            let violation = SecurityViolation::of(op);
            debug!(kind = %violation.kind, target = %violation.target, "Denied operation");
            Err(violation)
        }
    }
}

/// The real location of a path, with every symlink resolved.
///
/// A path that does not exist yet resolves through its deepest existing
/// ancestor. File reads are checked and performed on this path.
pub fn resolve_path(path: &Path) -> PathBuf {
    let lexical = absolutize(path);
    if let Ok(real) = std::fs::canonicalize(&lexical) {
        return real;
    }

    let mut missing = Vec::new();
    let mut current = lexical.as_path();
    while let Some(parent) = current.parent() {
        if let Some(name) = current.file_name() {
            missing.push(name.to_os_string());
        }
        current = parent;
        if let Ok(real) = std::fs::canonicalize(current) {
            return missing.iter().rev().fold(real, |path, name| path.join(name));
        }
    }
    lexical
}

/// Make a path absolute and lexically normalise `.` and `..` components.
fn absolutize(path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}
