//! # drilldown-mod-runtime
//!
//! Building blocks for hosting DrillDown mods.
//!
//! This crate provides:
//! - Mod package discovery from a mods directory
//! - Mod manifest parsing (`mod.toml` or `mod.json`)
//! - Host version comparison
//! - A deny-by-default capability policy
//! - Isolated load scopes that resolve a mod's own code units and delegate
//!   everything else to the host's loading path
//!
//! ## Package Structure
//!
//! Mod packages are directories containing:
//! - `mod.toml` (or `mod.json`) - Mod metadata and entry point
//! - The mod's code unit, either linked into the host or a native library
//!   named by the manifest's `code` field (requires the `dylib` feature)
//!
//! ## Security Model
//!
//! Every sensitive operation is described as an [`Operation`] and checked
//! against a fixed [`PolicyTable`]. The table is built once and never
//! mutated; checks are pure functions of the operation and the table.

pub mod capability;
pub mod discovery;
pub mod error;
pub mod linker;
pub mod manifest;
pub mod scope;
pub mod version;

pub use capability::{
    resolve_path, CapabilityPolicy, Operation, OperationKind, PolicyEnforcer, PolicyTable,
    SecurityViolation,
};
pub use discovery::{discover_package, discover_packages, PackageCandidate, PackagePath};
pub use error::{RuntimeError, RuntimeResult};
pub use linker::{CodeLoader, CodeUnit, ExportTable, HostLinker, HostTypes, LinkedCodeLoader};
pub use manifest::{ModManifest, ModSection};
pub use scope::{LoadScope, Origin, ScopeId, Symbol, TypeHandle};
pub use version::Version;

#[cfg(feature = "dylib")]
pub use linker::DylibCodeLoader;
