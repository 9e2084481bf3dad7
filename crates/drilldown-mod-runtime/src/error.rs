//! Error types for the mod runtime.

use crate::capability::SecurityViolation;
use thiserror::Error;

/// Errors that can occur while discovering packages or resolving mod code.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Mod package not found at the specified path.
    #[error("Mod package not found: {0}")]
    PackageNotFound(String),

    /// Failed to parse or validate a mod manifest.
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    /// A name could not be resolved by a scope or by the host.
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    /// The scope that owns a name or handle has been unloaded.
    #[error("Load scope for '{scope}' is unloaded, cannot resolve '{name}'")]
    ScopeUnloaded { scope: String, name: String },

    /// A resolved symbol is not of the requested type.
    #[error("'{name}' is not a {expected}")]
    TypeMismatch { name: String, expected: &'static str },

    /// The capability policy denied an operation.
    #[error(transparent)]
    AccessDenied(#[from] SecurityViolation),

    /// Failed to open a code unit.
    #[error("Code unit error: {0}")]
    CodeUnit(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;
