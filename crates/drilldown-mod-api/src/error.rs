//! Error types for mod loading and event dispatch.

use crate::events::SubscriberId;
use crate::lifecycle::Side;
use drilldown_mod_runtime::{RuntimeError, SecurityViolation};
use std::any::Any;
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Error type returned by mod hooks and event handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result of a lifecycle hook or event handler.
pub type HookResult = std::result::Result<(), BoxError>;

/// The lifecycle hook during which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Load,
    Unload,
    ConfigReload,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LifecyclePhase::Load => "load",
            LifecyclePhase::Unload => "unload",
            LifecyclePhase::ConfigReload => "config reload",
        })
    }
}

/// Errors produced by the mod loader and the event bus.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModError {
    /// A package could not be turned into a mod instance.
    #[error("Discovery failed for {package}: {reason}")]
    Discovery { package: String, reason: String },

    /// The mod's declared host version bounds exclude the running host.
    #[error("Mod '{id}' requires host version {required}, host is {host}")]
    VersionIncompatible {
        id: String,
        required: String,
        host: String,
    },

    /// A lifecycle hook failed or panicked.
    #[error("Mod '{id}' failed during {phase}: {message}")]
    Lifecycle {
        id: String,
        phase: LifecyclePhase,
        message: String,
    },

    /// Another package already provides an active mod with this id.
    #[error("Mod id '{id}' from {package} is already in use")]
    DuplicateId { id: String, package: String },

    /// The capability policy denied an operation.
    #[error(transparent)]
    Security(#[from] SecurityViolation),

    /// An event handler failed or panicked.
    #[error("Handler of {subscriber} for {event} failed: {message}")]
    Handler {
        subscriber: SubscriberId,
        event: &'static str,
        message: String,
    },

    /// No active mod has this id.
    #[error("Mod not found: {0}")]
    NotFound(String),

    /// The mod is restricted to a side the host is not running as.
    #[error("Mod '{id}' does not apply to a {side} host")]
    NotApplicable { id: String, side: Side },

    /// A subscriber was registered twice.
    #[error("Subscriber {0} is already subscribed")]
    AlreadySubscribed(SubscriberId),

    /// A content registry already holds an entry with this id.
    #[error("Registry '{registry}' already contains '{id}'")]
    DuplicateEntry { registry: String, id: String },

    /// A registry for this content type is already published.
    #[error("A registry for the content type of '{0}' is already published")]
    RegistryExists(String),

    /// Invalid loader configuration.
    #[error("Invalid loader configuration: {0}")]
    Config(String),
}

impl ModError {
    /// Build a discovery error for a package, keeping policy denials intact.
    pub fn discovery(package: &Path, err: RuntimeError) -> Self {
        match err {
            RuntimeError::AccessDenied(violation) => ModError::Security(violation),
            other => ModError::Discovery {
                package: package.display().to_string(),
                reason: other.to_string(),
            },
        }
    }

    /// The mod id this error concerns, if any.
    pub fn mod_id(&self) -> Option<&str> {
        match self {
            ModError::VersionIncompatible { id, .. }
            | ModError::Lifecycle { id, .. }
            | ModError::DuplicateId { id, .. }
            | ModError::NotApplicable { id, .. } => Some(id),
            ModError::NotFound(id) => Some(id),
            _ => None,
        }
    }
}

/// Result type for loader operations.
pub type ModResult<T> = std::result::Result<T, ModError>;

/// Render a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
