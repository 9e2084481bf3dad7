//! # drilldown-mod-api
//!
//! Mod API and mod loader for DrillDown.
//!
//! This crate provides the pieces mods and the host interact through:
//!
//! - The [`Mod`] lifecycle contract every mod entry type implements
//! - An [`EventBus`] for decoupled publish/subscribe between host and mods
//! - Typed content [`Registry`] tables the host publishes for mods to fill
//! - Sandboxed [`HostFunctions`], checked against the capability policy
//! - The [`ModLoader`], which discovers, validates, orders and drives mods
//!   through their lifecycle
//!
//! ## Writing a Mod
//!
//! A mod package exports a [`ModEntry`] under the name given as `entry` in
//! its manifest. The loader resolves it inside the package's own load scope,
//! instantiates it, checks host compatibility and calls [`Mod::on_load`].

pub mod content;
pub mod error;
pub mod events;
pub mod host;
pub mod lifecycle;
pub mod loader;
pub mod registry;

pub use content::{Identifiable, Registries, Registry};
pub use error::{BoxError, HookResult, LifecyclePhase, ModError, ModResult};
pub use events::{
    ConfigReloadedEvent, Delivery, Event, EventBus, EventSource, ModLoadedEvent, ModUnloadedEvent,
    SubscriberId, Subscriptions,
};
pub use host::{HostFunctions, LogLevel, ModContext, SandboxedHost};
pub use lifecycle::{Mod, ModDescriptor, ModEntry, ModState, Side, DEFAULT_LOAD_PRIORITY};
pub use loader::{LoadReport, LoaderConfig, ModLoader};
pub use registry::{LoadedMod, ModFailure, ModRegistry, ModStatus};
