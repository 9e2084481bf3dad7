//! Event bus for communication between host and mods.
//!
//! Subscribers build a [`Subscriptions`] list of typed handlers and register
//! it under a [`SubscriberId`]. Posting an event runs every handler for the
//! event's exact type, in registration order, on the posting thread.
//!
//! Delivery is by exact type only: a handler for one event type never sees
//! events of another type, however the two are related.
//!
//! A handler that returns an error or panics is logged and skipped; the
//! remaining handlers still run and the poster never sees the failure.

use crate::error::{panic_message, HookResult, ModError, ModResult};
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, trace, warn};
use uuid::Uuid;

/// The originator of an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventSource {
    /// The host application.
    Host,
    /// The mod loader itself.
    Loader,
    /// A mod, by id.
    Mod(String),
}

/// An event that can be posted on the bus.
pub trait Event: Any + Send + Sync {
    /// Who posted the event.
    fn source(&self) -> &EventSource;
}

/// Identity of a subscriber on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscriber-{}", self.0)
    }
}

type ErasedHandler = Arc<dyn Fn(&dyn Any) -> HookResult + Send + Sync>;

struct PendingHandler {
    event_type: TypeId,
    event_name: &'static str,
    handler: ErasedHandler,
}

/// A list of typed handlers, built by a subscriber.
///
/// ```
/// use drilldown_mod_api::{Event, EventSource, Subscriptions};
///
/// struct GameInit {
///     source: EventSource,
/// }
///
/// impl Event for GameInit {
///     fn source(&self) -> &EventSource {
///         &self.source
///     }
/// }
///
/// let subscriptions = Subscriptions::new().on(|_event: &GameInit| Ok(()));
/// assert_eq!(subscriptions.len(), 1);
/// ```
#[derive(Default)]
pub struct Subscriptions {
    handlers: Vec<PendingHandler>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler for events of type `E`.
    pub fn on<E, F>(mut self, handler: F) -> Self
    where
        E: Event,
        F: Fn(&E) -> HookResult + Send + Sync + 'static,
    {
        let erased: ErasedHandler =
            Arc::new(move |event: &dyn Any| match event.downcast_ref::<E>() {
                Some(event) => handler(event),
                None => Ok(()),
            });
        self.handlers.push(PendingHandler {
            event_type: TypeId::of::<E>(),
            event_name: std::any::type_name::<E>(),
            handler: erased,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[derive(Clone)]
struct Registration {
    subscriber: SubscriberId,
    event_name: &'static str,
    handler: ErasedHandler,
}

#[derive(Default)]
struct HandlerTable {
    handlers: HashMap<TypeId, Arc<Vec<Registration>>>,
    subscribers: HashSet<SubscriberId>,
}

/// Outcome of posting one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Handlers invoked.
    pub delivered: usize,
    /// Handlers among them that failed.
    pub failed: usize,
}

/// Process-wide publish/subscribe registry.
#[derive(Default)]
pub struct EventBus {
    table: RwLock<HandlerTable>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber's handlers.
    ///
    /// Each handler is appended to its event type's list. Registering the
    /// same subscriber twice is a configuration error.
    pub fn subscribe(
        &self,
        subscriber: SubscriberId,
        subscriptions: Subscriptions,
    ) -> ModResult<usize> {
        let mut table = self.table.write();
        if !table.subscribers.insert(subscriber) {
            return Err(ModError::AlreadySubscribed(subscriber));
        }

        let count = subscriptions.handlers.len();
        for pending in subscriptions.handlers {
            let list = table.handlers.entry(pending.event_type).or_default();
            Arc::make_mut(list).push(Registration {
                subscriber,
                event_name: pending.event_name,
                handler: pending.handler,
            });
        }

        trace!(%subscriber, handlers = count, "Subscribed");
        Ok(count)
    }

    /// Remove every handler registered by a subscriber.
    ///
    /// Returns the number of handlers removed.
    pub fn unsubscribe(&self, subscriber: SubscriberId) -> usize {
        let mut table = self.table.write();
        if !table.subscribers.remove(&subscriber) {
            return 0;
        }

        let mut removed = 0;
        table.handlers.retain(|_, list| {
            let before = list.len();
            if list.iter().any(|r| r.subscriber == subscriber) {
                Arc::make_mut(list).retain(|r| r.subscriber != subscriber);
            }
            removed += before - list.len();
            !list.is_empty()
        });

        trace!(%subscriber, handlers = removed, "Unsubscribed");
        removed
    }

    /// Deliver an event to every handler registered for its exact type.
    pub fn post<E: Event>(&self, event: &E) -> Delivery {
        // Dispatch works on a snapshot; handlers may subscribe, unsubscribe or
        // post without deadlocking, and late subscribers miss this event.
        let snapshot = self.table.read().handlers.get(&TypeId::of::<E>()).cloned();
        let Some(registrations) = snapshot else {
            trace!(event = std::any::type_name::<E>(), "No handlers, event dropped");
            return Delivery::default();
        };

        let mut delivery = Delivery::default();
        for registration in registrations.iter() {
            delivery.delivered += 1;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                (registration.handler)(event as &dyn Any)
            }));

            let (message, panicked) = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => (e.to_string(), false),
                Err(payload) => (panic_message(payload.as_ref()), true),
            };

            delivery.failed += 1;
            let err = ModError::Handler {
                subscriber: registration.subscriber,
                event: registration.event_name,
                message,
            };
            if panicked {
                error!("{} (panicked)", err);
            } else {
                warn!("{}", err);
            }
        }

        delivery
    }

    /// Number of handlers registered for event type `E`.
    pub fn handler_count<E: Event>(&self) -> usize {
        self.table
            .read()
            .handlers
            .get(&TypeId::of::<E>())
            .map(|list| list.len())
            .unwrap_or(0)
    }

    pub fn is_subscribed(&self, subscriber: SubscriberId) -> bool {
        self.table.read().subscribers.contains(&subscriber)
    }

    pub fn subscriber_count(&self) -> usize {
        self.table.read().subscribers.len()
    }
}

/// Posted by the loader after a mod becomes active.
#[derive(Debug, Clone)]
pub struct ModLoadedEvent {
    pub source: EventSource,
    pub mod_id: String,
    /// Package directory the mod was loaded from.
    pub package: PathBuf,
}

impl Event for ModLoadedEvent {
    fn source(&self) -> &EventSource {
        &self.source
    }
}

/// Posted by the loader after a mod has been unloaded.
#[derive(Debug, Clone)]
pub struct ModUnloadedEvent {
    pub source: EventSource,
    pub mod_id: String,
}

impl Event for ModUnloadedEvent {
    fn source(&self) -> &EventSource {
        &self.source
    }
}

/// Posted by the loader after active mods were told the configuration changed.
#[derive(Debug, Clone)]
pub struct ConfigReloadedEvent {
    pub source: EventSource,
}

impl Event for ConfigReloadedEvent {
    fn source(&self) -> &EventSource {
        &self.source
    }
}
