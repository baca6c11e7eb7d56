//! Event dispatch bus
//!
//! Named events fan out to subscriber callbacks, synchronously and in
//! subscription order. A failing or panicking subscriber is logged and skipped;
//! delivery continues with the next one.
//!
//! Subscribers may publish further events from inside a callback. The
//! registry lock is released before any callback runs, so nested publishes and
//! subscribes never deadlock.
//!
//! ```ignore
//! let bus = EventBus::new();
//! let id = bus.subscribe("said", |event| {
//!     tracing::info!(text = ?event.text("text"), "said");
//!     Ok(())
//! });
//! bus.unsubscribe(id);
//! ```

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use lobbyist_core::User;
use tracing::{error, warn};

use crate::client::Client;
use crate::connection::Connection;
use crate::protocol::Message;

/// Error type subscribers may return
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result type subscribers return
pub type HandlerResult = Result<(), HandlerError>;

type Handler = Arc<dyn Fn(&Event) -> HandlerResult + Send + Sync>;

/// Handle returned from [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Auxiliary value attached to an event
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    User(User),
    Duration(Duration),
    Lines(Vec<String>),
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<User> for Value {
    fn from(u: User) -> Self {
        Value::User(u)
    }
}

impl From<Duration> for Value {
    fn from(d: Duration) -> Self {
        Value::Duration(d)
    }
}

impl From<Vec<String>> for Value {
    fn from(lines: Vec<String>) -> Self {
        Value::Lines(lines)
    }
}

/// A published event
///
/// Carries the parsed message (if any), the stable client handle, the
/// connection the message arrived on, and named context values.
#[derive(Clone)]
pub struct Event {
    name: String,
    message: Option<Arc<Message>>,
    client: Option<Client>,
    connection: Option<Arc<Connection>>,
    context: Vec<(&'static str, Value)>,
}

impl Event {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: None,
            client: None,
            connection: None,
            context: Vec::new(),
        }
    }

    /// A new event that inherits message, client and connection from `parent`
    pub fn derive(name: impl Into<String>, parent: &Event) -> Self {
        Self {
            name: name.into(),
            message: parent.message.clone(),
            client: parent.client.clone(),
            connection: parent.connection.clone(),
            context: Vec::new(),
        }
    }

    pub fn with_message(mut self, message: Arc<Message>) -> Self {
        self.message = Some(message);
        self
    }

    pub fn with_client(mut self, client: Option<Client>) -> Self {
        self.client = client;
        self
    }

    pub fn with_connection(mut self, connection: Arc<Connection>) -> Self {
        self.connection = Some(connection);
        self
    }

    /// Attach a named context value
    pub fn with(mut self, key: &'static str, value: impl Into<Value>) -> Self {
        self.context.push((key, value.into()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message(&self) -> Option<&Message> {
        self.message.as_deref()
    }

    /// Stable handle of the client that produced this event
    pub fn client(&self) -> Option<&Client> {
        self.client.as_ref()
    }

    /// Connection the underlying line arrived on
    pub fn connection(&self) -> Option<&Arc<Connection>> {
        self.connection.as_ref()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.context.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(Value::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub fn user(&self, key: &str) -> Option<&User> {
        match self.get(key) {
            Some(Value::User(u)) => Some(u),
            _ => None,
        }
    }

    pub fn duration(&self, key: &str) -> Option<Duration> {
        match self.get(key) {
            Some(Value::Duration(d)) => Some(*d),
            _ => None,
        }
    }

    pub fn lines(&self, key: &str) -> Option<&[String]> {
        match self.get(key) {
            Some(Value::Lines(l)) => Some(l),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.name)
            .field("message", &self.message)
            .field("netid", &self.connection.as_ref().map(|c| c.netid()))
            .field("context", &self.context)
            .finish()
    }
}

#[derive(Default)]
struct Registry {
    handlers: HashMap<String, Vec<(SubscriptionId, Handler)>>,
    next_id: u64,
    core_installed: bool,
}

/// Publish/subscribe registry shared by every client that uses it
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<RwLock<Registry>>,
}

impl EventBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for an event name
    pub fn subscribe<F>(&self, event: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        let id = SubscriptionId(registry.next_id);
        registry.next_id += 1;
        registry
            .handlers
            .entry(event.to_string())
            .or_default()
            .push((id, Arc::new(callback)));

        tracing::debug!(event = %event, id = id.0, "Registered subscriber");
        id
    }

    /// Remove a subscription. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        for handlers in registry.handlers.values_mut() {
            if let Some(idx) = handlers.iter().position(|(sid, _)| *sid == id) {
                handlers.remove(idx);
                return true;
            }
        }
        false
    }

    /// Deliver an event to every subscriber of its name
    ///
    /// Returns the number of subscribers that handled it without error.
    pub fn publish(&self, event: &Event) -> usize {
        let handlers: Vec<Handler> = {
            let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
            match registry.handlers.get(event.name()) {
                Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    warn!(event = %event.name(), error = %e, "Subscriber failed");
                }
                Err(_) => {
                    error!(event = %event.name(), "Subscriber panicked");
                }
            }
        }
        delivered
    }

    /// Check if any subscriber is registered for an event
    pub fn has_subscribers(&self, event: &str) -> bool {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        registry.handlers.get(event).is_some_and(|v| !v.is_empty())
    }

    /// Total number of subscriptions across all events
    pub fn subscriber_count(&self) -> usize {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        registry.handlers.values().map(Vec::len).sum()
    }

    /// Returns true exactly once per bus; used to install the protocol
    /// handlers a single time no matter how many clients share the bus.
    pub(crate) fn claim_core_install(&self) -> bool {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        !std::mem::replace(&mut registry.core_installed, true)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("EventBus")
            .field("event_count", &registry.handlers.len())
            .field("next_id", &registry.next_id)
            .finish()
    }
}
