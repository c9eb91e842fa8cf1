pub mod memory;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::protocol::{EventKey, InboundEvent};

pub use memory::{RetrospectiveState, RetrospectiveStore};

/// Mutation callback for one [`EventKey`]
pub type Handler = Arc<dyn Fn(Value) + Send + Sync>;

/// Full session state fetched on (re)connect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    pub retrospective: Value,
}

impl Snapshot {
    pub fn new(retrospective: Value) -> Self {
        Self { retrospective }
    }
}

/// Local session state the live channel writes into
pub trait SessionStateSink: Send + Sync {
    /// Replace/merge the local state with a freshly fetched snapshot
    fn apply_snapshot(&self, snapshot: Snapshot);

    /// Mutation handler for an action/entity pair
    fn handler(&self, key: EventKey) -> Option<Handler>;
}

/// Complete `EventKey -> Handler` mapping.
///
/// Construction fails unless all nine action/entity pairs are covered, so a
/// missing handler is a startup error rather than a dispatch-time miss.
#[derive(Clone)]
pub struct HandlerTable {
    handlers: HashMap<EventKey, Handler>,
}

impl HandlerTable {
    pub fn builder() -> HandlerTableBuilder {
        HandlerTableBuilder::default()
    }

    /// Collect the handlers a sink exposes
    pub fn from_sink(sink: &dyn SessionStateSink) -> Result<Self> {
        EventKey::all()
            .fold(Self::builder(), |builder, key| match sink.handler(key) {
                Some(handler) => builder.on_handler(key, handler),
                None => builder,
            })
            .build()
    }

    pub fn get(&self, key: EventKey) -> Option<&Handler> {
        self.handlers.get(&key)
    }

    /// Invoke the handler registered for the event's key with its payload
    pub fn dispatch(&self, event: InboundEvent) -> bool {
        match self.handlers.get(&event.key) {
            Some(handler) => {
                handler(event.value);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.handlers.keys().map(|k| k.to_string()).collect();
        keys.sort();
        f.debug_struct("HandlerTable").field("handlers", &keys).finish()
    }
}

#[derive(Default)]
pub struct HandlerTableBuilder {
    handlers: HashMap<EventKey, Handler>,
}

impl HandlerTableBuilder {
    pub fn on<F>(self, key: EventKey, handler: F) -> Self
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.on_handler(key, Arc::new(handler))
    }

    pub fn on_handler(mut self, key: EventKey, handler: Handler) -> Self {
        self.handlers.insert(key, handler);
        self
    }

    pub fn build(self) -> Result<HandlerTable> {
        let missing: Vec<String> = EventKey::all()
            .filter(|key| !self.handlers.contains_key(key))
            .map(|key| key.to_string())
            .collect();

        if !missing.is_empty() {
            bail!("session state sink is missing handlers: {}", missing.join(", "));
        }

        Ok(HandlerTable {
            handlers: self.handlers,
        })
    }
}
