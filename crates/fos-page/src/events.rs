//! Event registration capability.

use crate::node::Target;
use std::rc::Rc;
use std::time::Duration;
use thiserror::Error;

/// A dispatched DOM event.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub event_type: String,
    /// Where the event was dispatched
    pub target: Target,
    /// The target the running listener is attached to (the `this` binding)
    pub current_target: Target,
    /// Page clock at dispatch
    pub time: Duration,
    /// Payload: inserted text, pasted text, key name
    pub data: Option<String>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, target: Target) -> Self {
        Self {
            event_type: event_type.into(),
            target,
            current_target: target,
            time: Duration::ZERO,
            data: None,
        }
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }
}

/// Error raised by a host listener; the equivalent of a thrown exception.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error("Listener failed: {0}")]
    Failed(String),
}

/// A registered callback.
pub type Listener = Rc<dyn Fn(&Event) -> Result<(), HandlerError>>;

/// Registration options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerOptions {
    pub capture: bool,
    pub passive: bool,
    /// Remove after the first invocation
    pub once: bool,
}

impl ListenerOptions {
    pub fn passive() -> Self {
        Self {
            passive: true,
            ..Self::default()
        }
    }
}

/// Handle returned by a registration; removal goes through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// The page-wide event-registration entry point.
pub trait EventRegistrar {
    fn add_listener(
        &self,
        target: Target,
        event_type: &str,
        listener: Listener,
        options: ListenerOptions,
    ) -> ListenerId;

    /// Returns whether a registration was removed.
    fn remove_listener(&self, id: ListenerId) -> bool;
}
