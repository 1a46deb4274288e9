//! The set of capabilities a page lends to an injected engine.

use crate::dom::Document;
use crate::events::{EventRegistrar, Listener, ListenerId, ListenerOptions};
use crate::node::Target;
use crate::observers::{IntersectionObserving, MutationObserving};
use crate::platform::{HeapProbe, PageVisibility, RequestGate};
use crate::timers::{AnimationFrames, Timers};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;
use tracing::debug;

/// A host capability that may be missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Document,
    EventRegistration,
    Timers,
    AnimationFrames,
    IntersectionObserver,
    MutationObserver,
    PageVisibility,
    HeapIntrospection,
    RequestGate,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Document => "document",
            Self::EventRegistration => "event registration",
            Self::Timers => "timers",
            Self::AnimationFrames => "animation frames",
            Self::IntersectionObserver => "intersection observer",
            Self::MutationObserver => "mutation observer",
            Self::PageVisibility => "page visibility",
            Self::HeapIntrospection => "heap introspection",
            Self::RequestGate => "request gate",
        };
        f.write_str(name)
    }
}

/// Errors from replacing the registration entry point
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterceptError {
    #[error("Event registration is already intercepted")]
    AlreadyIntercepted,

    #[error("Page has no event registration entry point")]
    NoRegistrar,
}

/// Capabilities of one document, plus whatever the engine parks on it.
///
/// A host lives exactly as long as its document. Nothing installed on it
/// is ever torn down explicitly; dropping the host is the teardown.
pub struct Host {
    document: Option<Rc<dyn Document>>,
    timers: Option<Rc<dyn Timers>>,
    frames: Option<Rc<dyn AnimationFrames>>,
    intersections: Option<Rc<dyn IntersectionObserving>>,
    mutations: Option<Rc<dyn MutationObserving>>,
    visibility: Option<Rc<dyn PageVisibility>>,
    heap: Option<Rc<dyn HeapProbe>>,
    requests: Option<Rc<dyn RequestGate>>,
    /// Current registration entry point; swapped at most once
    registrar: RefCell<Option<Rc<dyn EventRegistrar>>>,
    intercepted: Cell<bool>,
    claims: RefCell<HashSet<&'static str>>,
    retained: RefCell<Vec<Rc<dyn Any>>>,
}

impl Host {
    pub fn builder() -> HostBuilder {
        HostBuilder::default()
    }

    pub fn document(&self) -> Option<Rc<dyn Document>> {
        self.document.clone()
    }

    pub fn timers(&self) -> Option<Rc<dyn Timers>> {
        self.timers.clone()
    }

    pub fn frames(&self) -> Option<Rc<dyn AnimationFrames>> {
        self.frames.clone()
    }

    pub fn intersections(&self) -> Option<Rc<dyn IntersectionObserving>> {
        self.intersections.clone()
    }

    pub fn mutations(&self) -> Option<Rc<dyn MutationObserving>> {
        self.mutations.clone()
    }

    pub fn visibility(&self) -> Option<Rc<dyn PageVisibility>> {
        self.visibility.clone()
    }

    pub fn heap(&self) -> Option<Rc<dyn HeapProbe>> {
        self.heap.clone()
    }

    pub fn requests(&self) -> Option<Rc<dyn RequestGate>> {
        self.requests.clone()
    }

    /// Whether the capability is present.
    pub fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::Document => self.document.is_some(),
            Capability::EventRegistration => self.registrar.borrow().is_some(),
            Capability::Timers => self.timers.is_some(),
            Capability::AnimationFrames => self.frames.is_some(),
            Capability::IntersectionObserver => self.intersections.is_some(),
            Capability::MutationObserver => self.mutations.is_some(),
            Capability::PageVisibility => self.visibility.is_some(),
            Capability::HeapIntrospection => self.heap.is_some(),
            Capability::RequestGate => self.requests.is_some(),
        }
    }

    /// Register a listener through the current entry point.
    ///
    /// Host code and engine code both register here, so a replaced entry
    /// point sees every registration made after the replacement.
    pub fn add_event_listener(
        &self,
        target: Target,
        event_type: &str,
        listener: Listener,
        options: ListenerOptions,
    ) -> Option<ListenerId> {
        let registrar = self.registrar.borrow().clone()?;
        Some(registrar.add_listener(target, event_type, listener, options))
    }

    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        let registrar = self.registrar.borrow().clone();
        registrar.is_some_and(|r| r.remove_listener(id))
    }

    /// Replace the registration entry point with `wrap(current)`.
    ///
    /// Succeeds once per host; later attempts fail with
    /// [`InterceptError::AlreadyIntercepted`].
    pub fn intercept_registrar<F>(&self, wrap: F) -> Result<(), InterceptError>
    where
        F: FnOnce(Rc<dyn EventRegistrar>) -> Rc<dyn EventRegistrar>,
    {
        if self.intercepted.get() {
            return Err(InterceptError::AlreadyIntercepted);
        }
        let current = self
            .registrar
            .borrow()
            .clone()
            .ok_or(InterceptError::NoRegistrar)?;

        let replacement = wrap(current);
        *self.registrar.borrow_mut() = Some(replacement);
        self.intercepted.set(true);
        debug!("Event registration entry point replaced");
        Ok(())
    }

    /// Claim a named slot on this host, i.e. on this one document. Returns
    /// `false` if it was already claimed; other hosts are unaffected.
    pub fn claim_once(&self, key: &'static str) -> bool {
        self.claims.borrow_mut().insert(key)
    }

    /// Keep `value` alive for as long as the document.
    pub fn retain(&self, value: Rc<dyn Any>) {
        self.retained.borrow_mut().push(value);
    }
}

/// Assembles a [`Host`] from whichever capabilities the page has.
#[derive(Default)]
pub struct HostBuilder {
    document: Option<Rc<dyn Document>>,
    registrar: Option<Rc<dyn EventRegistrar>>,
    timers: Option<Rc<dyn Timers>>,
    frames: Option<Rc<dyn AnimationFrames>>,
    intersections: Option<Rc<dyn IntersectionObserving>>,
    mutations: Option<Rc<dyn MutationObserving>>,
    visibility: Option<Rc<dyn PageVisibility>>,
    heap: Option<Rc<dyn HeapProbe>>,
    requests: Option<Rc<dyn RequestGate>>,
}

impl HostBuilder {
    pub fn document(mut self, document: Rc<dyn Document>) -> Self {
        self.document = Some(document);
        self
    }

    pub fn registrar(mut self, registrar: Rc<dyn EventRegistrar>) -> Self {
        self.registrar = Some(registrar);
        self
    }

    pub fn timers(mut self, timers: Rc<dyn Timers>) -> Self {
        self.timers = Some(timers);
        self
    }

    pub fn frames(mut self, frames: Rc<dyn AnimationFrames>) -> Self {
        self.frames = Some(frames);
        self
    }

    pub fn intersections(mut self, intersections: Rc<dyn IntersectionObserving>) -> Self {
        self.intersections = Some(intersections);
        self
    }

    pub fn mutations(mut self, mutations: Rc<dyn MutationObserving>) -> Self {
        self.mutations = Some(mutations);
        self
    }

    pub fn visibility(mut self, visibility: Rc<dyn PageVisibility>) -> Self {
        self.visibility = Some(visibility);
        self
    }

    pub fn heap(mut self, heap: Rc<dyn HeapProbe>) -> Self {
        self.heap = Some(heap);
        self
    }

    pub fn requests(mut self, requests: Rc<dyn RequestGate>) -> Self {
        self.requests = Some(requests);
        self
    }

    /// Drop a capability, e.g. to model a page that lacks it.
    pub fn without(mut self, capability: Capability) -> Self {
        match capability {
            Capability::Document => self.document = None,
            Capability::EventRegistration => self.registrar = None,
            Capability::Timers => self.timers = None,
            Capability::AnimationFrames => self.frames = None,
            Capability::IntersectionObserver => self.intersections = None,
            Capability::MutationObserver => self.mutations = None,
            Capability::PageVisibility => self.visibility = None,
            Capability::HeapIntrospection => self.heap = None,
            Capability::RequestGate => self.requests = None,
        }
        self
    }

    pub fn build(self) -> Host {
        Host {
            document: self.document,
            timers: self.timers,
            frames: self.frames,
            intersections: self.intersections,
            mutations: self.mutations,
            visibility: self.visibility,
            heap: self.heap,
            requests: self.requests,
            registrar: RefCell::new(self.registrar),
            intercepted: Cell::new(false),
            claims: RefCell::new(HashSet::new()),
            retained: RefCell::new(Vec::new()),
        }
    }
}
