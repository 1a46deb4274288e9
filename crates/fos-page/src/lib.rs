//! fOS Page - Host Capabilities for Injected Page Engines
//!
//! Describes everything an injected engine may borrow from the page it
//! runs in: the document tree and its geometry, the event-registration
//! entry point, timers, animation frames, intersection and mutation
//! notifications, page visibility, heap introspection and the outgoing
//! request gate.
//!
//! Every capability is optional on a [`Host`]. Engines are expected to
//! degrade to a no-op when the one they need is missing.
//!
//! # Threading
//!
//! All capabilities are single-threaded. Callbacks are `Rc`-based and run
//! to completion on the page's one event loop; there is no mid-callback
//! yielding and nothing here is `Send`.
//!
//! # Headless page
//!
//! [`HeadlessPage`] implements every capability in memory with a virtual
//! clock and a vertical block layout. It is what tests and the demo CLI
//! drive the engine with.

mod dom;
mod events;
mod host;
mod node;
mod observers;
mod platform;
mod selector;
mod timers;

pub mod headless;

pub use dom::{Document, DomError};
pub use events::{Event, EventRegistrar, HandlerError, Listener, ListenerId, ListenerOptions};
pub use headless::HeadlessPage;
pub use host::{Capability, Host, HostBuilder, InterceptError};
pub use node::{NodeId, Rect, Target, Viewport};
pub use observers::{
    IntersectionCallback, IntersectionEntry, IntersectionObserver, IntersectionObserving,
    MutationCallback, MutationObserver, MutationObserving, MutationRecord,
};
pub use platform::{
    HeapProbe, HeapSnapshot, PageVisibility, RequestFilter, RequestGate, VisibilityState,
};
pub use selector::{Selector, SelectorError};
pub use timers::{AnimationFrames, TimerId, Timers};
