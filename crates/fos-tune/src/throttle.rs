//! Listener Throttle Interceptor
//!
//! Replaces the page's event-registration entry point once. Listeners for
//! high-frequency input events are wrapped so the real callback runs at most
//! once per window, always with the latest event; everything else passes
//! through untouched.
//!
//! Per wrapped registration:
//! - window elapsed since the last real call → run now
//! - otherwise → remember the event, arm one timer for the remainder
//! - the timer runs the callback with whatever event arrived last

use crate::error::{EngineError, require};
use fos_page::{
    Capability, Event, EventRegistrar, Host, Listener, ListenerId, ListenerOptions, Target, Timers,
};
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Event types whose listeners get throttled.
pub const THROTTLED_EVENTS: [&str; 6] = ["input", "beforeinput", "paste", "keydown", "keypress", "keyup"];

pub fn is_throttled(event_type: &str) -> bool {
    THROTTLED_EVENTS.contains(&event_type)
}

#[derive(Default)]
struct ThrottleState {
    last_invoked: Option<Duration>,
    timer_armed: bool,
    /// Most recent event not yet delivered
    latest: Option<Event>,
}

/// One wrapped registration. Dropped together with the wrapper listener;
/// an armed timer only holds a weak reference.
struct Throttled {
    callback: Listener,
    window: Duration,
    timers: Rc<dyn Timers>,
    state: RefCell<ThrottleState>,
    invocations: Rc<Cell<u64>>,
}

impl Throttled {
    fn call(self: &Rc<Self>, event: &Event) {
        let now = self.timers.now();
        let remaining = {
            let mut state = self.state.borrow_mut();
            state.latest = Some(event.clone());

            match state.last_invoked {
                Some(last) if now.saturating_sub(last) < self.window => {
                    if state.timer_armed {
                        return;
                    }
                    state.timer_armed = true;
                    Some(self.window - now.saturating_sub(last))
                }
                _ => None,
            }
        };

        let Some(remaining) = remaining else {
            self.flush(now);
            return;
        };

        let weak = Rc::downgrade(self);
        self.timers.set_timeout(
            remaining,
            Box::new(move || {
                if let Some(throttled) = weak.upgrade() {
                    throttled.state.borrow_mut().timer_armed = false;
                    let now = throttled.timers.now();
                    throttled.flush(now);
                }
            }),
        );
    }

    /// Deliver the pending event, if any.
    fn flush(&self, now: Duration) {
        let event = {
            let mut state = self.state.borrow_mut();
            let Some(event) = state.latest.take() else {
                return;
            };
            state.last_invoked = Some(now);
            event
        };

        self.invocations.set(self.invocations.get() + 1);
        invoke_guarded(&self.callback, &event);
    }
}

/// Run a host callback, swallowing its errors and panics.
fn invoke_guarded(callback: &Listener, event: &Event) {
    match panic::catch_unwind(AssertUnwindSafe(|| callback(event))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(event = %event.event_type, "Throttled listener failed: {}", err),
        Err(_) => warn!(event = %event.event_type, "Throttled listener panicked"),
    }
}

/// The replacement registration entry point.
pub struct ThrottleInterceptor {
    inner: Rc<dyn EventRegistrar>,
    timers: Rc<dyn Timers>,
    window: Duration,
    wrapped: Cell<u64>,
    invocations: Rc<Cell<u64>>,
}

impl ThrottleInterceptor {
    /// Swap the host's registration entry point for a throttling one.
    ///
    /// Fails if the host lacks timers or a registrar, or if the entry
    /// point was already replaced.
    pub fn install(host: &Host, window: Duration) -> Result<Rc<Self>, EngineError> {
        let timers = require(host.timers(), Capability::Timers)?;
        if !host.has(Capability::EventRegistration) {
            return Err(EngineError::CapabilityUnavailable(Capability::EventRegistration));
        }

        let mut installed = None;
        host.intercept_registrar(|inner| {
            let interceptor = Rc::new(Self {
                inner,
                timers,
                window,
                wrapped: Cell::new(0),
                invocations: Rc::new(Cell::new(0)),
            });
            installed = Some(interceptor.clone());
            interceptor as Rc<dyn EventRegistrar>
        })?;

        info!(window_ms = window.as_millis() as u64, "Input throttling installed");
        installed.ok_or(EngineError::CapabilityUnavailable(Capability::EventRegistration))
    }

    /// Registrations wrapped so far.
    pub fn wrapped_count(&self) -> u64 {
        self.wrapped.get()
    }

    /// Real callback invocations across all wrapped registrations.
    pub fn invocation_count(&self) -> u64 {
        self.invocations.get()
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

impl EventRegistrar for ThrottleInterceptor {
    fn add_listener(
        &self,
        target: Target,
        event_type: &str,
        listener: Listener,
        options: ListenerOptions,
    ) -> ListenerId {
        if !is_throttled(event_type) {
            return self.inner.add_listener(target, event_type, listener, options);
        }

        let throttled = Rc::new(Throttled {
            callback: listener,
            window: self.window,
            timers: self.timers.clone(),
            state: RefCell::new(ThrottleState::default()),
            invocations: self.invocations.clone(),
        });
        self.wrapped.set(self.wrapped.get() + 1);
        debug!(event = event_type, ?target, "Wrapping listener");

        let wrapper: Listener = Rc::new(move |event: &Event| {
            throttled.call(event);
            Ok(())
        });
        self.inner.add_listener(target, event_type, wrapper, options)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.remove_listener(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fos_page::{HandlerError, HeadlessPage, InterceptError};

    const WINDOW: Duration = Duration::from_millis(100);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    /// Listener recording the `data` of every event it sees.
    fn recorder() -> (Listener, Rc<RefCell<Vec<Option<String>>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let listener: Listener = Rc::new(move |event: &Event| {
            sink.borrow_mut().push(event.data.clone());
            Ok(())
        });
        (listener, seen)
    }

    fn input(data: &str, target: Target) -> Event {
        Event::new("input", target).with_data(data)
    }

    #[test]
    fn test_passthrough_untouched() {
        let page = HeadlessPage::new();
        let host = page.host();
        let field = page.element("textarea").append_to(page.root()).unwrap();
        ThrottleInterceptor::install(&host, WINDOW).unwrap();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let listener: Listener = Rc::new(move |event: &Event| {
            sink.borrow_mut().push((event.current_target, event.data.clone()));
            Ok(())
        });
        let id = host
            .add_event_listener(Target::Node(field), "click", listener, ListenerOptions::default())
            .unwrap();

        for i in 0..5 {
            page.dispatch(Target::Node(field), Event::new("click", Target::Node(field)).with_data(i.to_string()));
        }
        assert_eq!(seen.borrow().len(), 5);
        assert!(seen.borrow().iter().all(|(t, _)| *t == Target::Node(field)));
        assert_eq!(seen.borrow()[4].1.as_deref(), Some("4"));

        assert!(host.remove_event_listener(id));
        page.dispatch(Target::Node(field), Event::new("click", Target::Node(field)));
        assert_eq!(seen.borrow().len(), 5);
    }

    #[test]
    fn test_leading_call_then_latest_event() {
        let page = HeadlessPage::new();
        let host = page.host();
        let interceptor = ThrottleInterceptor::install(&host, WINDOW).unwrap();
        let (listener, seen) = recorder();
        host.add_event_listener(Target::Document, "input", listener, ListenerOptions::default());

        page.dispatch(Target::Document, input("a", Target::Document));
        assert_eq!(*seen.borrow(), vec![Some("a".to_string())]);

        page.advance(ms(10));
        page.dispatch(Target::Document, input("b", Target::Document));
        page.advance(ms(10));
        page.dispatch(Target::Document, input("c", Target::Document));
        assert_eq!(seen.borrow().len(), 1);

        // Deferred call fires at the end of the window with the last event
        page.advance(ms(79));
        assert_eq!(seen.borrow().len(), 1);
        page.advance(ms(1));
        assert_eq!(seen.borrow().len(), 2);
        assert_eq!(seen.borrow()[1].as_deref(), Some("c"));

        assert_eq!(interceptor.wrapped_count(), 1);
        assert_eq!(interceptor.invocation_count(), 2);
    }

    #[test]
    fn test_rate_bound_and_final_event() {
        let page = HeadlessPage::new();
        let host = page.host();
        ThrottleInterceptor::install(&host, WINDOW).unwrap();
        let (listener, seen) = recorder();
        host.add_event_listener(Target::Window, "keydown", listener, ListenerOptions::default());

        let start = page.now();
        for i in 0..50 {
            page.dispatch(Target::Window, Event::new("keydown", Target::Window).with_data(i.to_string()));
            page.advance(ms(7));
        }
        let elapsed = page.now() - start;
        page.advance(ms(200));

        let calls = seen.borrow().len() as u64;
        let bound = elapsed.as_millis().div_ceil(WINDOW.as_millis()) as u64 + 1;
        assert!(calls <= bound, "{calls} calls exceeds {bound}");
        assert_eq!(seen.borrow().last().cloned().flatten().as_deref(), Some("49"));
    }

    #[test]
    fn test_all_throttled_types_wrapped() {
        let page = HeadlessPage::new();
        let host = page.host();
        let interceptor = ThrottleInterceptor::install(&host, WINDOW).unwrap();

        for event_type in THROTTLED_EVENTS {
            let (listener, _) = recorder();
            host.add_event_listener(Target::Document, event_type, listener, ListenerOptions::default());
        }
        let (listener, _) = recorder();
        host.add_event_listener(Target::Window, "scroll", listener, ListenerOptions::passive());

        assert_eq!(interceptor.wrapped_count(), 6);
        assert!(!is_throttled("scroll"));
    }

    #[test]
    fn test_callback_errors_and_panics_contained() {
        let page = HeadlessPage::new();
        let host = page.host();
        ThrottleInterceptor::install(&host, WINDOW).unwrap();

        let failing: Listener = Rc::new(|_: &Event| Err(HandlerError::Failed("boom".into())));
        let panicking: Listener = Rc::new(|_: &Event| -> Result<(), HandlerError> { panic!("listener bug") });
        host.add_event_listener(Target::Document, "input", failing, ListenerOptions::default());
        host.add_event_listener(Target::Document, "paste", panicking, ListenerOptions::default());

        page.dispatch(Target::Document, input("x", Target::Document));
        page.dispatch(Target::Document, Event::new("paste", Target::Document));
        page.advance(ms(150));

        assert_eq!(page.uncaught_errors(), 0);
    }

    #[test]
    fn test_removal_drops_pending_call() {
        let page = HeadlessPage::new();
        let host = page.host();
        ThrottleInterceptor::install(&host, WINDOW).unwrap();
        let (listener, seen) = recorder();
        let id = host
            .add_event_listener(Target::Document, "input", listener, ListenerOptions::default())
            .unwrap();

        page.dispatch(Target::Document, input("a", Target::Document));
        page.advance(ms(10));
        page.dispatch(Target::Document, input("b", Target::Document));
        assert!(host.remove_event_listener(id));

        page.advance(ms(200));
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn test_installs_once() {
        let page = HeadlessPage::new();
        let host = page.host();
        ThrottleInterceptor::install(&host, WINDOW).unwrap();

        let again = ThrottleInterceptor::install(&host, WINDOW);
        assert!(matches!(
            again,
            Err(EngineError::Intercept(InterceptError::AlreadyIntercepted))
        ));
    }

    #[test]
    fn test_requires_timers() {
        let page = HeadlessPage::new();
        let host = page.host_builder().without(Capability::Timers).build();

        let result = ThrottleInterceptor::install(&host, WINDOW);
        assert!(matches!(
            result,
            Err(EngineError::CapabilityUnavailable(Capability::Timers))
        ));
    }
}
