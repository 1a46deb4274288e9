//! Headless Page
//!
//! An in-memory page implementing every host capability, driven by a
//! virtual clock. Work runs as tasks (timers, frames, dispatched events);
//! after each task pending mutation and intersection notifications are
//! delivered, the way a browser delivers them between tasks.
//!
//! ```
//! use fos_page::{Document, HeadlessPage};
//! use std::time::Duration;
//!
//! let page = HeadlessPage::with_viewport(800.0, 600.0);
//! let root = page.root();
//! let turn = page.element("article").height(120.0).append_to(root).unwrap();
//! page.scroll_to(40.0);
//! page.advance(Duration::from_millis(100));
//! assert!(page.is_connected(turn));
//! ```

mod clock;
mod observe;
mod tree;

pub use clock::FRAME_INTERVAL;

use crate::dom::{Document, DomError};
use crate::events::{Event, EventRegistrar, Listener, ListenerId, ListenerOptions};
use crate::host::{Host, HostBuilder};
use crate::node::{NodeId, Rect, Target, Viewport};
use crate::observers::{
    IntersectionCallback, IntersectionObserver, IntersectionObserving, MutationCallback,
    MutationObserver, MutationObserving, MutationRecord,
};
use crate::platform::{
    HeapProbe, HeapSnapshot, PageVisibility, RequestFilter, RequestGate, VisibilityState,
};
use crate::selector::Selector;
use crate::timers::{AnimationFrames, TimerId, Timers};
use clock::{Clock, Task, TimerKind};
use observe::{IntersectionState, MutationState};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, warn};
use tree::Tree;

/// Upper bound on observer delivery rounds after one task.
const MAX_SETTLE_ROUNDS: usize = 32;

struct Registration {
    id: ListenerId,
    target: Target,
    event_type: String,
    listener: Listener,
    options: ListenerOptions,
}

struct Inner {
    tree: RefCell<Tree>,
    clock: RefCell<Clock>,
    listeners: RefCell<Vec<Registration>>,
    next_listener: Cell<u64>,
    intersections: RefCell<Vec<Rc<IntersectionState>>>,
    mutations: RefCell<Vec<Rc<MutationState>>>,
    visibility: Cell<VisibilityState>,
    heap: Cell<Option<HeapSnapshot>>,
    request_filters: RefCell<Vec<RequestFilter>>,
    uncaught: Cell<usize>,
}

/// In-memory page. Cloning yields another handle to the same page.
#[derive(Clone)]
pub struct HeadlessPage {
    inner: Rc<Inner>,
}

impl HeadlessPage {
    pub fn new() -> Self {
        Self::with_viewport(Viewport::default().width, Viewport::default().height)
    }

    pub fn with_viewport(width: f32, height: f32) -> Self {
        Self {
            inner: Rc::new(Inner {
                tree: RefCell::new(Tree::new(Viewport::new(width, height))),
                clock: RefCell::new(Clock::default()),
                listeners: RefCell::new(Vec::new()),
                next_listener: Cell::new(0),
                intersections: RefCell::new(Vec::new()),
                mutations: RefCell::new(Vec::new()),
                visibility: Cell::new(VisibilityState::Visible),
                heap: Cell::new(None),
                request_filters: RefCell::new(Vec::new()),
                uncaught: Cell::new(0),
            }),
        }
    }

    /// Builder pre-filled with every capability of this page.
    pub fn host_builder(&self) -> HostBuilder {
        let page = Rc::new(self.clone());
        Host::builder()
            .document(page.clone())
            .registrar(page.clone())
            .timers(page.clone())
            .frames(page.clone())
            .intersections(page.clone())
            .mutations(page.clone())
            .visibility(page.clone())
            .heap(page.clone())
            .requests(page)
    }

    pub fn host(&self) -> Host {
        self.host_builder().build()
    }

    /// Start building an element to insert.
    pub fn element(&self, tag: &str) -> ElementBuilder<'_> {
        ElementBuilder {
            page: self,
            tag: tag.to_string(),
            attributes: Vec::new(),
            text: String::new(),
            height: 0.0,
        }
    }

    pub fn set_intrinsic_height(&self, node: NodeId, height: f32) -> Result<(), DomError> {
        self.inner.tree.borrow_mut().get_mut(node)?.intrinsic_height = height;
        Ok(())
    }

    pub fn set_viewport_height(&self, height: f32) {
        self.inner.tree.borrow_mut().viewport.height = height;
        self.settle();
    }

    /// Scroll the document and dispatch `scroll` on the window.
    pub fn scroll_to(&self, y: f32) {
        self.inner.tree.borrow_mut().viewport.scroll_y = y.max(0.0);
        self.dispatch(Target::Window, Event::new("scroll", Target::Window));
    }

    pub fn scroll_y(&self) -> f32 {
        self.inner.tree.borrow().viewport.scroll_y
    }

    pub fn content_height(&self) -> f32 {
        self.inner.tree.borrow().content_height()
    }

    /// Change visibility and dispatch `visibilitychange` on the document.
    pub fn set_visibility(&self, state: VisibilityState) {
        if self.inner.visibility.replace(state) != state {
            self.dispatch(
                Target::Document,
                Event::new("visibilitychange", Target::Document),
            );
        }
    }

    /// What the heap probe reports; `None` models a page without the API.
    pub fn set_heap(&self, snapshot: Option<HeapSnapshot>) {
        self.inner.heap.set(snapshot);
    }

    pub fn now(&self) -> Duration {
        self.inner.clock.borrow().now
    }

    pub fn pending_timers(&self) -> usize {
        self.inner.clock.borrow().pending_timers()
    }

    /// Errors returned by listeners during dispatch.
    pub fn uncaught_errors(&self) -> usize {
        self.inner.uncaught.get()
    }

    pub fn listener_count(&self, event_type: &str) -> usize {
        self.inner
            .listeners
            .borrow()
            .iter()
            .filter(|r| r.event_type == event_type)
            .count()
    }

    /// Whether any installed request filter refuses `url`.
    pub fn would_block(&self, url: &str) -> bool {
        let filters = self.inner.request_filters.borrow().clone();
        filters.iter().any(|f| f(url))
    }

    /// Dispatch an event as a task, bubbling from node targets up through
    /// the document to the window. Returns how many listeners ran.
    pub fn dispatch(&self, target: Target, mut event: Event) -> usize {
        event.target = target;
        event.time = self.now();

        let mut path = Vec::new();
        if let Target::Node(node) = target {
            let tree = self.inner.tree.borrow();
            let mut current = Some(node);
            while let Some(id) = current {
                path.push(Target::Node(id));
                current = tree.get(id).ok().and_then(|n| n.parent);
            }
        }
        if target != Target::Window {
            path.push(Target::Document);
        }
        path.push(Target::Window);

        let mut invoked = 0;
        for current_target in path {
            let matching: Vec<(ListenerId, Listener, bool)> = self
                .inner
                .listeners
                .borrow()
                .iter()
                .filter(|r| r.target == current_target && r.event_type == event.event_type)
                .map(|r| (r.id, r.listener.clone(), r.options.once))
                .collect();

            for (id, listener, once) in matching {
                if !self.is_registered(id) {
                    continue;
                }
                if once {
                    self.remove_listener(id);
                }
                event.current_target = current_target;
                invoked += 1;
                if let Err(err) = listener(&event) {
                    self.inner.uncaught.set(self.inner.uncaught.get() + 1);
                    warn!(event = %event.event_type, "Uncaught listener error: {}", err);
                }
            }
        }

        self.settle();
        invoked
    }

    /// Run every task due within `by`, then leave the clock at `now + by`.
    pub fn advance(&self, by: Duration) {
        let limit = self.now() + by;
        loop {
            let task = self.inner.clock.borrow_mut().pop_due(limit);
            let Some(task) = task else {
                break;
            };
            self.run_task(task);
        }
        let mut clock = self.inner.clock.borrow_mut();
        clock.now = clock.now.max(limit);
    }

    /// Run pending animation-frame callbacks now.
    pub fn run_frame(&self) {
        let frames = self.inner.clock.borrow_mut().take_frames();
        self.run_task(Task::Frame(frames));
    }

    /// Deliver pending observer notifications.
    pub fn flush(&self) {
        self.settle();
    }

    fn is_registered(&self, id: ListenerId) -> bool {
        self.inner.listeners.borrow().iter().any(|r| r.id == id)
    }

    fn run_task(&self, task: Task) {
        match task {
            Task::Timer(callback) => callback(),
            Task::Interval(callback) => callback(),
            Task::Frame(callbacks) => {
                for callback in callbacks {
                    callback();
                }
            }
        }
        self.settle();
    }

    fn settle(&self) {
        for _ in 0..MAX_SETTLE_ROUNDS {
            let mut delivered = false;

            let mutations = self.inner.mutations.borrow().clone();
            for state in mutations {
                let records = std::mem::take(&mut *state.pending.borrow_mut());
                if !records.is_empty() && state.connected.get() {
                    (state.callback)(&records);
                    delivered = true;
                }
            }

            let intersections = self.inner.intersections.borrow().clone();
            for state in intersections {
                let entries = state.collect_changes(&self.inner.tree.borrow());
                if !entries.is_empty() {
                    (state.callback)(&entries);
                    delivered = true;
                }
            }

            if !delivered {
                return;
            }
        }
        debug!("Observer delivery did not settle");
    }

    fn record_mutation(&self, record: MutationRecord) {
        let tree = self.inner.tree.borrow();
        for state in self.inner.mutations.borrow().iter() {
            state.record(&tree, &record);
        }
    }

    pub fn root(&self) -> NodeId {
        self.inner.tree.borrow().root()
    }
}

impl Default for HeadlessPage {
    fn default() -> Self {
        Self::new()
    }
}

/// Element under construction; see [`HeadlessPage::element`].
pub struct ElementBuilder<'a> {
    page: &'a HeadlessPage,
    tag: String,
    attributes: Vec<(String, String)>,
    text: String,
    height: f32,
}

impl ElementBuilder<'_> {
    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attributes.push((name.to_string(), value.to_string()));
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    /// Intrinsic height, excluding children.
    pub fn height(mut self, height: f32) -> Self {
        self.height = height;
        self
    }

    /// Create the element without inserting it.
    pub fn build(self) -> NodeId {
        let mut tree = self.page.inner.tree.borrow_mut();
        let id = tree.create(&self.tag);
        if let Ok(node) = tree.get_mut(id) {
            node.attributes = self.attributes;
            node.text = self.text;
            node.intrinsic_height = self.height;
        }
        id
    }

    pub fn append_to(self, parent: NodeId) -> Result<NodeId, DomError> {
        let page = self.page;
        let id = self.build();
        page.append_child(parent, id)?;
        Ok(id)
    }
}

impl Document for HeadlessPage {
    fn root(&self) -> NodeId {
        HeadlessPage::root(self)
    }

    fn is_connected(&self, node: NodeId) -> bool {
        self.inner.tree.borrow().is_connected(node)
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.inner.tree.borrow().get(node).ok()?.parent
    }

    fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.inner
            .tree
            .borrow()
            .get(node)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    fn tag_name(&self, node: NodeId) -> Option<String> {
        Some(self.inner.tree.borrow().get(node).ok()?.tag.clone())
    }

    fn text_content(&self, node: NodeId) -> String {
        self.inner.tree.borrow().text_content(node)
    }

    fn set_text_content(&self, node: NodeId, text: &str) -> Result<(), DomError> {
        self.inner.tree.borrow_mut().get_mut(node)?.text = text.to_string();
        Ok(())
    }

    fn attribute(&self, node: NodeId, name: &str) -> Option<String> {
        let tree = self.inner.tree.borrow();
        tree.get(node).ok()?.attribute(name).map(str::to_string)
    }

    fn set_attribute(&self, node: NodeId, name: &str, value: &str) -> Result<(), DomError> {
        self.inner
            .tree
            .borrow_mut()
            .set_attribute(node, name, Some(value))
    }

    fn remove_attribute(&self, node: NodeId, name: &str) -> Result<(), DomError> {
        self.inner.tree.borrow_mut().set_attribute(node, name, None)
    }

    fn style_property(&self, node: NodeId, property: &str) -> Option<String> {
        let tree = self.inner.tree.borrow();
        tree.get(node).ok()?.style(property).map(str::to_string)
    }

    fn set_style_property(
        &self,
        node: NodeId,
        property: &str,
        value: Option<&str>,
    ) -> Result<(), DomError> {
        self.inner.tree.borrow_mut().set_style(node, property, value)
    }

    fn query_all(&self, selector: &Selector) -> Vec<NodeId> {
        self.inner.tree.borrow().query_all(selector)
    }

    fn bounding_rect(&self, node: NodeId) -> Result<Rect, DomError> {
        self.inner.tree.borrow().bounding_rect(node)
    }

    fn is_rendered(&self, node: NodeId) -> bool {
        self.inner.tree.borrow().is_rendered(node)
    }

    fn viewport(&self) -> Viewport {
        self.inner.tree.borrow().viewport
    }

    fn create_element(&self, tag: &str) -> NodeId {
        self.inner.tree.borrow_mut().create(tag)
    }

    fn append_child(&self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        let previous = self.inner.tree.borrow_mut().append(parent, child)?;
        if let Some(old_parent) = previous {
            self.record_mutation(MutationRecord {
                target: old_parent,
                added_nodes: Vec::new(),
                removed_nodes: vec![child],
            });
        }
        self.record_mutation(MutationRecord {
            target: parent,
            added_nodes: vec![child],
            removed_nodes: Vec::new(),
        });
        Ok(())
    }

    fn remove(&self, node: NodeId) -> Result<(), DomError> {
        let parent = {
            let mut tree = self.inner.tree.borrow_mut();
            tree.get(node)?;
            if node == tree.root() {
                return Err(DomError::HierarchyRequest(node));
            }
            tree.detach(node).ok_or(DomError::Detached(node))?
        };
        self.record_mutation(MutationRecord {
            target: parent,
            added_nodes: Vec::new(),
            removed_nodes: vec![node],
        });
        Ok(())
    }
}

impl EventRegistrar for HeadlessPage {
    fn add_listener(
        &self,
        target: Target,
        event_type: &str,
        listener: Listener,
        options: ListenerOptions,
    ) -> ListenerId {
        let id = ListenerId(self.inner.next_listener.get() + 1);
        self.inner.next_listener.set(id.0);
        self.inner.listeners.borrow_mut().push(Registration {
            id,
            target,
            event_type: event_type.to_string(),
            listener,
            options,
        });
        id
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|r| r.id != id);
        listeners.len() != before
    }
}

impl Timers for HeadlessPage {
    fn now(&self) -> Duration {
        HeadlessPage::now(self)
    }

    fn set_timeout(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> TimerId {
        self.inner
            .clock
            .borrow_mut()
            .schedule(delay, TimerKind::Once(callback))
    }

    fn set_interval(&self, period: Duration, callback: Rc<dyn Fn()>) -> TimerId {
        self.inner
            .clock
            .borrow_mut()
            .schedule(period, TimerKind::Repeat { period, callback })
    }

    fn clear_timer(&self, id: TimerId) {
        self.inner.clock.borrow_mut().clear(id);
    }
}

impl AnimationFrames for HeadlessPage {
    fn request_frame(&self, callback: Box<dyn FnOnce()>) {
        self.inner.clock.borrow_mut().request_frame(callback);
    }
}

impl IntersectionObserving for HeadlessPage {
    fn create_intersection_observer(
        &self,
        root_margin_px: f32,
        callback: IntersectionCallback,
    ) -> Rc<dyn IntersectionObserver> {
        let state = Rc::new(IntersectionState {
            margin: root_margin_px,
            callback,
            targets: RefCell::new(Vec::new()),
        });
        self.inner.intersections.borrow_mut().push(state.clone());
        state
    }
}

impl MutationObserving for HeadlessPage {
    fn observe_subtree(
        &self,
        root: NodeId,
        callback: MutationCallback,
    ) -> Rc<dyn MutationObserver> {
        let state = Rc::new(MutationState {
            root,
            callback,
            pending: RefCell::new(Vec::new()),
            connected: Cell::new(true),
        });
        self.inner.mutations.borrow_mut().push(state.clone());
        state
    }
}

impl PageVisibility for HeadlessPage {
    fn visibility_state(&self) -> VisibilityState {
        self.inner.visibility.get()
    }
}

impl HeapProbe for HeadlessPage {
    fn sample(&self) -> Option<HeapSnapshot> {
        self.inner.heap.get()
    }
}

impl RequestGate for HeadlessPage {
    fn add_request_filter(&self, filter: RequestFilter) {
        self.inner.request_filters.borrow_mut().push(filter);
    }
}
