//! Viewport Virtualizer
//!
//! Collapses chat messages that sit far outside the viewport into
//! fixed-height placeholders and restores them on the way back.
//!
//! A message collapses when its whole vertical extent lies outside the
//! viewport extended by `margin` on both edges, unless it is one of the
//! last `exempt_tail` messages. Collapsing pins the measured height, clips
//! overflow, hides visibility and suppresses every immediate child; the
//! host's own inline values are saved first and put back exactly on
//! expansion.
//!
//! Sweeps run on scroll (coalesced to one per animation frame) and on a
//! periodic timer that catches layout changes without scrolling.

use crate::config::Tuning;
use crate::error::{EngineError, require};
use crate::markers::{VIRTUALIZED_ATTR, VIRTUALIZED_COLLAPSED};
use fos_page::{
    AnimationFrames, Capability, Document, DomError, Event, Host, Listener, ListenerOptions,
    NodeId, Selector, Target, Timers,
};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, info};

/// Delay used for scroll coalescing when the host has no frame callbacks.
const FRAME_FALLBACK: Duration = Duration::from_millis(16);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtualState {
    Expanded,
    Collapsed,
}

/// Inline values the host had before we collapsed a node.
#[derive(Debug, Clone, PartialEq)]
struct SavedStyles {
    height: Option<String>,
    overflow: Option<String>,
    visibility: Option<String>,
    children: Vec<(NodeId, Option<String>)>,
}

#[derive(Debug, Clone, PartialEq)]
enum Tracked {
    Expanded,
    Collapsed { height: f32, saved: SavedStyles },
}

impl Tracked {
    fn state(&self) -> VirtualState {
        match self {
            Self::Expanded => VirtualState::Expanded,
            Self::Collapsed { .. } => VirtualState::Collapsed,
        }
    }
}

/// Sweep counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VirtualizerStats {
    pub sweeps: u64,
    pub collapses: u64,
    pub expansions: u64,
    /// Nodes skipped for a pass because their geometry was unavailable
    pub skipped: u64,
}

#[derive(Debug, Clone)]
pub struct VirtualizerSettings {
    pub selector: Selector,
    pub margin: f32,
    pub min_tracked: usize,
    pub exempt_tail: usize,
    pub interval: Duration,
}

impl VirtualizerSettings {
    pub fn from_tuning(tuning: &Tuning) -> Result<Self, EngineError> {
        Ok(Self {
            selector: Selector::parse(&tuning.message_selector)?,
            margin: tuning.viewport_margin_px,
            min_tracked: tuning.min_tracked,
            exempt_tail: tuning.exempt_tail,
            interval: tuning.virtualize_interval(),
        })
    }
}

pub struct Virtualizer {
    document: Rc<dyn Document>,
    timers: Rc<dyn Timers>,
    frames: Option<Rc<dyn AnimationFrames>>,
    settings: VirtualizerSettings,
    /// Keyed by node identity; entries for departed nodes are pruned
    tracked: RefCell<HashMap<NodeId, Tracked>>,
    frame_pending: Cell<bool>,
    stats: Cell<VirtualizerStats>,
}

impl Virtualizer {
    pub fn new(
        document: Rc<dyn Document>,
        timers: Rc<dyn Timers>,
        frames: Option<Rc<dyn AnimationFrames>>,
        settings: VirtualizerSettings,
    ) -> Rc<Self> {
        Rc::new(Self {
            document,
            timers,
            frames,
            settings,
            tracked: RefCell::new(HashMap::new()),
            frame_pending: Cell::new(false),
            stats: Cell::new(VirtualizerStats::default()),
        })
    }

    /// Hook scroll and the periodic timer, then sweep once.
    ///
    /// Needs the document and timers. Without event registration only the
    /// periodic sweep runs.
    pub fn install(host: &Host, tuning: &Tuning) -> Result<Rc<Self>, EngineError> {
        let document = require(host.document(), Capability::Document)?;
        let timers = require(host.timers(), Capability::Timers)?;
        let settings = VirtualizerSettings::from_tuning(tuning)?;
        let interval = settings.interval;
        let virtualizer = Self::new(document, timers.clone(), host.frames(), settings);

        let weak = Rc::downgrade(&virtualizer);
        let on_scroll: Listener = Rc::new(move |_: &Event| {
            if let Some(v) = weak.upgrade() {
                v.schedule_sweep();
            }
            Ok(())
        });
        if host
            .add_event_listener(Target::Window, "scroll", on_scroll, ListenerOptions::passive())
            .is_none()
        {
            debug!("No event registration, relying on periodic sweeps");
        }

        let weak = Rc::downgrade(&virtualizer);
        timers.set_interval(
            interval,
            Rc::new(move || {
                if let Some(v) = weak.upgrade() {
                    v.sweep();
                }
            }),
        );

        virtualizer.sweep();
        info!(
            margin = virtualizer.settings.margin,
            min_tracked = virtualizer.settings.min_tracked,
            "Message virtualization installed"
        );
        Ok(virtualizer)
    }

    /// Request a sweep on the next frame. Repeated requests before it runs
    /// collapse into one.
    pub fn schedule_sweep(self: &Rc<Self>) {
        if self.frame_pending.replace(true) {
            return;
        }
        let weak = Rc::downgrade(self);
        let run = Box::new(move || {
            if let Some(v) = weak.upgrade() {
                v.frame_pending.set(false);
                v.sweep();
            }
        });
        match &self.frames {
            Some(frames) => frames.request_frame(run),
            None => {
                self.timers.set_timeout(FRAME_FALLBACK, run);
            }
        }
    }

    /// Recompute every tracked message's state.
    pub fn sweep(&self) {
        let document = self.document.as_ref();
        let nodes = document.query_all(&self.settings.selector);
        let current: HashSet<NodeId> = nodes.iter().copied().collect();
        let mut tracked = self.tracked.borrow_mut();
        let mut stats = self.stats.get();
        stats.sweeps += 1;

        // Detached, or no longer matching: forget it, undoing any collapse
        let orphaned: Vec<NodeId> = tracked
            .keys()
            .filter(|n| !current.contains(n))
            .copied()
            .collect();
        for node in orphaned {
            if let Some(Tracked::Collapsed { saved, .. }) = tracked.remove(&node) {
                self.expand(node, &saved);
                stats.expansions += 1;
            }
        }

        let active = nodes.len() >= self.settings.min_tracked;
        let tail_start = nodes.len().saturating_sub(self.settings.exempt_tail);
        let (top, bottom) = document.viewport().extended_band(self.settings.margin);

        for (index, &node) in nodes.iter().enumerate() {
            let entry = tracked.entry(node).or_insert(Tracked::Expanded);
            let keep = if !active || index >= tail_start {
                true
            } else {
                match document.bounding_rect(node) {
                    Ok(rect) => rect.overlaps_band(top, bottom),
                    Err(err) => {
                        debug!(%node, "Skipping node this pass: {}", err);
                        stats.skipped += 1;
                        continue;
                    }
                }
            };

            match (&*entry, keep) {
                (Tracked::Expanded, false) => match self.collapse(node) {
                    Ok(collapsed) => {
                        *entry = collapsed;
                        stats.collapses += 1;
                    }
                    Err(err) => {
                        debug!(%node, "Collapse failed: {}", err);
                        stats.skipped += 1;
                    }
                },
                (Tracked::Collapsed { saved, .. }, true) => {
                    self.expand(node, saved);
                    *entry = Tracked::Expanded;
                    stats.expansions += 1;
                }
                _ => {}
            }
        }

        self.stats.set(stats);
    }

    fn collapse(&self, node: NodeId) -> Result<Tracked, DomError> {
        let document = self.document.as_ref();
        // Measure before touching anything
        let height = document.bounding_rect(node)?.height;
        let saved = SavedStyles {
            height: document.style_property(node, "height"),
            overflow: document.style_property(node, "overflow"),
            visibility: document.style_property(node, "visibility"),
            children: document
                .children(node)
                .into_iter()
                .map(|child| (child, document.style_property(child, "display")))
                .collect(),
        };

        if let Err(err) = self.apply_collapse(node, height, &saved) {
            self.expand(node, &saved);
            return Err(err);
        }
        Ok(Tracked::Collapsed { height, saved })
    }

    fn apply_collapse(&self, node: NodeId, height: f32, saved: &SavedStyles) -> Result<(), DomError> {
        let document = self.document.as_ref();
        document.set_attribute(node, VIRTUALIZED_ATTR, VIRTUALIZED_COLLAPSED)?;
        document.set_style_property(node, "height", Some(&format!("{height}px")))?;
        document.set_style_property(node, "overflow", Some("hidden"))?;
        document.set_style_property(node, "visibility", Some("hidden"))?;
        for (child, _) in &saved.children {
            document.set_style_property(*child, "display", Some("none"))?;
        }
        Ok(())
    }

    /// Put back exactly what the host had. Best effort per property.
    fn expand(&self, node: NodeId, saved: &SavedStyles) {
        let document = self.document.as_ref();
        let restore = |target: NodeId, property: &str, value: &Option<String>| {
            if let Err(err) = document.set_style_property(target, property, value.as_deref()) {
                debug!(node = %target, property, "Restore failed: {}", err);
            }
        };
        restore(node, "height", &saved.height);
        restore(node, "overflow", &saved.overflow);
        restore(node, "visibility", &saved.visibility);
        for (child, display) in &saved.children {
            restore(*child, "display", display);
        }
        if let Err(err) = document.remove_attribute(node, VIRTUALIZED_ATTR) {
            debug!(%node, "Marker removal failed: {}", err);
        }
    }

    pub fn state_of(&self, node: NodeId) -> Option<VirtualState> {
        self.tracked.borrow().get(&node).map(Tracked::state)
    }

    /// Height recorded at collapse; `None` unless collapsed.
    pub fn cached_height(&self, node: NodeId) -> Option<f32> {
        match self.tracked.borrow().get(&node)? {
            Tracked::Collapsed { height, .. } => Some(*height),
            Tracked::Expanded => None,
        }
    }

    pub fn collapsed_count(&self) -> usize {
        self.tracked
            .borrow()
            .values()
            .filter(|t| t.state() == VirtualState::Collapsed)
            .count()
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.borrow().len()
    }

    pub fn stats(&self) -> VirtualizerStats {
        self.stats.get()
    }
}
