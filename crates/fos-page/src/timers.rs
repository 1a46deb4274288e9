//! Timer and animation-frame capabilities.

use std::rc::Rc;
use std::time::Duration;

/// Handle to a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

/// Page clock and timer queue.
pub trait Timers {
    /// Monotonic time since the page was created.
    fn now(&self) -> Duration;

    fn set_timeout(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> TimerId;

    fn set_interval(&self, period: Duration, callback: Rc<dyn Fn()>) -> TimerId;

    /// Cancel a timeout or interval. Unknown ids are ignored.
    fn clear_timer(&self, id: TimerId);
}

/// Callbacks run right before the next paint.
pub trait AnimationFrames {
    fn request_frame(&self, callback: Box<dyn FnOnce()>);
}
