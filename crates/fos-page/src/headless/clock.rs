//! Virtual clock, timer queue and frame queue.

use crate::timers::TimerId;
use std::rc::Rc;
use std::time::Duration;

/// Frame cadence of the headless page (~60 Hz).
pub const FRAME_INTERVAL: Duration = Duration::from_millis(16);

pub(crate) enum TimerKind {
    Once(Box<dyn FnOnce()>),
    Repeat { period: Duration, callback: Rc<dyn Fn()> },
}

pub(crate) struct TimerEntry {
    pub id: TimerId,
    pub due: Duration,
    pub kind: TimerKind,
}

/// A unit of work taken off the clock, ready to run outside any borrow.
pub(crate) enum Task {
    Timer(Box<dyn FnOnce()>),
    Interval(Rc<dyn Fn()>),
    Frame(Vec<Box<dyn FnOnce()>>),
}

#[derive(Default)]
pub(crate) struct Clock {
    pub now: Duration,
    next_id: u64,
    timers: Vec<TimerEntry>,
    frames: Vec<Box<dyn FnOnce()>>,
    frame_due: Option<Duration>,
}

impl Clock {
    pub fn schedule(&mut self, delay: Duration, kind: TimerKind) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.timers.push(TimerEntry {
            id,
            due: self.now + delay,
            kind,
        });
        id
    }

    pub fn clear(&mut self, id: TimerId) {
        self.timers.retain(|t| t.id != id);
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    pub fn request_frame(&mut self, callback: Box<dyn FnOnce()>) {
        self.frames.push(callback);
        if self.frame_due.is_none() {
            let ticks = self.now.as_millis() / FRAME_INTERVAL.as_millis() + 1;
            self.frame_due = Some(FRAME_INTERVAL * ticks as u32);
        }
    }

    pub fn take_frames(&mut self) -> Vec<Box<dyn FnOnce()>> {
        self.frame_due = None;
        std::mem::take(&mut self.frames)
    }

    /// Earliest pending work, timers before frames on ties (ids keep
    /// timers in scheduling order).
    fn next_due(&self) -> Option<Duration> {
        let timer = self
            .timers
            .iter()
            .min_by_key(|t| (t.due, t.id))
            .map(|t| t.due);
        match (timer, self.frame_due) {
            (Some(t), Some(f)) => Some(t.min(f)),
            (t, f) => t.or(f),
        }
    }

    /// Pop the next task due at or before `limit`, moving the clock to it.
    ///
    /// Intervals are rescheduled before they run, so clearing one from
    /// inside its own callback works.
    pub fn pop_due(&mut self, limit: Duration) -> Option<Task> {
        let due = self.next_due().filter(|&d| d <= limit)?;
        self.now = self.now.max(due);

        let timer_pos = self
            .timers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.due == due)
            .min_by_key(|(_, t)| t.id)
            .map(|(i, _)| i);

        let Some(pos) = timer_pos else {
            return Some(Task::Frame(self.take_frames()));
        };

        let entry = self.timers.remove(pos);
        match entry.kind {
            TimerKind::Once(callback) => Some(Task::Timer(callback)),
            TimerKind::Repeat { period, callback } => {
                self.timers.push(TimerEntry {
                    id: entry.id,
                    due: due + period.max(Duration::from_millis(1)),
                    kind: TimerKind::Repeat {
                        period,
                        callback: callback.clone(),
                    },
                });
                Some(Task::Interval(callback))
            }
        }
    }
}
