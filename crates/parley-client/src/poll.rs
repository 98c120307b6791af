//! Per-channel poll loop state machine.
//!
//! A channel moves `Idle -> Polling -> Suspended` and back to `Polling`.
//! It polls only while it is the active channel *and* the view is visible,
//! and then exactly one timer drives it. Leaving that state cancels the timer
//! immediately; re-entering it asks the caller for one immediate catch-up
//! fetch. Switching to a channel always asks for its initial load, even while
//! the view is hidden; visibility only gates the timer. A channel the remote
//! reports gone or forbidden is `Halted` and is not polled again until it is
//! explicitly re-activated.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use parley_shared::types::ChannelId;

use crate::scheduler::{Scheduler, TimerHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Polling,
    Suspended,
    Halted,
}

/// One firing of a poll timer. `epoch` identifies the loop that produced it,
/// so a tick racing a cancellation can be recognised and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTick {
    pub channel: ChannelId,
    pub epoch: u64,
}

pub type TickSink = Arc<dyn Fn(PollTick) + Send + Sync>;

pub struct PollScheduler {
    scheduler: Box<dyn Scheduler>,
    interval: Duration,
    sink: TickSink,
    states: HashMap<ChannelId, PollState>,
    active: Option<ChannelId>,
    visible: bool,
    timer: Option<(ChannelId, TimerHandle)>,
    epoch: u64,
}

impl PollScheduler {
    pub fn new(
        scheduler: Box<dyn Scheduler>,
        interval: Duration,
        visible: bool,
        sink: TickSink,
    ) -> Self {
        Self {
            scheduler,
            interval,
            sink,
            states: HashMap::new(),
            active: None,
            visible,
            timer: None,
            epoch: 0,
        }
    }

    pub fn state(&self, channel: ChannelId) -> PollState {
        self.states.get(&channel).copied().unwrap_or(PollState::Idle)
    }

    pub fn live_timers(&self) -> usize {
        self.scheduler.live_count()
    }

    /// Make `channel` the active one. Returns the channel to fetch
    /// immediately when it became active or its poll loop was (re)started, and
    /// the channel that was suspended by the switch, if any.
    pub fn activate(&mut self, channel: ChannelId) -> (Option<ChannelId>, Option<ChannelId>) {
        if self.active == Some(channel) && self.state(channel) == PollState::Polling {
            return (None, None);
        }
        let load = self.active != Some(channel) || self.state(channel) == PollState::Halted;

        let suspended = match self.active {
            Some(previous) if previous != channel => {
                self.suspend(previous);
                Some(previous)
            }
            _ => None,
        };

        self.active = Some(channel);
        if self.state(channel) == PollState::Halted {
            debug!(channel = %channel, "Re-activating halted channel");
        }

        if self.visible {
            self.start(channel);
            (Some(channel), suspended)
        } else {
            self.states.insert(channel, PollState::Suspended);
            (load.then_some(channel), suspended)
        }
    }

    /// Apply a visibility change. Returns the channel to catch up immediately
    /// when polling resumes, and the channel suspended when it stops.
    pub fn set_visible(&mut self, visible: bool) -> (Option<ChannelId>, Option<ChannelId>) {
        if self.visible == visible {
            return (None, None);
        }
        self.visible = visible;

        let Some(channel) = self.active else {
            return (None, None);
        };

        match (visible, self.state(channel)) {
            (true, PollState::Idle | PollState::Suspended) => {
                self.start(channel);
                (Some(channel), None)
            }
            (false, PollState::Polling) => {
                self.suspend(channel);
                (None, Some(channel))
            }
            _ => (None, None),
        }
    }

    /// Stop polling `channel` for good; only re-activation restarts it.
    pub fn halt(&mut self, channel: ChannelId) {
        self.cancel_timer_for(channel);
        self.states.insert(channel, PollState::Halted);
        debug!(channel = %channel, "Polling halted");
    }

    /// Whether `tick` belongs to the loop that is currently running.
    pub fn accepts(&self, tick: PollTick) -> bool {
        tick.epoch == self.epoch
            && matches!(self.timer, Some((channel, _)) if channel == tick.channel)
            && self.state(tick.channel) == PollState::Polling
    }

    /// Cancel every timer, e.g. when the view unmounts.
    pub fn shutdown(&mut self) {
        if let Some(channel) = self.active {
            if self.state(channel) == PollState::Polling {
                self.suspend(channel);
            }
        }
        if let Some((_, handle)) = self.timer.take() {
            self.scheduler.cancel(handle);
        }
    }

    fn start(&mut self, channel: ChannelId) {
        // At most one live timer per view.
        if let Some((_, handle)) = self.timer.take() {
            self.scheduler.cancel(handle);
        }

        self.epoch += 1;
        let tick = PollTick {
            channel,
            epoch: self.epoch,
        };
        let sink = self.sink.clone();
        let handle = self
            .scheduler
            .schedule(self.interval, Box::new(move || sink(tick)));

        self.timer = Some((channel, handle));
        self.states.insert(channel, PollState::Polling);
        debug!(channel = %channel, epoch = self.epoch, "Polling started");
    }

    fn suspend(&mut self, channel: ChannelId) {
        self.cancel_timer_for(channel);
        if self.state(channel) == PollState::Polling {
            self.states.insert(channel, PollState::Suspended);
            debug!(channel = %channel, "Polling suspended");
        }
    }

    fn cancel_timer_for(&mut self, channel: ChannelId) {
        if let Some((owner, handle)) = self.timer {
            if owner == channel {
                self.scheduler.cancel(handle);
                self.timer = None;
            }
        }
    }
}
