use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{FramecastError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    /// No envelopes, or playback disabled.
    Idle,
    /// Timer armed and advancing the index.
    Running,
    /// Single-pass playback reached the last envelope.
    Completed,
}

/// Rate and mode flags that decide whether and how fast the timer runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackSettings {
    pub frame_rate: u32,
    pub loop_playback: bool,
    pub enabled: bool,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            frame_rate: 5,
            loop_playback: true,
            enabled: true,
        }
    }
}

impl PlaybackSettings {
    pub fn validate(&self) -> Result<()> {
        if self.frame_rate == 0 {
            return Err(FramecastError::InvalidFrameRate(self.frame_rate));
        }
        Ok(())
    }

    /// Interval between two ticks. A zero frame rate is treated as 1 fps.
    pub fn period(&self) -> Duration {
        Duration::from_secs(1) / self.frame_rate.max(1)
    }
}

/// Handle to the single live timer. Only the token returned by the most
/// recent [`Scheduler::start`] is accepted by [`Scheduler::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerToken {
    pub epoch: u64,
    pub period: Duration,
}

/// What a tick did to the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Advanced(usize),
    /// Loop mode moved from the last envelope back to the first.
    Wrapped(usize),
    /// Single-pass mode reached the end; the timer is cancelled.
    Completed(usize),
    /// The tick came from a cancelled timer or arrived outside `Running`.
    Ignored,
}

#[derive(Debug)]
pub struct Scheduler {
    total: usize,
    current_index: usize,
    completed: bool,
    state: PlaybackState,
    loop_playback: bool,
    epoch: u64,
    live: Option<TimerToken>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            total: 0,
            current_index: 0,
            completed: false,
            state: PlaybackState::Idle,
            loop_playback: true,
            epoch: 0,
            live: None,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// The timer the driver should currently be running, if any.
    pub fn live_timer(&self) -> Option<TimerToken> {
        self.live
    }

    /// Index clamped into `[0, total)`; `None` when there is nothing to show.
    pub fn safe_index(&self) -> Option<usize> {
        if self.total == 0 {
            None
        } else {
            Some(self.current_index.min(self.total - 1))
        }
    }

    /// A new chunking result arrived: drop the timer and rewind.
    pub fn reset(&mut self, total: usize) {
        self.cancel();
        self.total = total;
        self.current_index = 0;
        self.completed = false;
        self.state = PlaybackState::Idle;
        tracing::debug!(total, "scheduler reset");
    }

    /// Playback disabled or the list went empty. The index is kept so that
    /// re-enabling resumes on the same frame.
    pub fn stop(&mut self) {
        self.cancel();
        self.state = PlaybackState::Idle;
    }

    /// (Re)arms the timer for the given settings. Any previous timer is
    /// cancelled first, so every call restarts the interval from zero.
    pub fn start(&mut self, settings: &PlaybackSettings) -> Option<TimerToken> {
        if self.total == 0 || !settings.enabled {
            self.stop();
            return None;
        }

        self.cancel();
        if self.completed {
            self.current_index = 0;
            self.completed = false;
        }
        self.loop_playback = settings.loop_playback;

        if !self.loop_playback && self.safe_index() == Some(self.total - 1) {
            self.current_index = self.total - 1;
            self.complete();
            return None;
        }

        self.epoch += 1;
        let token = TimerToken {
            epoch: self.epoch,
            period: settings.period(),
        };
        self.live = Some(token);
        self.state = PlaybackState::Running;
        tracing::debug!(epoch = token.epoch, period = ?token.period, "timer armed");
        Some(token)
    }

    /// Advances the index for a tick of `token`'s timer.
    pub fn tick(&mut self, token: TimerToken) -> TickOutcome {
        if self.state != PlaybackState::Running
            || self.live.map(|live| live.epoch) != Some(token.epoch)
        {
            return TickOutcome::Ignored;
        }

        if self.current_index >= self.total {
            self.current_index = 0;
        }
        let next = self.current_index + 1;

        if self.loop_playback {
            self.current_index = next % self.total;
            return if self.current_index == 0 {
                TickOutcome::Wrapped(0)
            } else {
                TickOutcome::Advanced(self.current_index)
            };
        }

        if next < self.total {
            self.current_index = next;
            if next == self.total - 1 {
                self.complete();
                return TickOutcome::Completed(next);
            }
            TickOutcome::Advanced(next)
        } else {
            self.current_index = self.total - 1;
            self.complete();
            TickOutcome::Completed(self.current_index)
        }
    }

    fn complete(&mut self) {
        self.cancel();
        self.completed = true;
        self.state = PlaybackState::Completed;
    }

    fn cancel(&mut self) {
        if self.live.take().is_some() {
            self.epoch += 1;
        }
    }
}
