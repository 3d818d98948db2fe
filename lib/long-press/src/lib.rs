// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Long-press detection on a single button line.
//!
//! An [`EdgeTimer`] is fed every transition of an active-low button line,
//! normally straight from the GPIO interrupt handler. It notes the time of
//! each falling edge (press), and on the following rising edge (release)
//! checks how long the button was held. A hold longer than the threshold
//! wakes the designated consumer through its [`Wake`] handle.
//!
//! The expected usage model is:
//!
//! - Create a [`wake_signal::WakeSignal`] for the task that will act on the
//!   press, and pick a notification bit for the button.
//!
//! - Create an `EdgeTimer` with the threshold and a
//!   [`wake_signal::Notifier`] for that bit, and hand it to the code that
//!   registers the interrupt handler. The timer's state lives in the
//!   `EdgeTimer`, not in a global.
//!
//! - From the interrupt handler, call [`EdgeTimer::on_edge`] with the sampled
//!   line level and the current time.
//!
//! - In the task, wait on the signal.
//!
//! Time is a `u64` count of ticks from a monotonic clock, in whatever unit the
//! caller likes; the threshold is in the same unit. Elapsed time is computed
//! with wrapping arithmetic, so a hold that spans a counter wrap is still
//! measured correctly.
//!
//! There is no debouncing. Bounces are short, and a short press never wakes
//! anyone, so they fall out on their own. Wake-ups are delivered through the
//! signal, which coalesces: several long presses before the consumer gets
//! around to looking still read as one.

#![cfg_attr(not(test), no_std)]

use ringbuf::{ringbuf, ringbuf_entry};
pub use wake_signal::Wake;

/// One second, for clocks that tick in microseconds.
pub const DEFAULT_THRESHOLD_US: u64 = 1_000_000;

/// The level of the line after a transition. The button is active low.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Level {
    /// Pressed.
    Low,
    /// Released.
    High,
}

impl Level {
    /// The edge that produced this level.
    pub fn edge(self) -> Edge {
        match self {
            Level::Low => Edge::Falling,
            Level::High => Edge::Rising,
        }
    }
}

impl From<bool> for Level {
    /// Converts a raw pin reading, where `true` is a logic high.
    fn from(high: bool) -> Self {
        if high {
            Level::High
        } else {
            Level::Low
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Edge {
    Falling,
    Rising,
}

/// A transition observed on the line, with the time it was observed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EdgeEvent {
    pub level: Level,
    pub timestamp: u64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PressState {
    Idle,
    Pressed { since: u64 },
}

/// What a single edge did to the detector.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Press {
    /// A press began (or restarted, if one was already in progress).
    Started,
    /// The button was released before the threshold.
    Short { held: u64 },
    /// The button was released after the threshold; the consumer was woken.
    Long { held: u64 },
    /// A release with no press to match it, e.g. the first edge after boot.
    Unmatched,
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Pressed(u64),
    Repressed { abandoned: u64, now: u64 },
    Released { held: u64 },
    LongPress { held: u64 },
    Unmatched(u64),
}

ringbuf!(Trace, 16, Trace::None);

pub struct EdgeTimer<W> {
    threshold: u64,
    state: PressState,
    wake: W,
}

impl<W: Wake> EdgeTimer<W> {
    /// Creates a detector in the idle state. A hold must last strictly longer
    /// than `threshold` ticks to count.
    pub const fn new(threshold: u64, wake: W) -> Self {
        Self {
            threshold,
            state: PressState::Idle,
            wake,
        }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn state(&self) -> PressState {
        self.state
    }

    /// Forgets any press in progress.
    pub fn reset(&mut self) {
        self.state = PressState::Idle;
    }

    /// Processes one transition of the line.
    ///
    /// This is the interrupt handler's half of the detector: it doesn't
    /// block, allocate, or take locks.
    pub fn on_edge(&mut self, level: Level, now: u64) -> Press {
        match (level, self.state) {
            (Level::Low, PressState::Idle) => {
                ringbuf_entry!(Trace::Pressed(now));
                self.state = PressState::Pressed { since: now };
                Press::Started
            }
            (Level::Low, PressState::Pressed { since }) => {
                // We missed a release, or the line bounced. Either way the
                // newer edge is the start of the press.
                ringbuf_entry!(Trace::Repressed {
                    abandoned: since,
                    now
                });
                self.state = PressState::Pressed { since: now };
                Press::Started
            }
            (Level::High, PressState::Pressed { since }) => {
                self.state = PressState::Idle;
                let held = now.wrapping_sub(since);
                if held > self.threshold {
                    ringbuf_entry!(Trace::LongPress { held });
                    self.wake.wake();
                    Press::Long { held }
                } else {
                    ringbuf_entry!(Trace::Released { held });
                    Press::Short { held }
                }
            }
            (Level::High, PressState::Idle) => {
                ringbuf_entry!(Trace::Unmatched(now));
                Press::Unmatched
            }
        }
    }

    /// Processes a recorded transition.
    pub fn on_event(&mut self, event: EdgeEvent) -> Press {
        self.on_edge(event.level, event.timestamp)
    }
}
