// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The button line.
//!
//! There's no GPIO here, so a thread stands in for the interrupt: it owns the
//! [`EdgeTimer`], produces edges from a [`Source`], and timestamps them with a
//! monotonic microsecond clock. When the source runs dry it posts shutdown.

use std::io::{self, BufRead};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use long_press::{EdgeTimer, Level, Press, Wake};
use ringbuf::ringbuf_entry;
use wake_signal::WakeSignal;

use crate::notifications;
use crate::Trace;

#[derive(Debug, PartialEq, Eq)]
pub enum Source {
    /// One press, held for the given time, right away.
    Hold(Duration),
    /// Edges read from standard input, one per line.
    Stdin,
}

/// Microseconds since the clock was created.
pub struct Clock(Instant);

impl Clock {
    pub fn start() -> Self {
        Self(Instant::now())
    }

    pub fn now_us(&self) -> u64 {
        u64::try_from(self.0.elapsed().as_micros()).unwrap_or(u64::MAX)
    }
}

/// Starts delivering edges from `source` to `timer`.
pub fn arm<W: Wake + Send + 'static>(
    mut timer: EdgeTimer<W>,
    source: Source,
    signal: &'static WakeSignal,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("button".to_string())
        .spawn(move || {
            let clock = Clock::start();
            match source {
                Source::Hold(hold) => {
                    edge(&mut timer, Level::Low, clock.now_us());
                    thread::sleep(hold);
                    edge(&mut timer, Level::High, clock.now_us());
                }
                Source::Stdin => {
                    let lines = io::stdin().lock().lines();
                    let levels = lines
                        .map_while(Result::ok)
                        .filter_map(|l| parse_level(&l));
                    drive(&mut timer, levels, || clock.now_us());
                }
            }
            log::debug!("button source exhausted");
            signal.post(notifications::SHUTDOWN_MASK);
        })
}

/// Feeds `levels` to `timer`, stamping each with `now()`. Returns the number
/// of long presses seen.
pub fn drive<W: Wake>(
    timer: &mut EdgeTimer<W>,
    levels: impl IntoIterator<Item = Level>,
    mut now: impl FnMut() -> u64,
) -> usize {
    let mut longs = 0;
    for level in levels {
        if let Press::Long { .. } = edge(timer, level, now()) {
            longs += 1;
        }
    }
    longs
}

fn edge<W: Wake>(timer: &mut EdgeTimer<W>, level: Level, now: u64) -> Press {
    let press = timer.on_edge(level, now);
    ringbuf_entry!(crate::DEMO_RINGBUF, Trace::Edge(level, press));
    match press {
        Press::Long { held } => log::info!("long press ({held} us)"),
        Press::Short { held } => log::info!("short press ({held} us)"),
        Press::Started | Press::Unmatched => {
            log::debug!("{level:?}: {press:?}")
        }
    }
    press
}

/// Parses one line of edge input. `down` and `0` press the button (the line
/// is active low); `up` and `1` release it.
pub fn parse_level(line: &str) -> Option<Level> {
    match line.trim() {
        "" => None,
        "down" | "0" => Some(Level::Low),
        "up" | "1" => Some(Level::High),
        other => {
            log::warn!("ignoring {other:?}; expected down/up or 0/1");
            None
        }
    }
}
