// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Crash capture.
//!
//! On panic, we render what we know (the panic message, where it happened,
//! and the contents of the trace ring) into a dump and leave it in the store.
//! The next boot finds it and exports it.

use std::fmt::{Debug, Write};
use std::panic;

use ringbuf::{Ringbuf, TraceCell};

use crate::nvs::DirStore;

/// Installs a panic hook that saves a dump into `store` and then runs the
/// hook that was there before.
pub fn install(store: DirStore) {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        let payload = info.payload();
        let message = payload
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("(non-string panic payload)");
        let location = info.location().map(|l| (l.file(), l.line()));

        let dump = render(message, location, &crate::DEMO_RINGBUF);
        match store.save_dump(dump.as_bytes()) {
            Ok(()) => log::error!(
                "core dump of {} bytes saved to {}",
                dump.len(),
                store.path().display()
            ),
            Err(e) => log::error!("failed to save core dump: {e}"),
        }
        previous(info);
    }));
}

/// Renders a dump. The format is plain text, meant to be read by a person
/// once the records are decoded.
pub fn render<T: Copy + PartialEq + Debug, const N: usize>(
    message: &str,
    location: Option<(&str, u32)>,
    trace: &TraceCell<Ringbuf<T, N>>,
) -> String {
    let mut out = String::new();
    // Writing to a String can't fail.
    let _ = write_dump(&mut out, message, location, trace);
    out
}

fn write_dump<T: Copy + PartialEq + Debug, const N: usize>(
    out: &mut String,
    message: &str,
    location: Option<(&str, u32)>,
    trace: &TraceCell<Ringbuf<T, N>>,
) -> std::fmt::Result {
    writeln!(out, "{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))?;
    writeln!(out, "panic: {message}")?;
    match location {
        Some((file, line)) => writeln!(out, "at: {file}:{line}")?,
        None => writeln!(out, "at: unknown")?,
    }

    writeln!(out, "trace (lost {}):", trace.lost())?;
    match trace.try_borrow_mut() {
        Some(ring) => {
            for ent in ring.iter() {
                writeln!(
                    out,
                    "  {:>5} {:>5} {:>5} {:?}",
                    ent.line, ent.generation, ent.count, ent.payload
                )?;
            }
        }
        // Whoever holds it will be done shortly, but we can't wait.
        None => writeln!(out, "  (busy)")?,
    }
    Ok(())
}
