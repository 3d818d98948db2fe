// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Long-press crash-dump demo.
//!
//! Boots the way the device does: bring up the store, export any dump the
//! last run left behind, then wait for the button. Holding the button past
//! the threshold crashes the program on purpose. The crash is captured into
//! the store, and the next run prints it.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};

use dump_export::{lines, ConsoleSink};
use long_press::{EdgeTimer, Level, Press};
use ringbuf::{ringbuf, ringbuf_entry};
use wake_signal::WakeSignal;

mod button;
mod capture;
mod config;
mod nvs;

use config::Config;
use nvs::DirStore;

mod notifications {
    pub const BUTTON_MASK: u32 = 1 << 0;
    pub const SHUTDOWN_MASK: u32 = 1 << 1;
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Armed { threshold_us: u64 },
    Edge(Level, Press),
    Woken(u32),
    Exported(usize),
    ExportFailed,
    LongPress,
    Shutdown,
}

ringbuf!(DEMO_RINGBUF, Trace, 32, Trace::None);

static SIGNAL: WakeSignal = WakeSignal::new();

const DEFAULT_CONFIG: &str = "app.toml";

#[derive(Debug, Parser)]
#[clap(
    max_term_width = 80,
    about = "crashes on a long button press, and prints the dump next boot"
)]
struct Args {
    /// Configuration file [default: app.toml, if present]
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Directory emulating non-volatile storage (overrides `store.path`)
    #[clap(long)]
    store: Option<PathBuf>,

    /// Long-press threshold in milliseconds (overrides
    /// `button.threshold-ms`)
    #[clap(long)]
    threshold_ms: Option<u64>,

    /// Press the button once, for this many milliseconds
    #[clap(long, conflicts_with = "stdin")]
    hold_ms: Option<u64>,

    /// Read button edges from stdin: `down`/`up` or `0`/`1`, one per line
    #[clap(long)]
    stdin: bool,
}

impl Args {
    /// Where button edges come from, if anywhere.
    fn edge_source(&self) -> Option<button::Source> {
        match (self.hold_ms, self.stdin) {
            (Some(ms), _) => {
                Some(button::Source::Hold(Duration::from_millis(ms)))
            }
            (None, true) => Some(button::Source::Stdin),
            (None, false) => None,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    let mut store = DirStore::new(
        config.store.path.clone(),
        config.store.format_version,
    );
    nvs::init_or_reset(&mut store).with_context(|| {
        format!("could not initialize store in {}", store.path().display())
    })?;

    let mut console = Console::new(io::stdout().lock());
    export_pending(&store, &mut console)?;
    drop(console);
    capture::install(store);

    let threshold_us = config.threshold_us();
    let timer = EdgeTimer::new(
        threshold_us,
        SIGNAL.notifier(notifications::BUTTON_MASK),
    );
    match args.edge_source() {
        Some(source) => {
            button::arm(timer, source, &SIGNAL)
                .context("could not start button thread")?;
            ringbuf_entry!(DEMO_RINGBUF, Trace::Armed { threshold_us });
        }
        None => info!("no button source (see --hold-ms, --stdin)"),
    }

    ctrlc::set_handler(|| SIGNAL.post(notifications::SHUTDOWN_MASK))
        .context("could not install Ctrl-C handler")?;

    info!(
        "waiting for a press longer than {} ms",
        config.button.threshold_ms
    );
    loop {
        let bits = SIGNAL
            .wait(notifications::BUTTON_MASK | notifications::SHUTDOWN_MASK);
        ringbuf_entry!(DEMO_RINGBUF, Trace::Woken(bits));

        // A long press wins over a shutdown that arrived alongside it.
        if bits & notifications::BUTTON_MASK != 0 {
            long_press();
        }
        if bits & notifications::SHUTDOWN_MASK != 0 {
            ringbuf_entry!(DEMO_RINGBUF, Trace::Shutdown);
            info!("shutting down");
            return Ok(());
        }
    }
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None if Path::new(DEFAULT_CONFIG).exists() => {
            Config::from_file(Path::new(DEFAULT_CONFIG))?
        }
        None => Config::default(),
    };
    if let Some(path) = &args.store {
        config.store.path = path.clone();
    }
    if let Some(ms) = args.threshold_ms {
        config.button.threshold_ms = ms;
    }
    config.validate()?;
    Ok(config)
}

/// Prints the dump left by the last run to `out`, if there is one. The dump
/// is only dropped once it has made it out in full.
fn export_pending<W: io::Write>(
    store: &DirStore,
    out: &mut Console<W>,
) -> Result<()> {
    let Some(dump) = store.pending_dump()? else {
        info!("no core dump pending");
        return Ok(());
    };

    info!("exporting {} byte core dump", dump.len());
    let mut sink = ConsoleSink::new(&mut *out);
    let result = lines::export_bytes(&mut sink, &mut (), &dump);
    let flushed = out.flush();

    match (result, flushed) {
        (Ok(n), Ok(())) => {
            ringbuf_entry!(DEMO_RINGBUF, Trace::Exported(n));
            info!("core dump exported in {n} records");
            store
                .clear_dump()
                .context("could not clear exported core dump")?;
        }
        (Ok(_), Err(e)) => {
            ringbuf_entry!(DEMO_RINGBUF, Trace::ExportFailed);
            error!("could not flush console: {e}; keeping core dump");
        }
        (Err(e), _) => {
            ringbuf_entry!(DEMO_RINGBUF, Trace::ExportFailed);
            match out.take_error() {
                Some(cause) => error!("{e} ({cause}); keeping core dump"),
                None => error!("{e}; keeping core dump"),
            }
        }
    }
    Ok(())
}

/// What a long press does: crash, so the capture path gets exercised.
fn long_press() -> ! {
    ringbuf_entry!(DEMO_RINGBUF, Trace::LongPress);
    panic!("button held past threshold");
}

/// Adapts an `io::Write` to the `fmt::Write` that `ConsoleSink` wants.
/// `fmt::Error` carries nothing, so the I/O error behind the most recent
/// failed write is kept here until someone asks for it.
struct Console<W> {
    out: W,
    error: Option<io::Error>,
}

impl<W: io::Write> Console<W> {
    fn new(out: W) -> Self {
        Self { out, error: None }
    }

    fn take_error(&mut self) -> Option<io::Error> {
        self.error.take()
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

impl<W: io::Write> fmt::Write for Console<W> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.out.write_all(s.as_bytes()).map_err(|e| {
            self.error = Some(e);
            fmt::Error
        })
    }
}
