// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Streaming export of crash-dump records to an arbitrary sink.
//!
//! Whatever captured the dump decides when to export it and produces the
//! records; a [`DumpSink`] decides where they go (a console, a socket, a
//! file). Between the two sits a three-phase protocol:
//!
//! 1. [`DumpSink::begin`], once, before any record;
//! 2. [`DumpSink::write`], once per record, in the order produced;
//! 3. [`DumpSink::end`], exactly once, after the last record, even if an
//!    earlier phase failed.
//!
//! Every call gets the same caller-owned context value, which the exporter
//! never looks at.
//!
//! ## Failures
//!
//! The first failure wins. If `begin` fails, no record is written. If a
//! `write` fails, the remaining records are not written (the export aborts
//! rather than pressing on with a sink that has already lost data). In both
//! cases `end` still runs so the sink can close whatever it opened, and the
//! export reports the earlier failure even if `end` fails too. An `end`
//! failure after an otherwise clean export is reported as such.

#![cfg_attr(not(test), no_std)]

use ringbuf::{ringbuf, ringbuf_entry};

mod console;
pub mod lines;

pub use console::{ConsoleSink, BEGIN_BANNER, END_BANNER};

/// A consumer of dump records.
pub trait DumpSink {
    /// Opaque value threaded through all three phases.
    type Context;
    type Error;

    /// Called once before any record. A sink would open its connection or
    /// session here.
    fn begin(&mut self, cx: &mut Self::Context) -> Result<(), Self::Error>;

    /// Called once per record. `line` is only valid for the duration of the
    /// call; a sink that wants to keep it must copy it.
    fn write(
        &mut self,
        cx: &mut Self::Context,
        line: &str,
    ) -> Result<(), Self::Error>;

    /// Called exactly once at the end of the export.
    fn end(&mut self, cx: &mut Self::Context) -> Result<(), Self::Error>;
}

/// The first failure of an export, and the phase it happened in.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ExportError<E> {
    Begin(E),
    /// Writing record number `record` (counting from zero) failed.
    Write { record: usize, error: E },
    End(E),
}

impl<E> ExportError<E> {
    /// The sink's error, whichever phase produced it.
    pub fn into_inner(self) -> E {
        match self {
            ExportError::Begin(e)
            | ExportError::Write { error: e, .. }
            | ExportError::End(e) => e,
        }
    }
}

impl<E: core::fmt::Display> core::fmt::Display for ExportError<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ExportError::Begin(e) => {
                write!(f, "dump export failed to begin: {e}")
            }
            ExportError::Write { record, error } => {
                write!(f, "dump export failed writing record {record}: {error}")
            }
            ExportError::End(e) => write!(f, "dump export failed to end: {e}"),
        }
    }
}

impl<E: core::error::Error + 'static> core::error::Error for ExportError<E> {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            ExportError::Begin(e)
            | ExportError::Write { error: e, .. }
            | ExportError::End(e) => Some(e),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Begin,
    BeginFailed,
    WriteFailed(usize),
    Skipped(usize),
    End { written: usize },
    EndFailed,
}

ringbuf!(Trace, 16, Trace::None);

/// An export in progress.
///
/// Creating one calls `begin`; [`Export::finish`] calls `end`. If the session
/// is dropped without being finished, `end` is called from `drop` and its
/// result is discarded.
pub struct Export<'a, S: DumpSink> {
    sink: &'a mut S,
    cx: &'a mut S::Context,
    written: usize,
    error: Option<ExportError<S::Error>>,
    ended: bool,
}

impl<'a, S: DumpSink> Export<'a, S> {
    pub fn begin(sink: &'a mut S, cx: &'a mut S::Context) -> Self {
        ringbuf_entry!(Trace::Begin);
        let error = match sink.begin(cx) {
            Ok(()) => None,
            Err(e) => {
                ringbuf_entry!(Trace::BeginFailed);
                Some(ExportError::Begin(e))
            }
        };
        Self {
            sink,
            cx,
            written: 0,
            error,
            ended: false,
        }
    }

    /// Passes one record to the sink. Returns `false` if the record was not
    /// accepted, either because the sink refused it or because an earlier
    /// phase already failed; once that happens, further records are dropped.
    pub fn write(&mut self, line: &str) -> bool {
        if self.error.is_some() {
            ringbuf_entry!(Trace::Skipped(self.written));
            return false;
        }
        match self.sink.write(self.cx, line) {
            Ok(()) => {
                self.written += 1;
                true
            }
            Err(error) => {
                ringbuf_entry!(Trace::WriteFailed(self.written));
                self.error = Some(ExportError::Write {
                    record: self.written,
                    error,
                });
                false
            }
        }
    }

    /// Whether a failure has stopped the export.
    pub fn is_aborted(&self) -> bool {
        self.error.is_some()
    }

    /// Records accepted by the sink so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Ends the export, returning the number of records written or the first
    /// failure.
    pub fn finish(mut self) -> Result<usize, ExportError<S::Error>> {
        let end = self.end();
        match (self.error.take(), end) {
            (Some(e), _) => Err(e),
            (None, Err(e)) => Err(ExportError::End(e)),
            (None, Ok(())) => Ok(self.written),
        }
    }

    fn end(&mut self) -> Result<(), S::Error> {
        self.ended = true;
        let r = self.sink.end(self.cx);
        if r.is_err() {
            ringbuf_entry!(Trace::EndFailed);
        } else {
            ringbuf_entry!(Trace::End {
                written: self.written
            });
        }
        r
    }
}

impl<S: DumpSink> Drop for Export<'_, S> {
    fn drop(&mut self) {
        if !self.ended {
            let _ = self.end();
        }
    }
}

/// Exports every record of `records` to `sink`.
pub fn export<S, I>(
    sink: &mut S,
    cx: &mut S::Context,
    records: I,
) -> Result<usize, ExportError<S::Error>>
where
    S: DumpSink,
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut session = Export::begin(sink, cx);
    // Don't pull anything out of the producer once we know it's going nowhere.
    if !session.is_aborted() {
        for record in records {
            if !session.write(record.as_ref()) {
                break;
            }
        }
    }
    session.finish()
}


#[cfg(test)]
mod tests {
    use super::test_sink::{Call, Fail, Recorder};
    use super::*;

    const CX: u32 = 0xc0ffee;

    fn write(s: &str) -> Call {
        Call::Write(CX, s.to_owned())
    }

    #[test]
    fn two_records_in_order() {
        let mut sink = Recorder::default();
        let r = export(&mut sink, &mut { CX }, ["line1", "line2"]);
        assert_eq!(r, Ok(2));
        assert_eq!(
            sink.calls,
            [Call::Begin(CX), write("line1"), write("line2"), Call::End(CX)]
        );
    }

    #[test]
    fn no_records() {
        let mut sink = Recorder::default();
        let r = export(&mut sink, &mut { CX }, core::iter::empty::<&str>());
        assert_eq!(r, Ok(0));
        assert_eq!(sink.calls, [Call::Begin(CX), Call::End(CX)]);
    }

    #[test]
    fn many_records_keep_order() {
        let records: Vec<String> =
            (0..100).map(|i| format!("rec{i}")).collect();
        let mut sink = Recorder::default();
        assert_eq!(export(&mut sink, &mut { CX }, &records), Ok(100));
        assert_eq!(sink.calls.len(), 102);
        assert_eq!(sink.calls.first(), Some(&Call::Begin(CX)));
        assert_eq!(sink.calls.last(), Some(&Call::End(CX)));
        for (call, rec) in sink.calls[1..101].iter().zip(&records) {
            assert_eq!(call, &write(rec));
        }
    }

    #[test]
    fn begin_failure_skips_writes_but_ends() {
        let mut sink = Recorder {
            fail_begin: true,
            ..Default::default()
        };
        let r = export(&mut sink, &mut { CX }, ["line1", "line2"]);
        assert_eq!(r, Err(ExportError::Begin(Fail::Begin)));
        assert_eq!(sink.calls, [Call::Begin(CX), Call::End(CX)]);
    }

    #[test]
    fn begin_failure_wins_over_end_failure() {
        let mut sink = Recorder {
            fail_begin: true,
            fail_end: true,
            ..Default::default()
        };
        let r = export(&mut sink, &mut { CX }, ["line1"]);
        assert_eq!(r, Err(ExportError::Begin(Fail::Begin)));
    }

    #[test]
    fn write_failure_aborts_remaining_writes() {
        let mut sink = Recorder {
            fail_write_at: Some(1),
            ..Default::default()
        };
        let r = export(&mut sink, &mut { CX }, ["a", "b", "c", "d"]);
        assert_eq!(
            r,
            Err(ExportError::Write {
                record: 1,
                error: Fail::Write
            })
        );
        assert_eq!(
            sink.calls,
            [Call::Begin(CX), write("a"), write("b"), Call::End(CX)]
        );
    }

    #[test]
    fn end_failure_after_clean_run() {
        let mut sink = Recorder {
            fail_end: true,
            ..Default::default()
        };
        let r = export(&mut sink, &mut { CX }, ["a"]);
        assert_eq!(r, Err(ExportError::End(Fail::End)));
        assert_eq!(r.unwrap_err().into_inner(), Fail::End);
    }

    #[test]
    fn session_counts_and_skips() {
        let mut sink = Recorder {
            fail_write_at: Some(0),
            ..Default::default()
        };
        let mut cx = CX;
        let mut session = Export::begin(&mut sink, &mut cx);
        assert!(!session.is_aborted());
        assert!(!session.write("x"));
        assert!(session.is_aborted());
        assert!(!session.write("y"));
        assert_eq!(session.written(), 0);
        assert!(session.finish().is_err());
        assert_eq!(sink.calls, [Call::Begin(CX), write("x"), Call::End(CX)]);
    }

    #[test]
    fn dropped_session_still_ends_once() {
        let mut sink = Recorder::default();
        let mut cx = CX;
        {
            let mut session = Export::begin(&mut sink, &mut cx);
            assert!(session.write("only"));
        }
        assert_eq!(sink.calls, [Call::Begin(CX), write("only"), Call::End(CX)]);
    }

    #[test]
    fn display_names_the_phase() {
        #[derive(Debug)]
        struct Oops;
        impl core::fmt::Display for Oops {
            fn fmt(
                &self,
                f: &mut core::fmt::Formatter<'_>,
            ) -> core::fmt::Result {
                f.write_str("oops")
            }
        }
        let e = ExportError::Write {
            record: 3,
            error: Oops,
        };
        assert_eq!(e.to_string(), "dump export failed writing record 3: oops");
    }
}
