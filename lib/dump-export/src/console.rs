// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::DumpSink;
use core::fmt::{self, Write};

pub const BEGIN_BANNER: &str =
    "================= CORE DUMP START =================";
pub const END_BANNER: &str =
    "================= CORE DUMP END ===================";

/// Prints a dump to a console, one record per line, between two banners.
/// Lines end in `\r\n` so the output reads right on a raw serial terminal.
pub struct ConsoleSink<W> {
    out: W,
}

impl<W: Write> ConsoleSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> DumpSink for ConsoleSink<W> {
    type Context = ();
    type Error = fmt::Error;

    fn begin(&mut self, _: &mut ()) -> fmt::Result {
        write!(self.out, "{BEGIN_BANNER}\r\n")
    }

    fn write(&mut self, _: &mut (), line: &str) -> fmt::Result {
        write!(self.out, "{line}\r\n")
    }

    fn end(&mut self, _: &mut ()) -> fmt::Result {
        write!(self.out, "{END_BANNER}\r\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{export, ExportError};

    #[test]
    fn banners_around_records() {
        let mut sink = ConsoleSink::new(String::new());
        assert_eq!(export(&mut sink, &mut (), ["line1", "line2"]), Ok(2));
        assert_eq!(
            sink.into_inner(),
            format!("{BEGIN_BANNER}\r\nline1\r\nline2\r\n{END_BANNER}\r\n")
        );
    }

    #[test]
    fn banners_match_across_lines() {
        assert_eq!(BEGIN_BANNER.len(), END_BANNER.len());
    }

    /// A console that accepts a fixed number of bytes and then fails, like a
    /// full buffer.
    struct Tiny {
        room: usize,
        out: String,
    }

    impl Write for Tiny {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            if s.len() > self.room {
                return Err(fmt::Error);
            }
            self.room -= s.len();
            self.out.push_str(s);
            Ok(())
        }
    }

    #[test]
    fn full_console_reports_write_failure() {
        let mut sink = ConsoleSink::new(Tiny {
            room: BEGIN_BANNER.len() + 2 + 6 + 2,
            out: String::new(),
        });
        let r = export(&mut sink, &mut (), ["first!", "second"]);
        assert_eq!(
            r,
            Err(ExportError::Write {
                record: 1,
                error: fmt::Error
            })
        );
        // The end banner didn't fit either, but the write failure came first.
        assert!(sink.into_inner().out.ends_with("first!\r\n"));
    }
}
