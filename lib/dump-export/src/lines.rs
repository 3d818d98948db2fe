// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Turning a raw dump into text records.
//!
//! A captured dump is bytes; sinks take lines of text. This module cuts the
//! dump into chunks of [`LINE_BYTES`] and base64-encodes each chunk into one
//! record of (at most) [`LINE_CHARS`] characters, so the records can be
//! concatenated and decoded on the other end. Encoding happens one line at a
//! time in a stack buffer.

use crate::{DumpSink, Export, ExportError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use static_assertions::const_assert;

/// Dump bytes per record.
pub const LINE_BYTES: usize = 48;

/// Characters in a full record.
pub const LINE_CHARS: usize = LINE_BYTES / 3 * 4;

// Whole base64 groups, so that only the last record carries padding.
const_assert!(LINE_BYTES % 3 == 0);
const_assert!(LINE_CHARS <= 76);

/// Number of records `export_bytes` produces for a dump of `len` bytes.
pub const fn record_count(len: usize) -> usize {
    len.div_ceil(LINE_BYTES)
}

/// Exports `dump` to `sink` as base64 records.
pub fn export_bytes<S: DumpSink>(
    sink: &mut S,
    cx: &mut S::Context,
    dump: &[u8],
) -> Result<usize, ExportError<S::Error>> {
    let mut session = Export::begin(sink, cx);
    let mut buf = [0u8; LINE_CHARS];
    for chunk in dump.chunks(LINE_BYTES) {
        if session.is_aborted() {
            break;
        }
        session.write(encode_line(chunk, &mut buf));
    }
    session.finish()
}

fn encode_line<'b>(chunk: &[u8], buf: &'b mut [u8; LINE_CHARS]) -> &'b str {
    // Neither step can fail: a chunk is at most LINE_BYTES, which encodes to
    // at most LINE_CHARS, and base64 output is ASCII.
    let n = STANDARD.encode_slice(chunk, &mut buf[..]).unwrap_or(0);
    core::str::from_utf8(&buf[..n]).unwrap_or("")
}
