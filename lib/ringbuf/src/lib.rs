// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Trace ring buffers that can be fed from interrupt context.
//!
//! A ring buffer holds the last `N` events recorded by a module. It costs a
//! fixed amount of RAM, never allocates, and is meant to be read after the
//! fact: by a debugger, or by a crash-capture hook that copies the entries
//! into a dump before the program goes down.
//!
//! ## Creating a ring buffer
//!
//! Ring buffers are declared with [`ringbuf!`], giving a name, the payload
//! type, the number of entries, and the initial payload:
//!
//! ```
//! #[derive(Copy, Clone, Debug, PartialEq)]
//! enum Trace {
//!     None,
//!     Pressed(u64),
//! }
//!
//! ringbuf::ringbuf!(TRACE, Trace, 16, Trace::None);
//!
//! ringbuf::ringbuf_entry!(TRACE, Trace::Pressed(1234));
//! ```
//!
//! The payload must be `Copy` and `PartialEq`. Recording the same payload
//! from the same source line twice in a row bumps the `count` of the existing
//! entry rather than consuming a new slot.
//!
//! ## Interrupt context
//!
//! Recording never blocks and never panics. Each ring buffer sits behind a
//! [`TraceCell`], a single-borrower cell guarded by an atomic flag. If an
//! interrupt fires while a lower-priority context is in the middle of
//! recording into (or reading) the same ring buffer, the interrupt's entry is
//! dropped and counted in [`TraceCell::lost`] instead.

#![cfg_attr(not(test), no_std)]

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Declares a static ring buffer.
///
/// `ringbuf!(NAME, Type, N, expr)` makes a static named `NAME`, holding `N`
/// entries of type `Type`, all initialized to `expr`. The actual type of
/// `NAME` is `TraceCell<Ringbuf<Type, N>>`.
///
/// If the name is omitted it defaults to `__RINGBUF`, which allows one
/// unnamed ring buffer per module.
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        #[used]
        static $name: $crate::TraceCell<$crate::Ringbuf<$t, $n>> =
            $crate::TraceCell::new($crate::Ringbuf::new($init));
    };
    ($t:ty, $n:expr, $init:expr) => {
        $crate::ringbuf!(__RINGBUF, $t, $n, $init);
    };
}

/// Records an entry into a ring buffer declared with [`ringbuf!`].
///
/// `ringbuf_entry!(NAME, expr)` records `expr`, tagged with the current source
/// line. Without a name, records into `__RINGBUF`.
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        // Evaluate the payload before touching the buffer so that the payload
        // expression can't observe a borrowed cell.
        let (p, buf) = ($payload, &$buf);
        $crate::record(buf, line!() as u16, p);
    }};
    ($payload:expr) => {
        $crate::ringbuf_entry!(__RINGBUF, $payload);
    };
}

/// Records `payload` into the ring buffer in `cell`, or counts it as lost if
/// the ring buffer is busy. This is what [`ringbuf_entry!`] expands to.
pub fn record<T: Copy + PartialEq, const N: usize>(
    cell: &TraceCell<Ringbuf<T, N>>,
    line: u16,
    payload: T,
) {
    match cell.try_borrow_mut() {
        Some(mut ring) => ring.entry(line, payload),
        None => {
            cell.lost.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// A single-borrower cell for use in a static.
///
/// Unlike a `RefCell`, a second borrow does not panic: it simply fails, which
/// is what an interrupt handler needs.
pub struct TraceCell<T> {
    borrowed: AtomicBool,
    lost: AtomicU32,
    cell: UnsafeCell<T>,
}

// Safety: access to `cell` is only handed out through `try_borrow_mut`, which
// the `borrowed` flag makes exclusive.
unsafe impl<T: Send> Sync for TraceCell<T> {}

impl<T> TraceCell<T> {
    pub const fn new(contents: T) -> Self {
        Self {
            borrowed: AtomicBool::new(false),
            lost: AtomicU32::new(0),
            cell: UnsafeCell::new(contents),
        }
    }

    /// Gets exclusive access to the contents, or `None` if someone else holds
    /// it right now.
    pub fn try_borrow_mut(&self) -> Option<TraceRef<'_, T>> {
        if self.borrowed.swap(true, Ordering::Acquire) {
            return None;
        }
        // Safety: the swap above guarantees no other `TraceRef` exists.
        Some(TraceRef {
            contents: unsafe { &mut *self.cell.get() },
            borrow: &self.borrowed,
        })
    }

    /// Number of entries dropped because the cell was busy.
    pub fn lost(&self) -> u32 {
        self.lost.load(Ordering::Relaxed)
    }
}

pub struct TraceRef<'a, T> {
    contents: &'a mut T,
    borrow: &'a AtomicBool,
}

impl<T> Drop for TraceRef<'_, T> {
    fn drop(&mut self) {
        self.borrow.store(false, Ordering::Release);
    }
}

impl<T> core::ops::Deref for TraceRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.contents
    }
}

impl<T> core::ops::DerefMut for TraceRef<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.contents
    }
}

/// One slot of a [`Ringbuf`].
///
/// `count` is zero for a slot that has never been written; `generation`
/// counts how many times the slot has been overwritten.
#[derive(Debug, Copy, Clone)]
pub struct RingbufEntry<T: Copy + PartialEq> {
    pub line: u16,
    pub generation: u16,
    pub count: u32,
    pub payload: T,
}

/// A ring buffer of `N` entries. Normally declared through [`ringbuf!`].
#[derive(Debug)]
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    last: Option<usize>,
    buffer: [RingbufEntry<T>; N],
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, N> {
    pub const fn new(init: T) -> Self {
        Self {
            last: None,
            buffer: [RingbufEntry {
                line: 0,
                generation: 0,
                count: 0,
                payload: init,
            }; N],
        }
    }

    pub fn entry(&mut self, line: u16, payload: T) {
        if let Some(ent) = self.last.and_then(|i| self.buffer.get_mut(i)) {
            if ent.line == line && ent.payload == payload {
                // Saturated entries fall through and take a fresh slot.
                if let Some(count) = ent.count.checked_add(1) {
                    ent.count = count;
                    return;
                }
            }
        }

        // No modulus here: the targets we care about lack a hardware divide.
        let ndx = match self.last {
            Some(last) if last + 1 < N => last + 1,
            _ => 0,
        };

        let Some(ent) = self.buffer.get_mut(ndx) else {
            // Zero-sized ring buffer.
            return;
        };
        *ent = RingbufEntry {
            line,
            generation: ent.generation.wrapping_add(1),
            count: 1,
            payload,
        };
        self.last = Some(ndx);
    }

    /// Iterates over the recorded entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &RingbufEntry<T>> + '_ {
        let start = match self.last {
            Some(last) if last + 1 < N => last + 1,
            _ => 0,
        };
        self.buffer[start..]
            .iter()
            .chain(&self.buffer[..start])
            .filter(|ent| ent.count != 0)
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_none()
    }
}
