// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Coalescing wake-ups from interrupt context to a waiting task.
//!
//! A [`WakeSignal`] is a word of notification bits, in the same shape as a
//! Hubris task's notification set. An interrupt handler (or anything else)
//! calls [`WakeSignal::post`] to set bits; a single designated waiter blocks
//! in [`WakeSignal::wait`] until one of the bits it cares about is set, and
//! clears them as it takes them.
//!
//! Bits are not counted. Posting a bit that is already pending does nothing,
//! so a waiter that is slow to come back sees exactly one wake-up no matter
//! how many times the bit was posted in the meantime.
//!
//! `post` is lock-free and never blocks, which makes it safe to call from an
//! interrupt handler. The waiting side is where the blocking happens:
//!
//! - With the `std` feature, the first thread to call `wait` becomes the
//!   designated waiter and parks; `post` unparks it.
//! - Without `std` there is nothing to park on, and `wait` spins.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

use core::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "std")]
use std::sync::OnceLock;
#[cfg(feature = "std")]
use std::thread::{self, Thread};
#[cfg(feature = "std")]
use std::time::{Duration, Instant};

/// Something that can be woken. This is the seam between an event source
/// (such as a long-press detector) and whatever primitive delivers the
/// wake-up.
///
/// Implementations must be safe to call from interrupt context: no blocking,
/// no allocation.
pub trait Wake {
    fn wake(&self);
}

impl<W: Wake + ?Sized> Wake for &W {
    fn wake(&self) {
        (**self).wake()
    }
}

pub struct WakeSignal {
    pending: AtomicU32,
    #[cfg(feature = "std")]
    waiter: OnceLock<Thread>,
}

impl Default for WakeSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl WakeSignal {
    pub const fn new() -> Self {
        Self {
            pending: AtomicU32::new(0),
            #[cfg(feature = "std")]
            waiter: OnceLock::new(),
        }
    }

    /// Sets `bits` as pending and wakes the waiter, if there is one.
    ///
    /// Safe to call from interrupt context.
    pub fn post(&self, bits: u32) {
        self.pending.fetch_or(bits, Ordering::Release);
        self.unpark();
    }

    /// Clears and returns whichever bits of `mask` are pending, without
    /// blocking. Bits outside `mask` are left alone.
    pub fn take(&self, mask: u32) -> u32 {
        self.pending.fetch_and(!mask, Ordering::Acquire) & mask
    }

    /// Returns the pending bits without clearing any.
    pub fn peek(&self) -> u32 {
        self.pending.load(Ordering::Acquire)
    }

    /// Blocks until at least one bit of `mask` is pending, then clears and
    /// returns the pending bits of `mask`.
    pub fn wait(&self, mask: u32) -> u32 {
        // Register before looking at the bits, so that a post landing between
        // the check and the park leaves an unpark token behind.
        self.register();
        loop {
            let bits = self.take(mask);
            if bits != 0 {
                return bits;
            }
            self.park();
        }
    }

    /// Returns a [`Wake`] handle that posts `mask` to this signal.
    pub fn notifier(&self, mask: u32) -> Notifier<'_> {
        Notifier { signal: self, mask }
    }

    #[cfg(feature = "std")]
    fn park(&self) {
        thread::park();
    }

    #[cfg(feature = "std")]
    fn unpark(&self) {
        if let Some(waiter) = self.waiter.get() {
            waiter.unpark();
        }
    }

    #[cfg(not(feature = "std"))]
    fn park(&self) {
        core::hint::spin_loop();
    }

    #[cfg(not(feature = "std"))]
    fn unpark(&self) {}

    #[cfg(not(feature = "std"))]
    fn register(&self) {}

    /// Makes the calling thread the designated waiter. The registration is
    /// permanent: a signal wakes one specific context, and waiting on it from
    /// anywhere else is a bug.
    #[cfg(feature = "std")]
    fn register(&self) {
        let me = thread::current();
        let waiter = self.waiter.get_or_init(|| me.clone());
        debug_assert_eq!(waiter.id(), me.id(), "second waiter on WakeSignal");
    }
}

#[cfg(feature = "std")]
impl WakeSignal {
    /// Like [`WakeSignal::wait`], but gives up after `timeout` and returns 0.
    pub fn wait_timeout(&self, mask: u32, timeout: Duration) -> u32 {
        let deadline = Instant::now() + timeout;
        self.register();
        loop {
            let bits = self.take(mask);
            if bits != 0 {
                return bits;
            }
            let now = Instant::now();
            if now >= deadline {
                return 0;
            }
            thread::park_timeout(deadline - now);
        }
    }
}

/// A handle that posts a fixed set of bits to a [`WakeSignal`].
#[derive(Copy, Clone)]
pub struct Notifier<'a> {
    signal: &'a WakeSignal,
    mask: u32,
}

impl Notifier<'_> {
    pub fn mask(&self) -> u32 {
        self.mask
    }
}

impl Wake for Notifier<'_> {
    fn wake(&self) {
        self.signal.post(self.mask);
    }
}
