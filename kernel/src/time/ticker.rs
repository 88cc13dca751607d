// Copyright 2025 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Handles the kernel's internal monotonic ticker.
//!
//! The ticker functionality is captured in the static [`TICKER`], which
//! is advanced by [`interrupt`] and read with [`ticks`] to track the
//! passage of time.

use crate::multitasking::thread;
use core::sync::atomic::{AtomicI64, Ordering};

/// The number of timer ticks per second.
///
pub const TIMER_FREQ: i64 = 100;

/// The system ticker, which is a monotonic counter.
///
static TICKER: AtomicI64 = AtomicI64::new(0);

/// Returns the number of timer ticks since boot.
///
pub fn ticks() -> i64 {
    TICKER.load(Ordering::Relaxed)
}

/// Raises the timer's interrupt line: advances the tick count
/// and runs the thread system's tick handler in interrupt
/// context.
///
/// If the handler requests a yield — because the running
/// thread's time slice expired — the yield happens here, once
/// the handler has returned. This is the only point at which
/// the running thread can lose the CPU involuntarily.
///
pub fn interrupt() {
    let now = TICKER.fetch_add(1, Ordering::Relaxed) + 1;

    let must_yield = interrupts::dispatch(|| thread::tick(now));
    if must_yield {
        thread::yield_now();
    }
}
