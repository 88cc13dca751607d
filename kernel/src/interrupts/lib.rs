// Copyright 2025 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements the kernel's interrupt discipline.
//!
//! The scheduler's critical sections are guarded by disabling interrupts,
//! not by locks: on a single CPU, code that runs with interrupts disabled
//! cannot be preempted, so it may mutate the scheduler's queues freely.
//! This crate provides that discipline as three flags:
//!
//! * the interrupt *level* ([`Level::On`] or [`Level::Off`]), changed with
//!   [`enable`], [`disable`] and [`set_level`];
//! * the *handler context* flag ([`context`]), set while an external
//!   interrupt handler runs;
//! * the deferred-yield flag, set by a handler with [`yield_on_return`]
//!   and collected by [`dispatch`] when the handler finishes.
//!
//! External interrupts enter through [`dispatch`], which runs the handler
//! with interrupts off and the context flag set, then reports whether the
//! handler requested a yield. The caller performs that yield once the
//! handler has fully unwound, which is the only safe point to switch
//! threads out of an interrupt.
//!
//! Interrupts start out disabled; the thread system enables them once the
//! idle and wakeup threads exist.

#![no_std]

use core::sync::atomic::{AtomicBool, Ordering};

/// The two interrupt states.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Level {
    /// Interrupts are enabled and a handler may be dispatched.
    On,

    /// Interrupts are disabled.
    Off,
}

/// Whether interrupts are currently enabled.
///
static ENABLED: AtomicBool = AtomicBool::new(false);

/// Whether an external interrupt handler is currently
/// running.
///
static IN_HANDLER: AtomicBool = AtomicBool::new(false);

/// Whether the running handler has requested that the
/// interrupted thread yield once the handler returns.
///
static YIELD_ON_RETURN: AtomicBool = AtomicBool::new(false);

/// Returns the current interrupt level.
///
pub fn level() -> Level {
    if ENABLED.load(Ordering::SeqCst) {
        Level::On
    } else {
        Level::Off
    }
}

/// Returns whether interrupts are enabled.
///
pub fn are_enabled() -> bool {
    ENABLED.load(Ordering::SeqCst)
}

/// Enables interrupts, returning the previous level.
///
/// # Panics
///
/// `enable` panics if called from an interrupt handler:
/// handlers always run to completion with interrupts off.
///
pub fn enable() -> Level {
    assert!(!context(), "interrupts enabled in an interrupt handler");
    if ENABLED.swap(true, Ordering::SeqCst) {
        Level::On
    } else {
        Level::Off
    }
}

/// Disables interrupts, returning the previous level.
///
pub fn disable() -> Level {
    if ENABLED.swap(false, Ordering::SeqCst) {
        Level::On
    } else {
        Level::Off
    }
}

/// Sets the interrupt level, returning the previous level.
///
pub fn set_level(level: Level) -> Level {
    match level {
        Level::On => enable(),
        Level::Off => disable(),
    }
}

/// Runs `f` with interrupts disabled, restoring the
/// previous level afterwards.
///
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let old_level = disable();
    let ret = f();
    set_level(old_level);
    ret
}

/// Returns whether an external interrupt handler is
/// currently running.
///
pub fn context() -> bool {
    IN_HANDLER.load(Ordering::SeqCst)
}

/// Requests that the interrupted thread yield the CPU once
/// the current handler returns.
///
/// # Panics
///
/// `yield_on_return` panics if called outside an interrupt
/// handler.
///
pub fn yield_on_return() {
    assert!(context(), "yield_on_return called outside an interrupt handler");
    YIELD_ON_RETURN.store(true, Ordering::SeqCst);
}

/// Delivers one external interrupt, running `handler` under
/// the handler discipline.
///
/// The handler runs with interrupts disabled and [`context`]
/// set. `dispatch` returns whether the handler requested a
/// yield, clearing the request; the caller must then yield on
/// the interrupted thread's behalf.
///
/// # Panics
///
/// `dispatch` panics if interrupts are disabled (hardware
/// would hold the interrupt line instead) or if a handler is
/// already running.
///
pub fn dispatch<F>(handler: F) -> bool
where
    F: FnOnce(),
{
    assert!(are_enabled(), "interrupt delivered with interrupts disabled");
    assert!(!context(), "interrupt delivered inside an interrupt handler");

    ENABLED.store(false, Ordering::SeqCst);
    IN_HANDLER.store(true, Ordering::SeqCst);
    handler();
    IN_HANDLER.store(false, Ordering::SeqCst);
    ENABLED.store(true, Ordering::SeqCst);

    YIELD_ON_RETURN.swap(false, Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    // The flags are process-wide, so the whole discipline is
    // exercised by a single sequential test.
    #[test]
    fn discipline() {
        assert_eq!(level(), Level::Off);
        assert!(!are_enabled());
        assert!(!context());

        assert_eq!(enable(), Level::Off);
        assert_eq!(enable(), Level::On);
        assert!(are_enabled());

        assert_eq!(disable(), Level::On);
        assert_eq!(disable(), Level::Off);
        assert_eq!(set_level(Level::On), Level::Off);

        let nested = without_interrupts(|| {
            assert_eq!(level(), Level::Off);
            without_interrupts(|| assert_eq!(level(), Level::Off));
            assert_eq!(level(), Level::Off);
            42
        });
        assert_eq!(nested, 42);
        assert_eq!(level(), Level::On);

        // A handler runs with interrupts off and the context
        // flag set; its yield request is reported once.
        let must_yield = dispatch(|| {
            assert!(context());
            assert_eq!(level(), Level::Off);
            yield_on_return();
        });
        assert!(must_yield);
        assert_eq!(level(), Level::On);
        assert!(!context());

        assert!(!dispatch(|| {}));

        disable();
    }
}
