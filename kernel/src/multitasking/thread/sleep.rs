// Copyright 2025 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements the timer-driven sleep facility.
//!
//! A thread that sleeps is placed on the sleep queue, ordered by the
//! absolute tick at which it must wake, and blocked. Expired entries are
//! not resumed by the timer interrupt handler itself: draining the queue
//! involves unbounded work, so the handler only unblocks the dedicated
//! *wakeup thread*, which runs at [`PRI_MAX`](super::PRI_MAX) and does
//! the draining at thread level. Because the wakeup thread outranks
//! every other thread, it runs as soon as the interrupted thread reaches
//! its next yield point.
//!
//! The wakeup thread re-checks the head of the queue before it blocks
//! again. The tick handler only notifies a *blocked* wakeup thread, so a
//! tick that expires an entry while the wakeup thread is awake but
//! preempted would otherwise be lost.

use crate::multitasking::thread;
use crate::multitasking::thread::{Thread, PRI_MAX};
use alloc::sync::Arc;
use list::List;
use spin::Once;

/// The sleep queue: blocked threads waiting for a tick,
/// ordered by ascending wake tick.
///
static SLEEP_QUEUE: spin::Mutex<List<Arc<Thread>>> = spin::Mutex::new(List::new());

/// The wakeup thread, which drains the sleep queue. Registered
/// by the thread itself when it first runs.
///
static WAKEUP_THREAD: Once<Arc<Thread>> = Once::new();

/// Returns whether `thread` is the wakeup thread.
///
pub(super) fn is_wakeup_thread(thread: &Arc<Thread>) -> bool {
    WAKEUP_THREAD
        .get()
        .map_or(false, |wakeup| Arc::ptr_eq(wakeup, thread))
}

/// Suspends the current thread until the timer reaches
/// `end_tick`.
///
/// The thread resumes on the first tick at or after
/// `end_tick` at which the wakeup thread gets the CPU: at
/// most a time slice after the deadline, plus the drain
/// itself.
///
pub fn sleep_until(end_tick: i64) {
    let thread = thread::current();
    assert!(!interrupts::context(), "slept inside an interrupt handler");

    let old_level = interrupts::disable();
    thread.sleep_endtick.store(end_tick);
    {
        let mut queue = SLEEP_QUEUE.lock();
        queue.insert_ordered(thread.clone(), |a, b| {
            a.sleep_endtick() < b.sleep_endtick()
        });
        debug_assert!(queue.is_sorted_by(|a, b| a.sleep_endtick() <= b.sleep_endtick()));
    }
    thread::block();
    interrupts::set_level(old_level);
}

/// Returns whether the head of the sleep queue has expired at
/// tick `now`.
///
fn head_expired(now: i64) -> bool {
    SLEEP_QUEUE
        .lock()
        .front()
        .map_or(false, |head| head.sleep_endtick() <= now)
}

/// Creates the wakeup thread. Called once, from
/// [`start`](super::start).
///
pub(super) fn create_wakeup_thread() {
    thread::create("wakeup", PRI_MAX, wakeup_loop)
        .expect("failed to create the wakeup thread");
}

/// The wakeup thread's body: block until notified by the tick
/// handler, then move every expired sleeper to the ready
/// list.
///
fn wakeup_loop() {
    WAKEUP_THREAD.call_once(thread::current);

    loop {
        let old_level = interrupts::disable();
        // Skip the block if an entry expired while we were
        // awake; the notification for it has already been and
        // gone.
        if !head_expired(crate::time::ticks()) {
            thread::block();
        }
        interrupts::set_level(old_level);

        drain(crate::time::ticks());
    }
}

/// Unblocks every sleeper whose wake tick is at or before
/// `now`.
///
fn drain(now: i64) {
    loop {
        let expired = {
            let mut queue = SLEEP_QUEUE.lock();
            let due = queue
                .front()
                .map_or(false, |head| head.sleep_endtick() <= now);
            if due {
                queue.pop_front()
            } else {
                None
            }
        };

        match expired {
            Some(sleeper) => {
                sleeper.sleep_endtick.store(0);
                thread::unblock(&sleeper);
            }
            None => return,
        }
    }
}

/// The sleep queue's share of the timer tick: if the head of
/// the queue has expired and the wakeup thread is blocked,
/// unblock it. Runs in interrupt context.
///
pub(super) fn tick(now: i64) {
    let Some(wakeup) = WAKEUP_THREAD.get() else {
        return;
    };

    if head_expired(now) && wakeup.status() == thread::ThreadState::Blocked {
        thread::unblock(wakeup);
    }
}
