// Copyright 2025 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements the priority scheduler for threads.
//!
//! ## The ready list
//!
//! Runnable threads that are not executing wait on a single ready list,
//! kept sorted by descending priority. Equal priorities are ordered by
//! how they arrived: ordinary arrivals ([`insert_ready_round_robin`]) go
//! to the end of their run of equals, so equal-priority threads share the
//! CPU round-robin, while a thread that was preempted by a priority
//! change ([`insert_ready_preempted`]) keeps its place at the head of its
//! new run.
//!
//! ## Switching
//!
//! [`schedule`] picks the front of the ready list (or the idle thread if
//! the list is empty) and switches to it. The second half of every
//! switch, [`schedule_tail`], runs on the *new* thread's stack: it marks
//! the new thread running, starts a fresh time slice, activates the
//! thread's address space, and destroys the previous thread if it was
//! dying. A brand-new thread runs `schedule_tail` from its entry
//! trampoline instead, completing the switch that started it.

use crate::multitasking::cpu_local;
use crate::multitasking::thread::{switch, Thread, ThreadState};
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};
use interrupts::Level;
use list::List;

/// The number of timer ticks each thread may hold the CPU
/// before the tick handler requests a yield.
///
pub(super) const TIME_SLICE: u32 = 4;

/// Ticks since the running thread was scheduled. Reset by
/// [`schedule_tail`] at every switch.
///
static TICKS_SINCE_YIELD: AtomicU32 = AtomicU32::new(0);

/// The ready list: runnable threads, highest priority first.
///
static READY_LIST: spin::Mutex<List<Arc<Thread>>> = spin::Mutex::new(List::new());

/// Holds the final handle to a dying thread between the
/// moment it is switched out and the moment the next thread
/// destroys it in [`schedule_tail`]. A dying thread must
/// never drop its own last handle: that would free the stack
/// it is still running on.
///
static REAPER: spin::Mutex<Option<Arc<Thread>>> = spin::Mutex::new(None);

/// Inserts `thread` at the end of its run of equal-priority
/// threads on the ready list.
///
/// Interrupts must be disabled.
///
pub(super) fn insert_ready_round_robin(thread: Arc<Thread>) {
    let mut ready = READY_LIST.lock();
    ready.insert_ordered(thread, |a, b| a.priority() > b.priority());
    debug_assert!(ready.is_sorted_by(|a, b| a.priority() >= b.priority()));
}

/// Inserts `thread` at the head of its run of equal-priority
/// threads on the ready list.
///
/// Interrupts must be disabled.
///
pub(super) fn insert_ready_preempted(thread: Arc<Thread>) {
    let mut ready = READY_LIST.lock();
    ready.insert_ordered(thread, |a, b| a.priority() >= b.priority());
    debug_assert!(ready.is_sorted_by(|a, b| a.priority() >= b.priority()));
}

/// Removes `thread` from the ready list, if present.
///
pub(super) fn remove_ready(thread: &Arc<Thread>) {
    READY_LIST
        .lock()
        .remove_first(|t| Arc::ptr_eq(t, thread));
}

/// Returns the priority of the thread at the head of the
/// ready list, if the list is non-empty.
///
pub(super) fn ready_head_priority() -> Option<i32> {
    READY_LIST.lock().front().map(|t| t.priority())
}

/// Returns the number of threads on the ready list.
///
pub(super) fn ready_count() -> usize {
    READY_LIST.lock().len()
}

/// Re-sorts the ready list by descending priority after the
/// MLFQ policy has recomputed priorities in place.
///
/// The sort is stable, so equal-priority threads keep their
/// round-robin order.
///
pub(super) fn sort_ready() {
    READY_LIST
        .lock()
        .sort_by(|a, b| b.priority().cmp(&a.priority()));
}

/// Counts one tick against the running thread's time slice,
/// returning whether the slice is exhausted.
///
pub(super) fn quantum_tick() -> bool {
    TICKS_SINCE_YIELD.fetch_add(1, Ordering::Relaxed) + 1 >= TIME_SLICE
}

/// Chooses the next thread to be scheduled: the front of the
/// ready list, or the idle thread if the list is empty. (If
/// the running thread can continue running, it is on the
/// ready list.)
///
fn next_to_run() -> Arc<Thread> {
    READY_LIST
        .lock()
        .pop_front()
        .unwrap_or_else(cpu_local::idle_thread)
}

/// Schedules out the current thread and switches to the next
/// runnable thread.
///
/// At entry, interrupts must be off and the running thread
/// must already have been moved out of the running state (to
/// ready, blocked, or dying). When the current thread is next
/// scheduled, `schedule` returns to its caller as usual; for
/// a dying thread it never returns.
///
pub(super) fn schedule() {
    assert_eq!(
        interrupts::level(),
        Level::Off,
        "schedule called with interrupts enabled"
    );

    let current = cpu_local::current_thread();
    assert_ne!(current.status(), ThreadState::Running);
    assert!(
        current.overflow_free(),
        "thread {} ({}) has overflowed its stack",
        current.id().as_u64(),
        current.name()
    );

    let next = next_to_run();
    if Arc::ptr_eq(&current, &next) {
        // We're already the right thread; just complete the
        // switch in place.
        drop(next);
        drop(current);
        schedule_tail();
        return;
    }

    let current_sp = current.stack_pointer.get();
    let next_sp = next.stack_pointer.get();
    let dying = current.status() == ThreadState::Dying;

    let previous = cpu_local::set_current_thread(next)
        .expect("scheduling with no current thread");

    // A dying thread's final handle is parked in the reaper
    // slot for the next thread to destroy. Everything else is
    // kept alive by the registry, so the local handles can be
    // dropped here: after switch_stack nothing on this stack
    // may own anything.
    if dying {
        *REAPER.lock() = Some(previous);
    } else {
        drop(previous);
    }
    drop(current);

    unsafe { switch::switch_stack(current_sp, next_sp) };

    // We've been switched back in; finish that switch.
    schedule_tail();
}

/// Completes a thread switch on the new thread's stack.
///
/// Marks the new thread running, starts its time slice,
/// activates its address space, and destroys the previous
/// thread if it was dying. Invoked by [`schedule`] after
/// `switch_stack` returns; the first time a thread runs, its
/// entry trampoline invokes it instead.
///
pub(super) fn schedule_tail() {
    assert_eq!(
        interrupts::level(),
        Level::Off,
        "schedule_tail called with interrupts enabled"
    );

    let current = cpu_local::current_thread();

    // Mark us as running and start a new time slice.
    current.status.store(ThreadState::Running);
    TICKS_SINCE_YIELD.store(0, Ordering::Relaxed);

    // Activate the new address space, if there is one.
    if let Some(space) = &current.address_space {
        space.activate();
    }

    // If the thread we switched from is dying, destroy it.
    // This must happen here, on the new stack, so that exit
    // doesn't pull the rug out from under itself.
    if let Some(previous) = REAPER.lock().take() {
        debug_assert!(!Arc::ptr_eq(&previous, &current));
        debug_assert_eq!(previous.status(), ThreadState::Dying);
        drop(previous);
    }
}

/// Implements the idle thread.
///
/// The idle thread is scheduled once at startup, at which
/// point it registers itself, signals `started` so
/// [`start`](super::start) can continue, and immediately
/// blocks. After that it never appears on the ready list;
/// [`next_to_run`] returns it as a special case when the
/// ready list is empty. Whenever it runs it blocks again
/// straight away, then halts until the next timer interrupt.
///
pub(super) fn idle_loop(started: &crate::multitasking::sync::Semaphore) {
    cpu_local::set_idle_thread(super::current());
    started.up();

    loop {
        // Let someone else run.
        interrupts::disable();
        super::block();

        // Re-enable interrupts and wait for the next one. In
        // virtual time the next timer interrupt is exactly one
        // tick away, so the halt delivers it.
        crate::time::halt();
    }
}
