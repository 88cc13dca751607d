// Copyright 2025 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements the multi-level feedback queue scheduling policy.
//!
//! When the kernel boots with `-o mlfqs`, thread priorities are not set
//! by their owners but recomputed from three inputs, all maintained here
//! in 17.14 fixed-point arithmetic:
//!
//! * `recent_cpu`, a per-thread, exponentially decaying count of the
//!   ticks the thread has spent on the CPU;
//! * `nice`, the per-thread scheduling bias in `[-20, 20]`;
//! * `load_avg`, the system-wide, exponentially decaying count of
//!   runnable threads.
//!
//! Every tick, the running thread's `recent_cpu` grows by one. Every
//! [`PRIORITY_INTERVAL`] ticks, every thread's priority becomes
//! `PRI_MAX - recent_cpu/4 - 2*nice` (rounded, clamped) and the ready
//! list is re-sorted. Once per second `load_avg` is folded toward the
//! current number of runnable threads, and every thread's `recent_cpu`
//! decays by the factor `2*load_avg / (2*load_avg + 1)`.
//!
//! The idle thread is exempt from all of this, and the wakeup thread's
//! priority is pinned at the maximum so the sleep queue is always
//! drained promptly.

use crate::multitasking::cpu_local;
use crate::multitasking::thread::{
    scheduler, sleep, Thread, ThreadState, NICE_MAX, NICE_MIN, PRI_MAX, PRI_MIN, THREADS,
};
use crate::time::TIMER_FREQ;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};
use crossbeam::atomic::AtomicCell;
use fixedpoint::Fixed;

/// The number of ticks between full priority recomputations.
///
const PRIORITY_INTERVAL: i64 = 4;

/// Whether the MLFQ policy is in effect. Set once at boot.
///
static ENABLED: AtomicBool = AtomicBool::new(false);

/// The system load average: a decaying average of the number
/// of runnable threads.
///
static LOAD_AVG: AtomicCell<Fixed> = AtomicCell::new(Fixed::ZERO);

/// Configures the policy at boot and zeroes the load average.
///
pub(super) fn init(enabled: bool) {
    ENABLED.store(enabled, Ordering::SeqCst);
    LOAD_AVG.store(Fixed::ZERO);
}

/// Returns whether the MLFQ policy is in effect.
///
pub(super) fn enabled() -> bool {
    ENABLED.load(Ordering::SeqCst)
}

/// Returns the niceness and recent CPU estimate a new thread
/// inherits from its creator. Outside MLFQ mode both are
/// zero.
///
pub(super) fn inherited_state(creator: &Arc<Thread>) -> (i32, Fixed) {
    if enabled() {
        (creator.nice(), creator.recent_cpu())
    } else {
        (0, Fixed::ZERO)
    }
}

/// Computes a thread's priority from its recent CPU estimate
/// and niceness: `PRI_MAX - recent_cpu/4 - 2*nice`, rounded
/// to nearest and clamped to the priority range.
///
fn priority_for(recent_cpu: Fixed, nice: i32) -> i32 {
    (PRI_MAX - (recent_cpu / 4).round() - nice * 2).clamp(PRI_MIN, PRI_MAX)
}

/// Decays a recent CPU estimate one second toward zero and
/// folds in the niceness:
/// `(2*load_avg / (2*load_avg + 1)) * recent_cpu + nice`.
///
/// The `+ 1` is a fixed-point integer addition; the whole
/// coefficient stays in fixed point.
///
fn decay(recent_cpu: Fixed, load_avg: Fixed, nice: i32) -> Fixed {
    let load = load_avg * 2;
    (load / (load + 1)) * recent_cpu + nice
}

/// Recomputes `thread`'s priority. The idle and wakeup
/// threads are exempt: idle never competes for the CPU, and
/// the wakeup thread's priority must stay at the maximum.
///
pub(super) fn update_priority(thread: &Arc<Thread>) {
    if cpu_local::is_idle_thread(thread) || sleep::is_wakeup_thread(thread) {
        return;
    }
    thread
        .priority
        .store(priority_for(thread.recent_cpu(), thread.nice()));
}

/// Folds the current number of runnable threads into the load
/// average: `load_avg = (59/60)*load_avg + (1/60)*ready`.
///
/// The running thread counts as runnable unless it is the
/// idle thread.
///
fn update_load_avg() {
    let mut ready_threads = scheduler::ready_count() as i32;
    if !cpu_local::is_idle_thread(&cpu_local::current_thread()) {
        ready_threads += 1;
    }

    let load_avg = LOAD_AVG.load();
    LOAD_AVG.store(
        (Fixed::from_int(59) / 60) * load_avg + (Fixed::from_int(1) / 60) * ready_threads,
    );
}

/// Decays every thread's recent CPU estimate. The idle thread
/// is exempt.
///
fn update_recent_cpu_for_all() {
    let load_avg = LOAD_AVG.load();
    for thread in THREADS.lock().values() {
        if cpu_local::is_idle_thread(thread) {
            continue;
        }
        thread
            .recent_cpu
            .store(decay(thread.recent_cpu(), load_avg, thread.nice()));
    }
}

/// Recomputes every thread's priority and restores the ready
/// list's descending order.
///
fn update_priority_for_all() {
    for thread in THREADS.lock().values() {
        update_priority(thread);
    }
    scheduler::sort_ready();
}

/// The policy's share of the timer tick. Runs in interrupt
/// context with `running` the interrupted thread.
///
pub(super) fn tick(now: i64, running: &Arc<Thread>) {
    // Charge the running thread for the tick.
    if !cpu_local::is_idle_thread(running) {
        running.recent_cpu.store(running.recent_cpu() + 1);
    }

    // Once per second, refresh the load average and decay
    // every recent CPU estimate.
    if now % TIMER_FREQ == 0 {
        update_load_avg();
        update_recent_cpu_for_all();
    }

    // Refresh every priority, using the fresh estimates when
    // the intervals coincide.
    if now % PRIORITY_INTERVAL == 0 {
        update_priority_for_all();
    }
}

/// Sets the current thread's niceness and recomputes its
/// recent CPU estimate and priority. If the thread no longer
/// has the highest priority, it yields.
///
/// # Panics
///
/// `set_nice` panics if `nice` is out of range.
///
pub fn set_nice(nice: i32) {
    assert!(
        (NICE_MIN..=NICE_MAX).contains(&nice),
        "niceness {} out of range",
        nice
    );

    let thread = super::current();
    thread.nice.store(nice);
    thread
        .recent_cpu
        .store(decay(thread.recent_cpu(), LOAD_AVG.load(), nice));
    update_priority(&thread);

    let preempted = interrupts::without_interrupts(|| {
        thread.status() == ThreadState::Running
            && scheduler::ready_head_priority().map_or(false, |head| head > thread.priority())
    });
    if preempted {
        super::yield_head();
    }
}

/// Returns 100 times the system load average, rounded to the
/// nearest integer.
///
pub fn get_load_avg() -> i32 {
    (LOAD_AVG.load() * 100).round()
}

/// Returns 100 times the current thread's recent CPU
/// estimate, rounded to the nearest integer.
///
pub fn get_recent_cpu() -> i32 {
    (super::current().recent_cpu() * 100).round()
}
