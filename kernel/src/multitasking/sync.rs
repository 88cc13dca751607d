// Copyright 2025 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements the counting semaphore.
//!
//! A semaphore holds a nonnegative count and a queue of waiting
//! threads. [`down`](Semaphore::down) waits for the count to become
//! positive and decrements it; [`up`](Semaphore::up) increments the
//! count and wakes the highest-priority waiter. The kernel uses a
//! semaphore to sequence startup against the idle thread, and threads
//! use them to wait for one another.
//!
//! Mutation happens with interrupts disabled, so `up` may be called
//! from an interrupt handler. `down` may obviously not: it can block.

use crate::multitasking::thread;
use crate::multitasking::thread::Thread;
use alloc::sync::Arc;
use core::cmp::Reverse;
use crossbeam::atomic::AtomicCell;
use list::List;

/// A counting semaphore.
///
pub struct Semaphore {
    /// The count. Mutated only with interrupts disabled.
    value: AtomicCell<u32>,

    /// Threads blocked in [`down`](Semaphore::down), in
    /// arrival order.
    waiters: spin::Mutex<List<Arc<Thread>>>,
}

impl Semaphore {
    /// Creates a semaphore with the given initial count.
    ///
    pub const fn new(value: u32) -> Self {
        Semaphore {
            value: AtomicCell::new(value),
            waiters: spin::Mutex::new(List::new()),
        }
    }

    /// Waits for the count to become positive, then
    /// decrements it.
    ///
    pub fn down(&self) {
        assert!(
            !interrupts::context(),
            "semaphore down inside an interrupt handler"
        );

        let old_level = interrupts::disable();
        while self.value.load() == 0 {
            self.waiters.lock().push_back(thread::current());
            thread::block();
        }
        self.value.store(self.value.load() - 1);
        interrupts::set_level(old_level);
    }

    /// Increments the count and wakes the highest-priority
    /// waiter, if any.
    ///
    /// If the woken thread outranks the caller, the caller
    /// yields, unless it is running in an interrupt handler
    /// (the handler's deferred yield handles that case).
    ///
    pub fn up(&self) {
        let old_level = interrupts::disable();
        self.value.store(self.value.load() + 1);

        // Wake the highest-priority waiter; the first of a
        // run of equals has waited longest.
        let woken = {
            let mut waiters = self.waiters.lock();
            let best = waiters
                .iter()
                .enumerate()
                .max_by_key(|(index, waiter)| (waiter.priority(), Reverse(*index)))
                .map(|(index, _)| index);
            best.and_then(|index| waiters.remove(index))
        };

        if let Some(waiter) = &woken {
            thread::unblock(waiter);
        }
        interrupts::set_level(old_level);

        if let Some(waiter) = woken {
            if !interrupts::context() && waiter.priority() > thread::current().priority() {
                thread::yield_now();
            }
        }
    }
}
