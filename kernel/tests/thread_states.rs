// Copyright 2025 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Audits the state invariants across the registry: exactly one thread
//! runs at a time, sleepers are blocked with a wake tick, ready threads
//! are ready, and a thread with an address space has it activated on
//! every switch and its ticks accounted as user time.

mod common;

use kernel::multitasking::sync::Semaphore;
use kernel::multitasking::thread::{self, AddressSpace, ThreadState};
use kernel::time;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

static STOP: AtomicBool = AtomicBool::new(false);
static DONE: Semaphore = Semaphore::new(0);

/// Records how many times the scheduler activated it.
///
struct TestAddressSpace {
    activations: AtomicUsize,
}

impl AddressSpace for TestAddressSpace {
    fn activate(&self) {
        self.activations.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn state_invariants_hold() {
    common::boot(&[]);

    thread::create("sleeper", thread::PRI_DEFAULT, || {
        time::sleep_until(1_000_000);
    })
    .expect("failed to create thread");

    thread::create("spinner", thread::PRI_DEFAULT, || {
        while !STOP.load(Ordering::SeqCst) {
            thread::yield_now();
        }
        DONE.up();
    })
    .expect("failed to create thread");

    // One trip around the rotation puts the sleeper to bed and
    // leaves the spinner ready.
    thread::yield_now();

    let mut running = 0;
    thread::for_each_thread(|t| match t.name() {
        "main" => {
            assert_eq!(t.status(), ThreadState::Running);
            running += 1;
        }
        "sleeper" => {
            assert_eq!(t.status(), ThreadState::Blocked);
            assert_eq!(t.sleep_endtick(), 1_000_000);
        }
        "spinner" => {
            assert_eq!(t.status(), ThreadState::Ready);
            assert_eq!(t.sleep_endtick(), 0);
        }
        "idle" | "wakeup" => assert_eq!(t.status(), ThreadState::Blocked),
        other => panic!("unexpected thread {:?}", other),
    });
    assert_eq!(running, 1);

    // A thread with an address space: activated on every
    // switch to it, and its ticks are user ticks.
    let space = Arc::new(TestAddressSpace {
        activations: AtomicUsize::new(0),
    });
    thread::create_with_address_space("user", thread::PRI_DEFAULT, space.clone(), || {
        for _ in 0..5 {
            time::interrupt();
        }
        DONE.up();
    })
    .expect("failed to create thread");

    DONE.down();

    assert!(space.activations.load(Ordering::SeqCst) >= 1);
    let stats = thread::stats();
    assert_eq!(stats.user_ticks, 5);
    assert_eq!(stats.idle_ticks, 0);
    assert_eq!(stats.kernel_ticks, 0);

    STOP.store(true, Ordering::SeqCst);
    DONE.down();
}
