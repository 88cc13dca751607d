// Copyright 2025 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Sleeping threads wake in deadline order, regardless of the order
//! they went to sleep, and within a bounded number of ticks of their
//! deadline.

mod common;

use kernel::multitasking::sync::Semaphore;
use kernel::multitasking::thread;
use kernel::time;

/// Sleeper index and the tick at which it resumed.
///
static WAKE_ORDER: spin::Mutex<Vec<(u64, i64)>> = spin::Mutex::new(Vec::new());
static DONE: Semaphore = Semaphore::new(0);

/// The most ticks a sleeper may oversleep: one full time
/// slice for the wakeup thread's notification to preempt,
/// one more for the drained sleeper to reach the CPU.
///
const WAKEUP_LATENCY_BOUND: i64 = 10;

#[test]
fn sleepers_wake_in_deadline_order() {
    common::boot(&[]);

    // Deadlines deliberately out of creation order.
    for (index, deadline) in [(1u64, 100i64), (2, 50), (3, 75)] {
        thread::create("sleeper", thread::PRI_DEFAULT, move || {
            time::sleep_until(deadline);
            WAKE_ORDER.lock().push((index, time::ticks()));
            DONE.up();
        })
        .expect("failed to create thread");
    }

    // Let the sleepers reach their beds, then drive the clock
    // past the last deadline.
    thread::yield_now();
    while time::ticks() < 120 {
        time::interrupt();
    }
    for _ in 0..3 {
        DONE.down();
    }

    let order = WAKE_ORDER.lock();
    let woken: Vec<u64> = order.iter().map(|&(index, _)| index).collect();
    assert_eq!(woken, [2, 3, 1], "wake order does not follow deadlines");

    for &(index, woke_at) in order.iter() {
        let deadline = match index {
            1 => 100,
            2 => 50,
            3 => 75,
            _ => unreachable!(),
        };
        assert!(woke_at >= deadline, "sleeper {} woke early at {}", index, woke_at);
        assert!(
            woke_at < deadline + WAKEUP_LATENCY_BOUND,
            "sleeper {} overslept until {}",
            index,
            woke_at
        );
    }
}
