// Copyright 2025 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The load average follows its exponential moving average exactly.
//! With one always-runnable thread, each once-per-second update folds
//! 1/60 of the distance to one into the average: the first samples are
//! pinned to their fixed-point values, and after sixty seconds the
//! average has climbed to about 0.63.

mod common;

use kernel::multitasking::sync::Semaphore;
use kernel::multitasking::thread;
use kernel::time;
use std::sync::atomic::{AtomicBool, Ordering};

/// (tick, 100 * load_avg) at each once-per-second update.
///
static SAMPLES: spin::Mutex<Vec<(i64, i32)>> = spin::Mutex::new(Vec::new());
static STOP: AtomicBool = AtomicBool::new(false);
static DONE: Semaphore = Semaphore::new(0);

#[test]
fn load_average_tracks_runnable_threads() {
    common::boot(&["-o", "mlfqs"]);

    thread::create("busy", thread::PRI_DEFAULT, || {
        while !STOP.load(Ordering::SeqCst) {
            time::interrupt();
            let now = time::ticks();
            if now % time::TIMER_FREQ == 0 {
                SAMPLES.lock().push((now, thread::get_load_avg()));
            }
        }
        DONE.up();
    })
    .expect("failed to create thread");

    // Sleep through sixty seconds of virtual time, leaving the
    // busy thread as the only runnable one.
    time::sleep(60 * time::TIMER_FREQ);

    let load_avg = thread::get_load_avg();
    assert!(
        (55..=75).contains(&load_avg),
        "100*load_avg was {load_avg} after sixty seconds with one runnable thread"
    );

    STOP.store(true, Ordering::SeqCst);
    DONE.down();

    let samples = SAMPLES.lock();

    // The first updates are exact fixed-point values:
    // one update:  1/60          -> raw 273   -> 2 hundredths
    // two updates: (59/60)/60 + 1/60 -> raw 541 -> 3 hundredths
    assert_eq!(samples[0], (100, 2));
    assert_eq!(samples[1], (200, 3));

    // The average climbs toward the runnable count and never
    // moves away from it.
    for pair in samples.windows(2) {
        assert!(pair[1].1 >= pair[0].1, "load average fell: {:?}", pair);
    }
}
