// Copyright 2025 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Exited threads disappear completely: after a hundred short-lived
//! threads run to completion, the registry holds exactly the main,
//! idle, and wakeup threads.

mod common;

use kernel::multitasking::sync::Semaphore;
use kernel::multitasking::thread;
use std::collections::BTreeSet;

static DONE: Semaphore = Semaphore::new(0);

#[test]
fn exited_threads_are_reaped() {
    common::boot(&[]);

    for _ in 0..100 {
        thread::create("ephemeral", thread::PRI_DEFAULT, || {
            DONE.up();
        })
        .expect("failed to create thread");
    }

    for _ in 0..100 {
        DONE.down();
    }

    let mut names = BTreeSet::new();
    let mut count = 0;
    thread::for_each_thread(|t| {
        names.insert(t.name().to_string());
        count += 1;
    });

    assert_eq!(count, 3, "threads outlived their exit: {:?}", names);
    assert_eq!(
        names,
        BTreeSet::from(["main".to_string(), "idle".to_string(), "wakeup".to_string()])
    );
}
