// Copyright 2025 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Priority scheduling preempts immediately: creating a thread with a
//! higher priority than the creator runs it before `create` returns,
//! and lowering the running thread's priority below the ready queue's
//! head yields at once.

mod common;

use kernel::multitasking::thread;

static LOG: spin::Mutex<Vec<&'static str>> = spin::Mutex::new(Vec::new());

#[test]
fn priority_changes_preempt() {
    common::boot(&[]);

    // A higher-priority newcomer runs before create returns.
    thread::set_priority(20);
    assert_eq!(thread::current().priority(), 20);

    thread::create("high", 40, || {
        LOG.lock().push("high");
    })
    .expect("failed to create thread");

    LOG.lock().push("main");
    assert_eq!(*LOG.lock(), ["high", "main"]);

    // A lower-priority newcomer waits.
    thread::set_priority(50);
    thread::create("mid", 35, || {
        LOG.lock().push("mid");
    })
    .expect("failed to create thread");
    assert_eq!(*LOG.lock(), ["high", "main"]);

    // Demoting ourselves below the ready queue's head hands
    // the CPU over immediately.
    thread::set_priority(30);
    assert_eq!(*LOG.lock(), ["high", "main", "mid"]);
}
