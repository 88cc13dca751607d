// Copyright 2025 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Tracks the data belonging to the (single) CPU: the currently
//! executing thread and the idle thread.
//!
//! Both slots are process-wide singletons. The current-thread slot is
//! written only by the scheduler while it switches threads; the idle
//! thread registers itself the first time it runs, before the ready
//! list can ever be empty.

use crate::multitasking::thread::Thread;
use alloc::sync::Arc;
use spin::Once;

/// The currently executing thread.
///
static CURRENT_THREAD: spin::Mutex<Option<Arc<Thread>>> = spin::Mutex::new(None);

/// The idle thread, to which the scheduler falls back when
/// the ready list is empty.
///
static IDLE_THREAD: Once<Arc<Thread>> = Once::new();

/// Returns a handle to the currently executing thread.
///
/// # Panics
///
/// `current_thread` panics if the thread system has not been
/// initialised.
///
pub fn current_thread() -> Arc<Thread> {
    CURRENT_THREAD
        .lock()
        .as_ref()
        .expect("the thread system has not been initialised")
        .clone()
}

/// Returns whether the current-thread slot has been set.
///
pub fn ready() -> bool {
    CURRENT_THREAD.lock().is_some()
}

/// Installs `next` as the currently executing thread,
/// returning the previous occupant of the slot.
///
pub(super) fn set_current_thread(next: Arc<Thread>) -> Option<Arc<Thread>> {
    CURRENT_THREAD.lock().replace(next)
}

/// Registers the idle thread. Called once, by the idle thread
/// itself, the first time it runs.
///
pub(super) fn set_idle_thread(idle: Arc<Thread>) {
    IDLE_THREAD.call_once(|| idle);
}

/// Returns a handle to the idle thread.
///
/// # Panics
///
/// `idle_thread` panics if the idle thread has not yet
/// registered itself.
///
pub fn idle_thread() -> Arc<Thread> {
    IDLE_THREAD
        .get()
        .expect("the idle thread has not been created")
        .clone()
}

/// Returns whether `thread` is the idle thread.
///
pub fn is_idle_thread(thread: &Arc<Thread>) -> bool {
    IDLE_THREAD
        .get()
        .map_or(false, |idle| Arc::ptr_eq(idle, thread))
}
