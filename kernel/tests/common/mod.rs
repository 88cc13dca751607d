// Copyright 2025 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Shared boot helper for the scenario tests.
//!
//! The kernel is a process-wide singleton, so each scenario lives in its
//! own integration-test file and boots exactly one kernel for the whole
//! process.

use kernel::multitasking::thread::{self, BootArgs};

/// Boots the kernel in this process: installs the test logger, adopts
/// the calling thread as the kernel's initial thread, and starts the
/// scheduler.
pub fn boot(args: &[&str]) {
    let _ = env_logger::builder().is_test(true).try_init();
    thread::init(&BootArgs::parse(args));
    thread::start();
}
