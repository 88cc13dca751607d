// Copyright 2025 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The Ember kernel: a thread scheduling core with a virtual timer.
//!
//! The [`multitasking::thread`] module implements thread lifecycles, the
//! priority scheduler and its two policies (static priorities and the
//! multi-level feedback queue), and the timer-driven sleep/wake facility.
//! The [`time`] module is the virtual timer device that drives preemption:
//! every call to [`time::interrupt`] delivers one timer tick through the
//! interrupt discipline.
//!
//! The embedder boots the kernel by calling
//! [`thread::init`](multitasking::thread::init) with interrupts disabled,
//! then [`thread::start`](multitasking::thread::start), which creates the
//! idle and wakeup threads and enables interrupts. From that point on the
//! calling context is the kernel's initial thread, `main`.

#![no_std]

extern crate alloc;

pub mod multitasking;
pub mod time;
