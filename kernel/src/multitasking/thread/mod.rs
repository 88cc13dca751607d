// Copyright 2025 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements preemptive multitasking, using independent threads of execution.
//!
//! This module allows the kernel to start an arbitrary number of threads,
//! preemptively scheduling between them by priority. Threads can sleep
//! until a timer tick, block and be unblocked, and exit as needed.
//!
//! ## Initialisation
//!
//! The [`init`] function adopts the running execution context as the
//! initial thread, `main`, allowing new threads to be created. [`start`]
//! then creates the idle and wakeup threads and enables interrupts, at
//! which point timer ticks begin to preempt the running thread.
//!
//! ## Manipulating threads
//!
//! Threads are created with [`create`], which hands the new thread to the
//! scheduler immediately. A running thread may give up the CPU with
//! [`yield_now`], suspend itself until a tick with
//! [`sleep_until`], block indefinitely with [`block`] (to be resumed by
//! [`unblock`]), or terminate with [`exit`].
//!
//! ## Scheduling policies
//!
//! In the default mode a thread's priority is fixed at creation and
//! adjusted only by [`set_priority`]. When the kernel boots with
//! `-o mlfqs` (see [`BootArgs`]), priorities are instead recomputed from
//! recent CPU usage, niceness, and the system load average; see
//! [`set_nice`], [`get_load_avg`] and [`get_recent_cpu`].

use crate::multitasking::cpu_local;
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use core::alloc::Layout;
use core::cell::UnsafeCell;
use core::fmt;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use crossbeam::atomic::AtomicCell;
use fixedpoint::Fixed;
use interrupts::Level;
use log::{debug, info, trace};

mod mlfq;
mod scheduler;
mod sleep;
mod switch;

pub use mlfq::{get_load_avg, get_recent_cpu, set_nice};
pub use sleep::sleep_until;

/// The lowest priority a thread can have.
///
pub const PRI_MIN: i32 = 0;

/// The highest priority a thread can have.
///
pub const PRI_MAX: i32 = 63;

/// The priority given to threads that do not ask for one.
///
pub const PRI_DEFAULT: i32 = 31;

/// The lowest niceness a thread can have.
///
pub const NICE_MIN: i32 = -20;

/// The highest niceness a thread can have.
///
pub const NICE_MAX: i32 = 20;

/// The size in bytes of each thread's stack, including the
/// overflow canary at its base.
///
const STACK_SIZE: usize = 64 * 1024;

/// Sentinel stored in every thread structure and at the base
/// of every stack. A corrupted sentinel means the thread has
/// overflowed its stack.
///
const THREAD_MAGIC: u64 = 0x74d9_a1c4_5ef0_3b87;

/// THREADS stores all living threads, referencing them by
/// their thread id. This is the all-threads registry: threads
/// are added when created and removed when they exit, and the
/// MLFQ policy iterates it to recompute every thread's state.
///
static THREADS: spin::Mutex<BTreeMap<ThreadId, Arc<Thread>>> =
    spin::Mutex::new(BTreeMap::new());

/// Whether [`init`] has run.
///
static INITIALISED: AtomicBool = AtomicBool::new(false);

/// Tick statistics, kept by the timer interrupt handler.
///
static IDLE_TICKS: AtomicI64 = AtomicI64::new(0);
static KERNEL_TICKS: AtomicI64 = AtomicI64::new(0);
static USER_TICKS: AtomicI64 = AtomicI64::new(0);

/// Boot-time configuration, in the kernel command line style.
///
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BootArgs {
    /// Use the multi-level feedback queue scheduler instead
    /// of static priorities.
    pub mlfqs: bool,
}

impl BootArgs {
    /// Parses a kernel command line. The only recognised
    /// option is `-o mlfqs`.
    ///
    pub fn parse(args: &[&str]) -> BootArgs {
        BootArgs {
            mlfqs: args.windows(2).any(|pair| pair == ["-o", "mlfqs"]),
        }
    }
}

/// Uniquely identifies a thread.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ThreadId(u64);

impl ThreadId {
    /// Allocates and returns the next available ThreadId.
    ///
    /// Identifiers start at 1 and increase monotonically; the
    /// atomic counter makes allocation safe against concurrent
    /// creation.
    ///
    fn new() -> Self {
        static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);
        ThreadId(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns a numerical representation for the thread id.
    ///
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Describes the scheduling state of a thread.
///
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ThreadState {
    /// The thread is waiting to be unblocked.
    Blocked,

    /// The thread is on the ready list, waiting for the CPU.
    Ready,

    /// The thread is executing.
    Running,

    /// The thread is being destroyed.
    Dying,
}

/// The address space seam.
///
/// The virtual-memory layer lives outside this core; a thread
/// that has one carries it as a trait object, and the
/// scheduler activates it on every switch to that thread.
///
pub trait AddressSpace: Send + Sync {
    /// Called with interrupts disabled each time a thread
    /// owning this address space is switched onto the CPU.
    fn activate(&self);
}

/// A thread's stack: one zeroed allocation, owned by the
/// thread, with the overflow canary at its lowest word.
///
struct Stack {
    base: NonNull<u8>,
    layout: Layout,
}

impl Stack {
    /// Allocates a zeroed stack, or returns None if the
    /// allocator is exhausted.
    ///
    fn allocate() -> Option<Stack> {
        let layout = Layout::from_size_align(STACK_SIZE, 16).expect("bad stack layout");
        let base = NonNull::new(unsafe { alloc::alloc::alloc_zeroed(layout) })?;
        let stack = Stack { base, layout };
        unsafe { (stack.base.as_ptr() as *mut u64).write(THREAD_MAGIC) };
        Some(stack)
    }

    /// Returns the address one past the top of the stack.
    ///
    fn top(&self) -> *mut u8 {
        unsafe { self.base.as_ptr().add(STACK_SIZE) }
    }

    /// Returns whether the canary at the base of the stack is
    /// intact.
    ///
    fn canary_intact(&self) -> bool {
        unsafe { (self.base.as_ptr() as *const u64).read() == THREAD_MAGIC }
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        unsafe { alloc::alloc::dealloc(self.base.as_ptr(), self.layout) };
    }
}

/// Contains the metadata for a thread of execution.
///
pub struct Thread {
    // This thread's unique id.
    id: ThreadId,

    // Short human-readable label, at most 15 bytes.
    name: String,

    // The thread's current scheduling state.
    status: AtomicCell<ThreadState>,

    // Scheduling priority, in [PRI_MIN, PRI_MAX]. Fixed in
    // the static policy, recomputed by the MLFQ policy.
    priority: AtomicCell<i32>,

    // Niceness, in [NICE_MIN, NICE_MAX]. MLFQ only.
    nice: AtomicCell<i32>,

    // Decayed estimate of recent CPU use. MLFQ only.
    recent_cpu: AtomicCell<Fixed>,

    // The absolute tick at which a sleeping thread must wake,
    // or 0 if the thread is not sleeping.
    sleep_endtick: AtomicCell<i64>,

    // The thread's saved stack pointer. While the thread is
    // executing, this value is stale. When the thread is
    // switched out, its final stack pointer is written here;
    // when it is resumed, the stack pointer is restored from
    // this value.
    stack_pointer: UnsafeCell<*mut u8>,

    // The thread's stack. The initial thread has no entry
    // here: it runs on the stack the embedder gave us, which
    // we do not own and must never free.
    stack: Option<Stack>,

    // The thread's address space, if the process layer gave
    // it one. Activated on every switch to this thread.
    address_space: Option<Arc<dyn AddressSpace>>,

    // Stack-overflow sentinel; always THREAD_MAGIC.
    magic: u64,
}

// Thread is not thread-safe by default, as its stack pointer
// is stored in an UnsafeCell. However, the cell is only ever
// accessed by the scheduler with interrupts disabled, while
// the thread in question is not executing, so sharing the
// structure is sound in practice.
//
unsafe impl Send for Thread {}
unsafe impl Sync for Thread {}

impl Thread {
    /// Returns the thread's unique id.
    ///
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Returns the thread's name.
    ///
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the thread's current scheduling state.
    ///
    pub fn status(&self) -> ThreadState {
        self.status.load()
    }

    /// Returns the thread's current priority.
    ///
    pub fn priority(&self) -> i32 {
        self.priority.load()
    }

    /// Returns the thread's niceness.
    ///
    pub fn nice(&self) -> i32 {
        self.nice.load()
    }

    /// Returns the thread's decayed recent CPU estimate.
    ///
    pub fn recent_cpu(&self) -> Fixed {
        self.recent_cpu.load()
    }

    /// Returns the tick the thread is sleeping until, or 0 if
    /// it is not sleeping.
    ///
    pub fn sleep_endtick(&self) -> i64 {
        self.sleep_endtick.load()
    }

    /// Returns whether the thread's magic and stack canary
    /// are intact.
    ///
    fn overflow_free(&self) -> bool {
        self.magic == THREAD_MAGIC
            && self.stack.as_ref().map_or(true, |stack| stack.canary_intact())
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id.0)
            .field("name", &self.name)
            .field("status", &self.status())
            .field("priority", &self.priority())
            .finish()
    }
}

/// Indicates an error encountered while creating a thread.
///
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CreateError {
    /// The stack allocation failed. No thread was registered.
    OutOfMemory,
}

/// Initialises the threading system by transforming the code
/// that's currently running into the initial thread, `main`.
///
/// Also initialises the scheduler queues and, in MLFQ mode,
/// zeroes the load average.
///
/// # Panics
///
/// `init` panics if called more than once, or with interrupts
/// enabled.
///
pub fn init(args: &BootArgs) {
    assert_eq!(
        interrupts::level(),
        Level::Off,
        "thread::init called with interrupts enabled"
    );
    assert!(
        !INITIALISED.swap(true, Ordering::SeqCst),
        "thread::init called twice"
    );

    mlfq::init(args.mlfqs);

    // Set up a thread structure for the running context. Its
    // stack belongs to the embedder, so there is no Stack to
    // own, and the saved stack pointer is written on the
    // first switch away from it.
    let initial = Arc::new(Thread {
        id: ThreadId::new(),
        name: String::from("main"),
        status: AtomicCell::new(ThreadState::Running),
        priority: AtomicCell::new(PRI_DEFAULT),
        nice: AtomicCell::new(0),
        recent_cpu: AtomicCell::new(Fixed::ZERO),
        sleep_endtick: AtomicCell::new(0),
        stack_pointer: UnsafeCell::new(core::ptr::null_mut()),
        stack: None,
        address_space: None,
        magic: THREAD_MAGIC,
    });

    THREADS.lock().insert(initial.id, initial.clone());
    cpu_local::set_current_thread(initial);

    debug!("threading initialised (mlfqs: {})", args.mlfqs);
}

/// Starts preemptive scheduling.
///
/// Creates the idle thread and the wakeup thread, enables
/// interrupts, and waits for the idle thread to register
/// itself.
///
pub fn start() {
    let started = Arc::new(crate::multitasking::sync::Semaphore::new(0));
    {
        let started = started.clone();
        create("idle", PRI_MIN, move || scheduler::idle_loop(&started))
            .expect("failed to create the idle thread");
    }
    sleep::create_wakeup_thread();

    // Start preemptive scheduling.
    interrupts::enable();

    // Wait for the idle thread to come up.
    started.down();

    info!("scheduler started");
}

/// Creates a new kernel thread named `name` with the given
/// `priority`, which executes `entry`, and adds it to the
/// ready queue. Returns the new thread's id.
///
/// If the new thread's priority is higher than the creator's,
/// the creator yields so preemption is immediate. The new
/// thread may therefore run — and even exit — before `create`
/// returns.
///
/// When the thread runs, it starts by enabling interrupts and
/// calling `entry`; if `entry` returns, the thread exits.
///
/// # Errors
///
/// Returns [`CreateError::OutOfMemory`] if the stack cannot
/// be allocated; no thread is registered in that case.
///
pub fn create<F>(name: &str, priority: i32, entry: F) -> Result<ThreadId, CreateError>
where
    F: FnOnce() + Send + 'static,
{
    create_common(name, priority, None, Box::new(entry))
}

/// Creates a new thread that owns an address space.
///
/// Like [`create`], but the scheduler will activate
/// `address_space` each time it switches to the new thread,
/// and the timer will account the thread's ticks as user
/// time.
///
pub fn create_with_address_space<F>(
    name: &str,
    priority: i32,
    address_space: Arc<dyn AddressSpace>,
    entry: F,
) -> Result<ThreadId, CreateError>
where
    F: FnOnce() + Send + 'static,
{
    create_common(name, priority, Some(address_space), Box::new(entry))
}

fn create_common(
    name: &str,
    priority: i32,
    address_space: Option<Arc<dyn AddressSpace>>,
    entry: Box<dyn FnOnce() + Send>,
) -> Result<ThreadId, CreateError> {
    assert!(
        (PRI_MIN..=PRI_MAX).contains(&priority),
        "priority {} out of range",
        priority
    );

    let creator = current();
    let (nice, recent_cpu) = mlfq::inherited_state(&creator);

    let stack = Stack::allocate().ok_or(CreateError::OutOfMemory)?;

    let mut name = String::from(name);
    name.truncate(15);

    let thread = Arc::new(Thread {
        id: ThreadId::new(),
        name,
        status: AtomicCell::new(ThreadState::Blocked),
        priority: AtomicCell::new(priority),
        nice: AtomicCell::new(nice),
        recent_cpu: AtomicCell::new(recent_cpu),
        sleep_endtick: AtomicCell::new(0),
        stack_pointer: UnsafeCell::new(core::ptr::null_mut()),
        stack: Some(stack),
        address_space,
        magic: THREAD_MAGIC,
    });

    // Prepare the thread for its first run by building the
    // initial switch frame on its stack. Do this atomically so
    // intermediate values of the stack pointer cannot be
    // observed.
    interrupts::without_interrupts(|| {
        let stack = thread.stack.as_ref().unwrap();
        let closure = Box::into_raw(Box::new(entry));
        let sp = unsafe { switch::init_stack(stack, closure as *mut u8) };
        unsafe { thread.stack_pointer.get().write(sp) };
    });

    let id = thread.id;
    THREADS.lock().insert(id, thread.clone());

    // Under MLFQ the requested priority is advisory; compute
    // the real one before the thread joins the ready list, so
    // the list's order is never stale.
    if mlfq::enabled() {
        mlfq::update_priority(&thread);
    }

    // Hand the thread to the scheduler.
    unblock(&thread);

    debug!("created thread {} ({})", id.as_u64(), thread.name());

    if thread.priority() > current().priority() {
        yield_now();
    }

    Ok(id)
}

/// Returns a handle to the running thread.
///
/// # Panics
///
/// `current` panics if the running thread has overflowed its
/// stack, as detected by the magic sentinels, or if its state
/// is not [`ThreadState::Running`].
///
pub fn current() -> Arc<Thread> {
    let thread = cpu_local::current_thread();
    assert!(
        thread.overflow_free(),
        "thread {} ({}) has overflowed its stack",
        thread.id.as_u64(),
        thread.name()
    );
    assert_eq!(thread.status(), ThreadState::Running);
    thread
}

/// Puts the current thread to sleep. It will not be scheduled
/// again until awoken by [`unblock`].
///
/// This function must be called with interrupts turned off.
/// It is usually a better idea to use one of the
/// synchronisation primitives in
/// [`sync`](crate::multitasking::sync).
///
pub fn block() {
    assert!(!interrupts::context(), "blocked inside an interrupt handler");
    assert_eq!(
        interrupts::level(),
        Level::Off,
        "blocked with interrupts enabled"
    );

    current().status.store(ThreadState::Blocked);
    scheduler::schedule();
}

/// Transitions the blocked thread `thread` to the ready
/// state.
///
/// This does not preempt the running thread, which can be
/// important: a caller that unblocks under a disabled
/// interrupt level may expect to atomically unblock a thread
/// and update other data. Callers that need the preemption
/// yield themselves.
///
/// # Panics
///
/// `unblock` panics if `thread` is not blocked. (Use
/// [`yield_now`] to make the running thread ready.)
///
pub fn unblock(thread: &Arc<Thread>) {
    let old_level = interrupts::disable();
    assert_eq!(
        thread.status(),
        ThreadState::Blocked,
        "unblocked thread {} ({}) which was not blocked",
        thread.id.as_u64(),
        thread.name()
    );
    scheduler::insert_ready_round_robin(thread.clone());
    thread.status.store(ThreadState::Ready);
    interrupts::set_level(old_level);
}

/// Yields the CPU. The current thread is re-queued at the end
/// of its run of equal-priority ready threads, so equal
/// priorities share the CPU round-robin.
///
/// The wakeup thread never re-queues itself: it returns
/// immediately and blocks on its own once the sleep queue has
/// been drained.
///
pub fn yield_now() {
    let thread = current();
    if sleep::is_wakeup_thread(&thread) {
        return;
    }

    assert!(!interrupts::context(), "yielded inside an interrupt handler");

    let old_level = interrupts::disable();
    if !cpu_local::is_idle_thread(&thread) {
        scheduler::insert_ready_round_robin(thread.clone());
    }
    thread.status.store(ThreadState::Ready);
    scheduler::schedule();
    interrupts::set_level(old_level);
}

/// Yields the CPU, re-queueing the current thread at the
/// *head* of its run of equal-priority ready threads.
///
/// This is the yield used when a priority update demotes the
/// running thread below the ready queue's head: the thread
/// did not consume its turn, so it keeps its place among its
/// new peers.
///
pub fn yield_head() {
    let thread = current();
    if sleep::is_wakeup_thread(&thread) {
        return;
    }

    assert!(!interrupts::context(), "yielded inside an interrupt handler");

    let old_level = interrupts::disable();
    if !cpu_local::is_idle_thread(&thread) {
        scheduler::insert_ready_preempted(thread.clone());
    }
    thread.status.store(ThreadState::Ready);
    scheduler::schedule();
    interrupts::set_level(old_level);
}

/// Deschedules the current thread and destroys it. Never
/// returns to the caller.
///
/// The thread's stack cannot be freed while it is still in
/// use, so the thread is only marked as dying here; the next
/// thread to be scheduled destroys it.
///
pub fn exit() -> ! {
    assert!(!interrupts::context(), "exited inside an interrupt handler");

    let thread = current();
    trace!("thread {} ({}) exiting", thread.id.as_u64(), thread.name());

    interrupts::disable();
    THREADS.lock().remove(&thread.id);
    thread.status.store(ThreadState::Dying);

    // Drop our handle before scheduling: the reaper must see
    // the last one.
    drop(thread);

    scheduler::schedule();
    unreachable!("a dying thread was rescheduled");
}

/// Sets the current thread's priority to `new_priority`.
///
/// If this leaves the ready queue's head with a strictly
/// higher priority than the current thread, the current
/// thread yields at the head of its new priority run.
///
/// Under the MLFQ policy priorities are computed, not set, so
/// this function has no effect.
///
/// # Panics
///
/// `set_priority` panics if `new_priority` is out of range.
///
pub fn set_priority(new_priority: i32) {
    assert!(
        (PRI_MIN..=PRI_MAX).contains(&new_priority),
        "priority {} out of range",
        new_priority
    );

    if mlfq::enabled() {
        return;
    }

    let thread = current();
    let old_level = interrupts::disable();
    thread.priority.store(new_priority);
    match thread.status() {
        ThreadState::Ready => {
            // Re-order the ready list around the new priority.
            scheduler::remove_ready(&thread);
            scheduler::insert_ready_round_robin(thread.clone());
        }
        ThreadState::Running => {
            let preempted = scheduler::ready_head_priority()
                .map_or(false, |head| head > new_priority);
            if preempted {
                yield_head();
            }
        }
        _ => {}
    }
    interrupts::set_level(old_level);
}

/// Invokes `f` on every living thread.
///
/// The registry is walked with interrupts disabled; `f` must
/// not block or yield.
///
pub fn for_each_thread<F>(mut f: F)
where
    F: FnMut(&Arc<Thread>),
{
    interrupts::without_interrupts(|| {
        for thread in THREADS.lock().values() {
            f(thread);
        }
    });
}

/// Called by the timer interrupt handler at each timer tick
/// with the current tick count. Runs in interrupt context.
///
pub(crate) fn tick(now: i64) {
    assert!(interrupts::context(), "thread::tick outside an interrupt handler");

    let thread = current();

    // Update statistics.
    if cpu_local::is_idle_thread(&thread) {
        IDLE_TICKS.fetch_add(1, Ordering::Relaxed);
    } else if thread.address_space.is_some() {
        USER_TICKS.fetch_add(1, Ordering::Relaxed);
    } else {
        KERNEL_TICKS.fetch_add(1, Ordering::Relaxed);
    }

    if mlfq::enabled() {
        mlfq::tick(now, &thread);
    }

    sleep::tick(now);

    // Enforce preemption.
    if scheduler::quantum_tick() {
        interrupts::yield_on_return();
    }
}

/// Tick statistics: how the CPU's time has been spent.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Stats {
    /// Ticks spent in the idle thread.
    pub idle_ticks: i64,

    /// Ticks spent in kernel threads.
    pub kernel_ticks: i64,

    /// Ticks spent in threads that own an address space.
    pub user_ticks: i64,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} idle ticks, {} kernel ticks, {} user ticks",
            self.idle_ticks, self.kernel_ticks, self.user_ticks
        )
    }
}

/// Returns the tick statistics.
///
pub fn stats() -> Stats {
    Stats {
        idle_ticks: IDLE_TICKS.load(Ordering::Relaxed),
        kernel_ticks: KERNEL_TICKS.load(Ordering::Relaxed),
        user_ticks: USER_TICKS.load(Ordering::Relaxed),
    }
}
