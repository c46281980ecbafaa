//! Thread abstraction, an abstraction of a cpu core.
//!
//! ## The threading model
//!
//! An executing kernel consists of a collection of threads, each with their
//! own stack and local state. At any instant every thread is in exactly one
//! of four states:
//!
//! - **running**: it owns the CPU. There is exactly one running thread.
//! - **runnable**: it waits in the scheduler's queue for the CPU.
//! - **sleeping**: it waits on a [`WaitChannel`] until somebody calls
//!   [`wakeup`] on that channel.
//! - **zombie**: it has exited, but its stack is still in use until the next
//!   context switch. The next thread to run reclaims it.
//!
//! Threads are created by [`ThreadBuilder::spawn`], which also admits the new
//! thread into the process table as a child of the caller. A forked thread
//! inherits its parent's working directory.
//!
//! ## Sleeping
//!
//! [`Current::sleep`] must be called with preemption disabled (see
//! [`InterruptGuard`]), after the caller has checked the condition it waits
//! for. Because [`wakeup`] also runs with preemption disabled, a wakeup can
//! never slip in between that check and the sleep.
//!
//! [`InterruptGuard`]: abyss::interrupt::InterruptGuard
pub(crate) mod registry;
pub mod scheduler;

use crate::{KernelError, fs::Vnode, mm::AddressSpace, process::Pid};
use abyss::interrupt::InterruptGuard;
use alloc::{boxed::Box, string::String, sync::Arc};
use core::sync::atomic::{AtomicU64, Ordering};
use registry::{Transition, this_cpu};

/// Size of each thread's stack.
pub const STACK_SIZE: usize = 0x100000;

/// Thread id.
pub type Tid = u64;

/// Thread id of the boot thread.
pub const BOOT_TID: Tid = 0;

/// A possible state of the thread.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum ThreadState {
    /// Thread is runnable.
    Runnable,
    /// Thread is running.
    Running,
    /// Thread sleeps on a wait channel.
    Sleeping(WaitChannel),
    /// Thread has exited with the exit code, but it is not reclaimed yet.
    Zombie(i32),
}

/// An identifier associating a sleeping thread with the event that wakes it.
///
/// Every synchronization primitive takes a fresh channel when it is created,
/// so two primitives never share one.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Hash)]
pub enum WaitChannel {
    /// Sleepers of a [`Semaphore`](crate::sync::Semaphore).
    Semaphore(u64),
    /// Sleepers of a [`Lock`](crate::sync::Lock).
    Lock(u64),
    /// Sleepers of a [`ConditionVariable`](crate::sync::ConditionVariable).
    ConditionVariable(u64),
    /// Any other event.
    Custom(u64),
}

static NEXT_CHANNEL: AtomicU64 = AtomicU64::new(1);

impl WaitChannel {
    pub(crate) fn fresh_id() -> u64 {
        NEXT_CHANNEL.fetch_add(1, Ordering::Relaxed)
    }

    /// Take a fresh channel for a custom event.
    pub fn custom() -> Self {
        Self::Custom(Self::fresh_id())
    }

    /// The numeric identity of this channel.
    pub fn id(&self) -> u64 {
        match *self {
            Self::Semaphore(id)
            | Self::Lock(id)
            | Self::ConditionVariable(id)
            | Self::Custom(id) => id,
        }
    }
}

/// An thread abstraction.
pub struct Thread {
    /// Thread id
    pub tid: Tid,
    /// Thread name
    pub name: String,
    /// Process id of this thread.
    pub pid: Pid,
    pub(crate) context: abyss::cpu::Context,
    pub(crate) state: ThreadState,
    pub(crate) wchan: Option<WaitChannel>,
    pub(crate) cwd: Option<Arc<Vnode>>,
    pub(crate) address_space: Option<Box<dyn AddressSpace>>,
}

/// A handle to join thread.
#[derive(Debug)]
pub struct JoinHandle {
    /// Thread id of this handle.
    pub tid: Tid,
    /// Process id of the thread.
    pub pid: Pid,
}

impl JoinHandle {
    /// Wait for the thread to exit and returns its exit code.
    ///
    /// The thread's process record is removed afterwards. Only the parent may
    /// join a thread.
    ///
    /// # Errors
    ///
    /// - [`KernelError::NoSuchProcess`] if the record is already gone.
    /// - [`KernelError::InvalidArgument`] if the caller is not the parent.
    pub fn join(self) -> Result<i32, KernelError> {
        let local = this_cpu();
        local.kernel.waitpid(local.tid, self.pid)
    }
}

/// A struct to build a new thread.
pub struct ThreadBuilder {
    pub(crate) name: String,
    pub(crate) stack_size: Option<usize>,
    pub(crate) address_space: Option<Box<dyn AddressSpace>>,
}

impl ThreadBuilder {
    /// Create a new thread builder for thread `name`.
    pub fn new<I>(name: I) -> Self
    where
        String: From<I>,
    {
        Self {
            name: String::from(name),
            stack_size: None,
            address_space: None,
        }
    }

    /// Use a `bytes`-byte stack instead of the configured default.
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Attach an address space to the thread. It is activated every time the
    /// thread is switched in, and released when the thread exits.
    pub fn attach_address_space(mut self, space: Box<dyn AddressSpace>) -> Self {
        self.address_space = Some(space);
        self
    }

    /// Fork the thread.
    ///
    /// The new thread is runnable when this returns. It inherits the caller's
    /// working directory and is admitted into the process table as a child
    /// of the caller.
    ///
    /// # Errors
    ///
    /// - [`KernelError::NoMemory`] if the thread or its stack cannot be
    ///   allocated.
    /// - [`KernelError::TableFull`] if the process table has no free slot.
    ///
    /// Nothing is left behind on failure.
    pub fn spawn<F: FnOnce() + Send + 'static>(self, thread_fn: F) -> Result<JoinHandle, KernelError> {
        let local = this_cpu();
        local.kernel.fork(local.tid, self, Box::new(thread_fn))
    }
}

/// The opaque structure indicating the running thread on the current cpu.
pub struct Current {
    _p: (),
}

impl Current {
    /// Yield the cpu to another runnable thread.
    pub fn yield_now() {
        assert_eq!(
            abyss::spinlock::held(),
            0,
            "Try to yield a thread while holding a spinlock."
        );
        let local = this_cpu();
        let guard = InterruptGuard::new();
        local.kernel.switch(local.tid, Transition::Yield);
        drop(guard);
    }

    /// Put the current thread to sleep on `chan` until [`wakeup`].
    ///
    /// # Panics
    ///
    /// Panics if preemption is enabled, if called from the timer interrupt
    /// handler, or if the caller holds a spinlock.
    pub fn sleep(chan: WaitChannel) {
        assert!(
            InterruptGuard::is_guarded(),
            "Try to sleep with interrupts enabled."
        );
        assert!(
            !abyss::interrupt::in_interrupt_handler(),
            "Try to sleep in an interrupt handler."
        );
        assert_eq!(
            abyss::spinlock::held(),
            0,
            "Try to sleep while holding a spinlock."
        );
        let local = this_cpu();
        local.kernel.switch(local.tid, Transition::Sleep(chan));
    }

    /// Exit the current thread with `exit_code`.
    ///
    /// The thread's address space and working directory are released, its
    /// exit is reported to the process table, and it becomes a zombie.
    pub fn exit(exit_code: i32) -> ! {
        assert_eq!(
            abyss::spinlock::held(),
            0,
            "Try to exit a thread while holding a lock."
        );
        assert_ne!(
            Current::get_tid(),
            BOOT_TID,
            "The boot thread cannot exit; shut the kernel down instead."
        );
        abyss::unwind::exit(exit_code)
    }

    /// Get the current thread's id.
    pub fn get_tid() -> Tid {
        this_cpu().tid
    }

    /// Get the current thread's process id.
    pub fn pid() -> Pid {
        let local = this_cpu();
        local.kernel.with_thread(local.tid, |th| th.pid)
    }

    /// Get the current thread's name.
    pub fn name() -> String {
        let local = this_cpu();
        local.kernel.with_thread(local.tid, |th| th.name.clone())
    }

    /// The working directory of the current thread.
    pub fn cwd() -> Option<Arc<Vnode>> {
        let local = this_cpu();
        local.kernel.with_thread(local.tid, |th| th.cwd.clone())
    }

    /// Change the working directory of the current thread.
    pub fn chdir(dir: Option<Arc<Vnode>>) {
        let local = this_cpu();
        let old = local
            .kernel
            .with_thread_mut(local.tid, |th| core::mem::replace(&mut th.cwd, dir));
        drop(old);
    }
}

/// Wake every thread sleeping on `chan`. Returns how many were woken.
///
/// There is no ordering among the woken threads; which one runs first is up
/// to the scheduler.
pub fn wakeup(chan: WaitChannel) -> usize {
    this_cpu().kernel.wakeup(chan, usize::MAX)
}

/// Wake at most one thread sleeping on `chan`, the one that has slept the
/// longest. Returns `true` if a thread was woken.
pub fn wakeup_one(chan: WaitChannel) -> bool {
    this_cpu().kernel.wakeup(chan, 1) == 1
}

/// Returns `true` if any thread sleeps on `chan`.
///
/// Diagnostic only: the answer may be stale as soon as preemption is enabled
/// again. Outside of a running kernel this is always `false`.
pub fn has_sleepers(chan: WaitChannel) -> bool {
    registry::current().is_some_and(|local| local.kernel.has_sleepers(chan))
}

/// Get specified thread's [`ThreadState`] by TID (Thread ID).
pub fn get_state_by_tid(tid: Tid) -> Result<ThreadState, KernelError> {
    this_cpu().kernel.state_of(tid)
}

/// Number of live (not yet exited) threads.
pub fn live_threads() -> usize {
    this_cpu().kernel.live_threads()
}
