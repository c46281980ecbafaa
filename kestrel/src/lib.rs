//! # kestrel: the thread and synchronization core of a teaching kernel
//!
//! kestrel is a small kernel core that runs on a single logical CPU. It
//! provides:
//!
//! 1. **[`Threads`]**: creation (fork), voluntary suspension on a wait
//!    channel, wakeup, exit and deferred reclamation of zombies.
//! 2. **[`Synchronization primitives`]**: a counting semaphore, a sleeping
//!    lock and a condition variable, all built directly on thread
//!    sleep/wakeup.
//! 3. **[`Processes`]**: a fixed-capacity process table with parent/child
//!    bookkeeping and exit notification.
//!
//! The machine underneath (execution contexts, the "disable preemption"
//! primitive, the timer and the console) is the [`abyss`] crate. The CPU
//! scheduling policy is pluggable through the [`Scheduler`] trait.
//!
//! ## Booting
//!
//! A kernel is booted on the calling host thread, which becomes the boot
//! thread (tid 0, pid 0). Every other kernel thread is forked from there.
//!
//! ```rust
//! use kestrel::{Kernel, SystemConfigurationBuilder, thread::ThreadBuilder};
//!
//! let kernel = Kernel::bootstrap(SystemConfigurationBuilder::new().build());
//! let handle = ThreadBuilder::new("worker").spawn(|| ()).unwrap();
//! assert_eq!(handle.join(), Ok(0));
//! kernel.shutdown();
//! ```
//!
//! Several kernels may run at the same time on different host threads; they
//! share nothing but the console.
//!
//! ## Atomicity
//!
//! Every inspect-then-mutate region of kernel state runs with preemption
//! disabled (an [`InterruptGuard`] or a [`SpinLock`] held). Such regions never
//! sleep. A thread only ever gives up the CPU by yielding, by sleeping on a
//! wait channel, by exiting, or when the timer preempts it.
//!
//! ## Failures
//!
//! Recoverable failures are reported as [`KernelError`]. Misuse of the
//! primitives (releasing a lock you do not own, destroying a primitive with
//! sleepers, sleeping in an interrupt handler, running out of runnable
//! threads) is a kernel panic: the panicking thread takes every other thread
//! down with it and the panic resurfaces on the boot thread.
//!
//! [`Threads`]: thread
//! [`Synchronization primitives`]: sync
//! [`Processes`]: process
//! [`InterruptGuard`]: abyss::interrupt::InterruptGuard
//! [`SpinLock`]: sync::SpinLock

#![no_std]
#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

#[macro_use]
extern crate abyss;
extern crate alloc;

pub mod fs;
pub mod mm;
pub mod process;
pub mod sync;
pub mod thread;
pub mod util;

pub use abyss::{debug, info, interrupt, print, println, unwind, warning};
#[doc(hidden)]
pub use abyss::QUITE;
use alloc::{boxed::Box, sync::Arc, vec::Vec};
use core::marker::PhantomData;
use thread::{
    BOOT_TID, STACK_SIZE,
    registry::{KernelInner, current},
    scheduler::{Fifo, Scheduler},
};

/// Enum representing errors that can occur during a kernel operation.
///
/// Each variant corresponds to a specific type of error that might occur
/// during a kernel operation, and maps to a classic errno value through
/// [`KernelError::into_usize`].
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum KernelError {
    /// Out of memory. (ENOMEM)
    NoMemory,
    /// Resource temporarily unavailable: the process table is full. (EAGAIN)
    TableFull,
    /// No such process. (ESRCH)
    NoSuchProcess,
    /// Device or resource busy. (EBUSY)
    Busy,
    /// Invalid arguement. (EINVAL)
    InvalidArgument,
}

impl KernelError {
    /// Converts the [`KernelError`] enum into a corresponding `usize` error
    /// code, in the negated-errno convention of a system call return value.
    pub fn into_usize(self) -> usize {
        (match self {
            KernelError::NoSuchProcess => -3isize,
            KernelError::TableFull => -11,
            KernelError::NoMemory => -12,
            KernelError::Busy => -16,
            KernelError::InvalidArgument => -22,
        }) as usize
    }
}

/// The given `isize` does not indicate an [`KernelError`].
#[derive(Debug, Eq, PartialEq)]
pub struct TryFromError {
    e: isize,
}

impl TryFrom<isize> for KernelError {
    type Error = TryFromError;

    fn try_from(value: isize) -> Result<Self, Self::Error> {
        match value {
            -3 => Ok(Self::NoSuchProcess),
            -11 => Ok(Self::TableFull),
            -12 => Ok(Self::NoMemory),
            -16 => Ok(Self::Busy),
            -22 => Ok(Self::InvalidArgument),
            e => Err(TryFromError { e }),
        }
    }
}

/// A builder for system configuration settings.
///
/// The [`SystemConfigurationBuilder`] collects the settings a kernel is booted
/// with: the scheduling policy, the size of the process table, allocation
/// limits and the start-up jitter used to shake out synchronization bugs.
pub struct SystemConfigurationBuilder {
    scheduler: Option<Box<dyn Scheduler>>,
    process_table_size: usize,
    thread_limit: Option<usize>,
    stack_size: usize,
    seed: u64,
    synch_probs: bool,
}

impl Default for SystemConfigurationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemConfigurationBuilder {
    /// Start from the default configuration: a [`Fifo`] scheduler, a
    /// [`PROCESS_TABLE_SIZE`]-slot process table and no thread limit.
    ///
    /// [`PROCESS_TABLE_SIZE`]: process::PROCESS_TABLE_SIZE
    pub fn new() -> Self {
        Self {
            scheduler: None,
            process_table_size: process::PROCESS_TABLE_SIZE,
            thread_limit: None,
            stack_size: STACK_SIZE,
            seed: 0x5eed,
            synch_probs: false,
        }
    }

    /// Sets the system-wide scheduler.
    pub fn set_scheduler(mut self, scheduler: impl Scheduler + 'static) -> Self {
        self.scheduler = Some(Box::new(scheduler));
        self
    }

    /// Sets the number of slots of the process table.
    pub fn process_table_size(mut self, slots: usize) -> Self {
        self.process_table_size = slots;
        self
    }

    /// Caps the number of live threads. A fork beyond the cap fails with
    /// [`KernelError::NoMemory`], as if thread allocation had failed.
    pub fn thread_limit(mut self, threads: usize) -> Self {
        self.thread_limit = Some(threads);
        self
    }

    /// Sets the default stack size of forked threads.
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = bytes;
        self
    }

    /// Seeds the kernel's random source.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// When enabled, every new thread yields a random number of times
    /// (0 to 320) before running its entry.
    pub fn synch_probs(mut self, enabled: bool) -> Self {
        self.synch_probs = enabled;
        self
    }

    /// Finish the configuration.
    pub fn build(self) -> SystemConfiguration {
        SystemConfiguration {
            scheduler: self.scheduler.unwrap_or_else(|| Box::new(Fifo::new())),
            process_table_size: self.process_table_size,
            thread_limit: self.thread_limit,
            stack_size: self.stack_size,
            seed: self.seed,
            synch_probs: self.synch_probs,
        }
    }
}

/// A finished configuration, ready to boot a [`Kernel`].
pub struct SystemConfiguration {
    pub(crate) scheduler: Box<dyn Scheduler>,
    pub(crate) process_table_size: usize,
    pub(crate) thread_limit: Option<usize>,
    pub(crate) stack_size: usize,
    pub(crate) seed: u64,
    pub(crate) synch_probs: bool,
}

/// A running kernel, owned by its boot thread.
///
/// Dropping a kernel without [`Kernel::shutdown`] (for example while a
/// kernel panic unwinds the boot thread) drops every remaining thread
/// silently.
pub struct Kernel {
    inner: Arc<KernelInner>,
    down: bool,
    _boot_thread_only: PhantomData<*const ()>,
}

impl Kernel {
    /// Boot a kernel on the calling host thread, which becomes the boot
    /// thread.
    ///
    /// # Panics
    ///
    /// Panics if a kernel already runs on this thread or if the initial
    /// allocations fail; nothing can be recovered at this point.
    pub fn bootstrap(config: SystemConfiguration) -> Self {
        assert!(
            abyss::cpu::local().is_none(),
            "Kernel: a kernel is already running on this cpu."
        );
        let inner = KernelInner::boot(config);
        info!(
            "Kernel: booted with {} process slots.",
            inner.processes.capacity()
        );
        Self {
            inner,
            down: false,
            _boot_thread_only: PhantomData,
        }
    }

    /// Number of live (not yet exited) threads, the boot thread included.
    pub fn live_threads(&self) -> usize {
        self.inner.live_threads()
    }

    /// Shut the kernel down.
    ///
    /// Zombies are reaped, every thread that is still sleeping or runnable is
    /// dropped without running its cleanup, and the process table is
    /// destroyed.
    pub fn shutdown(mut self) {
        let on_boot_thread = current()
            .is_some_and(|local| local.tid == BOOT_TID && Arc::ptr_eq(&local.kernel, &self.inner));
        assert!(
            on_boot_thread,
            "Kernel: shutdown must be called from the boot thread."
        );
        self.inner.teardown(true);
        self.down = true;
        info!("Kernel: shut down.");
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        if !self.down {
            self.inner.teardown(false);
        }
    }
}

// Test utilities
#[doc(hidden)]
pub trait TestCase
where
    Self: Sync + Send,
{
    fn name(&'static self) -> &'static str;
    fn run(&'static self) -> bool;
}

impl<T> TestCase for T
where
    T: Fn() + Send + Sync + 'static,
{
    fn name(&'static self) -> &'static str {
        core::any::type_name::<T>()
    }

    fn run(&'static self) -> bool {
        print!("test {} ... ", core::any::type_name::<T>());
        match abyss::unwind::catch(self) {
            Ok(()) => {
                println!("ok");
                true
            }
            Err(abyss::unwind::Caught::Panic(msg)) => {
                println!("FAILED\n    {msg}");
                false
            }
            Err(caught) => {
                println!("FAILED\n    {caught:?}");
                false
            }
        }
    }
}

/// A driver for running tests.
///
/// Every test case boots and shuts down its own kernel, so a failing case
/// cannot leave threads behind for the next one.
pub struct TestDriver {
    _p: (),
}

impl TestDriver {
    /// Run the given tests, or only those named in `filter` when it is not
    /// empty. Names are given without the crate prefix, e.g.
    /// `sync::semaphore::sema_0`.
    ///
    /// Returns `true` if every selected test passed.
    pub fn start<const TC: usize>(tests: [&'static dyn TestCase; TC], filter: &[&str]) -> bool {
        let tests = tests
            .into_iter()
            .filter(|test| {
                if filter.is_empty() {
                    return true;
                }
                let name = test.name();
                let r = name.split("::").next().map(|n| n.len() + 2).unwrap_or(0);
                filter.contains(&&name[r..])
            })
            .collect::<Vec<_>>();
        let (total, mut succ) = (tests.len(), 0);
        println!(
            "Running {} test{}",
            total,
            if total == 1 { "" } else { "s" }
        );

        for test in tests {
            if test.run() {
                succ += 1;
            }
        }
        println!(
            "test result: {}. {} passed; {} failed",
            if succ == total { "ok" } else { "FAILED" },
            succ,
            total - succ
        );
        succ == total
    }
}
