//! Thread scheduler
//!
//! The kernel consults the [`Scheduler`] at every context switch to pick the
//! thread that runs next ([`Scheduler::next_to_run`]), and at every timer
//! interrupt to decide whether the running thread should give up the cpu
//! ([`Scheduler::timer_tick`]).
//!
//! Three policies are provided:
//!
//! - [`Fifo`]: first-come first-served, never preempts. The default.
//! - [`RoundRobin`]: FIFO order, preempts after a fixed number of ticks.
//! - [`Lottery`]: picks a random runnable thread, preempts at random.
//!
//! The latter two exist to shake out synchronization bugs: a correct
//! primitive must work under any of them.
use super::Tid;
use crate::{
    KernelError,
    sync::SpinLock,
    util::random::{Lcg, RandomSource},
};
use alloc::{collections::VecDeque, vec::Vec};
use core::sync::atomic::{AtomicIsize, Ordering};
use crossbeam_utils::CachePadded;

/// A trait for a thread scheduler.
///
/// The scheduler only ever sees thread ids. It owns the runnable set: a
/// thread pushed with [`Scheduler::push_to_queue`] must be returned by
/// [`Scheduler::next_to_run`] exactly once, unless [`Scheduler::killall`]
/// intervenes.
///
/// Every method is called with preemption disabled, often under the kernel's
/// registry lock, so an implementation must never sleep.
pub trait Scheduler: Send + Sync {
    /// Pop the next thread to run.
    ///
    /// Returns `None` if no thread is runnable, which is fatal for the caller.
    fn next_to_run(&self) -> Option<Tid>;

    /// Push a thread `tid` into scheduling queue.
    ///
    /// This never allocates beyond what [`Scheduler::preallocate`] reserved.
    fn push_to_queue(&self, tid: Tid);

    /// Make room for `capacity` runnable threads.
    ///
    /// Called before a thread is admitted, so that the following
    /// [`Scheduler::push_to_queue`] cannot fail.
    fn preallocate(&self, capacity: usize) -> Result<(), KernelError>;

    /// Forget every runnable thread. Used only when the kernel goes down.
    fn killall(&self);

    /// Called on every timer interrupt.
    ///
    /// Returns `true` if the running thread should yield the cpu.
    fn timer_tick(&self) -> bool;
}

/// A First-in-first-out scheduler.
pub struct Fifo {
    runqueue: SpinLock<VecDeque<Tid>>,
}

impl Default for Fifo {
    fn default() -> Self {
        Self::new()
    }
}

impl Fifo {
    /// Create a new FIFO scheduler.
    pub fn new() -> Self {
        Self {
            runqueue: SpinLock::new(VecDeque::new()),
        }
    }
}

fn reserve_queue(queue: &SpinLock<VecDeque<Tid>>, capacity: usize) -> Result<(), KernelError> {
    let mut guard = queue.lock();
    let additional = capacity.saturating_sub(guard.len());
    let r = guard
        .try_reserve(additional)
        .map_err(|_| KernelError::NoMemory);
    guard.unlock();
    r
}

impl Scheduler for Fifo {
    fn next_to_run(&self) -> Option<Tid> {
        let mut guard = self.runqueue.lock();
        let val = guard.pop_front();
        guard.unlock();
        val
    }

    fn push_to_queue(&self, tid: Tid) {
        let mut guard = self.runqueue.lock();
        guard.push_back(tid);
        guard.unlock();
    }

    fn preallocate(&self, capacity: usize) -> Result<(), KernelError> {
        reserve_queue(&self.runqueue, capacity)
    }

    fn killall(&self) {
        let mut guard = self.runqueue.lock();
        guard.clear();
        guard.unlock();
    }

    fn timer_tick(&self) -> bool {
        false
    }
}

/// A round-robin scheduler.
///
/// Threads run in FIFO order, and the running thread is preempted once it
/// has seen `quantum` timer interrupts.
pub struct RoundRobin {
    run_queue: SpinLock<VecDeque<Tid>>,
    quantum: isize,
    remain: CachePadded<AtomicIsize>,
}

impl RoundRobin {
    /// Create a round-robin scheduler with the given quantum, in ticks.
    pub fn new(quantum: usize) -> Self {
        let quantum = quantum.clamp(1, isize::MAX as usize) as isize;
        Self {
            run_queue: SpinLock::new(VecDeque::new()),
            quantum,
            remain: CachePadded::new(AtomicIsize::new(quantum)),
        }
    }
}

impl Scheduler for RoundRobin {
    fn next_to_run(&self) -> Option<Tid> {
        let mut guard = self.run_queue.lock();
        let next = guard.pop_front();
        guard.unlock();
        self.remain.store(self.quantum, Ordering::Relaxed);
        next
    }

    fn push_to_queue(&self, tid: Tid) {
        let mut guard = self.run_queue.lock();
        guard.push_back(tid);
        guard.unlock();
    }

    fn preallocate(&self, capacity: usize) -> Result<(), KernelError> {
        reserve_queue(&self.run_queue, capacity)
    }

    fn killall(&self) {
        let mut guard = self.run_queue.lock();
        guard.clear();
        guard.unlock();
    }

    fn timer_tick(&self) -> bool {
        self.remain.fetch_sub(1, Ordering::Relaxed) <= 1
    }
}

/// A scheduler that draws the next thread at random.
///
/// Every runnable thread is equally likely to run next, and each timer
/// interrupt preempts the running thread with probability `1 / preempt_one_in`.
pub struct Lottery {
    pool: SpinLock<Vec<Tid>>,
    rng: SpinLock<Lcg>,
    preempt_one_in: u32,
}

impl Lottery {
    /// Create a lottery scheduler seeded with `seed`.
    pub fn new(seed: u64, preempt_one_in: u32) -> Self {
        Self {
            pool: SpinLock::new(Vec::new()),
            rng: SpinLock::new(Lcg::new(seed)),
            preempt_one_in: preempt_one_in.max(1),
        }
    }

    fn draw(&self, bound: u32) -> u32 {
        let mut rng = self.rng.lock();
        let v = rng.below(bound);
        rng.unlock();
        v
    }
}

impl Scheduler for Lottery {
    fn next_to_run(&self) -> Option<Tid> {
        let mut pool = self.pool.lock();
        let next = if pool.is_empty() {
            None
        } else {
            let len = u32::try_from(pool.len()).unwrap_or(u32::MAX);
            let winner = self.draw(len) as usize;
            Some(pool.swap_remove(winner))
        };
        pool.unlock();
        next
    }

    fn push_to_queue(&self, tid: Tid) {
        let mut pool = self.pool.lock();
        pool.push(tid);
        pool.unlock();
    }

    fn preallocate(&self, capacity: usize) -> Result<(), KernelError> {
        let mut pool = self.pool.lock();
        let additional = capacity.saturating_sub(pool.len());
        let r = pool
            .try_reserve(additional)
            .map_err(|_| KernelError::NoMemory);
        pool.unlock();
        r
    }

    fn killall(&self) {
        let mut pool = self.pool.lock();
        pool.clear();
        pool.unlock();
    }

    fn timer_tick(&self) -> bool {
        self.draw(self.preempt_one_in) == 0
    }
}
