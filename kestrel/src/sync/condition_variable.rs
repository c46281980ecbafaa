//! Condition variable.
use super::Lock;
use crate::thread::{self, Current, WaitChannel};
use abyss::interrupt::InterruptGuard;
use alloc::string::String;

/// A Condition Variable
///
/// Condition variables represent the ability to block a thread such that it
/// consumes no CPU time while waiting for an event to occur. Condition
/// variables are typically associated with a boolean predicate (a condition)
/// and a [`Lock`]. The predicate is always verified while holding the lock
/// before determining that a thread must block.
///
/// Wakeups are Mesa-style: a woken thread competes for the lock like anybody
/// else, so the predicate must be checked again after [`wait`] returns.
/// [`wait_while`] does that loop for you.
///
/// [`wait`]: ConditionVariable::wait
/// [`wait_while`]: ConditionVariable::wait_while
pub struct ConditionVariable {
    name: String,
    chan: WaitChannel,
}

impl ConditionVariable {
    /// Creates a new condition variable which is ready to be waited on and
    /// signaled.
    pub fn new<I>(name: I) -> Self
    where
        String: From<I>,
    {
        Self {
            name: String::from(name),
            chan: WaitChannel::ConditionVariable(WaitChannel::fresh_id()),
        }
    }

    /// Name of this condition variable.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Release `lock`, sleep until signaled, and acquire `lock` again.
    ///
    /// Releasing the lock and falling asleep happen in one atomic section, so
    /// a signal sent by the next holder of `lock` cannot be missed.
    ///
    /// # Panics
    ///
    /// Panics if the caller does not hold `lock`.
    pub fn wait(&self, lock: &Lock) {
        assert!(
            lock.is_held_by_caller(),
            "Condition variable `{}` waited on without holding lock `{}`.",
            self.name,
            lock.name()
        );
        let guard = InterruptGuard::new();
        lock.release();
        Current::sleep(self.chan);
        drop(guard);
        lock.acquire();
    }

    /// Blocks the current thread while `predicate` returns `true`.
    ///
    /// The caller holds `lock` when calling this, and holds it again when this
    /// returns. There is **no need to check the predicate before calling**
    /// `wait_while`.
    pub fn wait_while(&self, lock: &Lock, mut predicate: impl FnMut() -> bool) {
        while predicate() {
            self.wait(lock);
        }
    }

    /// Wakes up one blocked thread on this condvar, the one that has waited
    /// the longest. Does nothing if nobody waits.
    pub fn signal(&self, lock: &Lock) {
        debug_assert!(lock.is_held_by_caller());
        thread::wakeup_one(self.chan);
    }

    /// Wakes up all blocked threads on this condvar.
    pub fn broadcast(&self, lock: &Lock) {
        debug_assert!(lock.is_held_by_caller());
        thread::wakeup(self.chan);
    }

    /// The channel that waiters sleep on.
    pub fn channel(&self) -> WaitChannel {
        self.chan
    }

    /// Destroy the condition variable.
    ///
    /// # Panics
    ///
    /// Panics if a thread is waiting on it.
    pub fn destroy(self) {
        assert!(
            !thread::has_sleepers(self.chan),
            "Condition variable `{}` destroyed while threads wait on it.",
            self.name
        );
    }
}
