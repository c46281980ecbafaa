//! Counting semaphore.
use super::SpinLock;
use crate::thread::{self, Current, WaitChannel};
use abyss::interrupt::InterruptGuard;
use alloc::string::String;

/// Counting semaphore.
///
/// A semaphore maintains a non-negative count of permits. [`Semaphore::wait`]
/// (P) takes one, sleeping until one is available; [`Semaphore::signal`] (V)
/// gives one back.
pub struct Semaphore {
    name: String,
    count: SpinLock<usize>,
    chan: WaitChannel,
}

impl Semaphore {
    /// Creates a new semaphore initialized with `count` permits.
    pub fn new<I>(name: I, count: usize) -> Self
    where
        String: From<I>,
    {
        Self {
            name: String::from(name),
            count: SpinLock::new(count),
            chan: WaitChannel::Semaphore(WaitChannel::fresh_id()),
        }
    }

    /// Name of this semaphore.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waits until a permit becomes available and then acquires it.
    ///
    /// The check and the decrement happen in one atomic section, and a caller
    /// that finds no permit goes to sleep inside that same section.
    pub fn wait(&self) {
        let guard = InterruptGuard::new();
        loop {
            let mut count = self.count.lock();
            if *count > 0 {
                *count -= 1;
                count.unlock();
                break;
            }
            count.unlock();
            Current::sleep(self.chan);
        }
        drop(guard);
    }

    /// Releases a permit back to the semaphore, waking every thread blocked
    /// in [`Semaphore::wait`]. One of them gets the permit, the rest go back
    /// to sleep.
    pub fn signal(&self) {
        let guard = InterruptGuard::new();
        let mut count = self.count.lock();
        *count += 1;
        count.unlock();
        thread::wakeup(self.chan);
        drop(guard);
    }

    /// The number of available permits.
    pub fn count(&self) -> usize {
        let count = self.count.lock();
        let v = *count;
        count.unlock();
        v
    }

    /// The channel that threads blocked in [`Semaphore::wait`] sleep on.
    pub fn channel(&self) -> WaitChannel {
        self.chan
    }

    /// Returns `true` if a thread is blocked on this semaphore.
    pub fn has_waiters(&self) -> bool {
        thread::has_sleepers(self.chan)
    }

    /// Destroy the semaphore.
    ///
    /// # Panics
    ///
    /// Panics if a thread is blocked on it.
    pub fn destroy(self) {
        assert!(
            !self.has_waiters(),
            "Semaphore `{}` destroyed while threads wait on it.",
            self.name
        );
    }
}
