//! Sleeping mutual-exclusion lock.
use super::SpinLock;
use crate::thread::{self, Current, Tid, WaitChannel, registry};
use abyss::interrupt::InterruptGuard;
use alloc::string::String;

/// A mutual exclusion primitive with an owner.
///
/// Unlike a [`SpinLock`], a thread that finds the lock taken goes to sleep
/// until the holder releases it. The lock remembers which thread holds it:
/// only that thread may release it, and [`Lock::is_held_by_caller`] always
/// tells the truth.
///
/// The lock is not reentrant. Acquiring it again from the holder is a kernel
/// panic.
pub struct Lock {
    name: String,
    holder: SpinLock<Option<Tid>>,
    chan: WaitChannel,
}

impl Lock {
    /// Creates a new lock in an unlocked state ready for use.
    pub fn new<I>(name: I) -> Self
    where
        String: From<I>,
    {
        Self {
            name: String::from(name),
            holder: SpinLock::new(None),
            chan: WaitChannel::Lock(WaitChannel::fresh_id()),
        }
    }

    /// Name of this lock.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acquires the lock, sleeping until it is able to do so.
    ///
    /// # Panics
    ///
    /// Panics if the caller already holds the lock.
    pub fn acquire(&self) {
        let me = Current::get_tid();
        let guard = InterruptGuard::new();
        loop {
            let mut holder = self.holder.lock();
            match *holder {
                None => {
                    *holder = Some(me);
                    holder.unlock();
                    break;
                }
                Some(tid) if tid == me => {
                    holder.unlock();
                    panic!("Lock `{}` acquired twice by thread {me}.", self.name);
                }
                Some(_) => {
                    holder.unlock();
                    Current::sleep(self.chan);
                }
            }
        }
        drop(guard);
    }

    /// Releases the lock and wakes every thread waiting for it.
    ///
    /// # Panics
    ///
    /// Panics if the caller does not hold the lock.
    pub fn release(&self) {
        let me = Current::get_tid();
        let guard = InterruptGuard::new();
        let mut holder = self.holder.lock();
        if *holder != Some(me) {
            let owner = *holder;
            holder.unlock();
            panic!(
                "Lock `{}` released by thread {me}, but it is held by {owner:?}.",
                self.name
            );
        }
        *holder = None;
        holder.unlock();
        thread::wakeup(self.chan);
        drop(guard);
    }

    /// Returns `true` if the running thread holds this lock.
    pub fn is_held_by_caller(&self) -> bool {
        let Some(local) = registry::current() else {
            return false;
        };
        self.holder() == Some(local.tid)
    }

    /// The thread that holds this lock, if any.
    pub fn holder(&self) -> Option<Tid> {
        let holder = self.holder.lock();
        let tid = *holder;
        holder.unlock();
        tid
    }

    /// Destroy the lock.
    ///
    /// # Panics
    ///
    /// Panics if the lock is held or a thread is waiting for it.
    pub fn destroy(self) {
        let holder = self.holder();
        assert!(
            holder.is_none(),
            "Lock `{}` destroyed while held by thread {holder:?}.",
            self.name
        );
        assert!(
            !thread::has_sleepers(self.chan),
            "Lock `{}` destroyed while threads wait on it.",
            self.name
        );
    }
}
