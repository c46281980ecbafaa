//! Spinlock.
//!
//! Holding a [`SpinLock`] also holds an [`InterruptGuard`], so the holder is
//! never preempted inside the critical section. A thread must never suspend
//! while it holds a spinlock; [`held`] lets the kernel check that.

use crate::interrupt::InterruptGuard;
use core::{
    cell::{Cell, UnsafeCell},
    marker::PhantomData,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};
use crossbeam_utils::{Backoff, CachePadded};

std::thread_local! {
    static HELD: Cell<usize> = const { Cell::new(0) };
}

/// Number of spinlocks held by the running context.
pub fn held() -> usize {
    HELD.try_with(Cell::get).unwrap_or(0)
}

fn adjust_held(delta: isize) {
    let _ = HELD.try_with(|held| held.set(held.get().wrapping_add_signed(delta)));
}

/// A mutual exclusion primitive useful for protecting shared data
///
/// This spinlock will spin until the lock becomes available. The data can
/// only be accessed through the guard returned from [`lock`], which
/// guarantees that the data is only ever accessed when the spinlock is locked.
///
/// [`lock`]: Self::lock
///
/// # Examples
///
/// ```
/// use abyss::spinlock::SpinLock;
///
/// let spinlock = SpinLock::new(0);
/// let mut guard = spinlock.lock();
/// *guard += 1;
/// // the lock must be "explicitly" unlocked before `guard` goes out of scope.
/// guard.unlock();
/// ```
pub struct SpinLock<T: ?Sized> {
    locked: CachePadded<AtomicBool>,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Creates a new spinlock in an unlocked state ready for use.
    #[inline]
    pub const fn new(t: T) -> SpinLock<T> {
        SpinLock {
            locked: CachePadded::new(AtomicBool::new(false)),
            data: UnsafeCell::new(t),
        }
    }
}

impl<T: ?Sized> SpinLock<T> {
    /// Acquires a spinlock, spinning until it is able to do so.
    ///
    /// Upon returning, the caller is the only one with the lock held. When the
    /// guard goes out of scope without [`SpinLockGuard::unlock`], panic
    /// occurs.
    ///
    /// Locking a spinlock twice from the same context never returns.
    #[track_caller]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let backoff = Backoff::new();
        let guard = loop {
            let guard = InterruptGuard::new();
            if !self.locked.swap(true, Ordering::Acquire) {
                break guard;
            }
            guard.consume();
            backoff.snooze();
        };
        adjust_held(1);

        SpinLockGuard {
            caller: core::panic::Location::caller(),
            lock: self,
            guard: Some(guard),
            _not_send: PhantomData,
        }
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> SpinLock<T> {
        SpinLock::new(Default::default())
    }
}

/// An implementation of a "scoped lock" of a spinlock.
///
/// The lock must be explicitly unlocked by [`unlock`]; dropping the guard
/// without it panics, unless the context is already unwinding.
///
/// [`unlock`]: Self::unlock
pub struct SpinLockGuard<'a, T: ?Sized + 'a> {
    caller: &'static core::panic::Location<'static>,
    lock: &'a SpinLock<T>,
    guard: Option<InterruptGuard>,
    _not_send: PhantomData<*const ()>,
}

unsafe impl<T: ?Sized + Sync> Sync for SpinLockGuard<'_, T> {}

impl<T: ?Sized> SpinLockGuard<'_, T> {
    /// Releases the underlying [`SpinLock`].
    ///
    /// If this was the outermost critical section, a pending timer interrupt
    /// is delivered here.
    pub fn unlock(mut self) {
        self.release();
        core::mem::forget(self);
    }

    fn release(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
        adjust_held(-1);
        self.guard.take();
    }
}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.release();
            return;
        }
        panic!(
            "`.unlock()` must be explicitly called before dropping SpinLockGuard.
The lock is held at {:?}.",
            self.caller
        );
    }
}
