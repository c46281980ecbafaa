//! Synchronization primitives.
//!
//! All three sleeping primitives are built the same way: a short critical
//! section under a [`SpinLock`] decides whether the caller may proceed, and
//! if not, the caller sleeps on the primitive's [`WaitChannel`] with
//! preemption still disabled, so that no wakeup can be lost in between.
//!
//! - [`Semaphore`]: a counting semaphore.
//! - [`Lock`]: a sleeping, non-reentrant mutual-exclusion lock with an owner.
//! - [`ConditionVariable`]: Mesa-style condition variable used with a
//!   [`Lock`].
//!
//! None of them hands out an RAII guard. Every acquisition has an explicit
//! release, which keeps every call into the scheduler visible at the call
//! site.
//!
//! [`WaitChannel`]: crate::thread::WaitChannel
pub mod condition_variable;
pub mod lock;
pub mod semaphore;

pub use abyss::spinlock::{SpinLock, SpinLockGuard};
pub use condition_variable::ConditionVariable;
pub use lock::Lock;
pub use semaphore::Semaphore;
