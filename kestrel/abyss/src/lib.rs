//! The abyss of the kernel: the machine that kestrel runs on.
//!
//! kestrel is written against a single logical CPU with a preemption switch
//! and a way to exchange execution contexts. On a hosted machine those are
//! provided by this crate:
//!
//! - [`cpu`]: execution contexts. Every kernel thread owns a host thread, and
//!   exactly one of them holds the CPU baton at a time.
//! - [`interrupt`]: the "disable preemption" primitive and the simulated timer
//!   interrupt, which fires when the outermost [`InterruptGuard`] is dropped.
//! - [`spinlock`]: a spinlock that keeps preemption off while it is held.
//! - [`kprint`]: console output.
//! - [`unwind`]: the unwinding protocol used to leave a thread early.
//!
//! **kestrel code never talks to the host directly.** If something is missing
//! here, add it here.
//!
//! [`InterruptGuard`]: interrupt::InterruptGuard

use core::sync::atomic::AtomicBool;

#[doc(hidden)]
#[macro_use]
pub mod kprint;
pub mod cpu;
pub mod interrupt;
pub mod spinlock;
pub mod unwind;

/// Silences `info!`, `warning!` and `debug!` when set.
#[doc(hidden)]
pub static QUITE: AtomicBool = AtomicBool::new(cfg!(feature = "quiet"));
