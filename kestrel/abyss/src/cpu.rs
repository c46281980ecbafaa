//! Execution contexts of the single logical CPU.
//!
//! Each [`Context`] is backed by a host thread, and the CPU is a baton handed
//! from one context to the next: [`Context::switch`] gives the baton to the
//! next context and parks the caller until somebody hands it back. Exactly
//! one context runs kernel code at any instant.
//!
//! A parked context can also be cancelled. It then unwinds out of its
//! [`Context::switch`] with the [`unwind`](crate::unwind) cancel payload, so
//! whatever it was doing is dropped without running kernel code.
//!
//! The running context additionally owns a per-cpu slot, [`set_local`], where
//! the kernel keeps its notion of "current thread".

use core::any::Any;
use std::{
    cell::RefCell,
    string::String,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    thread::JoinHandle,
};

/// The per-cpu data of the kernel.
pub type Local = Arc<dyn Any + Send + Sync>;

std::thread_local! {
    static LOCAL: RefCell<Option<Local>> = const { RefCell::new(None) };
}

/// Set the per-cpu data of the running context.
pub fn set_local(local: Option<Local>) {
    let _ = LOCAL.try_with(|slot| *slot.borrow_mut() = local);
}

/// Get the per-cpu data of the running context.
pub fn local() -> Option<Local> {
    LOCAL.try_with(|slot| slot.borrow().clone()).ok().flatten()
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Signal {
    Parked,
    Run,
    Cancel,
}

/// The CPU baton of one context.
struct Baton {
    signal: Mutex<Signal>,
    cv: Condvar,
}

impl Baton {
    fn new() -> Self {
        Self {
            signal: Mutex::new(Signal::Parked),
            cv: Condvar::new(),
        }
    }

    fn signal(&self) -> MutexGuard<'_, Signal> {
        self.signal.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn raise(&self, to: Signal) {
        let mut signal = self.signal();
        // Cancellation is final.
        if *signal != Signal::Cancel {
            *signal = to;
        }
        drop(signal);
        self.cv.notify_one();
    }

    /// Block until the baton is handed over. Returns `false` on cancellation.
    fn wait(&self) -> bool {
        let mut signal = self.signal();
        loop {
            match *signal {
                Signal::Parked => {
                    signal = self.cv.wait(signal).unwrap_or_else(PoisonError::into_inner);
                }
                Signal::Run => {
                    *signal = Signal::Parked;
                    return true;
                }
                Signal::Cancel => return false,
            }
        }
    }
}

/// Failed to create a host thread for a new context.
#[derive(Debug)]
pub struct SpawnError;

struct ContextInner {
    name: String,
    baton: Arc<Baton>,
    host: Mutex<Option<JoinHandle<()>>>,
}

/// An execution context: a stack plus the register state parked on it.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Adopt the running host thread as a context. It holds the baton.
    pub fn adopt_current(name: &str) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                name: name.into(),
                baton: Arc::new(Baton::new()),
                host: Mutex::new(None),
            }),
        }
    }

    /// Create a new context with a `stack_size`-byte stack.
    ///
    /// The context starts parked; `entry` runs the first time another context
    /// switches to it. If the context is cancelled before that, `entry` is
    /// dropped without being called.
    pub fn spawn(
        name: &str,
        stack_size: usize,
        entry: Box<dyn FnOnce() + Send>,
    ) -> Result<Self, SpawnError> {
        let baton = Arc::new(Baton::new());
        let host = {
            let baton = baton.clone();
            std::thread::Builder::new()
                .name(name.into())
                .stack_size(stack_size)
                .spawn(move || {
                    if baton.wait() {
                        entry();
                    }
                })
                .map_err(|_| SpawnError)?
        };
        Ok(Self {
            inner: Arc::new(ContextInner {
                name: name.into(),
                baton,
                host: Mutex::new(Some(host)),
            }),
        })
    }

    /// Hand the CPU to `next` and park until it is handed back.
    ///
    /// If this context is cancelled while parked, the per-cpu state is
    /// cleared and the call unwinds with the cancel payload.
    pub fn switch(&self, next: &Context) {
        next.inner.baton.raise(Signal::Run);
        if !self.inner.baton.wait() {
            crate::interrupt::set_timer_handler(None);
            set_local(None);
            crate::unwind::cancel();
        }
    }

    /// Hand the CPU to `next` for the last time. The caller must return to
    /// the bottom of its host thread without touching shared state.
    pub fn switch_final(&self, next: &Context) {
        next.inner.baton.raise(Signal::Run);
    }

    /// Cancel this context. It unwinds the next time it would run.
    pub fn cancel(&self) {
        self.inner.baton.raise(Signal::Cancel);
    }

    /// Wait for the host thread of this context to finish, releasing its
    /// stack. Does nothing for an adopted context.
    pub fn join(&self) {
        let host = self
            .inner
            .host
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(host) = host {
            let _ = host.join();
        }
    }
}

impl core::fmt::Debug for Context {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Context").field("name", &self.inner.name).finish()
    }
}
