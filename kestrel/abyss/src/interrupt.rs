//! Interrupt
//!
//! The machine has a single timer interrupt line. Preemption is "disabled"
//! while any [`InterruptGuard`] is alive in the running context; guards nest.
//! The timer is modelled as always pending: it is delivered whenever the
//! outermost guard is dropped, by calling the handler installed with
//! [`set_timer_handler`]. The handler itself runs with further delivery
//! masked.
use core::{
    cell::{Cell, RefCell},
    marker::PhantomData,
};

/// A timer interrupt handler.
pub type Handler = std::sync::Arc<dyn Fn() + Send + Sync>;

struct PerCpuState {
    depth: Cell<usize>,
    in_handler: Cell<bool>,
    timer: RefCell<Option<Handler>>,
}

std::thread_local! {
    static STATE: PerCpuState = const {
        PerCpuState {
            depth: Cell::new(0),
            in_handler: Cell::new(false),
            timer: RefCell::new(None),
        }
    };
}

/// An RAII-based guard for managing interrupt disabling.
///
/// When an `InterruptGuard` is created, interrupts are disabled. When the
/// outermost guard is dropped, interrupts are enabled again and the pending
/// timer interrupt is delivered.
///
/// **Important:**
/// - [`InterruptGuard`] instances **must be dropped in reverse order of their
///   creation**.
/// - A guard belongs to the context that created it and must not be sent to
///   another one.
///
/// # Example
/// ```rust
/// let _guard = InterruptGuard::new(); // Disables interrupts
/// // Critical section...
/// // Interrupts are restored when `_guard` goes out of scope.
/// ```
pub struct InterruptGuard {
    _not_send: PhantomData<*const ()>,
}

impl InterruptGuard {
    /// Creates a new `InterruptGuard`, disabling interrupts.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        STATE.with(|state| state.depth.set(state.depth.get() + 1));
        Self {
            _not_send: PhantomData,
        }
    }

    /// Releases this guard without delivering the pending timer interrupt.
    pub fn consume(self) {
        Self::leave();
        core::mem::forget(self);
    }

    /// Returns `true` if the running context holds at least one guard.
    pub fn is_guarded() -> bool {
        STATE.try_with(|state| state.depth.get() > 0).unwrap_or(false)
    }

    fn leave() -> usize {
        STATE
            .try_with(|state| {
                let prev = state.depth.get();
                assert!(prev > 0, "Mismatched InterruptGuard drop calls: {prev}");
                state.depth.set(prev - 1);
                prev
            })
            .unwrap_or(0)
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        if Self::leave() == 1 && !std::thread::panicking() {
            deliver_timer();
        }
    }
}

/// Resets the handler flag even if the handler unwinds.
struct HandlerScope;

impl Drop for HandlerScope {
    fn drop(&mut self) {
        let _ = STATE.try_with(|state| state.in_handler.set(false));
    }
}

fn deliver_timer() {
    let handler = STATE
        .try_with(|state| {
            if state.in_handler.get() {
                None
            } else {
                state.timer.borrow().clone()
            }
        })
        .ok()
        .flatten();
    if let Some(handler) = handler {
        STATE.with(|state| state.in_handler.set(true));
        let _scope = HandlerScope;
        handler();
    }
}

/// Installs (or removes, with `None`) the timer handler of the running
/// context.
pub fn set_timer_handler(handler: Option<Handler>) {
    let _ = STATE.try_with(|state| *state.timer.borrow_mut() = handler);
}

/// Returns `true` while the running context executes its timer handler.
pub fn in_interrupt_handler() -> bool {
    STATE
        .try_with(|state| state.in_handler.get())
        .unwrap_or(false)
}
