//! Unwinding.
//!
//! A context leaves its code early by unwinding to the bottom of its stack,
//! carrying one of two private payloads: exit (with an exit code) or cancel.
//! Neither payload goes through the panic hook. [`catch`] classifies what
//! arrived at the bottom.

use core::any::Any;
use std::{
    boxed::Box,
    panic::{AssertUnwindSafe, catch_unwind, resume_unwind},
    string::{String, ToString},
};

struct ExitPayload(i32);

struct CancelPayload;

/// What stopped a context early.
#[derive(Debug, PartialEq, Eq)]
pub enum Caught {
    /// [`exit`] was called with this code.
    Exit(i32),
    /// The context was cancelled.
    Cancel,
    /// A real panic, with its message.
    Panic(String),
}

/// Unwind the running context with an exit payload.
pub fn exit(code: i32) -> ! {
    resume_unwind(Box::new(ExitPayload(code)))
}

/// Unwind the running context with the cancel payload.
pub fn cancel() -> ! {
    resume_unwind(Box::new(CancelPayload))
}

/// Run `f`, catching any unwinding that escapes from it.
pub fn catch<R>(f: impl FnOnce() -> R) -> Result<R, Caught> {
    catch_unwind(AssertUnwindSafe(f)).map_err(classify)
}

fn classify(payload: Box<dyn Any + Send>) -> Caught {
    if let Some(ExitPayload(code)) = payload.downcast_ref::<ExitPayload>() {
        Caught::Exit(*code)
    } else if payload.is::<CancelPayload>() {
        Caught::Cancel
    } else {
        Caught::Panic(message(payload.as_ref()))
    }
}

/// Extract the message of a panic payload.
pub fn message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}
