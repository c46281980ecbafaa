//! Test cases of the kestrel core and of the stoplight intersection.
//!
//! Every case is a plain function that boots its own kernel (through
//! `#[boot]`) and panics on failure. `src/main.rs` runs them through
//! [`kestrel::TestDriver`], `tests/grade.rs` through `cargo test`.
#![no_std]

extern crate alloc;

pub mod intersection;
pub mod process;
pub mod random;
pub mod sync;
pub mod thread;
