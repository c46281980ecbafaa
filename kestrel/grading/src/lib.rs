//! Attribute macros for kestrel test cases.
//!
//! - `#[boot]` / `#[boot(builder)]`: boot a kernel on the calling thread
//!   around the body, and shut it down afterwards. The optional argument is a
//!   [`SystemConfigurationBuilder`] expression.
//! - `#[assert_exit_code(N)]`: run the body on a forked kernel thread named
//!   after the test, and check that the thread exits with `N`. Place it
//!   above `#[boot]`.
//!
//! [`SystemConfigurationBuilder`]: kestrel::SystemConfigurationBuilder
#![no_std]
extern crate grading_derive;

pub use grading_derive::*;
