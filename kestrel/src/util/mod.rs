//! Utilities.
pub mod random;
