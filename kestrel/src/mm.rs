//! Address spaces.

/// The memory state a thread runs in.
///
/// A thread optionally owns one (see
/// [`ThreadBuilder::attach_address_space`]). It is activated every time the
/// thread gets the cpu back, and dropped when the thread exits.
///
/// [`ThreadBuilder::attach_address_space`]: crate::thread::ThreadBuilder::attach_address_space
pub trait AddressSpace: Send {
    /// Make this address space the current one.
    fn activate(&self);
}
