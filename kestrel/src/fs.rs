//! Filesystem references held by threads.
//!
//! The kernel core does not implement a filesystem. It only carries the
//! working directory of each thread: a forked thread shares its parent's
//! directory, and the reference is released when the thread exits.
use alloc::{string::String, sync::Arc};

/// A reference-counted handle to a filesystem node.
#[derive(Debug, PartialEq, Eq)]
pub struct Vnode {
    path: String,
}

impl Vnode {
    /// A node for `path`.
    pub fn new<I>(path: I) -> Arc<Self>
    where
        String: From<I>,
    {
        Arc::new(Self {
            path: String::from(path),
        })
    }

    /// Path of this node.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Number of holders of this node, `this` included.
    pub fn share_count(this: &Arc<Self>) -> usize {
        Arc::strong_count(this)
    }
}
