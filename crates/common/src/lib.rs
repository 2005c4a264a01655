//! Reference counts for read-mostly sharing.
//!
//! [`TlRefCount`] keeps per-thread counts until it is promoted to one global
//! count; [`AtomicRefCount`] is the plain single-atomic baseline. Both
//! implement [`RefCounter`].

pub mod atomic;
mod local_count;
pub mod lock;
pub mod refcount;
pub mod stack_trace;
pub mod tl_refcount;

pub use refcount::{AtomicRefCount, Count, RefCounter};
pub use tl_refcount::{Phase, TlRefCount};
