//! The counting interface shared by the read-mostly reference counts, and the
//! plain atomic implementation of it.

use crate::atomic::{Ordering::*, Radium, RmAtomic, fence};

/// The result of a reference count operation.
///
/// While a [`TlRefCount`](crate::tl_refcount::TlRefCount) is still in its
/// local phase the exact count is spread over per-thread cells and cannot be
/// read, so operations only report that the count is still alive. Callers
/// must not derive a magnitude from [`Count::LocalPhaseUnspecified`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Count {
    /// No magnitude is available; only success may be tested.
    LocalPhaseUnspecified,
    /// The authoritative global value.
    Global(i64),
}

impl Count {
    /// Whether the operation succeeded. A local-phase result always has.
    #[inline]
    pub fn is_alive(self) -> bool {
        match self {
            Count::LocalPhaseUnspecified => true,
            Count::Global(n) => n > 0,
        }
    }

    #[inline]
    pub fn is_zero(self) -> bool {
        self == Count::Global(0)
    }

    #[inline]
    pub fn global(self) -> Option<i64> {
        match self {
            Count::LocalPhaseUnspecified => None,
            Count::Global(n) => Some(n),
        }
    }
}

/// A strong reference count starting at one.
///
/// `increment` never raises a count that has reached zero: it reports
/// `Count::Global(0)` instead, which the caller must treat as "no reference
/// obtained". `decrement` always succeeds.
pub trait RefCounter: Send + Sync {
    fn new() -> Self;

    fn increment(&self) -> Count;

    fn decrement(&self) -> Count;

    /// A snapshot for diagnostics. Never base an acquisition on it.
    fn load(&self) -> Count;

    /// Make the count authoritative. Counters that always are treat this as a
    /// no-op.
    fn promote_to_global(&self);
}

/// A reference count kept in one shared atomic word.
pub struct AtomicRefCount {
    strong: RmAtomic<i64>,
}

impl Default for AtomicRefCount {
    fn default() -> Self {
        Self::new()
    }
}

impl AtomicRefCount {
    pub fn new() -> Self {
        AtomicRefCount {
            strong: Radium::new(1),
        }
    }

    #[inline]
    pub fn get(&self) -> i64 {
        self.strong.load(SeqCst)
    }
}

impl RefCounter for AtomicRefCount {
    fn new() -> Self {
        AtomicRefCount::new()
    }

    #[inline]
    fn increment(&self) -> Count {
        match self
            .strong
            .fetch_update(AcqRel, Acquire, |prev| (prev != 0).then(|| prev + 1))
        {
            Ok(prev) => Count::Global(prev + 1),
            Err(_) => Count::Global(0),
        }
    }

    #[inline]
    fn decrement(&self) -> Count {
        let prev = self.strong.fetch_sub(1, Release);
        if prev == 1 {
            fence(Acquire);
        }
        Count::Global(prev - 1)
    }

    #[inline]
    fn load(&self) -> Count {
        Count::Global(self.get())
    }

    fn promote_to_global(&self) {}
}
