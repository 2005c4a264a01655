//! A reference count that lives in per-thread cells until it is promoted.
//!
//! A fresh [`TlRefCount`] is in the [`Phase::Local`] phase: every thread that
//! touches it gets a private cell and increments or decrements only that
//! cell, without locks and without touching shared cache lines. Nothing can
//! tell whether the count reached zero in this phase, so the owner must keep
//! its own reference until it calls [`TlRefCount::promote_to_global`]. The
//! promotion folds every cell into one atomic total and from then on all
//! arithmetic happens on that total.
//!
//! Ordering edges the protocol relies on:
//!
//! - A cell's fold happens-before the promotion finishes: the promoter folds
//!   every registered cell under the cell's own lock before it stores
//!   [`Phase::Global`].
//! - The promotion finishes before any global arithmetic: an operation that
//!   sees [`Phase::Transitioning`] waits on the transition lock, which the
//!   promoter holds from before the phase leaves `Local` until after it is
//!   `Global`.
//! - A fast-path update is either seen by the fold or redone globally: the
//!   owning thread's delta store and its phase recheck are both `SeqCst`, as
//!   are the promoter's phase store and its read of the delta.

use crate::atomic::{AtomicU64, Ordering::*, Radium, RmAtomic};
use crate::local_count::{self, CellRef};
use crate::lock::RmMutex;
use crate::refcount::{Count, RefCounter};
use crate::stack_trace;
use core::fmt;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::ThreadId;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// The phase of a [`TlRefCount`]. Phases only ever advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Phase {
    Local = 0,
    Transitioning = 1,
    Global = 2,
}

impl Phase {
    #[inline]
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Phase::Local,
            1 => Phase::Transitioning,
            _ => Phase::Global,
        }
    }
}

/// State the per-thread cells need to reach. Cells only hold it weakly.
pub(crate) struct Shared {
    phase: RmAtomic<u8>,
    pub(crate) global: RmAtomic<i64>,
    pub(crate) cells: RmMutex<HashMap<ThreadId, CellRef>>,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Shared {
            phase: Radium::new(Phase::Local as u8),
            global: Radium::new(1),
            cells: RmMutex::new(HashMap::new()),
        }
    }

    #[inline]
    pub(crate) fn phase(&self) -> Phase {
        Phase::from_raw(self.phase.load(SeqCst))
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        debug_assert!(phase >= self.phase(), "phase cannot go back");
        self.phase.store(phase as u8, SeqCst);
    }
}

/// A hybrid thread-local / global reference count starting at one.
pub struct TlRefCount {
    id: u64,
    shared: Arc<Shared>,
    transition: RmMutex<()>,
}

impl Default for TlRefCount {
    fn default() -> Self {
        Self::new()
    }
}

impl TlRefCount {
    pub fn new() -> Self {
        TlRefCount {
            id: NEXT_ID.fetch_add(1, Relaxed),
            shared: Arc::new(Shared::new()),
            transition: RmMutex::new(()),
        }
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        self.shared.phase()
    }

    /// Take a reference.
    ///
    /// Once global, this never raises a count that reached zero and returns
    /// `Count::Global(0)` instead.
    #[inline]
    pub fn increment(&self) -> Count {
        if let Some(count) = self.bump_local(1) {
            return count;
        }

        self.wait_for_transition();

        match self
            .shared
            .global
            .fetch_update(SeqCst, SeqCst, |value| (value != 0).then(|| value + 1))
        {
            Ok(prev) => Count::Global(prev + 1),
            Err(_) => Count::Global(0),
        }
    }

    /// Release a reference. Always succeeds.
    #[inline]
    pub fn decrement(&self) -> Count {
        if let Some(count) = self.bump_local(-1) {
            return count;
        }

        self.wait_for_transition();

        Count::Global(self.shared.global.fetch_sub(1, SeqCst) - 1)
    }

    #[inline]
    pub fn load(&self) -> Count {
        if self.shared.phase() != Phase::Global {
            return Count::LocalPhaseUnspecified;
        }
        Count::Global(self.shared.global.load(SeqCst))
    }

    /// Fold every thread's cell into the global total and switch to the
    /// global phase.
    ///
    /// Meant to be called once. Later calls log a warning and do nothing.
    pub fn promote_to_global(&self) {
        let _guard = self.transition.lock();

        if self.shared.phase() != Phase::Local {
            log::warn!(
                "reference count {} promoted more than once\n{}",
                self.id,
                stack_trace::current()
            );
            return;
        }

        self.shared.set_phase(Phase::Transitioning);

        let folded = {
            let cells = self.shared.cells.lock();
            for cell in cells.values() {
                cell.fold_into(&self.shared);
            }
            cells.len()
        };

        self.shared.set_phase(Phase::Global);

        log::debug!(
            "reference count {} promoted: folded {} cells, total {}",
            self.id,
            folded,
            self.shared.global.load(SeqCst)
        );
    }

    /// Fold the calling thread's cell now and forget it.
    ///
    /// This is what thread exit does for every cell the thread holds. A later
    /// operation from the same thread starts a fresh cell.
    pub fn detach_current_thread(&self) {
        if let Some(cell) = local_count::take_cell(self.id) {
            cell.retire();
        }
    }

    #[inline]
    fn bump_local(&self, amount: i64) -> Option<Count> {
        if self.shared.phase() != Phase::Local {
            return None;
        }

        match local_count::with_cell(self.id, &self.shared, |cell| {
            cell.bump(&self.shared, amount)
        }) {
            Some(true) => Some(Count::LocalPhaseUnspecified),
            Some(false) => None,
            None => self.bump_unregistered(amount),
        }
    }

    /// Local-phase update from a thread whose local storage is gone.
    #[cold]
    fn bump_unregistered(&self, amount: i64) -> Option<Count> {
        // Holding the lock keeps a promotion out, so adding straight into the
        // total is the same as folding a one-shot cell.
        let _guard = self.transition.lock();
        if self.shared.phase() != Phase::Local {
            return None;
        }
        self.shared.global.fetch_add(amount, SeqCst);
        Some(Count::LocalPhaseUnspecified)
    }

    #[inline]
    fn wait_for_transition(&self) {
        if self.shared.phase() == Phase::Transitioning {
            // the promoter holds the lock until the phase is Global
            drop(self.transition.lock());
        }
        debug_assert_eq!(self.shared.phase(), Phase::Global);
    }

    #[cfg(test)]
    pub(crate) fn registered_cells(&self) -> usize {
        self.shared.cells.lock().len()
    }
}

impl Drop for TlRefCount {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        debug_assert_eq!(
            self.shared.phase(),
            Phase::Global,
            "reference count dropped before promotion"
        );
        debug_assert_eq!(
            self.shared.global.load(SeqCst),
            0,
            "reference count dropped while still referenced"
        );
    }
}

impl fmt::Debug for TlRefCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlRefCount")
            .field("id", &self.id)
            .field("phase", &self.phase())
            .field("count", &self.load())
            .finish()
    }
}

impl RefCounter for TlRefCount {
    fn new() -> Self {
        TlRefCount::new()
    }

    #[inline]
    fn increment(&self) -> Count {
        TlRefCount::increment(self)
    }

    #[inline]
    fn decrement(&self) -> Count {
        TlRefCount::decrement(self)
    }

    #[inline]
    fn load(&self) -> Count {
        TlRefCount::load(self)
    }

    fn promote_to_global(&self) {
        TlRefCount::promote_to_global(self)
    }
}
