//! Per-thread cells of a [`TlRefCount`](crate::tl_refcount::TlRefCount).
//!
//! Each thread keeps its own list of the cells it has created, so finding a
//! cell on the hot path never takes a lock. The list is torn down with the
//! thread, folding every cell it still holds.

use crate::atomic::{Ordering::*, Radium, RmAtomic};
use crate::lock::RmMutex;
use crate::tl_refcount::{Phase, Shared};
use crossbeam_utils::CachePadded;
use std::cell::RefCell;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

pub(crate) type CellRef = Arc<CachePadded<LocalCount>>;

#[derive(Default)]
struct Collect {
    done: bool,
    value: i64,
}

/// One thread's share of a counter.
pub(crate) struct LocalCount {
    // Only the owning thread stores here; other threads read it in `fold`.
    delta: RmAtomic<i64>,
    thread: ThreadId,
    shared: Weak<Shared>,
    collect: RmMutex<Collect>,
}

impl LocalCount {
    fn new(shared: &Arc<Shared>) -> Self {
        LocalCount {
            delta: Radium::new(0),
            thread: thread::current().id(),
            shared: Arc::downgrade(shared),
            collect: RmMutex::new(Collect::default()),
        }
    }

    /// Apply `amount` to this thread's delta.
    ///
    /// Returns `false` when the update is not covered by the local count and
    /// must be applied to the global total instead.
    #[inline]
    pub(crate) fn bump(&self, shared: &Shared, amount: i64) -> bool {
        if shared.phase() != Phase::Local {
            return false;
        }

        let count = self.delta.load(Relaxed) + amount;
        // This store and the phase reload below are a store-load pair; both
        // must be SeqCst so that a promoter which flips the phase after our
        // reload is guaranteed to read `count` in its fold.
        self.delta.store(count, SeqCst);

        if shared.phase() != Phase::Local {
            let collect = self.collect.lock();
            if !collect.done {
                // the fold has not run yet and will see `count`
                return true;
            }
            if collect.value != count {
                return false;
            }
        }

        true
    }

    /// Add the delta to `shared`'s total, once.
    pub(crate) fn fold_into(&self, shared: &Shared) {
        let mut collect = self.collect.lock();
        if collect.done {
            return;
        }
        collect.value = self.delta.load(SeqCst);
        shared.global.fetch_add(collect.value, SeqCst);
        collect.done = true;
        log::trace!("folded {} from {:?}", collect.value, self.thread);
    }

    /// Fold through the back-reference and drop out of the counter's
    /// registry. Nothing happens if the counter is gone.
    pub(crate) fn retire(&self) {
        if let Some(shared) = self.shared.upgrade() {
            self.fold_into(&shared);
            shared.cells.lock().remove(&self.thread);
        }
    }

    #[inline]
    fn is_attached(&self) -> bool {
        self.shared.strong_count() > 0
    }

    #[cfg(test)]
    pub(crate) fn is_folded(&self) -> bool {
        self.collect.lock().done
    }
}

/// The calling thread's cells, tagged with the id of their counter.
#[derive(Default)]
struct ThreadCells {
    cells: Vec<(u64, CellRef)>,
}

impl ThreadCells {
    #[inline]
    fn position(&self, id: u64) -> Option<usize> {
        // newest first; a thread usually works on the counter it met last
        self.cells.iter().rposition(|(cell_id, _)| *cell_id == id)
    }

    #[cold]
    fn register(&mut self, id: u64, shared: &Arc<Shared>) -> usize {
        self.cells.retain(|(_, cell)| cell.is_attached());

        let cell: CellRef = Arc::new(CachePadded::new(LocalCount::new(shared)));
        // Registry first: once the cell is visible there a promotion will fold
        // it, and one that already ran has moved the phase past Local.
        shared.cells.lock().insert(cell.thread, Arc::clone(&cell));
        log::trace!("registered cell for {:?}", cell.thread);

        self.cells.push((id, cell));
        self.cells.len() - 1
    }

    fn remove(&mut self, id: u64) -> Option<CellRef> {
        let pos = self.position(id)?;
        Some(self.cells.swap_remove(pos).1)
    }
}

impl Drop for ThreadCells {
    fn drop(&mut self) {
        for (_, cell) in self.cells.drain(..) {
            cell.retire();
        }
    }
}

thread_local! {
    static THREAD_CELLS: RefCell<ThreadCells> = RefCell::new(ThreadCells::default());
}

/// Run `f` with the calling thread's cell for counter `id`, creating it on
/// first use.
///
/// Returns `None` once the thread's local storage has been torn down.
#[inline]
pub(crate) fn with_cell<R>(
    id: u64,
    shared: &Arc<Shared>,
    f: impl FnOnce(&LocalCount) -> R,
) -> Option<R> {
    THREAD_CELLS
        .try_with(|cells| {
            let mut cells = cells.borrow_mut();
            let idx = match cells.position(id) {
                Some(idx) => idx,
                None => cells.register(id, shared),
            };
            f(&cells.cells[idx].1)
        })
        .ok()
}

/// Take the calling thread's cell for counter `id` out of its local list.
pub(crate) fn take_cell(id: u64) -> Option<CellRef> {
    THREAD_CELLS
        .try_with(|cells| cells.borrow_mut().remove(id))
        .ok()
        .flatten()
}
