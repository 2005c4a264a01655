//! Shared ownership for values that are read far more often than they are
//! replaced.
//!
//! A [`MainPtr`] owns the value. Readers keep [`WeakPtr`]s and call
//! [`WeakPtr::lock`] whenever they need the value, getting a [`SharedPtr`]
//! that keeps it alive for as long as they hold it. With the default
//! [`TlRefCount`] those lock/release pairs only touch thread-local state
//! until the main pointer is reset.
//!
//! ```
//! use readmostly_ptr::MainPtr;
//!
//! let main = MainPtr::<_>::new(String::from("config"));
//! let weak = main.downgrade();
//! assert_eq!(weak.lock().as_deref().map(String::as_str), Some("config"));
//! drop(main);
//! assert!(weak.lock().is_none());
//! ```

mod block;

use block::Block;
use core::fmt;
use core::ops::Deref;
use core::ptr::NonNull;
use readmostly_common::{Count, RefCounter, TlRefCount};

/// The owning pointer. Resetting or dropping it releases the owner's
/// reference; the value lives on while [`SharedPtr`]s to it remain.
pub struct MainPtr<T, C: RefCounter = TlRefCount> {
    block: Option<NonNull<Block<T, C>>>,
}

/// A non-owning observer of a [`MainPtr`]'s value.
pub struct WeakPtr<T, C: RefCounter = TlRefCount> {
    block: Option<NonNull<Block<T, C>>>,
}

/// A strong reference obtained from [`WeakPtr::lock`] or [`MainPtr::share`].
pub struct SharedPtr<T, C: RefCounter = TlRefCount> {
    block: NonNull<Block<T, C>>,
}

// SAFETY: all three only reach the block through its thread-safe counts and
// hand out `&T`, like `Arc<T>`.
unsafe impl<T: Send + Sync, C: RefCounter> Send for MainPtr<T, C> {}
unsafe impl<T: Send + Sync, C: RefCounter> Sync for MainPtr<T, C> {}
unsafe impl<T: Send + Sync, C: RefCounter> Send for WeakPtr<T, C> {}
unsafe impl<T: Send + Sync, C: RefCounter> Sync for WeakPtr<T, C> {}
unsafe impl<T: Send + Sync, C: RefCounter> Send for SharedPtr<T, C> {}
unsafe impl<T: Send + Sync, C: RefCounter> Sync for SharedPtr<T, C> {}

impl<T, C: RefCounter> MainPtr<T, C> {
    pub fn new(value: T) -> Self {
        MainPtr {
            block: Some(Block::allocate(value)),
        }
    }

    /// A main pointer that owns nothing.
    pub fn empty() -> Self {
        MainPtr { block: None }
    }

    #[inline]
    fn block(&self) -> Option<&Block<T, C>> {
        // SAFETY: the main pointer's strong reference keeps the block alive.
        self.block.map(|block| unsafe { &*block.as_ptr() })
    }

    pub fn get(&self) -> Option<&T> {
        // SAFETY: we hold a strong reference.
        self.block().map(|block| unsafe { block.value() })
    }

    pub fn is_empty(&self) -> bool {
        self.block.is_none()
    }

    pub fn downgrade(&self) -> WeakPtr<T, C> {
        if let Some(block) = self.block() {
            block.weak.increment();
        }
        WeakPtr { block: self.block }
    }

    /// A new strong reference, or `None` for an empty main pointer.
    pub fn share(&self) -> Option<SharedPtr<T, C>> {
        let block = self.block?;
        // SAFETY: the main pointer's strong reference keeps the block alive.
        let count = unsafe { block.as_ref() }.strong.increment();
        debug_assert!(count.is_alive());
        Some(SharedPtr { block })
    }

    /// The strong count, for diagnostics. `None` when empty.
    pub fn use_count(&self) -> Option<Count> {
        self.block().map(|block| block.strong.load())
    }

    /// Release the owner's reference and leave this pointer empty.
    ///
    /// Both counts are promoted first, so from here on the last release of
    /// either one is detected.
    pub fn reset(&mut self) {
        let Some(block) = self.block.take() else {
            return;
        };
        // SAFETY: we still hold the strong reference.
        unsafe { block.as_ref() }.promote();
        // SAFETY: ours to release.
        unsafe { Block::release_strong(block) };
    }

    /// Replace the value with a new one.
    pub fn replace(&mut self, value: T) {
        self.reset();
        self.block = Some(Block::allocate(value));
    }
}

impl<T, C: RefCounter> Drop for MainPtr<T, C> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T, C: RefCounter> Default for MainPtr<T, C> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: fmt::Debug, C: RefCounter> fmt::Debug for MainPtr<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MainPtr").field(&self.get()).finish()
    }
}

impl<T, C: RefCounter> WeakPtr<T, C> {
    /// A weak pointer that never locks.
    pub fn new() -> Self {
        WeakPtr { block: None }
    }

    /// Try to take a strong reference. Fails once the value is gone.
    #[inline]
    pub fn lock(&self) -> Option<SharedPtr<T, C>> {
        let block = self.block?;
        // SAFETY: our weak reference keeps the block alive.
        if !unsafe { block.as_ref() }.strong.increment().is_alive() {
            return None;
        }
        Some(SharedPtr { block })
    }
}

impl<T, C: RefCounter> Default for WeakPtr<T, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, C: RefCounter> Clone for WeakPtr<T, C> {
    fn clone(&self) -> Self {
        if let Some(block) = self.block {
            // SAFETY: our weak reference keeps the block alive.
            unsafe { block.as_ref() }.weak.increment();
        }
        WeakPtr { block: self.block }
    }
}

impl<T, C: RefCounter> Drop for WeakPtr<T, C> {
    fn drop(&mut self) {
        if let Some(block) = self.block {
            // SAFETY: ours to release.
            unsafe { Block::release_weak(block) };
        }
    }
}

impl<T, C: RefCounter> fmt::Debug for WeakPtr<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(WeakPtr)")
    }
}

impl<T, C: RefCounter> SharedPtr<T, C> {
    pub fn downgrade(this: &Self) -> WeakPtr<T, C> {
        // SAFETY: our strong reference keeps the block alive.
        unsafe { this.block.as_ref() }.weak.increment();
        WeakPtr {
            block: Some(this.block),
        }
    }
}

impl<T, C: RefCounter> Deref for SharedPtr<T, C> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: we hold a strong reference.
        unsafe { self.block.as_ref().value() }
    }
}

impl<T, C: RefCounter> Clone for SharedPtr<T, C> {
    fn clone(&self) -> Self {
        // SAFETY: our strong reference keeps the block alive.
        let count = unsafe { self.block.as_ref() }.strong.increment();
        debug_assert!(count.is_alive());
        SharedPtr { block: self.block }
    }
}

impl<T, C: RefCounter> Drop for SharedPtr<T, C> {
    #[inline]
    fn drop(&mut self) {
        // SAFETY: ours to release.
        unsafe { Block::release_strong(self.block) };
    }
}

impl<T: fmt::Debug, C: RefCounter> fmt::Debug for SharedPtr<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}
