use core::cell::UnsafeCell;
use core::mem::ManuallyDrop;
use core::ptr::NonNull;
use readmostly_common::RefCounter;

/// The allocation shared by every pointer to one value.
///
/// `strong` counts the main pointer and every shared pointer; the value is
/// dropped when it reaches zero. `weak` counts the weak pointers plus one for
/// all strong references together; the block is freed when it reaches zero.
pub(crate) struct Block<T, C> {
    pub(crate) strong: C,
    pub(crate) weak: C,
    value: UnsafeCell<ManuallyDrop<T>>,
}

// SAFETY: the value is only handed out as `&T` and dropped once, by the
// thread that takes the strong count to zero.
unsafe impl<T: Send + Sync, C: RefCounter> Send for Block<T, C> {}
unsafe impl<T: Send + Sync, C: RefCounter> Sync for Block<T, C> {}

impl<T, C: RefCounter> Block<T, C> {
    pub(crate) fn allocate(value: T) -> NonNull<Self> {
        let block = Box::new(Block {
            strong: C::new(),
            weak: C::new(),
            value: UnsafeCell::new(ManuallyDrop::new(value)),
        });
        NonNull::from(Box::leak(block))
    }

    /// # Safety
    ///
    /// The caller must hold a strong reference.
    #[inline]
    pub(crate) unsafe fn value(&self) -> &T {
        // SAFETY: a strong reference keeps the value from being dropped.
        unsafe { &*self.value.get() }
    }

    /// Make both counts authoritative so that reaching zero is observable.
    pub(crate) fn promote(&self) {
        self.strong.promote_to_global();
        self.weak.promote_to_global();
    }

    /// Give up one strong reference, dropping the value if it was the last.
    ///
    /// # Safety
    ///
    /// `this` must point to a live block and the caller must own the strong
    /// reference being released. The block may be freed by this call.
    pub(crate) unsafe fn release_strong(this: NonNull<Self>) {
        // SAFETY: the caller's strong reference keeps the block alive.
        let block = unsafe { this.as_ref() };
        if !block.strong.decrement().is_zero() {
            return;
        }
        log::trace!("last strong reference released");
        // SAFETY: the strong count reached zero in the global phase, so no
        // other reference to the value exists and none can be created.
        unsafe { ManuallyDrop::drop(&mut *block.value.get()) };
        // SAFETY: the strong references' shared weak reference is released.
        unsafe { Self::release_weak(this) };
    }

    /// Give up one weak reference, freeing the block if it was the last.
    ///
    /// # Safety
    ///
    /// `this` must point to a live block and the caller must own the weak
    /// reference being released.
    pub(crate) unsafe fn release_weak(this: NonNull<Self>) {
        // SAFETY: the caller's weak reference keeps the block alive.
        let block = unsafe { this.as_ref() };
        if block.weak.decrement().is_zero() {
            // SAFETY: allocated by `allocate`; nothing refers to it any more.
            drop(unsafe { Box::from_raw(this.as_ptr()) });
        }
    }
}
