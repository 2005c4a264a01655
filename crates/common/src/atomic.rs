use core::marker::PhantomData;
use core::ptr;
pub use core::sync::atomic::*;
pub use radium::Radium;

mod sealed {
    pub trait Sealed {}
}
pub trait RmAtomicScalar: sealed::Sealed {
    type Radium: Radium<Item = Self>;
}

pub type RmAtomic<T> = <T as RmAtomicScalar>::Radium;

macro_rules! impl_atomic_scalar {
    ($(($i:ty, $atomic:ty),)*) => {
        $(
            impl sealed::Sealed for $i {}
            impl RmAtomicScalar for $i {
                type Radium = $atomic;
            }
        )*
    };
}
impl_atomic_scalar!((u8, AtomicU8), (i64, AtomicI64),);

/// Optional function pointers, which fit in a single pointer-sized word.
pub trait FnPtr: Copy + sealed::Sealed {}

impl<Ret> sealed::Sealed for Option<fn() -> Ret> {}
impl<Ret> FnPtr for Option<fn() -> Ret> {}

/// An atomic slot holding an optional function pointer.
///
/// `None` is stored as the null pointer, so a fresh slot reads back as `None`.
/// Unlike [`RmAtomic`] this can be built in a `static`.
pub struct AtomicFn<T: FnPtr> {
    inner: AtomicPtr<()>,
    _marker: PhantomData<T>,
}

impl<Ret> AtomicFn<Option<fn() -> Ret>> {
    pub const fn none() -> Self {
        Self {
            inner: AtomicPtr::new(ptr::null_mut()),
            _marker: PhantomData,
        }
    }
}

impl<T: FnPtr> AtomicFn<T> {
    pub fn load(&self, order: Ordering) -> T {
        const { assert!(size_of::<T>() == size_of::<*mut ()>()) };
        let f = self.inner.load(order);
        // SAFETY: the slot only ever holds values written by `store` as a `T`,
        // or null, which is `None`.
        unsafe { core::mem::transmute_copy::<*mut (), T>(&f) }
    }

    pub fn store(&self, f: T, order: Ordering) {
        const { assert!(size_of::<T>() == size_of::<*mut ()>()) };
        // SAFETY: `Option<fn>` is pointer-sized, checked above.
        let raw = unsafe { core::mem::transmute_copy::<T, *mut ()>(&f) };
        self.inner.store(raw, order);
    }
}
