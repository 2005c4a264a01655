//! [`lock_api`]-based lock types backed by `parking_lot`'s raw locks.

use lock_api::Mutex;

pub use parking_lot::RawMutex;
pub use std::sync::LazyLock;

pub type RmMutex<T> = Mutex<RawMutex, T>;
