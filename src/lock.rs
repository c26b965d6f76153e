//! Poison recovery for shared reporter buffers so a panicking writer never hides captured output.

use std::sync::{Mutex, MutexGuard};

pub(crate) fn lock_or_recover<'a, T>(lock: &'a Mutex<T>, context: &str) -> MutexGuard<'a, T> {
    lock.lock().unwrap_or_else(|poisoned| {
        tracing::warn!(context, "mutex poisoned; recovering inner value");
        poisoned.into_inner()
    })
}
