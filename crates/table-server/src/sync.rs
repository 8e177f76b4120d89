//! Lock helpers.
//!
//! Every collection in the core sits behind its own `std::sync::Mutex`. A
//! panic while holding one of them must not cascade into every later caller,
//! so poisoning is cleared and the guard is handed back as-is: each critical
//! section leaves its collection structurally valid at every step.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Acquires `mutex`, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
