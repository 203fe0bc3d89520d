//! Small utilities shared across the crate.

mod thread_id;

pub use thread_id::get_thread_id;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Acquires a mutex, recovering the guard if a previous holder panicked.
///
/// Poisoning is not meaningful for the structures guarded here: every
/// invariant they protect is re-established before the guard is dropped, so
/// a panic mid-edit leaves at worst a partially optimized routine.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_recovers_from_poison() {
        let m = std::sync::Arc::new(Mutex::new(1u32));
        let m2 = std::sync::Arc::clone(&m);
        let _ = std::thread::spawn(move || {
            let _g = m2.lock().unwrap();
            panic!("poison");
        })
        .join();
        assert_eq!(*lock(&m), 1);
    }
}
