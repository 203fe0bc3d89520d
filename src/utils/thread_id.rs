//! Platform-native thread identifiers.
//!
//! Returns the kernel's thread id rather than a hash of
//! [`std::thread::ThreadId`], so the value can be correlated with debuggers
//! and system tooling. The mechanism is selected at build time.

/// Returns the identifier of the calling thread as the kernel knows it.
#[cfg(target_os = "linux")]
#[must_use]
pub fn get_thread_id() -> u64 {
    // SAFETY: gettid takes no arguments and cannot fail.
    unsafe { libc::syscall(libc::SYS_gettid) as u64 }
}

/// Returns the identifier of the calling thread as the kernel knows it.
#[cfg(windows)]
#[must_use]
pub fn get_thread_id() -> u64 {
    #[link(name = "kernel32")]
    extern "system" {
        fn GetCurrentThreadId() -> u32;
    }
    // SAFETY: GetCurrentThreadId takes no arguments and cannot fail.
    u64::from(unsafe { GetCurrentThreadId() })
}

/// Returns a stable identifier of the calling thread.
///
/// On platforms without a dedicated query this falls back to the address of
/// a thread-local, which is unique among live threads.
#[cfg(not(any(target_os = "linux", windows)))]
#[must_use]
pub fn get_thread_id() -> u64 {
    thread_local! {
        static MARKER: u8 = const { 0 };
    }
    MARKER.with(|m| std::ptr::from_ref(m) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_within_thread() {
        assert_eq!(get_thread_id(), get_thread_id());
    }

    #[test]
    fn test_distinct_across_threads() {
        let own = get_thread_id();
        let other = std::thread::spawn(get_thread_id).join().unwrap();
        assert_ne!(own, other);
    }
}
