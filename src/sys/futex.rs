//! Futex wait/wake on a 32-bit word in shared memory.
//!
//! The serial words the store blocks on live in file-backed mappings
//! shared across processes, so the futex calls must NOT use the
//! process-private flag. On non-Linux targets a polling fallback keeps
//! the crate testable; it only observes the word, so the caller's
//! recheck loop still provides the real guarantee.

use std::sync::atomic::AtomicU32;
use std::time::Duration;

/// Block until `word` changes away from `expected`, the relative
/// `timeout` expires, or a wake (possibly spurious) arrives.
///
/// Returns `false` only on timeout. A `true` return does not guarantee
/// the word changed; callers reload it and loop.
#[cfg(target_os = "linux")]
pub(crate) fn futex_wait(word: &AtomicU32, expected: u32, timeout: Option<Duration>) -> bool {
    let ts = timeout.map(|t| libc::timespec {
        tv_sec: t.as_secs() as libc::time_t,
        tv_nsec: t.subsec_nanos() as libc::c_long,
    });
    let ts_ptr = ts
        .as_ref()
        .map_or(std::ptr::null(), |ts| ts as *const libc::timespec);

    let rc = unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            libc::FUTEX_WAIT,
            expected,
            ts_ptr,
            0usize,
            0usize,
        )
    };
    if rc == -1 {
        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        if errno == libc::ETIMEDOUT {
            return false;
        }
    }
    true
}

/// Wake every waiter blocked on `word`.
#[cfg(target_os = "linux")]
pub(crate) fn futex_wake_all(word: &AtomicU32) {
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            libc::FUTEX_WAKE,
            i32::MAX,
            0usize,
            0usize,
            0usize,
        );
    }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn futex_wait(word: &AtomicU32, expected: u32, timeout: Option<Duration>) -> bool {
    use std::sync::atomic::Ordering;
    use std::time::Instant;

    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        if word.load(Ordering::Relaxed) != expected {
            return true;
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return false;
            }
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn futex_wake_all(_word: &AtomicU32) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_wait_times_out() {
        let word = AtomicU32::new(7);
        let woke = futex_wait(&word, 7, Some(Duration::from_millis(20)));
        assert!(!woke);
    }

    #[test]
    fn test_wait_returns_on_changed_word() {
        // The kernel refuses to sleep when the word no longer matches.
        let word = AtomicU32::new(7);
        word.store(8, Ordering::Relaxed);
        assert!(futex_wait(&word, 7, Some(Duration::from_secs(5))));
    }

    #[test]
    fn test_wake_releases_waiter() {
        let word = Arc::new(AtomicU32::new(0));
        let waiter = {
            let word = Arc::clone(&word);
            thread::spawn(move || {
                while word.load(Ordering::Acquire) == 0 {
                    futex_wait(&word, 0, Some(Duration::from_secs(5)));
                }
                word.load(Ordering::Acquire)
            })
        };
        thread::sleep(Duration::from_millis(10));
        word.store(3, Ordering::Release);
        futex_wake_all(&word);
        assert_eq!(waiter.join().unwrap(), 3);
    }
}
