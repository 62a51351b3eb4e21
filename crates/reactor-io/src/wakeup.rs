//! Cross-thread wakeup via eventfd.
//!
//! Grounded on `ksvc-module::eventfd_notifier::EventFdNotifier`: an owned
//! eventfd plus a CAS-guarded "needs a write" flag so producers on other
//! reactors only pay the `write(2)` syscall when this reactor is actually
//! blocked in `io_uring_enter`, and never miss a wakeup racing against the
//! reactor arming its next wait.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::thread::{self, ThreadId};

use reactor_core::ReactorError;

/// One reactor's wakeup eventfd plus the flag that gates writes to it.
///
/// Protocol:
/// - before blocking in the ring, the reactor calls [`Wakeup::arm`], which
///   sets `needed` to `true`;
/// - a producer on another thread calls [`Wakeup::signal`], which flips
///   `needed` to `false` with a CAS and writes to the eventfd only if the
///   flag was `true` — so a burst of producers collapses to at most one
///   `write(2)` per armed wait;
/// - the reactor's own EVENTFD_READ completion clears nothing extra; the
///   next call to `arm` re-establishes the flag for the following wait.
///
/// `signal` is always a no-op in `spin` mode, since the owning reactor
/// never blocks in the ring, and it's also a no-op when called from the
/// owning reactor thread itself, since a thread can't be blocked waiting
/// on its own wakeup.
pub struct Wakeup {
    fd: RawFd,
    needed: AtomicBool,
    spin: bool,
    owner: OnceLock<ThreadId>,
}

impl Wakeup {
    /// Create a new non-semaphore eventfd (`EFD_NONBLOCK | EFD_CLOEXEC`).
    /// `spin` disables signaling entirely. The owning thread isn't known
    /// yet at construction time — a reactor is built before its thread is
    /// spawned — so it's bound separately via [`Wakeup::bind_owner`].
    pub fn create(spin: bool) -> Result<Self, ReactorError> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(ReactorError::Os(unsafe { *libc::__errno_location() }));
        }
        Ok(Self {
            fd,
            needed: AtomicBool::new(false),
            spin,
            owner: OnceLock::new(),
        })
    }

    /// Record the calling thread as this wakeup's owner — call once, from
    /// the reactor thread, before entering the event loop.
    pub fn bind_owner(&self) {
        let _ = self.owner.set(thread::current().id());
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Mark this reactor as about to block — call immediately before
    /// submitting the blocking wait.
    pub fn arm(&self) {
        self.needed.store(true, Ordering::Release);
    }

    /// Clear the armed flag without signaling — call after a completion
    /// wakes the reactor through any path other than this eventfd, so a
    /// stale flag doesn't cause a redundant write from some other thread.
    pub fn disarm(&self) {
        self.needed.store(false, Ordering::Release);
    }

    /// Called by a producer thread that just handed this reactor work.
    /// Writes to the eventfd only if the reactor is currently armed,
    /// collapsing concurrent signals into a single syscall. A no-op in
    /// `spin` mode or when called from the owning reactor thread.
    pub fn signal(&self) -> Result<(), ReactorError> {
        if self.spin || self.owner.get() == Some(&thread::current().id()) {
            return Ok(());
        }
        if self
            .needed
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let one: u64 = 1;
            let ret = unsafe {
                libc::write(
                    self.fd,
                    &one as *const u64 as *const libc::c_void,
                    std::mem::size_of::<u64>(),
                )
            };
            if ret < 0 {
                let errno = unsafe { *libc::__errno_location() };
                if errno != libc::EAGAIN {
                    return Err(ReactorError::Os(errno));
                }
            }
        }
        Ok(())
    }
}

impl Drop for Wakeup {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

unsafe impl Send for Wakeup {}
unsafe impl Sync for Wakeup {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn signal_is_a_noop_when_not_armed() {
        let w = Arc::new(Wakeup::create(false).unwrap());
        // Not armed: signal must not attempt a write that would surface an
        // error, and must leave the flag false.
        let other = Arc::clone(&w);
        std::thread::spawn(move || other.signal().unwrap()).join().unwrap();
        assert!(!w.needed.load(Ordering::Acquire));
    }

    #[test]
    fn arm_then_signal_from_another_thread_clears_the_flag() {
        let w = Arc::new(Wakeup::create(false).unwrap());
        w.arm();
        assert!(w.needed.load(Ordering::Acquire));
        let other = Arc::clone(&w);
        std::thread::spawn(move || other.signal().unwrap()).join().unwrap();
        assert!(!w.needed.load(Ordering::Acquire));
    }

    #[test]
    fn signal_from_the_owning_thread_is_a_noop() {
        let w = Wakeup::create(false).unwrap();
        w.bind_owner();
        w.arm();
        w.signal().unwrap();
        assert!(w.needed.load(Ordering::Acquire));
    }

    #[test]
    fn signal_in_spin_mode_is_always_a_noop() {
        let w = Arc::new(Wakeup::create(true).unwrap());
        w.arm();
        let other = Arc::clone(&w);
        std::thread::spawn(move || other.signal().unwrap()).join().unwrap();
        assert!(w.needed.load(Ordering::Acquire));
    }

    #[test]
    fn concurrent_signals_collapse_to_the_flag_state() {
        let w = Arc::new(Wakeup::create(false).unwrap());
        w.arm();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let w = Arc::clone(&w);
            handles.push(std::thread::spawn(move || w.signal().unwrap()));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(!w.needed.load(Ordering::Acquire));
    }
}
