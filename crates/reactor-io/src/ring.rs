//! `UringPump` — the submission pump and completion pump, sharing the one
//! io_uring ring a reactor owns.
//!
//! Grounded on `ksvc-module::basic_iouring::BasicIoUring`: one struct wraps
//! `io_uring::IoUring` and exposes a small, closed set of submit methods
//! plus `flush`/`poll_completions`. The difference from the upstream
//! `IoBackend` trait is that this reactor has exactly one backend and one
//! fixed opcode set, so there is no router/tier indirection — the
//! submission pump methods below *are* the translation layer.

use std::os::unix::io::{AsRawFd, RawFd};

use io_uring::{opcode, types, IoUring};

use reactor_core::{ChannelId, ReactorError, Result};

use crate::opcode::{self as tag, Opcode};

/// Configuration for the io_uring ring.
#[derive(Debug, Clone, Copy)]
pub struct RingConfig {
    /// Number of SQ entries. Must be a power of two.
    pub sq_entries: u32,
    /// Kernel hint for async submission: a READ/WRITEV whose buffer is at
    /// least this many bytes is submitted with `IOSQE_ASYNC` so the kernel
    /// hands it to a worker thread up front instead of trying non-blocking
    /// inline completion first. `0` disables the hint entirely.
    pub iosqe_async_threshold: u32,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            sq_entries: 4096,
            iosqe_async_threshold: 0,
        }
    }
}

/// One completion entry, decoded. `op` is `None` for an unrecognized
/// tag — the dispatcher logs and drops those.
#[derive(Debug, Clone, Copy)]
pub struct Completion {
    pub op: Option<Opcode>,
    pub channel: ChannelId,
    pub result: i64,
}

impl Default for Completion {
    fn default() -> Self {
        Self {
            op: None,
            channel: ChannelId::NONE,
            result: 0,
        }
    }
}

/// The submission pump + completion pump over one io_uring ring.
pub struct UringPump {
    ring: IoUring,
    pending_submit: u32,
    iosqe_async_threshold: u32,
}

impl UringPump {
    pub fn new(config: &RingConfig) -> Result<Self> {
        let ring = IoUring::builder()
            .build(config.sq_entries)
            .map_err(|e| ReactorError::IoUringSetup(e.raw_os_error().unwrap_or(-1)))?;
        Ok(Self {
            ring,
            pending_submit: 0,
            iosqe_async_threshold: config.iosqe_async_threshold,
        })
    }

    /// Whether `len` bytes of I/O should carry the `IOSQE_ASYNC` hint —
    /// `false` when the threshold is `0` (disabled).
    fn wants_async(&self, len: u32) -> bool {
        self.iosqe_async_threshold != 0 && len >= self.iosqe_async_threshold
    }

    pub fn fd(&self) -> RawFd {
        self.ring.as_raw_fd()
    }

    // ───────────────────────── submission pump ─────────────────────────

    /// Arm one ACCEPT on `listener_fd`. `addr`/`addr_len` back a
    /// `sockaddr_storage` the kernel fills in on completion.
    ///
    /// # Safety
    /// `addr` and `addr_len` must stay valid until the completion for this
    /// SQE is observed.
    pub unsafe fn submit_accept(
        &mut self,
        listener_fd: RawFd,
        addr: *mut libc::sockaddr,
        addr_len: *mut libc::socklen_t,
    ) -> Result<()> {
        let sqe = opcode::Accept::new(types::Fd(listener_fd), addr, addr_len)
            .flags(libc::SOCK_CLOEXEC)
            .build()
            .user_data(tag::encode(Opcode::Accept, ChannelId::NONE));
        self.push(sqe)
    }

    /// Arm one READ for `channel` at `buf[..len]`.
    ///
    /// # Safety
    /// `buf` must point to at least `len` writable bytes that stay valid
    /// until the completion is observed.
    pub unsafe fn submit_read(
        &mut self,
        channel: ChannelId,
        fd: RawFd,
        buf: *mut u8,
        len: u32,
    ) -> Result<()> {
        let mut sqe = opcode::Read::new(types::Fd(fd), buf, len)
            .offset(u64::MAX)
            .build()
            .user_data(tag::encode(Opcode::Read, channel));
        if self.wants_async(len) {
            sqe = sqe.flags(io_uring::squeue::Flags::ASYNC);
        }
        self.push(sqe)
    }

    /// Arm one WRITEV for `channel` over `iov[..iovcnt]`, covering
    /// `total_bytes` in total — used only to decide the `IOSQE_ASYNC` hint.
    ///
    /// # Safety
    /// `iov` must point to `iovcnt` valid `iovec`s whose `iov_base`/`iov_len`
    /// regions stay valid (and unmoved) until the completion is observed.
    pub unsafe fn submit_writev(
        &mut self,
        channel: ChannelId,
        fd: RawFd,
        iov: *const libc::iovec,
        iovcnt: u32,
        total_bytes: u64,
    ) -> Result<()> {
        let mut sqe = opcode::Writev::new(types::Fd(fd), iov, iovcnt)
            .offset(u64::MAX)
            .build()
            .user_data(tag::encode(Opcode::Writev, channel));
        if total_bytes <= u64::from(u32::MAX) && self.wants_async(total_bytes as u32) {
            sqe = sqe.flags(io_uring::squeue::Flags::ASYNC);
        }
        self.push(sqe)
    }

    /// Arm the single standing EVENTFD_READ. `buf` must be an 8-byte
    /// scratch buffer dedicated to this read.
    ///
    /// # Safety
    /// `buf` must point to 8 valid, writable bytes that stay valid until the
    /// completion is observed.
    pub unsafe fn submit_eventfd_read(&mut self, eventfd_fd: RawFd, buf: *mut u8) -> Result<()> {
        let sqe = opcode::Read::new(types::Fd(eventfd_fd), buf, 8)
            .offset(u64::MAX)
            .build()
            .user_data(tag::encode(Opcode::EventFdRead, ChannelId::NONE));
        self.push(sqe)
    }

    unsafe fn push(&mut self, sqe: io_uring::squeue::Entry) -> Result<()> {
        self.ring
            .submission()
            .push(&sqe)
            .map_err(|_| ReactorError::RingFull)?;
        self.pending_submit += 1;
        Ok(())
    }

    /// Kick queued SQEs to the kernel without blocking.
    pub fn flush(&mut self) -> Result<usize> {
        if self.pending_submit == 0 {
            return Ok(0);
        }
        let n = self
            .ring
            .submit()
            .map_err(|e| ReactorError::IoUringSubmit(e.raw_os_error().unwrap_or(-1)))?;
        self.pending_submit = 0;
        Ok(n)
    }

    /// Kick queued SQEs and block until at least `want` completions are
    /// available — the reactor's submit-and-wait point.
    pub fn flush_and_wait(&mut self, want: usize) -> Result<usize> {
        let n = self
            .ring
            .submit_and_wait(want)
            .map_err(|e| ReactorError::IoUringSubmit(e.raw_os_error().unwrap_or(-1)))?;
        self.pending_submit = 0;
        Ok(n)
    }

    // ───────────────────────── completion pump ─────────────────────────

    /// Drain up to `out.len()` completions, decoding each `user_data` back
    /// into an opcode + channel id. Never blocks.
    pub fn poll_completions(&mut self, out: &mut [Completion]) -> usize {
        let mut count = 0;
        for cqe in self.ring.completion() {
            if count >= out.len() {
                break;
            }
            let (op, channel) = match tag::decode(cqe.user_data()) {
                Some((op, ch)) => (Some(op), ch),
                None => (None, ChannelId::NONE),
            };
            out[count] = Completion {
                op,
                channel,
                result: cqe.result() as i64,
            };
            count += 1;
        }
        count
    }

    /// Whether the completion queue currently has anything ready, without
    /// draining it — used by the event loop to decide whether to block.
    pub fn has_completions(&mut self) -> bool {
        !self.ring.completion().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_builds_with_default_config() {
        // io_uring may be unavailable in a restricted CI sandbox; skip
        // quietly rather than fail the suite on an environment gap.
        match UringPump::new(&RingConfig {
            sq_entries: 32,
            iosqe_async_threshold: 0,
        }) {
            Ok(pump) => assert!(pump.fd() >= 0),
            Err(ReactorError::IoUringSetup(_)) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    #[test]
    fn wants_async_is_disabled_by_a_zero_threshold() {
        let pump = match UringPump::new(&RingConfig {
            sq_entries: 32,
            iosqe_async_threshold: 0,
        }) {
            Ok(pump) => pump,
            Err(ReactorError::IoUringSetup(_)) => return,
            Err(e) => panic!("unexpected error: {}", e),
        };
        assert!(!pump.wants_async(u32::MAX));
    }

    #[test]
    fn wants_async_triggers_at_the_configured_threshold() {
        let pump = match UringPump::new(&RingConfig {
            sq_entries: 32,
            iosqe_async_threshold: 4096,
        }) {
            Ok(pump) => pump,
            Err(ReactorError::IoUringSetup(_)) => return,
            Err(e) => panic!("unexpected error: {}", e),
        };
        assert!(!pump.wants_async(4095));
        assert!(pump.wants_async(4096));
        assert!(pump.wants_async(8192));
    }
}
