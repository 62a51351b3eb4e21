//! `Channel` — one connection's state machine: socket fd, inbound
//! reassembly, and the outbound frame queue a `WRITEV` drains.
//!
//! Grounded on `cmd/httpd/rust/ksvc::main::Conn`, generalized from HTTP
//! request/response state to the closed-protocol frame state a reactor
//! tracks. The per-connection slab itself lives in [`crate::registry`],
//! mirroring that file's `ConnSlab`.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_queue::SegQueue;

use reactor_core::{ChannelId, Frame, IoVector};

use crate::inbound::FrameAssembler;

/// Where a channel sits in its read/write lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Freshly accepted or connected; a READ has not yet been armed.
    Open,
    /// A READ is outstanding.
    Reading,
    /// Half-closed: no more reads will be armed, but queued writes still
    /// drain before the fd closes.
    Closing,
    /// Torn down; the slot is ready to be freed.
    Closed,
}

/// The cross-thread handle to a channel's outbound queue — what a
/// `ParallelFrameAllocator`-sourced response producer on another reactor
/// holds to deliver a frame onto a channel it does not own.
///
/// Pushing sets `queued`, which the owning reactor's [`crate::scheduler::Scheduler`]
/// uses to keep the channel from being enqueued onto the dirty set twice
/// while a flush is already pending.
pub struct OutboundHandle {
    queue: SegQueue<Frame>,
    queued: AtomicBool,
}

impl OutboundHandle {
    pub(crate) fn new() -> Self {
        Self {
            queue: SegQueue::new(),
            queued: AtomicBool::new(false),
        }
    }

    pub fn push(&self, frame: Frame) {
        self.queue.push(frame);
    }

    /// Claim this channel for the dirty set exactly once; returns `false`
    /// if it's already claimed (either still queued or being drained).
    pub(crate) fn try_mark_queued(&self) -> bool {
        self.queued
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn clear_queued(&self) {
        self.queued.store(false, Ordering::Release);
    }
}

pub struct Channel {
    pub id: ChannelId,
    pub fd: RawFd,
    pub peer_addr: Option<SocketAddr>,
    pub state: ChannelState,

    /// Scratch buffer a READ completion lands in before [`FrameAssembler`]
    /// walks it.
    pub recv_buf: Box<[u8]>,
    assembler: FrameAssembler,

    /// Frames reassembled and ready for the handler but not yet taken —
    /// only ever touched by the owning reactor thread.
    pub inbox: VecDeque<Frame>,
    /// Response-flagged frames reassembled but not yet chained and handed
    /// off — drained and linked into one batch per read, same as `inbox`.
    pub response_inbox: VecDeque<Frame>,

    /// Cross-thread outbound delivery point — lets a reactor other than
    /// the owner deliver a response onto this channel.
    pub outbound: Arc<OutboundHandle>,
    /// Frames moved off `outbound` onto this reactor thread, waiting to be
    /// staged into `iovec`.
    local_outbound: VecDeque<Frame>,
    /// The batch currently staged for the in-flight (or next) `WRITEV`.
    pub iovec: IoVector,
    /// True while a `WRITEV` SQE for this channel is outstanding — gates
    /// submitting an overlapping one.
    pub write_inflight: bool,
}

impl Channel {
    pub fn new(id: ChannelId, fd: RawFd, peer_addr: Option<SocketAddr>, recv_chunk: u32, max_frame_size: u32) -> Self {
        Self {
            id,
            fd,
            peer_addr,
            state: ChannelState::Open,
            recv_buf: vec![0u8; recv_chunk as usize].into_boxed_slice(),
            assembler: FrameAssembler::new(max_frame_size),
            inbox: VecDeque::new(),
            response_inbox: VecDeque::new(),
            outbound: Arc::new(OutboundHandle::new()),
            local_outbound: VecDeque::new(),
            iovec: IoVector::new(),
            write_inflight: false,
        }
    }

    /// Feed the first `len` bytes of `recv_buf` — just landed from a READ
    /// completion — into the frame reassembler. Destructuring the fields
    /// lets the borrow checker see `recv_buf`, `assembler`, `inbox`, and
    /// `response_inbox` as independent borrows instead of all going
    /// through `&mut self`.
    pub fn process_read(
        &mut self,
        len: usize,
        allocator: &mut reactor_core::FrameAllocator,
    ) -> reactor_core::Result<()> {
        let Channel {
            recv_buf,
            assembler,
            inbox,
            response_inbox,
            ..
        } = self;
        let mut requests = Vec::new();
        let mut responses = Vec::new();
        assembler.feed(&recv_buf[..len], allocator, &mut requests, &mut responses)?;
        inbox.extend(requests);
        response_inbox.extend(responses);
        Ok(())
    }

    /// Drain whatever other threads have pushed since the last tick into
    /// this thread's local queue, then top up the staged `IoVector` from
    /// it. Returns `true` if the vector has anything staged afterward.
    pub fn pump_outbound(&mut self) -> bool {
        while let Some(frame) = self.outbound.queue.pop() {
            self.local_outbound.push_back(frame);
        }
        self.iovec.fill(&mut self.local_outbound);
        !self.iovec.is_empty()
    }

    pub fn has_more_outbound_queued(&self) -> bool {
        !self.local_outbound.is_empty() || !self.outbound.queue.is_empty()
    }
}
