//! The reactor event loop — one per pinned core.
//!
//! Grounded on `cmd/httpd/rust/ksvc::main::worker_loop`: a listener socket,
//! one io_uring ring, and a tight loop of submit → flush_and_wait → poll
//! completions → dispatch, entirely single-threaded. The only addition
//! this reactor has over that example is a second inbound besides the
//! ring itself — the dirty-channel set other reactors can post into —
//! woken via the eventfd in [`reactor_io::wakeup::Wakeup`].

use std::collections::HashMap;
use std::mem;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use reactor_core::{ChannelId, Frame, FrameAllocator, ParallelFrameAllocator, ReactorError, Result};
use reactor_io::ring::{Completion, UringPump};
use reactor_io::{opcode::Opcode, socket, Wakeup};

use crate::channel::{Channel, ChannelState, OutboundHandle};
use crate::config::ReactorConfig;
use crate::registry::ChannelRegistry;
use crate::scheduler::Scheduler;
use crate::stats::Stats;

/// Callback surface a reactor drives as it reassembles inbound frames.
/// Out of scope for this crate is everything downstream of "here is a
/// complete frame" — request routing, a SQL validator, table proxies —
/// so this trait is deliberately the entire handoff point.
pub trait FrameHandler: Send {
    fn on_frame(&mut self, channel: ChannelId, frame: Frame, ctx: &mut ReactorContext<'_>);

    /// Every response-flagged frame reassembled since the last call,
    /// chained via `Frame::next` in arrival order and handed over as one
    /// batch rather than dispatched frame by frame.
    fn on_responses(&mut self, _channel: ChannelId, _chain: Frame, _ctx: &mut ReactorContext<'_>) {}

    fn on_accept(&mut self, _channel: ChannelId, _peer: Option<SocketAddr>, _ctx: &mut ReactorContext<'_>) {}

    fn on_close(&mut self, _channel: ChannelId, _ctx: &mut ReactorContext<'_>) {}
}

/// Passed to [`FrameHandler`] callbacks — the reactor's own registry and
/// scheduler, scoped to the lifetime of one callback invocation so a
/// handler can queue a same-reactor response without reaching back into
/// `Reactor` itself.
pub struct ReactorContext<'a> {
    registry: &'a mut ChannelRegistry,
    scheduler: &'a Scheduler,
    pub response_allocator: &'a Arc<ParallelFrameAllocator>,
}

impl<'a> ReactorContext<'a> {
    /// Queue `frame` as an outbound message on `channel`, owned by this
    /// same reactor, and mark it dirty for the next scheduler tick.
    pub fn respond(&mut self, channel: ChannelId, frame: Frame) -> Result<()> {
        let ch = self
            .registry
            .get_mut(channel)
            .ok_or(ReactorError::UnknownChannel(channel.as_u32()))?;
        ch.outbound.push(frame);
        self.scheduler.mark_dirty(channel, &ch.outbound);
        Ok(())
    }

    /// Post a continuation onto this reactor's internal run-queue — for a
    /// handler that needs to resume work later (a deferred completion, a
    /// timer expiry) without blocking the reactor thread inline.
    pub fn post_work(&self, unit: crate::scheduler::WorkUnit) {
        self.scheduler.post(unit);
    }
}

/// A thread-safe, cloneable reference to a running reactor — the surface
/// external code uses to deliver a response for a channel this reactor
/// owns and to ask it to shut down.
#[derive(Clone)]
pub struct ReactorHandle {
    directory: Arc<Mutex<HashMap<ChannelId, Arc<OutboundHandle>>>>,
    scheduler: Arc<Scheduler>,
    wakeup: Arc<Wakeup>,
    running: Arc<AtomicBool>,
}

impl ReactorHandle {
    /// Deliver `frame` to `channel` from any thread, and wake the owning
    /// reactor if it's currently (or about to be) blocked in the ring.
    pub fn write_and_flush(&self, channel: ChannelId, frame: Frame) -> Result<()> {
        let outbound = {
            let dir = self.directory.lock().unwrap();
            dir.get(&channel)
                .cloned()
                .ok_or(ReactorError::UnknownChannel(channel.as_u32()))?
        };
        outbound.push(frame);
        self.scheduler.mark_dirty(channel, &outbound);
        self.wakeup.signal()
    }

    /// Ask the reactor to stop after its current tick.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        let _ = self.wakeup.signal();
    }
}

/// One reactor: a listener (optional), a ring, a channel registry, and the
/// dirty-channel scheduler.
pub struct Reactor {
    tag: String,
    config: ReactorConfig,
    pump: UringPump,
    registry: ChannelRegistry,
    directory: Arc<Mutex<HashMap<ChannelId, Arc<OutboundHandle>>>>,
    scheduler: Arc<Scheduler>,
    wakeup: Arc<Wakeup>,
    running: Arc<AtomicBool>,
    allocator: FrameAllocator,
    response_allocator: Arc<ParallelFrameAllocator>,
    stats: Stats,

    listener_fd: Option<RawFd>,
    accept_storage: libc::sockaddr_storage,
    accept_storage_len: libc::socklen_t,
    eventfd_buf: [u8; 8],

    comp_buf: Vec<Completion>,
    dirty_buf: Vec<ChannelId>,
    /// Backing storage for in-flight `WRITEV` iovec arrays, kept alive
    /// (stable address) until the matching completion arrives.
    pending_iovecs: HashMap<ChannelId, Box<[libc::iovec]>>,
}

// `Reactor` is moved once into its dedicated thread (see `spawn`) and never
// accessed concurrently afterward; the `libc::iovec` pointers it holds are
// only read/written from that single owning thread.
unsafe impl Send for Reactor {}

impl Reactor {
    fn new(
        tag: String,
        config: ReactorConfig,
        response_allocator: Arc<ParallelFrameAllocator>,
    ) -> Result<(Self, ReactorHandle)> {
        let pump = UringPump::new(&config.ring)?;
        let wakeup = Arc::new(Wakeup::create(config.spin)?);
        let scheduler = Arc::new(Scheduler::new());
        let running = Arc::new(AtomicBool::new(true));
        let directory = Arc::new(Mutex::new(HashMap::new()));
        let max_frame_size = config.max_frame_size;

        let handle = ReactorHandle {
            directory: directory.clone(),
            scheduler: scheduler.clone(),
            wakeup: wakeup.clone(),
            running: running.clone(),
        };

        let completions_per_tick = config.completions_per_tick;
        let writes_per_tick = config.writes_per_tick;

        let reactor = Self {
            tag,
            registry: ChannelRegistry::new(config.max_channels),
            allocator: FrameAllocator::new(max_frame_size),
            pump,
            directory,
            scheduler,
            wakeup,
            running,
            response_allocator,
            stats: Stats::new(),
            listener_fd: None,
            accept_storage: unsafe { mem::zeroed() },
            accept_storage_len: mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t,
            eventfd_buf: [0u8; 8],
            comp_buf: vec![Completion::default(); completions_per_tick],
            dirty_buf: Vec::with_capacity(writes_per_tick),
            pending_iovecs: HashMap::new(),
            config,
        };

        Ok((reactor, handle))
    }

    /// Spawn a reactor on a dedicated OS thread. `core_id` pins the thread
    /// to that CPU via `sched_setaffinity` when `Some`; `None` leaves
    /// scheduling to the kernel, useful for tests.
    pub fn spawn<F, H>(
        core_id: Option<usize>,
        listen_addr: Option<SocketAddr>,
        config: ReactorConfig,
        response_allocator: Arc<ParallelFrameAllocator>,
        make_handler: F,
    ) -> Result<(ReactorHandle, thread::JoinHandle<()>)>
    where
        F: FnOnce() -> H + Send + 'static,
        H: FrameHandler + 'static,
    {
        let tag = match core_id {
            Some(c) => format!("[core {}] ", c),
            None => String::new(),
        };
        let (mut reactor, handle) = Self::new(tag, config, response_allocator)?;
        if let Some(addr) = listen_addr {
            reactor.register_accept(addr)?;
        }
        let handle_for_thread = handle.clone();

        let join = thread::Builder::new()
            .name(format!("reactor-{}", core_id.map(|c| c.to_string()).unwrap_or_else(|| "x".into())))
            .spawn(move || {
                if let Some(core) = core_id {
                    pin_to_core(core);
                }
                let mut handler = make_handler();
                reactor.run(&mut handler);
                let _ = handle_for_thread;
            })
            .expect("failed to spawn reactor thread");

        Ok((handle, join))
    }

    /// Bind a listener and arm the first `ACCEPT`.
    pub fn register_accept(&mut self, addr: SocketAddr) -> Result<()> {
        let fd = socket::bind_listener(addr, &self.config.socket)?;
        self.listener_fd = Some(fd);
        self.arm_accept()?;
        self.pump.flush()?;
        Ok(())
    }

    fn arm_accept(&mut self) -> Result<()> {
        let Some(fd) = self.listener_fd else {
            return Ok(());
        };
        self.accept_storage_len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        unsafe {
            self.pump.submit_accept(
                fd,
                &mut self.accept_storage as *mut _ as *mut libc::sockaddr,
                &mut self.accept_storage_len,
            )
        }
    }

    /// Open an outbound connection and register it as a channel. This
    /// worker-local connect path resolves synchronously — the closed
    /// opcode set has no `CONNECT` entry, so a short blocking wait here
    /// is simpler than adding one.
    pub fn connect(&mut self, addr: SocketAddr) -> Result<ChannelId> {
        let fd = socket::start_connect(addr, &self.config.socket)?;
        wait_for_connect(fd)?;
        self.register_channel(fd, Some(addr))
    }

    fn register_channel(&mut self, fd: RawFd, peer: Option<SocketAddr>) -> Result<ChannelId> {
        let id = self
            .registry
            .reserve()
            .ok_or(ReactorError::AllocatorExhausted)?;
        let channel = Channel::new(id, fd, peer, self.config.recv_chunk, self.config.max_frame_size);
        self.directory
            .lock()
            .unwrap()
            .insert(id, channel.outbound.clone());
        self.registry.insert(channel);
        self.arm_read(id)?;
        Ok(id)
    }

    fn arm_read(&mut self, id: ChannelId) -> Result<()> {
        let Some(channel) = self.registry.get_mut(id) else {
            return Ok(());
        };
        channel.state = ChannelState::Reading;
        unsafe {
            self.pump
                .submit_read(id, channel.fd, channel.recv_buf.as_mut_ptr(), channel.recv_buf.len() as u32)
        }
    }

    fn close_channel(&mut self, id: ChannelId, handler: &mut dyn FrameHandler) {
        if let Some(channel) = self.registry.remove(id) {
            unsafe {
                libc::close(channel.fd);
            }
            self.directory.lock().unwrap().remove(&id);
            self.stats.closed += 1;
            let mut ctx = ReactorContext {
                registry: &mut self.registry,
                scheduler: &self.scheduler,
                response_allocator: &self.response_allocator,
            };
            handler.on_close(id, &mut ctx);
        }
    }

    /// Run the event loop until [`ReactorHandle::shutdown`] is called.
    pub fn run(&mut self, handler: &mut dyn FrameHandler) {
        self.wakeup.bind_owner();
        if let Err(e) = unsafe { self.pump.submit_eventfd_read(self.wakeup.fd(), self.eventfd_buf.as_mut_ptr()) } {
            eprintln!("{}reactor: failed to arm eventfd read: {}", self.tag, e);
        }
        let _ = self.pump.flush();

        let start = Instant::now();
        let mut last_stats = start;

        eprintln!("{}reactor: started", self.tag);

        while self.running.load(Ordering::Acquire) {
            let did_write_work = self.drain_dirty_channels();
            let more_work = self.scheduler.tick(self.config.scheduler_tick_budget);

            if self.config.spin {
                // Busy-poll: never arm the wakeup or block in the ring —
                // just kick whatever's queued and immediately check for
                // completions again.
                if let Err(e) = self.pump.flush() {
                    eprintln!("{}reactor: flush failed: {}", self.tag, e);
                    break;
                }
            } else {
                self.wakeup.arm();
                let want = if did_write_work || more_work { 0 } else { 1 };
                if let Err(e) = self.pump.flush_and_wait(want) {
                    eprintln!("{}reactor: submit_and_wait failed: {}", self.tag, e);
                    break;
                }
                self.wakeup.disarm();
            }

            self.poll_and_dispatch(handler);

            let now = Instant::now();
            if now.duration_since(last_stats).as_secs() >= 10 {
                self.stats.print(&self.tag, self.registry.len(), now.duration_since(start).as_secs_f64());
                last_stats = now;
            }
        }

        self.stats.print(&self.tag, self.registry.len(), start.elapsed().as_secs_f64());
        if let Some(fd) = self.listener_fd.take() {
            unsafe {
                libc::close(fd);
            }
        }
        eprintln!("{}reactor: shutdown", self.tag);
    }

    /// Drain the dirty-channel set and stage/submit `WRITEV`s — the
    /// outbound half of the scheduler's tick.
    fn drain_dirty_channels(&mut self) -> bool {
        self.dirty_buf.clear();
        self.scheduler.drain(self.config.writes_per_tick, &mut self.dirty_buf);
        if self.dirty_buf.is_empty() {
            return false;
        }

        let mut submitted_any = false;
        for i in 0..self.dirty_buf.len() {
            let id = self.dirty_buf[i];
            let Some(channel) = self.registry.get_mut(id) else {
                continue;
            };
            channel.outbound.clear_queued();
            let has_data = channel.pump_outbound();
            if has_data && !channel.write_inflight {
                if self.submit_writev(id).is_ok() {
                    submitted_any = true;
                }
            }
        }
        submitted_any
    }

    fn submit_writev(&mut self, id: ChannelId) -> Result<()> {
        let channel = self.registry.get_mut(id).ok_or(ReactorError::UnknownChannel(id.as_u32()))?;
        let pairs = channel.iovec.as_iovecs();
        if pairs.is_empty() {
            return Ok(());
        }
        let total_bytes: u64 = channel.iovec.pending();
        let iovecs: Vec<libc::iovec> = pairs
            .iter()
            .map(|(ptr, len)| libc::iovec {
                iov_base: *ptr as *mut libc::c_void,
                iov_len: *len,
            })
            .collect();
        let fd = channel.fd;
        channel.write_inflight = true;
        // Leak the Vec's backing storage into a Box so its address stays
        // stable until the completion arrives, then reclaim it there.
        let boxed = iovecs.into_boxed_slice();
        let ptr = boxed.as_ptr();
        let len = boxed.len() as u32;
        self.pending_iovecs.insert(id, boxed);
        unsafe { self.pump.submit_writev(id, fd, ptr, len, total_bytes) }
    }

    fn poll_and_dispatch(&mut self, handler: &mut dyn FrameHandler) {
        loop {
            let n = self.pump.poll_completions(&mut self.comp_buf);
            if n == 0 {
                break;
            }
            for i in 0..n {
                let completion = self.comp_buf[i];
                match completion.op {
                    Some(Opcode::Accept) => self.handle_accept(completion.result, handler),
                    Some(Opcode::Read) => self.handle_read(completion.channel, completion.result, handler),
                    Some(Opcode::Writev) => self.handle_writev(completion.channel, completion.result),
                    Some(Opcode::EventFdRead) => self.handle_eventfd(),
                    None => {}
                }
            }
            if n < self.comp_buf.len() {
                break;
            }
        }
    }

    fn handle_accept(&mut self, result: i64, handler: &mut dyn FrameHandler) {
        if result >= 0 {
            let fd = result as RawFd;
            if socket::tune_stream(fd, &self.config.socket).is_ok() {
                let peer = socket::sockaddr_to(&self.accept_storage, self.accept_storage_len);
                match self.register_channel(fd, peer) {
                    Ok(id) => {
                        self.stats.accepts += 1;
                        let mut ctx = ReactorContext {
                            registry: &mut self.registry,
                            scheduler: &self.scheduler,
                            response_allocator: &self.response_allocator,
                        };
                        handler.on_accept(id, peer, &mut ctx);
                    }
                    Err(_) => unsafe {
                        libc::close(fd);
                    },
                }
            }
        } else {
            self.stats.io_errors += 1;
        }
        if self.arm_accept().is_err() {
            self.stats.io_errors += 1;
        }
        let _ = self.pump.flush();
    }

    fn handle_read(&mut self, id: ChannelId, result: i64, handler: &mut dyn FrameHandler) {
        let mut frames = Vec::new();
        let mut response_frames = Vec::new();
        let mut should_close = false;

        if let Some(channel) = self.registry.get_mut(id) {
            if result <= 0 {
                should_close = true;
            } else {
                let bytes = result as usize;
                self.stats.bytes_in += bytes as u64;
                match channel.process_read(bytes, &mut self.allocator) {
                    Ok(()) => {
                        while let Some(f) = channel.inbox.pop_front() {
                            frames.push(f);
                        }
                        while let Some(f) = channel.response_inbox.pop_front() {
                            response_frames.push(f);
                        }
                    }
                    Err(_) => {
                        self.stats.protocol_errors += 1;
                        should_close = true;
                    }
                }
            }
        } else {
            return;
        }

        if should_close {
            self.close_channel(id, handler);
            return;
        }

        self.stats.frames_in += (frames.len() + response_frames.len()) as u64;
        for frame in frames {
            let mut ctx = ReactorContext {
                registry: &mut self.registry,
                scheduler: &self.scheduler,
                response_allocator: &self.response_allocator,
            };
            handler.on_frame(id, frame, &mut ctx);
        }

        if let Some(chain) = reactor_core::chain_frames(response_frames) {
            let mut ctx = ReactorContext {
                registry: &mut self.registry,
                scheduler: &self.scheduler,
                response_allocator: &self.response_allocator,
            };
            handler.on_responses(id, chain, &mut ctx);
        }

        if self.registry.get(id).is_some() {
            let _ = self.arm_read(id);
            let _ = self.pump.flush();
        }
    }

    fn handle_writev(&mut self, id: ChannelId, result: i64) {
        self.pending_iovecs.remove(&id);
        let Some(channel) = self.registry.get_mut(id) else {
            return;
        };
        channel.write_inflight = false;

        if result < 0 {
            self.stats.io_errors += 1;
            return;
        }

        let written = result as u64;
        let before = channel.iovec.len();
        channel.iovec.compact(written, &mut self.allocator);
        let after = channel.iovec.len();
        self.stats.writes += 1;
        self.stats.bytes_out += written;
        self.stats.frames_out += (before - after) as u64;

        let still_has_data = !channel.iovec.is_empty() || channel.pump_outbound();
        if still_has_data {
            let _ = self.submit_writev(id);
            let _ = self.pump.flush();
        }
    }

    fn handle_eventfd(&mut self) {
        let armed = unsafe { self.pump.submit_eventfd_read(self.wakeup.fd(), self.eventfd_buf.as_mut_ptr()) };
        if armed.is_err() {
            self.stats.io_errors += 1;
        }
        let _ = self.pump.flush();
    }
}

fn pin_to_core(core: usize) {
    unsafe {
        let mut set: libc::cpu_set_t = mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core, &mut set);
        libc::sched_setaffinity(0, mem::size_of::<libc::cpu_set_t>(), &set);
    }
}

/// Poll a non-blocking connect() to completion with a short timeout. Not
/// part of the ring's closed opcode set — see `Reactor::connect`.
fn wait_for_connect(fd: RawFd) -> Result<()> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLOUT,
        revents: 0,
    };
    let ret = unsafe { libc::poll(&mut pfd, 1, 5000) };
    if ret <= 0 {
        return Err(ReactorError::Connect(libc::ETIMEDOUT));
    }
    let mut err: i32 = 0;
    let mut len = mem::size_of::<i32>() as libc::socklen_t;
    unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut err as *mut _ as *mut libc::c_void,
            &mut len,
        );
    }
    if err != 0 {
        return Err(ReactorError::Connect(err));
    }
    Ok(())
}
