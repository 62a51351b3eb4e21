//! Reactor Echo Server
//!
//! Single-core framed echo server: every inbound frame is answered with a
//! response frame carrying the same payload and `FLAG_OP_RESPONSE` set.
//! Proves the reactor's request/response round trip end to end, the way
//! `cmd/ksvc-echo` proves KSVC's Tier 1 translation under real load.
//!
//! Usage:
//!     cargo run --release -p reactor-echo -- [port] [max_conns]
//!
//! Test with:
//!     printf '\x00\x00\x00\x0dhello' | nc localhost 9000 | xxd

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use reactor::{ChannelId, Frame, FrameHandler, ParallelFrameAllocator, Reactor, ReactorConfig, ReactorContext, ReactorHandle};
use reactor_core::wire::{FLAG_OP_RESPONSE, HEADER_LEN};

static HANDLE: OnceLock<ReactorHandle> = OnceLock::new();

struct EchoHandler;

impl FrameHandler for EchoHandler {
    fn on_frame(&mut self, channel: ChannelId, frame: Frame, ctx: &mut ReactorContext<'_>) {
        let payload = frame.payload();
        let size = HEADER_LEN + payload.len() as u32;
        let mut response = match ctx.response_allocator.allocate(size) {
            Ok(f) => f,
            Err(e) => {
                eprintln!("reactor-echo: response allocation failed: {}", e);
                return;
            }
        };
        response.set_header(size, FLAG_OP_RESPONSE);
        response.write_slice().copy_from_slice(payload);
        response.advance_write(payload.len() as u32);
        response.finish_for_read();

        if let Err(e) = ctx.respond(channel, response) {
            eprintln!("reactor-echo: failed to queue response: {}", e);
        }
    }

    fn on_accept(&mut self, channel: ChannelId, peer: Option<SocketAddr>, _ctx: &mut ReactorContext<'_>) {
        eprintln!("reactor-echo: accepted {:?} as {}", peer, channel);
    }

    fn on_close(&mut self, channel: ChannelId, _ctx: &mut ReactorContext<'_>) {
        eprintln!("reactor-echo: closed {}", channel);
    }
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let port: u16 = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(9000);
    let max_conns: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(4096);

    unsafe {
        libc::signal(libc::SIGINT, handle_sigint as usize);
        libc::signal(libc::SIGTERM, handle_sigint as usize);
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }

    eprintln!("reactor-echo: starting on port {} (max {} connections)", port, max_conns);

    let mut config = ReactorConfig::default();
    config.max_channels = max_conns;

    let response_allocator = Arc::new(ParallelFrameAllocator::new(config.max_frame_size));
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse().unwrap();

    let (handle, join) = Reactor::spawn(None, Some(addr), config, response_allocator, || EchoHandler)
        .expect("reactor-echo: failed to start reactor");

    HANDLE.set(handle.clone()).ok();

    join.join().expect("reactor thread panicked");
}

extern "C" fn handle_sigint(_sig: libc::c_int) {
    if let Some(handle) = HANDLE.get() {
        handle.shutdown();
    }
}
