//! Per-reactor counters, printed the way `cmd/httpd/rust/ksvc::main::Stats`
//! prints its throughput line.

/// Running totals for one reactor. Single-threaded — the reactor owns its
/// own `Stats` and never shares it, so no atomics.
#[derive(Debug, Default, Clone, Copy)]
pub struct Stats {
    pub accepts: u64,
    pub connects: u64,
    pub reads: u64,
    pub writes: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub frames_in: u64,
    pub frames_out: u64,
    pub protocol_errors: u64,
    pub io_errors: u64,
    pub closed: u64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn print(&self, tag: &str, live_channels: usize, elapsed_secs: f64) {
        let fps = if elapsed_secs > 0.0 {
            self.frames_in as f64 / elapsed_secs
        } else {
            0.0
        };
        eprintln!(
            "{}reactor: chans={} acc={} conn={} frames_in={} frames_out={} \
             bytes_in={} bytes_out={} fps={:.0} perr={} ioerr={} closed={}",
            tag,
            live_channels,
            self.accepts,
            self.connects,
            self.frames_in,
            self.frames_out,
            self.bytes_in,
            self.bytes_out,
            fps,
            self.protocol_errors,
            self.io_errors,
            self.closed,
        );
    }
}
