//! Reactor and channel configuration — plain structs with `Default` impls,
//! no builder macros, no serde. Grounded on
//! `ksvc-module::basic_iouring::BasicIoUringConfig` and
//! `ksvc-gvthread::reactor::ReactorConfig`.

use reactor_core::wire::MAX_FRAME_SIZE_DEFAULT;
use reactor_io::{RingConfig, SocketConfig};

/// Everything one reactor needs to start its event loop.
#[derive(Debug, Clone)]
pub struct ReactorConfig {
    /// io_uring ring sizing.
    pub ring: RingConfig,
    /// Socket tuning applied to every channel this reactor owns.
    pub socket: SocketConfig,
    /// Upper bound on live channels (determines the registry's slab size).
    pub max_channels: usize,
    /// Bytes read per READ SQE.
    pub recv_chunk: u32,
    /// Largest frame this reactor will reassemble before rejecting the
    /// connection with a protocol error.
    pub max_frame_size: u32,
    /// Fairness budget: how many dirty channels the scheduler drains to
    /// WRITEV per tick before yielding back to the completion pump.
    pub writes_per_tick: usize,
    /// How many completions to drain from the ring per loop iteration.
    pub completions_per_tick: usize,
    /// Fairness budget: how many scheduler work units `tick()` runs per
    /// loop iteration before yielding back to the completion pump.
    pub scheduler_tick_budget: usize,
    /// Busy-poll the ring instead of blocking in `io_uring_enter` between
    /// iterations — trades CPU for latency, and makes [`Wakeup::signal`]
    /// a no-op since nothing ever blocks waiting for it.
    pub spin: bool,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            ring: RingConfig::default(),
            socket: SocketConfig::default(),
            max_channels: 65536,
            recv_chunk: 64 * 1024,
            max_frame_size: MAX_FRAME_SIZE_DEFAULT,
            writes_per_tick: 256,
            completions_per_tick: 256,
            scheduler_tick_budget: 256,
            spin: false,
        }
    }
}
