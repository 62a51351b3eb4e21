//! # reactor — the thread-per-core event loop
//!
//! Ties [`reactor_core`]'s framing types and [`reactor_io`]'s io_uring
//! plumbing into a runnable per-core reactor: a channel registry keyed by
//! `ChannelId`, a cooperative scheduler for outbound flushes, and the
//! event loop itself.
//!
//! Out of scope, same as the crates below it: request routing, a SQL
//! validator, distributed-object/table proxies, and the client-facing
//! connection listener interface above this layer all live elsewhere.

pub mod channel;
pub mod config;
pub mod inbound;
pub mod reactor;
pub mod registry;
pub mod scheduler;
pub mod stats;

pub use channel::{Channel, ChannelState, OutboundHandle};
pub use config::ReactorConfig;
pub use reactor::{FrameHandler, Reactor, ReactorContext, ReactorHandle};
pub use registry::ChannelRegistry;
pub use scheduler::{Scheduler, WorkUnit};
pub use stats::Stats;

pub use reactor_core::{ChannelId, Frame, FrameAllocator, IoVector, ParallelFrameAllocator, ReactorError, Result};
