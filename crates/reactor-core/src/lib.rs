//! # reactor-core — data model for the framed-I/O reactor
//!
//! This crate defines the pure, allocator-agnostic pieces that the reactor's
//! hot path is built from: the length-prefixed `Frame`, its pooled
//! `FrameAllocator`, the bounded gather-write `IoVector`, the `ChannelId`
//! identity handle, the wire format constants, and the crate's error type.
//!
//! Nothing in here touches a socket or an io_uring ring — those live in
//! `reactor-io` and `reactor`. This crate is deliberately free of
//! third-party dependencies, the same way `ksvc-core` defines trait and
//! data boundaries with nothing but `std`.

pub mod channel_id;
pub mod error;
pub mod frame;
pub mod iovec;
pub mod wire;

pub use channel_id::ChannelId;
pub use error::{ProtocolError, ReactorError, Result};
pub use frame::{chain_frames, AllocatorStats, Frame, FrameAllocator, ParallelFrameAllocator};
pub use iovec::IoVector;
pub use wire::{FLAG_OP_RESPONSE, HEADER_LEN, MAX_FRAME_SIZE_DEFAULT, MIN_FRAME_SIZE};
