//! # reactor-io — io_uring plumbing, wakeup, and socket setup
//!
//! This crate is the thin native layer the reactor event loop drives: the
//! submission/completion pump against a single io_uring ring
//! ([`ring::UringPump`]), the eventfd-based cross-thread wakeup discipline
//! ([`wakeup::Wakeup`]), and the socket lifecycle helpers ACCEPT/CONNECT
//! need ([`socket`]).
//!
//! Nothing here is generic over a trait boundary the way `ksvc-core`/
//! `ksvc-module` are — this workspace's out-of-scope layers (partition
//! routing, table proxies) are the reason for that split upstream; for a
//! single reactor core there is exactly one backend (`io_uring`) and the
//! concrete types are the interface.

pub mod opcode;
pub mod ring;
pub mod socket;
pub mod wakeup;

pub use opcode::Opcode;
pub use ring::{RingConfig, UringPump};
pub use socket::SocketConfig;
pub use wakeup::Wakeup;
