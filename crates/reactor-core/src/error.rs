//! Reactor error types.

use std::fmt;

/// Why a channel was closed with a protocol error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Declared frame `size` is below the 8-byte header minimum.
    FrameTooSmall(u32),
    /// Declared frame `size` exceeds the configured maximum.
    FrameTooLarge { size: u32, max: u32 },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FrameTooSmall(size) => {
                write!(f, "frame size {} is below the 8-byte header minimum", size)
            }
            Self::FrameTooLarge { size, max } => {
                write!(f, "frame size {} exceeds configured maximum {}", size, max)
            }
        }
    }
}

#[derive(Debug)]
pub enum ReactorError {
    /// `FrameAllocator::allocate` found no frame of a usable capacity class
    /// and the pool is not allowed to grow further.
    AllocatorExhausted,
    /// `IoVector::fill` was called on a vector that is already at `IOV_MAX`.
    IoVectorFull,
    /// The wire-level frame header was malformed or out of bounds.
    Protocol(ProtocolError),
    /// The channel identified by this `ChannelId` no longer exists.
    UnknownChannel(u32),
    /// io_uring ring setup or submission failed; carries the raw errno.
    IoUringSetup(i32),
    IoUringSubmit(i32),
    /// The submission ring has no free SQE slots this tick.
    RingFull,
    /// bind/listen/connect failed at startup — a fatal configuration error.
    Bind(i32),
    Listen(i32),
    Connect(i32),
    /// Generic OS error with errno.
    Os(i32),
}

impl fmt::Display for ReactorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllocatorExhausted => write!(f, "frame allocator exhausted"),
            Self::IoVectorFull => write!(f, "io vector full (IOV_MAX reached)"),
            Self::Protocol(e) => write!(f, "protocol error: {}", e),
            Self::UnknownChannel(id) => write!(f, "unknown channel id {}", id),
            Self::IoUringSetup(e) => write!(f, "io_uring setup: errno {}", e),
            Self::IoUringSubmit(e) => write!(f, "io_uring submit: errno {}", e),
            Self::RingFull => write!(f, "submission ring full"),
            Self::Bind(e) => write!(f, "bind failed: errno {}", e),
            Self::Listen(e) => write!(f, "listen failed: errno {}", e),
            Self::Connect(e) => write!(f, "connect failed: errno {}", e),
            Self::Os(e) => write!(f, "OS error: errno {}", e),
        }
    }
}

impl std::error::Error for ReactorError {}

impl From<ProtocolError> for ReactorError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

pub type Result<T> = std::result::Result<T, ReactorError>;
