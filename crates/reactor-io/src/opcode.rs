//! SQE opcode tagging via `user_data`.
//!
//! Every SQE the reactor submits carries a `user_data` word the completion
//! pump decodes back into an opcode and a channel id — the same
//! `[op:8][idx:56]` packing `cmd/httpd/rust/ksvc::main` uses for its
//! connection-slab completions, generalized from a 32-bit connection index
//! to a full `ChannelId`.

use reactor_core::ChannelId;

/// The closed set of operation kinds the submission pump emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Accept = 1,
    Read = 2,
    Writev = 3,
    EventFdRead = 4,
}

impl Opcode {
    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Accept),
            2 => Some(Self::Read),
            3 => Some(Self::Writev),
            4 => Some(Self::EventFdRead),
            _ => None,
        }
    }
}

const OP_SHIFT: u32 = 56;
const IDX_MASK: u64 = (1u64 << OP_SHIFT) - 1;

/// Pack an opcode and a channel id into one `user_data` word.
///
/// `EventFdRead` and `Accept` carry no meaningful channel id; callers pass
/// [`ChannelId::NONE`] for those.
pub fn encode(op: Opcode, channel: ChannelId) -> u64 {
    ((op as u64) << OP_SHIFT) | (channel.as_u32() as u64)
}

/// Decode a `user_data` word back into its opcode and channel id.
///
/// Returns `None` for a tag outside the closed opcode set; the caller
/// logs and drops the completion in that case.
pub fn decode(user_data: u64) -> Option<(Opcode, ChannelId)> {
    let tag = (user_data >> OP_SHIFT) as u8;
    let idx = (user_data & IDX_MASK) as u32;
    Opcode::from_tag(tag).map(|op| (op, ChannelId::new(idx)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_opcode() {
        for (op, id) in [
            (Opcode::Accept, ChannelId::NONE),
            (Opcode::Read, ChannelId::new(7)),
            (Opcode::Writev, ChannelId::new(u32::MAX - 1)),
            (Opcode::EventFdRead, ChannelId::NONE),
        ] {
            let ud = encode(op, id);
            assert_eq!(decode(ud), Some((op, id)));
        }
    }

    #[test]
    fn unknown_tag_decodes_to_none() {
        let bogus = (0xFFu64) << OP_SHIFT;
        assert_eq!(decode(bogus), None);
    }
}
