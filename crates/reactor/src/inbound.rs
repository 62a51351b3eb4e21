//! Inbound length-prefixed frame reassembly.
//!
//! Bytes land in a channel's scratch `recv_buf` one READ completion at a
//! time, in arbitrary chunk sizes relative to frame boundaries — the same
//! incremental-parse shape as `cmd/httpd/rust/ksvc::main::parse_request`,
//! generalized from "scan for `\r\n\r\n`" to "collect an 8-byte header,
//! then the declared payload length".

use reactor_core::frame::{Frame, FrameAllocator};
use reactor_core::wire::{self, HEADER_LEN};
use reactor_core::{ProtocolError, Result};

/// Reassembles one channel's inbound byte stream into discrete frames.
///
/// Holds at most one frame's worth of in-progress state: either a partial
/// header (fewer than [`HEADER_LEN`] bytes seen) or a [`Frame`] mid-fill.
pub struct FrameAssembler {
    header_buf: [u8; HEADER_LEN as usize],
    header_len: u8,
    current: Option<Frame>,
    max_frame_size: u32,
}

impl FrameAssembler {
    pub fn new(max_frame_size: u32) -> Self {
        Self {
            header_buf: [0u8; HEADER_LEN as usize],
            header_len: 0,
            current: None,
            max_frame_size,
        }
    }

    /// Feed newly-read bytes in. Every frame fully reassembled during this
    /// call is routed by its `FLAG_OP_RESPONSE` bit: response-flagged
    /// frames are appended to `responses` (to be chained and handed to the
    /// handler as a batch), everything else to `requests` — both in
    /// arrival order.
    ///
    /// Returns a [`ProtocolError`] if a declared frame size is out of
    /// bounds — the caller closes the channel on error.
    pub fn feed(
        &mut self,
        mut data: &[u8],
        allocator: &mut FrameAllocator,
        requests: &mut Vec<Frame>,
        responses: &mut Vec<Frame>,
    ) -> Result<()> {
        while !data.is_empty() {
            if self.current.is_none() {
                let need = HEADER_LEN as usize - self.header_len as usize;
                let take = need.min(data.len());
                self.header_buf[self.header_len as usize..self.header_len as usize + take]
                    .copy_from_slice(&data[..take]);
                self.header_len += take as u8;
                data = &data[take..];

                if (self.header_len as u32) < HEADER_LEN {
                    break;
                }

                let (size, flags) = wire::decode_header(&self.header_buf);
                if size < wire::MIN_FRAME_SIZE {
                    return Err(ProtocolError::FrameTooSmall(size).into());
                }
                if size > self.max_frame_size {
                    return Err(ProtocolError::FrameTooLarge {
                        size,
                        max: self.max_frame_size,
                    }
                    .into());
                }

                let mut frame = allocator.allocate(size)?;
                frame.set_header(size, flags);
                self.current = Some(frame);
                self.header_len = 0;
            }

            let frame = self.current.as_mut().expect("current frame just set");
            let slice = frame.write_slice();
            let take = slice.len().min(data.len());
            slice[..take].copy_from_slice(&data[..take]);
            frame.advance_write(take as u32);
            data = &data[take..];

            if frame.is_complete() {
                let mut frame = self.current.take().expect("frame complete");
                frame.finish_for_read();
                if frame.flags() & wire::FLAG_OP_RESPONSE != 0 {
                    responses.push(frame);
                } else {
                    requests.push(frame);
                }
            } else {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reactor_core::wire::FLAG_OP_RESPONSE;

    fn encode_frame(flags: u32, payload: &[u8]) -> Vec<u8> {
        let size = HEADER_LEN + payload.len() as u32;
        let mut buf = Vec::with_capacity(size as usize);
        buf.extend_from_slice(&size.to_be_bytes());
        buf.extend_from_slice(&flags.to_be_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn reassembles_a_frame_delivered_in_one_chunk() {
        let mut alloc = FrameAllocator::new(4096);
        let mut asm = FrameAssembler::new(4096);
        let wire = encode_frame(0, b"hello");
        let mut requests = Vec::new();
        let mut responses = Vec::new();
        asm.feed(&wire, &mut alloc, &mut requests, &mut responses).unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].payload(), b"hello");
        assert!(responses.is_empty());
    }

    #[test]
    fn reassembles_a_frame_delivered_byte_by_byte() {
        let mut alloc = FrameAllocator::new(4096);
        let mut asm = FrameAssembler::new(4096);
        let wire = encode_frame(FLAG_OP_RESPONSE, b"ok");
        let mut requests = Vec::new();
        let mut responses = Vec::new();
        for b in &wire {
            asm.feed(std::slice::from_ref(b), &mut alloc, &mut requests, &mut responses)
                .unwrap();
        }
        assert!(requests.is_empty());
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].flags(), FLAG_OP_RESPONSE);
        assert_eq!(responses[0].payload(), b"ok");
    }

    #[test]
    fn reassembles_back_to_back_frames_in_one_chunk() {
        let mut alloc = FrameAllocator::new(4096);
        let mut asm = FrameAssembler::new(4096);
        let mut wire = encode_frame(0, b"one");
        wire.extend_from_slice(&encode_frame(0, b"two"));
        let mut requests = Vec::new();
        let mut responses = Vec::new();
        asm.feed(&wire, &mut alloc, &mut requests, &mut responses).unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].payload(), b"one");
        assert_eq!(requests[1].payload(), b"two");
        assert!(responses.is_empty());
    }

    #[test]
    fn routes_request_and_response_frames_into_separate_batches() {
        let mut alloc = FrameAllocator::new(4096);
        let mut asm = FrameAssembler::new(4096);
        let mut wire = encode_frame(0, b"req-one");
        wire.extend_from_slice(&encode_frame(FLAG_OP_RESPONSE, b"resp-one"));
        wire.extend_from_slice(&encode_frame(0, b"req-two"));
        wire.extend_from_slice(&encode_frame(FLAG_OP_RESPONSE, b"resp-two"));
        let mut requests = Vec::new();
        let mut responses = Vec::new();
        asm.feed(&wire, &mut alloc, &mut requests, &mut responses).unwrap();

        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].payload(), b"req-one");
        assert_eq!(requests[1].payload(), b"req-two");

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].payload(), b"resp-one");
        assert_eq!(responses[1].payload(), b"resp-two");
    }

    #[test]
    fn rejects_a_frame_declared_larger_than_the_configured_max() {
        let mut alloc = FrameAllocator::new(4096);
        let mut asm = FrameAssembler::new(16);
        let wire = encode_frame(0, &vec![0u8; 100]);
        let mut requests = Vec::new();
        let mut responses = Vec::new();
        let err = asm.feed(&wire, &mut alloc, &mut requests, &mut responses).unwrap_err();
        assert!(matches!(
            err,
            reactor_core::ReactorError::Protocol(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn rejects_a_frame_declared_smaller_than_the_header() {
        let mut alloc = FrameAllocator::new(4096);
        let mut asm = FrameAssembler::new(4096);
        let mut wire = vec![0u8; HEADER_LEN as usize];
        wire[0..4].copy_from_slice(&4u32.to_be_bytes());
        let mut requests = Vec::new();
        let mut responses = Vec::new();
        let err = asm.feed(&wire, &mut alloc, &mut requests, &mut responses).unwrap_err();
        assert!(matches!(
            err,
            reactor_core::ReactorError::Protocol(ProtocolError::FrameTooSmall(_))
        ));
    }
}
