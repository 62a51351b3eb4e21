//! Wire format constants and header codec.
//!
//! Every message on the wire is `size:u32 BE | flags:u32 BE | body`. `size`
//! includes the 8-byte header, so the minimum frame is 8 bytes (an
//! empty-bodied message).

/// Size of the `size` + `flags` header, in bytes.
pub const HEADER_LEN: u32 = 8;

/// Smallest legal frame (header only, zero-length payload).
pub const MIN_FRAME_SIZE: u32 = HEADER_LEN;

/// Default deployment cap on frame size (16 MiB) absent explicit config.
pub const MAX_FRAME_SIZE_DEFAULT: u32 = 16 * 1024 * 1024;

/// Set on response frames so the caller routes them onto the response
/// chain instead of dispatching them to the request handler.
pub const FLAG_OP_RESPONSE: u32 = 0x01;

/// Encode the 8-byte `size | flags` header into `out[..8]`.
///
/// # Panics
/// Panics if `out` is shorter than [`HEADER_LEN`].
#[inline]
pub fn encode_header(out: &mut [u8], size: u32, flags: u32) {
    out[0..4].copy_from_slice(&size.to_be_bytes());
    out[4..8].copy_from_slice(&flags.to_be_bytes());
}

/// Decode `(size, flags)` from an 8-byte big-endian header.
///
/// # Panics
/// Panics if `buf` is shorter than [`HEADER_LEN`].
#[inline]
pub fn decode_header(buf: &[u8]) -> (u32, u32) {
    let size = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let flags = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
    (size, flags)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let mut buf = [0u8; 8];
        encode_header(&mut buf, 0x1234_5678, 0x01);
        assert_eq!(decode_header(&buf), (0x1234_5678, 0x01));
    }

    #[test]
    fn min_frame_is_header_only() {
        assert_eq!(MIN_FRAME_SIZE, HEADER_LEN);
    }
}
