//! Fixed-width integer packing
//!
//! Sequence numbers and ack masks are written little-endian over an exact
//! number of bytes with no padding. Only the low `width` bytes of a value are
//! written; reading zero-extends back to `u64`.

use crate::packet::PacketError;
use bytes::{Buf, BufMut};

/// Widest integer the codec packs (a full `u64`)
pub const MAX_WIDTH: usize = 8;

/// Write the low `width` bytes of `value`, little-endian
///
/// # Panics
/// Panics if `width` is 0 or greater than 8, or if `buf` lacks capacity
#[inline]
pub fn write_uint<B: BufMut>(buf: &mut B, value: u64, width: usize) {
    assert!(
        (1..=MAX_WIDTH).contains(&width),
        "Integer width {} outside 1..={}",
        width,
        MAX_WIDTH
    );
    buf.put_uint_le(value, width);
}

/// Read a `width`-byte little-endian integer
pub fn read_uint<B: Buf>(buf: &mut B, width: usize) -> Result<u64, PacketError> {
    if !(1..=MAX_WIDTH).contains(&width) {
        return Err(PacketError::InvalidWidth(width));
    }

    if buf.remaining() < width {
        return Err(PacketError::InsufficientData {
            expected: width,
            actual: buf.remaining(),
        });
    }

    Ok(buf.get_uint_le(width))
}

/// Largest value a `width`-byte field can hold
#[inline]
pub fn max_value(width: usize) -> u64 {
    if width >= MAX_WIDTH {
        u64::MAX
    } else {
        (1u64 << (width * 8)) - 1
    }
}
