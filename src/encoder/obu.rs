//! AV1 OBU framing: headers and leb128 size fields.

use super::bitwriter::BitWriter;
use crate::error::{EncodeError, Result};

/// OBU types written by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ObuType {
    SequenceHeader = 1,
    TemporalDelimiter = 2,
    FrameHeader = 3,
    TileGroup = 4,
    Metadata = 5,
    Frame = 6,
    RedundantFrameHeader = 7,
    Padding = 15,
}

/// Metadata OBU payload types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MetadataType {
    HdrCll = 1,
    HdrMdcv = 2,
}

/// Number of bytes a minimal leb128 encoding of `value` takes.
pub fn leb128_size(value: u64) -> usize {
    let mut size = 1;
    let mut v = value >> 7;
    while v != 0 {
        size += 1;
        v >>= 7;
    }
    size
}

/// Encode `value` as leb128. With `fixed_len` the encoding is padded with
/// continuation bytes to exactly that many bytes.
pub fn write_leb128(writer: &mut BitWriter, value: u64, fixed_len: Option<usize>) -> Result<()> {
    let minimal = leb128_size(value);
    let len = match fixed_len {
        Some(len) if len < minimal || len > 8 => {
            return Err(EncodeError::Unsupported(format!(
                "leb128 value {value} does not fit in {len} bytes"
            )));
        }
        Some(len) => len,
        None => minimal,
    };
    for i in 0..len {
        let byte = (value >> (7 * i)) & 0x7f;
        let more = (i + 1 < len) as u64;
        writer.write_bits((more << 7) | byte, 8);
    }
    Ok(())
}

/// Decode a leb128 value, returning it and the number of bytes consumed.
pub fn read_leb128(data: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    for (i, &byte) in data.iter().take(8).enumerate() {
        value |= ((byte & 0x7f) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

/// Wrap a byte-aligned payload into an OBU with a size field.
///
/// `size_len` forces a fixed-width size field, which some drivers need in
/// order to patch the size in place.
pub fn write_obu(
    writer: &mut BitWriter,
    obu_type: ObuType,
    payload: &[u8],
    size_len: Option<usize>,
) -> Result<()> {
    debug_assert!(writer.is_byte_aligned());
    writer.write_bits(0, 1); // obu_forbidden_bit
    writer.write_bits(obu_type as u64, 4);
    writer.write_bits(0, 1); // obu_extension_flag
    writer.write_bits(1, 1); // obu_has_size_field
    writer.write_bits(0, 1); // obu_reserved_1bit
    write_leb128(writer, payload.len() as u64, size_len)?;
    writer.write_bytes(payload);
    Ok(())
}

/// `trailing_bits()` closing an OBU payload.
pub fn trailing_bits(writer: &mut BitWriter) {
    writer.rbsp_trailing_bits();
}
