//! Capacity-bounded destination for packed headers.
//!
//! Header writers never grow their output past the capacity they were given:
//! if the assembled header does not fit, the buffer is emptied and
//! [`EncodeError::NoSpace`] is returned, so a partial header can never be
//! submitted by mistake.

use bitflags::bitflags;

use super::bitwriter::BitWriter;
use super::nal;
use crate::error::{EncodeError, Result};

/// Largest packed header or parameter blob a codec may produce, in bytes.
pub const MAX_PARAM_BUFFER_SIZE: usize = 1024;

bitflags! {
    /// Packed header kinds, used both for driver capabilities and for the
    /// headers a codec wants to write itself.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PackedHeaderFlags: u32 {
        const SEQUENCE = 0x01;
        const PICTURE = 0x02;
        const SLICE = 0x04;
        const MISC = 0x08;
        const RAW_DATA = 0x10;
    }
}

/// Type tag attached to a packed header buffer on submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackedHeaderType {
    Sequence,
    Picture,
    Slice,
    Misc,
    RawData,
}

impl PackedHeaderType {
    pub fn flag(self) -> PackedHeaderFlags {
        match self {
            PackedHeaderType::Sequence => PackedHeaderFlags::SEQUENCE,
            PackedHeaderType::Picture => PackedHeaderFlags::PICTURE,
            PackedHeaderType::Slice => PackedHeaderFlags::SLICE,
            PackedHeaderType::Misc => PackedHeaderFlags::MISC,
            PackedHeaderType::RawData => PackedHeaderFlags::RAW_DATA,
        }
    }
}

/// A packed header under construction.
#[derive(Debug, Clone)]
pub struct PackedHeader {
    data: Vec<u8>,
    /// Zero bits at the end of the last byte that are not part of the header.
    padding_bits: usize,
    capacity_bits: usize,
}

impl Default for PackedHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl PackedHeader {
    /// Empty header with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity_bits(MAX_PARAM_BUFFER_SIZE * 8)
    }

    pub fn with_capacity_bits(capacity_bits: usize) -> Self {
        Self {
            data: Vec::new(),
            padding_bits: 0,
            capacity_bits,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Meaningful length in bits.
    pub fn bit_len(&self) -> usize {
        self.data.len() * 8 - self.padding_bits
    }

    pub fn capacity_bits(&self) -> usize {
        self.capacity_bits
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.padding_bits = 0;
    }

    fn remaining_bytes(&self) -> usize {
        (self.capacity_bits / 8).saturating_sub(self.data.len())
    }

    fn fail(&mut self, needed_bits: usize) -> EncodeError {
        let available = self.capacity_bits;
        self.clear();
        EncodeError::no_space(needed_bits, available)
    }

    /// Append a bit string whose final byte may be partial.
    pub fn append_bits(&mut self, bytes: &[u8], bit_len: usize) -> Result<()> {
        debug_assert!(bit_len <= bytes.len() * 8);
        let used = (bit_len + 7) / 8;
        if self.bit_len() + bit_len > self.capacity_bits || used > self.remaining_bytes() {
            return Err(self.fail(self.data.len() * 8 + bit_len));
        }
        self.data.extend_from_slice(&bytes[..used]);
        self.padding_bits = used * 8 - bit_len;
        Ok(())
    }

    pub fn append_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.append_bits(bytes, bytes.len() * 8)
    }

    /// Append everything written into `writer`.
    pub fn append_writer(&mut self, writer: BitWriter) -> Result<()> {
        let (bytes, bits) = writer.finish_with_len();
        self.append_bits(&bytes, bits)
    }

    /// Append one NAL unit in Annex-B byte-stream form.
    pub fn append_nal(&mut self, writer: BitWriter) -> Result<()> {
        let (raw, raw_bits) = writer.finish_with_len();
        let mut scratch = vec![0u8; self.remaining_bytes()];
        match nal::nal_unit_to_byte_stream(&mut scratch, &raw, raw_bits) {
            Ok(bits) => {
                let used = (bits + 7) / 8;
                self.data.extend_from_slice(&scratch[..used]);
                self.padding_bits = used * 8 - bits;
                Ok(())
            }
            Err(EncodeError::NoSpace { needed_bits, .. }) => {
                Err(self.fail(self.data.len() * 8 + needed_bits))
            }
            Err(e) => {
                self.clear();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_tracks_padding() {
        let mut header = PackedHeader::new();
        header.append_bits(&[0b1010_0000], 3).unwrap();
        assert_eq!(header.bit_len(), 3);
        assert_eq!(header.data(), &[0b1010_0000]);
    }

    #[test]
    fn test_overflow_clears_buffer() {
        let mut header = PackedHeader::with_capacity_bits(16);
        header.append_bytes(&[1]).unwrap();
        let err = header.append_bytes(&[2, 3]).unwrap_err();
        assert!(matches!(err, EncodeError::NoSpace { needed_bits: 24, available_bits: 16 }));
        assert_eq!(header.bit_len(), 0);
        assert!(header.is_empty());
    }

    #[test]
    fn test_zero_capacity_rejects_nal() {
        let mut header = PackedHeader::with_capacity_bits(0);
        let mut writer = BitWriter::new();
        writer.write_bits(0x67, 8);
        writer.rbsp_trailing_bits();
        assert!(matches!(header.append_nal(writer), Err(EncodeError::NoSpace { .. })));
        assert_eq!(header.bit_len(), 0);
    }

    #[test]
    fn test_append_nal_start_code() {
        let mut header = PackedHeader::new();
        let mut writer = BitWriter::new();
        writer.write_bits(0x09, 8);
        writer.write_bits(0b111, 3);
        writer.rbsp_trailing_bits();
        header.append_nal(writer).unwrap();
        assert_eq!(header.data(), &[0, 0, 0, 1, 0x09, 0b1111_0000]);
        assert_eq!(header.bit_len(), 6 * 8 - 4);
    }
}
