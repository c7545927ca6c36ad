//! Annex-B byte-stream packing for H.264/H.265 NAL units.
//!
//! A raw NAL unit (header plus RBSP) is copied behind a four byte start code
//! and every `00 00 0x` (x <= 3) sequence is broken with an emulation
//! prevention `03` byte.

use super::ratecontrol::reduce;
use crate::error::{EncodeError, Result};

const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// Copy `src` (of `src_bits` bits) into `dst` as a byte-stream NAL unit.
///
/// Returns the number of meaningful bits written, which excludes the zero
/// padding after the RBSP stop bit. Fails with `NoSpace` instead of writing
/// past the end of `dst`.
pub fn nal_unit_to_byte_stream(dst: &mut [u8], src: &[u8], src_bits: usize) -> Result<usize> {
    let src_len = (src_bits + 7) / 8;
    let src = &src[..src_len.min(src.len())];
    let needed_min = (src.len() + START_CODE.len()) * 8;

    if dst.len() < src.len() + START_CODE.len() {
        return Err(EncodeError::no_space(needed_min, dst.len() * 8));
    }

    dst[..4].copy_from_slice(&START_CODE);
    let mut dp = START_CODE.len();
    let mut zero_run = 0;

    for &byte in src {
        if zero_run < 2 {
            if byte == 0 {
                zero_run += 1;
            } else {
                zero_run = 0;
            }
        } else {
            if byte & !3 == 0 {
                if dp >= dst.len() {
                    return Err(EncodeError::no_space(needed_min + 8, dst.len() * 8));
                }
                dst[dp] = 3;
                dp += 1;
            }
            zero_run = (byte == 0) as u32;
        }
        if dp >= dst.len() {
            return Err(EncodeError::no_space(needed_min + 8, dst.len() * 8));
        }
        dst[dp] = byte;
        dp += 1;
    }

    let trailing_zeroes = match dst[dp - 1] {
        0 => 0,
        last => last.trailing_zeros() as usize,
    };
    Ok(dp * 8 - trailing_zeroes)
}

/// Split an Annex-B stream into NAL unit payloads with emulation prevention
/// bytes removed.
pub fn split_byte_stream(stream: &[u8]) -> Vec<Vec<u8>> {
    let mut units = Vec::new();
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 3 <= stream.len() {
        if stream[i] == 0 && stream[i + 1] == 0 && stream[i + 2] == 1 {
            starts.push(i + 3);
            i += 3;
        } else {
            i += 1;
        }
    }

    for (n, &start) in starts.iter().enumerate() {
        let mut end = match starts.get(n + 1) {
            Some(&next) => next - 3,
            None => stream.len(),
        };
        // The leading zero of a four byte start code belongs to the next unit.
        while end > start && n + 1 < starts.len() && stream[end - 1] == 0 {
            end -= 1;
        }
        units.push(remove_emulation_prevention(&stream[start..end]));
    }
    units
}

fn remove_emulation_prevention(escaped: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(escaped.len());
    let mut zero_run = 0;
    for &byte in escaped {
        if zero_run >= 2 && byte == 3 {
            zero_run = 0;
            continue;
        }
        zero_run = if byte == 0 { zero_run + 1 } else { 0 };
        out.push(byte);
    }
    out
}

/// Sample aspect ratios with an `aspect_ratio_idc` in the H.264 and H.265
/// VUI (Table E-1), starting at idc 1.
const SAMPLE_ASPECT_RATIOS: [(u32, u32); 16] = [
    (1, 1),
    (12, 11),
    (10, 11),
    (16, 11),
    (40, 33),
    (24, 11),
    (20, 11),
    (32, 11),
    (80, 33),
    (18, 11),
    (15, 11),
    (64, 33),
    (160, 99),
    (4, 3),
    (3, 2),
    (2, 1),
];

/// VUI `aspect_ratio_idc`, `sar_width` and `sar_height` for a sample
/// aspect ratio. Ratios outside the table use idc 255 with the ratio
/// reduced to 16-bit terms.
pub fn aspect_ratio_idc(num: u32, den: u32) -> (u8, u16, u16) {
    let (num, den) = reduce(num as u64, den as u64, u16::MAX as u64);
    match SAMPLE_ASPECT_RATIOS.iter().position(|&sar| sar == (num, den)) {
        Some(i) => (i as u8 + 1, 0, 0),
        None => (255, num as u16, den as u16),
    }
}
