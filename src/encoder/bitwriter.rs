//! Shared bit writer for every header writer (H.264, H.265, AV1, MPEG-2, VP9).

/// Small bit writer used to assemble RBSP, OBU payloads and start-code
/// delimited MPEG-2 headers.
#[derive(Default, Debug, Clone)]
pub struct BitWriter {
    data: Vec<u8>,
    current_byte: u8,
    bit_position: u8, // number of bits currently written into current_byte (0-7)
}

impl BitWriter {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            current_byte: 0,
            bit_position: 0,
        }
    }

    /// Write the low `num_bits` bits of `value`, most significant first.
    pub fn write_bits(&mut self, mut value: u64, mut num_bits: u8) {
        debug_assert!(num_bits <= 64);
        if num_bits == 0 {
            return;
        }
        if num_bits < 64 {
            value &= (1u64 << num_bits) - 1;
        }

        while num_bits > 0 {
            let space = 8 - self.bit_position;
            let take = std::cmp::min(space, num_bits);

            let shift = num_bits - take;
            let bits = ((value >> shift) & ((1u64 << take) - 1)) as u8;

            // A u8 cannot be shifted by 8.
            if take == 8 {
                self.current_byte = bits;
            } else {
                self.current_byte = (self.current_byte << take) | bits;
            }
            self.bit_position += take;
            num_bits -= take;
            if shift > 0 {
                value &= (1u64 << shift) - 1;
            } else {
                value = 0;
            }

            if self.bit_position == 8 {
                self.data.push(self.current_byte);
                self.current_byte = 0;
                self.bit_position = 0;
            }
        }
    }

    pub fn write_flag(&mut self, flag: bool) {
        self.write_bits(flag as u64, 1);
    }

    /// Unsigned Exp-Golomb code.
    pub fn write_ue(&mut self, value: u32) {
        self.write_exp_golomb(value as u64);
    }

    /// Signed Exp-Golomb code.
    pub fn write_se(&mut self, value: i32) {
        let value = value as i64;
        // i32::MIN maps to 2^32, one past the u32 range.
        let code_num = if value <= 0 { -2 * value } else { 2 * value - 1 };
        self.write_exp_golomb(code_num as u64);
    }

    fn write_exp_golomb(&mut self, code_num: u64) {
        let code = code_num + 1;
        let num_bits = 64 - code.leading_zeros() as u8;
        let leading_zeros = num_bits - 1;

        self.write_bits(0, leading_zeros);
        self.write_bits(code, num_bits);
    }

    /// Two's complement signed field of `num_bits` bits (AV1 `su(n)`).
    pub fn write_su(&mut self, value: i32, num_bits: u8) {
        let mask = (1u64 << num_bits) - 1;
        self.write_bits(value as i64 as u64 & mask, num_bits);
    }

    /// AV1 `ns(n)`: a non-symmetric unsigned code for `value < n`.
    pub fn write_ns(&mut self, value: u32, n: u32) {
        debug_assert!(value < n);
        let w = 32 - n.leading_zeros() as u8;
        let m = (1u32 << w) - n;
        if value < m {
            self.write_bits(value as u64, w - 1);
        } else {
            let t = value + m;
            self.write_bits((t >> 1) as u64, w - 1);
            self.write_bits((t & 1) as u64, 1);
        }
    }

    pub fn rbsp_trailing_bits(&mut self) {
        self.write_bits(1, 1);
        self.byte_align();
    }

    /// Pad with zero bits up to the next byte boundary.
    pub fn byte_align(&mut self) {
        if self.bit_position != 0 {
            let pad = 8 - self.bit_position;
            self.write_bits(0, pad);
        }
    }

    pub fn is_byte_aligned(&self) -> bool {
        self.bit_position == 0
    }

    /// Number of bits written so far.
    pub fn bit_count(&self) -> usize {
        self.data.len() * 8 + self.bit_position as usize
    }

    /// Append whole bytes. The writer must be byte aligned.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        if self.is_byte_aligned() {
            self.data.extend_from_slice(bytes);
        } else {
            for &b in bytes {
                self.write_bits(b as u64, 8);
            }
        }
    }

    pub fn finish(mut self) -> Vec<u8> {
        if self.bit_position != 0 {
            // left-align the current partial byte
            self.current_byte <<= 8 - self.bit_position;
            self.data.push(self.current_byte);
        }
        self.data
    }

    /// Finish and return the bytes together with the exact bit length.
    pub fn finish_with_len(self) -> (Vec<u8>, usize) {
        let bits = self.bit_count();
        (self.finish(), bits)
    }
}
