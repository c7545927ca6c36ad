//! MPEG-2 video header syntax (ITU-T H.262 section 6.2) and its writers.
//!
//! Every header starts with its start code and ends byte aligned, so the
//! output of consecutive writers can be concatenated directly.

use crate::encoder::bitwriter::BitWriter;

pub const PICTURE_START_CODE: u32 = 0x0000_0100;
pub const SEQUENCE_HEADER_CODE: u32 = 0x0000_01b3;
pub const EXTENSION_START_CODE: u32 = 0x0000_01b5;
pub const GROUP_START_CODE: u32 = 0x0000_01b8;

const EXTENSION_SEQUENCE: u8 = 1;
const EXTENSION_SEQUENCE_DISPLAY: u8 = 2;
const EXTENSION_PICTURE_CODING: u8 = 8;

pub const PICTURE_CODING_I: u8 = 1;
pub const PICTURE_CODING_P: u8 = 2;
pub const PICTURE_CODING_B: u8 = 3;

/// Picture structure of a progressive frame.
pub const FRAME_PICTURE: u8 = 3;

/// `frame_rate_code` values 1..=8 as exact rationals.
pub const FRAME_RATES: [(u32, u32); 8] = [
    (24000, 1001),
    (24, 1),
    (25, 1),
    (30000, 1001),
    (30, 1),
    (50, 1),
    (60000, 1001),
    (60, 1),
];

fn start_code(w: &mut BitWriter, code: u32) {
    w.write_bits(code as u64, 32);
}

fn marker(w: &mut BitWriter) {
    w.write_flag(true);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SequenceHeader {
    pub horizontal_size_value: u16,
    pub vertical_size_value: u16,
    pub aspect_ratio_information: u8,
    pub frame_rate_code: u8,
    /// Units of 400 bit/s, low 18 bits.
    pub bit_rate_value: u32,
    /// Units of 16 kbit, low 10 bits.
    pub vbv_buffer_size_value: u16,
    pub constrained_parameters_flag: bool,
}

impl SequenceHeader {
    pub fn write(&self, w: &mut BitWriter) {
        start_code(w, SEQUENCE_HEADER_CODE);
        w.write_bits(self.horizontal_size_value as u64, 12);
        w.write_bits(self.vertical_size_value as u64, 12);
        w.write_bits(self.aspect_ratio_information as u64, 4);
        w.write_bits(self.frame_rate_code as u64, 4);
        w.write_bits(self.bit_rate_value as u64, 18);
        marker(w);
        w.write_bits(self.vbv_buffer_size_value as u64, 10);
        w.write_flag(self.constrained_parameters_flag);
        w.write_flag(false); // load_intra_quantiser_matrix
        w.write_flag(false); // load_non_intra_quantiser_matrix
        w.byte_align();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SequenceExtension {
    pub profile_and_level_indication: u8,
    pub progressive_sequence: bool,
    pub chroma_format: u8,
    pub horizontal_size_extension: u8,
    pub vertical_size_extension: u8,
    pub bit_rate_extension: u16,
    pub vbv_buffer_size_extension: u8,
    pub low_delay: bool,
    pub frame_rate_extension_n: u8,
    pub frame_rate_extension_d: u8,
}

impl SequenceExtension {
    pub fn write(&self, w: &mut BitWriter) {
        start_code(w, EXTENSION_START_CODE);
        w.write_bits(EXTENSION_SEQUENCE as u64, 4);
        w.write_bits(self.profile_and_level_indication as u64, 8);
        w.write_flag(self.progressive_sequence);
        w.write_bits(self.chroma_format as u64, 2);
        w.write_bits(self.horizontal_size_extension as u64, 2);
        w.write_bits(self.vertical_size_extension as u64, 2);
        w.write_bits(self.bit_rate_extension as u64, 12);
        marker(w);
        w.write_bits(self.vbv_buffer_size_extension as u64, 8);
        w.write_flag(self.low_delay);
        w.write_bits(self.frame_rate_extension_n as u64, 2);
        w.write_bits(self.frame_rate_extension_d as u64, 5);
        w.byte_align();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SequenceDisplayExtension {
    pub video_format: u8,
    pub colour_description: bool,
    pub colour_primaries: u8,
    pub transfer_characteristics: u8,
    pub matrix_coefficients: u8,
    pub display_horizontal_size: u16,
    pub display_vertical_size: u16,
}

impl SequenceDisplayExtension {
    pub fn write(&self, w: &mut BitWriter) {
        start_code(w, EXTENSION_START_CODE);
        w.write_bits(EXTENSION_SEQUENCE_DISPLAY as u64, 4);
        w.write_bits(self.video_format as u64, 3);
        w.write_flag(self.colour_description);
        if self.colour_description {
            w.write_bits(self.colour_primaries as u64, 8);
            w.write_bits(self.transfer_characteristics as u64, 8);
            w.write_bits(self.matrix_coefficients as u64, 8);
        }
        w.write_bits(self.display_horizontal_size as u64, 14);
        marker(w);
        w.write_bits(self.display_vertical_size as u64, 14);
        w.byte_align();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GopHeader {
    /// 25-bit SMPTE time code including its marker bit.
    pub time_code: u32,
    pub closed_gop: bool,
    pub broken_link: bool,
}

impl GopHeader {
    /// Time code of zero with the marker bit set.
    pub const ZERO_TIME_CODE: u32 = 1 << 12;

    pub fn write(&self, w: &mut BitWriter) {
        start_code(w, GROUP_START_CODE);
        w.write_bits(self.time_code as u64, 25);
        w.write_flag(self.closed_gop);
        w.write_flag(self.broken_link);
        w.byte_align();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PictureHeader {
    pub temporal_reference: u16,
    pub picture_coding_type: u8,
    pub vbv_delay: u16,
}

impl PictureHeader {
    pub fn write(&self, w: &mut BitWriter) {
        start_code(w, PICTURE_START_CODE);
        w.write_bits(self.temporal_reference as u64, 10);
        w.write_bits(self.picture_coding_type as u64, 3);
        w.write_bits(self.vbv_delay as u64, 16);
        if self.picture_coding_type == PICTURE_CODING_P || self.picture_coding_type == PICTURE_CODING_B {
            w.write_flag(false); // full_pel_forward_vector
            w.write_bits(7, 3); // forward_f_code
        }
        if self.picture_coding_type == PICTURE_CODING_B {
            w.write_flag(false); // full_pel_backward_vector
            w.write_bits(7, 3); // backward_f_code
        }
        w.write_flag(false); // extra_bit_picture
        w.byte_align();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PictureCodingExtension {
    /// `[forward, backward][horizontal, vertical]`, 15 when unused.
    pub f_code: [[u8; 2]; 2],
    pub intra_dc_precision: u8,
    pub picture_structure: u8,
    pub top_field_first: bool,
    pub frame_pred_frame_dct: bool,
    pub concealment_motion_vectors: bool,
    pub q_scale_type: bool,
    pub intra_vlc_format: bool,
    pub alternate_scan: bool,
    pub repeat_first_field: bool,
    pub chroma_420_type: bool,
    pub progressive_frame: bool,
}

impl PictureCodingExtension {
    pub fn write(&self, w: &mut BitWriter) {
        start_code(w, EXTENSION_START_CODE);
        w.write_bits(EXTENSION_PICTURE_CODING as u64, 4);
        for direction in self.f_code {
            for code in direction {
                w.write_bits(code as u64, 4);
            }
        }
        w.write_bits(self.intra_dc_precision as u64, 2);
        w.write_bits(self.picture_structure as u64, 2);
        w.write_flag(self.top_field_first);
        w.write_flag(self.frame_pred_frame_dct);
        w.write_flag(self.concealment_motion_vectors);
        w.write_flag(self.q_scale_type);
        w.write_flag(self.intra_vlc_format);
        w.write_flag(self.alternate_scan);
        w.write_flag(self.repeat_first_field);
        w.write_flag(self.chroma_420_type);
        w.write_flag(self.progressive_frame);
        w.write_flag(false); // composite_display_flag
        w.byte_align();
    }
}
