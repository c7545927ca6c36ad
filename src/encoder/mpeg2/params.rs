//! MPEG-2 parameter buffers handed to the device.

use crate::encoder::device::{OutputBufferId, SurfaceId};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Mpeg2SequenceParams {
    pub intra_period: u32,
    pub ip_period: u32,
    pub picture_width: u16,
    pub picture_height: u16,
    pub bits_per_second: u32,
    pub frame_rate: f32,
    pub aspect_ratio_information: u8,
    /// Bits.
    pub vbv_buffer_size: u32,
    pub profile_and_level_indication: u8,
    pub progressive_sequence: bool,
    pub chroma_format: u8,
    pub low_delay: bool,
    pub frame_rate_extension_n: u8,
    pub frame_rate_extension_d: u8,
    pub new_gop_header: bool,
    pub time_code: u32,
    pub closed_gop: bool,
    pub broken_link: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Mpeg2PictureParams {
    pub reconstructed_picture: Option<SurfaceId>,
    pub coded_buf: Option<OutputBufferId>,
    pub forward_reference_picture: Option<SurfaceId>,
    pub backward_reference_picture: Option<SurfaceId>,
    pub picture_type: u8,
    pub temporal_reference: u16,
    pub vbv_delay: u16,
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
    pub progressive_frame: bool,
    pub composite_display_flag: bool,
}

/// One row-aligned run of macroblocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Mpeg2SliceParams {
    pub macroblock_address: u32,
    pub num_macroblocks: u32,
    pub quantiser_scale_code: u8,
    pub is_intra_slice: bool,
}
