//! AV1 parameter buffers handed to the device.

use crate::encoder::device::{OutputBufferId, SurfaceId};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Av1SequenceParams {
    pub seq_profile: u8,
    pub seq_level_idx: u8,
    pub seq_tier: bool,
    pub order_hint_bits_minus_1: u8,
    pub intra_period: u32,
    pub ip_period: u32,
    pub bits_per_second: u32,
    pub enable_order_hint: bool,
    pub enable_cdef: bool,
    pub use_128x128_superblock: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Av1PictureParams {
    pub frame_width_minus_1: u16,
    pub frame_height_minus_1: u16,
    pub reconstructed_frame: Option<SurfaceId>,
    pub coded_buf: Option<OutputBufferId>,
    /// Surfaces in the eight reference slots.
    pub reference_frames: [Option<SurfaceId>; 8],
    /// Slot used by each of LAST..ALTREF.
    pub ref_frame_idx: [u8; 7],
    pub primary_ref_frame: u8,
    pub order_hint: u8,
    pub refresh_frame_flags: u8,
    /// Motion search order per list, as reference names (1 = LAST); zero ends.
    pub ref_frame_ctrl: [[u8; 7]; 2],
    pub base_qindex: u8,
    pub min_base_qindex: u8,
    pub max_base_qindex: u8,
    pub frame_type: u8,
    pub error_resilient_mode: bool,
    pub disable_frame_recon: bool,
    /// 0 single reference, 2 reference select.
    pub reference_mode: u8,
    pub tx_mode: u8,
    pub tile_cols: u8,
    pub tile_rows: u8,
    pub width_in_sbs_minus_1: Vec<u16>,
    pub height_in_sbs_minus_1: Vec<u16>,
    pub tile_group_obu_hdr_info: bool,
    pub bit_offset_qindex: u32,
    pub bit_offset_loopfilter_params: u32,
    pub bit_offset_cdef_params: u32,
    pub size_in_bits_cdef_params: u32,
    pub byte_offset_frame_hdr_obu_size: u32,
    pub size_in_bits_frame_hdr_obu: u32,
}

/// One tile group; tiles are numbered in raster order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Av1TileGroupParams {
    pub tg_start: u16,
    pub tg_end: u16,
}
