//! H.265 parameter buffers handed to the device.

use crate::encoder::device::{OutputBufferId, SurfaceId};

/// A picture as referenced from parameter buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct H265PictureRef {
    pub surface: SurfaceId,
    pub pic_order_cnt: i32,
    /// Before the current picture in output order and used by it.
    pub rps_st_curr_before: bool,
    /// After the current picture in output order and used by it.
    pub rps_st_curr_after: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct H265SequenceParams {
    pub general_profile_idc: u8,
    pub general_level_idc: u8,
    pub general_tier_flag: bool,
    pub intra_period: u32,
    pub intra_idr_period: u32,
    pub ip_period: u32,
    pub bits_per_second: u32,
    pub pic_width_in_luma_samples: u32,
    pub pic_height_in_luma_samples: u32,
    pub chroma_format_idc: u8,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    pub log2_min_luma_coding_block_size_minus3: u8,
    pub log2_diff_max_min_luma_coding_block_size: u8,
    pub log2_min_transform_block_size_minus2: u8,
    pub log2_diff_max_min_transform_block_size: u8,
    pub max_transform_hierarchy_depth_inter: u8,
    pub max_transform_hierarchy_depth_intra: u8,
    pub amp_enabled_flag: bool,
    pub sample_adaptive_offset_enabled_flag: bool,
    pub pcm_enabled_flag: bool,
    pub sps_temporal_mvp_enabled_flag: bool,
    pub strong_intra_smoothing_enabled_flag: bool,
    pub vui_parameters_present_flag: bool,
    pub aspect_ratio_idc: u8,
    pub sar_width: u16,
    pub sar_height: u16,
    pub num_units_in_tick: u32,
    pub time_scale: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct H265PictureParams {
    pub decoded_curr_pic: Option<H265PictureRef>,
    pub reference_frames: Vec<H265PictureRef>,
    pub coded_buf: Option<OutputBufferId>,
    pub collocated_ref_pic_index: Option<u8>,
    pub pic_init_qp: u8,
    pub diff_cu_qp_delta_depth: u8,
    pub pps_cb_qp_offset: i8,
    pub pps_cr_qp_offset: i8,
    pub num_tile_columns_minus1: u32,
    pub num_tile_rows_minus1: u32,
    pub column_width_minus1: Vec<u32>,
    pub row_height_minus1: Vec<u32>,
    pub log2_parallel_merge_level_minus2: u8,
    pub ctu_max_bitsize_allowed: u32,
    pub num_ref_idx_l0_default_active_minus1: u8,
    pub num_ref_idx_l1_default_active_minus1: u8,
    pub slice_pic_parameter_set_id: u8,
    pub nal_unit_type: u8,
    pub idr_pic_flag: bool,
    pub coding_type: u8,
    pub reference_pic_flag: bool,
    pub cu_qp_delta_enabled_flag: bool,
    pub tiles_enabled_flag: bool,
    pub pps_loop_filter_across_slices_enabled_flag: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct H265SliceParams {
    pub slice_segment_address: u32,
    pub num_ctu_in_slice: u32,
    pub slice_type: u8,
    pub slice_pic_parameter_set_id: u8,
    pub num_ref_idx_l0_active_minus1: u8,
    pub num_ref_idx_l1_active_minus1: u8,
    pub ref_pic_list0: Vec<H265PictureRef>,
    pub ref_pic_list1: Vec<H265PictureRef>,
    pub max_num_merge_cand: u8,
    pub slice_qp_delta: i32,
    pub slice_cb_qp_offset: i8,
    pub slice_cr_qp_offset: i8,
    pub last_slice_of_pic_flag: bool,
    pub slice_sao_luma_flag: bool,
    pub slice_sao_chroma_flag: bool,
    pub slice_temporal_mvp_enabled_flag: bool,
    pub num_entry_point_offsets: u32,
    pub collocated_from_l0_flag: bool,
    pub slice_loop_filter_across_slices_enabled_flag: bool,
}
