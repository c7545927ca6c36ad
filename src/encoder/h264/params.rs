//! H.264 parameter buffers handed to the device.

use crate::encoder::device::{OutputBufferId, SurfaceId};

use super::headers::FrameCrop;

/// A picture as referenced from parameter buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct H264PictureRef {
    pub surface: SurfaceId,
    pub frame_idx: u32,
    pub pic_order_cnt: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct H264SequenceParams {
    pub seq_parameter_set_id: u8,
    pub level_idc: u8,
    pub intra_period: u32,
    pub intra_idr_period: u32,
    pub ip_period: u32,
    pub bits_per_second: u32,
    pub max_num_ref_frames: u32,
    pub picture_width_in_mbs: u32,
    pub picture_height_in_mbs: u32,
    pub chroma_format_idc: u8,
    pub frame_mbs_only_flag: bool,
    pub direct_8x8_inference_flag: bool,
    pub log2_max_frame_num_minus4: u8,
    pub pic_order_cnt_type: u8,
    pub log2_max_pic_order_cnt_lsb_minus4: u8,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    pub frame_crop: Option<FrameCrop>,
    pub vui_parameters_present_flag: bool,
    pub aspect_ratio_idc: u8,
    pub sar_width: u16,
    pub sar_height: u16,
    pub num_units_in_tick: u32,
    pub time_scale: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct H264PictureParams {
    pub curr_pic: Option<H264PictureRef>,
    pub reference_frames: Vec<H264PictureRef>,
    pub coded_buf: Option<OutputBufferId>,
    pub pic_parameter_set_id: u8,
    pub seq_parameter_set_id: u8,
    pub pic_init_qp: u8,
    pub num_ref_idx_l0_active_minus1: u8,
    pub num_ref_idx_l1_active_minus1: u8,
    pub frame_num: u32,
    pub idr_pic_flag: bool,
    pub reference_pic_flag: bool,
    pub entropy_coding_mode_flag: bool,
    pub transform_8x8_mode_flag: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct H264SliceParams {
    pub macroblock_address: u32,
    pub num_macroblocks: u32,
    /// Slice type without the +5 offset.
    pub slice_type: u8,
    pub pic_parameter_set_id: u8,
    pub idr_pic_id: u16,
    pub pic_order_cnt_lsb: u32,
    pub direct_spatial_mv_pred_flag: bool,
    pub ref_pic_list0: Vec<H264PictureRef>,
    pub ref_pic_list1: Vec<H264PictureRef>,
    pub slice_qp_delta: i32,
}
