//! H.265 header syntax and its bitstream writers.
//!
//! Only a single temporal sub-layer is produced. Syntax elements this
//! encoder always codes as zero have no field and are written inline.

use crate::encoder::bitwriter::BitWriter;
use crate::error::{EncodeError, Result};

pub const NAL_TRAIL_N: u8 = 0;
pub const NAL_TRAIL_R: u8 = 1;
pub const NAL_RASL_N: u8 = 8;
pub const NAL_RASL_R: u8 = 9;
pub const NAL_BLA_W_LP: u8 = 16;
pub const NAL_IDR_W_RADL: u8 = 19;
pub const NAL_IDR_N_LP: u8 = 20;
pub const NAL_CRA: u8 = 21;
pub const NAL_RSV_IRAP_23: u8 = 23;
pub const NAL_VPS: u8 = 32;
pub const NAL_SPS: u8 = 33;
pub const NAL_PPS: u8 = 34;
pub const NAL_AUD: u8 = 35;
pub const NAL_PREFIX_SEI: u8 = 39;

pub const SLICE_B: u8 = 0;
pub const SLICE_P: u8 = 1;
pub const SLICE_I: u8 = 2;

const SEI_MASTERING_DISPLAY_COLOUR_VOLUME: u8 = 137;
const SEI_CONTENT_LIGHT_LEVEL_INFO: u8 = 144;

fn unsupported(what: &str) -> EncodeError {
    EncodeError::Unsupported(format!("H.265 {what} is not supported"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NalHeader {
    pub nal_unit_type: u8,
    pub nuh_layer_id: u8,
    pub nuh_temporal_id_plus1: u8,
}

impl NalHeader {
    /// Base layer, lowest temporal sub-layer.
    pub fn new(nal_unit_type: u8) -> Self {
        Self {
            nal_unit_type,
            nuh_layer_id: 0,
            nuh_temporal_id_plus1: 1,
        }
    }

    fn write(&self, w: &mut BitWriter) {
        w.write_bits(0, 1); // forbidden_zero_bit
        w.write_bits(self.nal_unit_type as u64, 6);
        w.write_bits(self.nuh_layer_id as u64, 6);
        w.write_bits(self.nuh_temporal_id_plus1 as u64, 3);
    }
}

/// General profile, tier and level (7.3.3) without sub-layer entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProfileTierLevel {
    pub general_profile_space: u8,
    pub general_tier_flag: bool,
    pub general_profile_idc: u8,
    /// Bit `j` is `general_profile_compatibility_flag[j]`.
    pub general_profile_compatibility: u32,
    pub general_progressive_source_flag: bool,
    pub general_interlaced_source_flag: bool,
    pub general_non_packed_constraint_flag: bool,
    pub general_frame_only_constraint_flag: bool,
    pub general_max_14bit_constraint_flag: bool,
    pub general_max_12bit_constraint_flag: bool,
    pub general_max_10bit_constraint_flag: bool,
    pub general_max_8bit_constraint_flag: bool,
    pub general_max_422chroma_constraint_flag: bool,
    pub general_max_420chroma_constraint_flag: bool,
    pub general_max_monochrome_constraint_flag: bool,
    pub general_intra_constraint_flag: bool,
    pub general_one_picture_only_constraint_flag: bool,
    pub general_lower_bit_rate_constraint_flag: bool,
    pub general_inbld_flag: bool,
    pub general_level_idc: u8,
}

impl ProfileTierLevel {
    pub fn compatible(&self, profile: u8) -> bool {
        profile < 32 && self.general_profile_compatibility & (1 << profile) != 0
    }

    pub fn set_compatible(&mut self, profile: u8) {
        self.general_profile_compatibility |= 1 << profile;
    }

    fn profile_in(&self, profiles: &[u8]) -> bool {
        profiles
            .iter()
            .any(|&p| self.general_profile_idc == p || self.compatible(p))
    }

    fn write(&self, w: &mut BitWriter) {
        w.write_bits(self.general_profile_space as u64, 2);
        w.write_flag(self.general_tier_flag);
        w.write_bits(self.general_profile_idc as u64, 5);
        for j in 0..32 {
            w.write_flag(self.compatible(j));
        }
        w.write_flag(self.general_progressive_source_flag);
        w.write_flag(self.general_interlaced_source_flag);
        w.write_flag(self.general_non_packed_constraint_flag);
        w.write_flag(self.general_frame_only_constraint_flag);

        if self.profile_in(&[4, 5, 6, 7, 8, 9, 10, 11]) {
            w.write_flag(self.general_max_12bit_constraint_flag);
            w.write_flag(self.general_max_10bit_constraint_flag);
            w.write_flag(self.general_max_8bit_constraint_flag);
            w.write_flag(self.general_max_422chroma_constraint_flag);
            w.write_flag(self.general_max_420chroma_constraint_flag);
            w.write_flag(self.general_max_monochrome_constraint_flag);
            w.write_flag(self.general_intra_constraint_flag);
            w.write_flag(self.general_one_picture_only_constraint_flag);
            w.write_flag(self.general_lower_bit_rate_constraint_flag);
            if self.profile_in(&[5, 9, 10, 11]) {
                w.write_flag(self.general_max_14bit_constraint_flag);
                w.write_bits(0, 33);
            } else {
                w.write_bits(0, 34);
            }
        } else if self.profile_in(&[2]) {
            w.write_bits(0, 7);
            w.write_flag(self.general_one_picture_only_constraint_flag);
            w.write_bits(0, 35);
        } else {
            w.write_bits(0, 43);
        }

        if self.profile_in(&[1, 2, 3, 4, 5, 9, 11]) {
            w.write_flag(self.general_inbld_flag);
        } else {
            w.write_bits(0, 1);
        }
        w.write_bits(self.general_level_idc as u64, 8);
    }
}

/// Timing shared by the VPS and the VUI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimingInfo {
    pub num_units_in_tick: u32,
    pub time_scale: u32,
    /// `num_ticks_poc_diff_one_minus1` when POC is proportional to timing.
    pub num_ticks_poc_diff_one_minus1: Option<u32>,
}

impl TimingInfo {
    fn write(&self, w: &mut BitWriter) {
        w.write_bits(self.num_units_in_tick as u64, 32);
        w.write_bits(self.time_scale as u64, 32);
        w.write_flag(self.num_ticks_poc_diff_one_minus1.is_some());
        if let Some(ticks) = self.num_ticks_poc_diff_one_minus1 {
            w.write_ue(ticks);
        }
    }
}

/// DPB sizing for the single sub-layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubLayerOrdering {
    pub max_dec_pic_buffering_minus1: u32,
    pub max_num_reorder_pics: u32,
    pub max_latency_increase_plus1: u32,
}

impl SubLayerOrdering {
    fn write(&self, w: &mut BitWriter) {
        w.write_ue(self.max_dec_pic_buffering_minus1);
        w.write_ue(self.max_num_reorder_pics);
        w.write_ue(self.max_latency_increase_plus1);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Vps {
    pub nal: NalHeader,
    pub vps_video_parameter_set_id: u8,
    pub vps_base_layer_internal_flag: bool,
    pub vps_base_layer_available_flag: bool,
    pub vps_max_layers_minus1: u8,
    pub vps_max_sub_layers_minus1: u8,
    pub vps_temporal_id_nesting_flag: bool,
    pub profile_tier_level: ProfileTierLevel,
    pub vps_sub_layer_ordering_info_present_flag: bool,
    pub ordering: SubLayerOrdering,
    pub vps_max_layer_id: u8,
    pub vps_num_layer_sets_minus1: u32,
    pub timing: Option<TimingInfo>,
}

impl Vps {
    pub fn write(&self, w: &mut BitWriter) -> Result<()> {
        if self.vps_max_sub_layers_minus1 > 0 {
            return Err(unsupported("temporal sub-layering"));
        }
        if self.vps_num_layer_sets_minus1 > 0 {
            return Err(unsupported("multiple layer sets"));
        }
        self.nal.write(w);
        w.write_bits(self.vps_video_parameter_set_id as u64, 4);
        w.write_flag(self.vps_base_layer_internal_flag);
        w.write_flag(self.vps_base_layer_available_flag);
        w.write_bits(self.vps_max_layers_minus1 as u64, 6);
        w.write_bits(self.vps_max_sub_layers_minus1 as u64, 3);
        w.write_flag(self.vps_temporal_id_nesting_flag);
        w.write_bits(0xffff, 16); // vps_reserved_0xffff_16bits
        self.profile_tier_level.write(w);
        w.write_flag(self.vps_sub_layer_ordering_info_present_flag);
        self.ordering.write(w);
        w.write_bits(self.vps_max_layer_id as u64, 6);
        w.write_ue(self.vps_num_layer_sets_minus1);
        w.write_flag(self.timing.is_some());
        if let Some(timing) = &self.timing {
            timing.write(w);
            w.write_ue(0); // vps_num_hrd_parameters
        }
        w.write_flag(false); // vps_extension_flag
        w.rbsp_trailing_bits();
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConformanceWindow {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pcm {
    pub sample_bit_depth_luma_minus1: u8,
    pub sample_bit_depth_chroma_minus1: u8,
    pub log2_min_pcm_luma_coding_block_size_minus3: u32,
    pub log2_diff_max_min_pcm_luma_coding_block_size: u32,
    pub loop_filter_disabled_flag: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BitstreamRestriction {
    pub tiles_fixed_structure_flag: bool,
    pub motion_vectors_over_pic_boundaries_flag: bool,
    pub restricted_ref_pic_lists_flag: bool,
    pub min_spatial_segmentation_idc: u32,
    pub max_bytes_per_pic_denom: u32,
    pub max_bits_per_min_cu_denom: u32,
    pub log2_max_mv_length_horizontal: u32,
    pub log2_max_mv_length_vertical: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Vui {
    pub aspect_ratio_info_present_flag: bool,
    pub aspect_ratio_idc: u8,
    pub sar_width: u16,
    pub sar_height: u16,

    pub video_signal_type_present_flag: bool,
    pub video_format: u8,
    pub video_full_range_flag: bool,
    pub colour_description_present_flag: bool,
    pub colour_primaries: u8,
    pub transfer_characteristics: u8,
    pub matrix_coefficients: u8,

    pub chroma_loc_info_present_flag: bool,
    pub chroma_sample_loc_type_top_field: u8,
    pub chroma_sample_loc_type_bottom_field: u8,

    pub timing: Option<TimingInfo>,
    pub bitstream_restriction: Option<BitstreamRestriction>,
}

impl Vui {
    fn write(&self, w: &mut BitWriter) {
        w.write_flag(self.aspect_ratio_info_present_flag);
        if self.aspect_ratio_info_present_flag {
            w.write_bits(self.aspect_ratio_idc as u64, 8);
            if self.aspect_ratio_idc == 255 {
                w.write_bits(self.sar_width as u64, 16);
                w.write_bits(self.sar_height as u64, 16);
            }
        }
        w.write_flag(false); // overscan_info_present_flag

        w.write_flag(self.video_signal_type_present_flag);
        if self.video_signal_type_present_flag {
            w.write_bits(self.video_format as u64, 3);
            w.write_flag(self.video_full_range_flag);
            w.write_flag(self.colour_description_present_flag);
            if self.colour_description_present_flag {
                w.write_bits(self.colour_primaries as u64, 8);
                w.write_bits(self.transfer_characteristics as u64, 8);
                w.write_bits(self.matrix_coefficients as u64, 8);
            }
        }

        w.write_flag(self.chroma_loc_info_present_flag);
        if self.chroma_loc_info_present_flag {
            w.write_ue(self.chroma_sample_loc_type_top_field as u32);
            w.write_ue(self.chroma_sample_loc_type_bottom_field as u32);
        }

        w.write_flag(false); // neutral_chroma_indication_flag
        w.write_flag(false); // field_seq_flag
        w.write_flag(false); // frame_field_info_present_flag
        w.write_flag(false); // default_display_window_flag

        w.write_flag(self.timing.is_some());
        if let Some(timing) = &self.timing {
            timing.write(w);
            w.write_flag(false); // vui_hrd_parameters_present_flag
        }

        w.write_flag(self.bitstream_restriction.is_some());
        if let Some(br) = &self.bitstream_restriction {
            w.write_flag(br.tiles_fixed_structure_flag);
            w.write_flag(br.motion_vectors_over_pic_boundaries_flag);
            w.write_flag(br.restricted_ref_pic_lists_flag);
            w.write_ue(br.min_spatial_segmentation_idc);
            w.write_ue(br.max_bytes_per_pic_denom);
            w.write_ue(br.max_bits_per_min_cu_denom);
            w.write_ue(br.log2_max_mv_length_horizontal);
            w.write_ue(br.log2_max_mv_length_vertical);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Sps {
    pub nal: NalHeader,
    pub sps_video_parameter_set_id: u8,
    pub sps_max_sub_layers_minus1: u8,
    pub sps_temporal_id_nesting_flag: bool,
    pub profile_tier_level: ProfileTierLevel,
    pub sps_seq_parameter_set_id: u8,
    pub chroma_format_idc: u8,
    pub pic_width_in_luma_samples: u32,
    pub pic_height_in_luma_samples: u32,
    pub conformance_window: Option<ConformanceWindow>,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    pub log2_max_pic_order_cnt_lsb_minus4: u8,
    pub sps_sub_layer_ordering_info_present_flag: bool,
    pub ordering: SubLayerOrdering,
    pub log2_min_luma_coding_block_size_minus3: u8,
    pub log2_diff_max_min_luma_coding_block_size: u8,
    pub log2_min_luma_transform_block_size_minus2: u8,
    pub log2_diff_max_min_luma_transform_block_size: u8,
    pub max_transform_hierarchy_depth_inter: u8,
    pub max_transform_hierarchy_depth_intra: u8,
    pub scaling_list_enabled_flag: bool,
    pub amp_enabled_flag: bool,
    pub sample_adaptive_offset_enabled_flag: bool,
    pub pcm: Option<Pcm>,
    pub sps_temporal_mvp_enabled_flag: bool,
    pub strong_intra_smoothing_enabled_flag: bool,
    pub vui: Option<Vui>,
}

impl Sps {
    pub fn ctb_log2_size(&self) -> u32 {
        self.log2_min_luma_coding_block_size_minus3 as u32
            + 3
            + self.log2_diff_max_min_luma_coding_block_size as u32
    }

    pub fn pic_size_in_ctbs(&self) -> u32 {
        let ctb = 1 << self.ctb_log2_size();
        self.pic_width_in_luma_samples.div_ceil(ctb) * self.pic_height_in_luma_samples.div_ceil(ctb)
    }

    pub fn write(&self, w: &mut BitWriter) -> Result<()> {
        if self.sps_max_sub_layers_minus1 > 0 {
            return Err(unsupported("temporal sub-layering"));
        }
        if self.scaling_list_enabled_flag {
            return Err(unsupported("scaling lists"));
        }
        self.nal.write(w);
        w.write_bits(self.sps_video_parameter_set_id as u64, 4);
        w.write_bits(self.sps_max_sub_layers_minus1 as u64, 3);
        w.write_flag(self.sps_temporal_id_nesting_flag);
        self.profile_tier_level.write(w);
        w.write_ue(self.sps_seq_parameter_set_id as u32);
        w.write_ue(self.chroma_format_idc as u32);
        if self.chroma_format_idc == 3 {
            w.write_flag(false); // separate_colour_plane_flag
        }
        w.write_ue(self.pic_width_in_luma_samples);
        w.write_ue(self.pic_height_in_luma_samples);
        w.write_flag(self.conformance_window.is_some());
        if let Some(win) = &self.conformance_window {
            w.write_ue(win.left);
            w.write_ue(win.right);
            w.write_ue(win.top);
            w.write_ue(win.bottom);
        }
        w.write_ue(self.bit_depth_luma_minus8 as u32);
        w.write_ue(self.bit_depth_chroma_minus8 as u32);
        w.write_ue(self.log2_max_pic_order_cnt_lsb_minus4 as u32);
        w.write_flag(self.sps_sub_layer_ordering_info_present_flag);
        self.ordering.write(w);
        w.write_ue(self.log2_min_luma_coding_block_size_minus3 as u32);
        w.write_ue(self.log2_diff_max_min_luma_coding_block_size as u32);
        w.write_ue(self.log2_min_luma_transform_block_size_minus2 as u32);
        w.write_ue(self.log2_diff_max_min_luma_transform_block_size as u32);
        w.write_ue(self.max_transform_hierarchy_depth_inter as u32);
        w.write_ue(self.max_transform_hierarchy_depth_intra as u32);
        w.write_flag(self.scaling_list_enabled_flag);
        w.write_flag(self.amp_enabled_flag);
        w.write_flag(self.sample_adaptive_offset_enabled_flag);
        w.write_flag(self.pcm.is_some());
        if let Some(pcm) = &self.pcm {
            w.write_bits(pcm.sample_bit_depth_luma_minus1 as u64, 4);
            w.write_bits(pcm.sample_bit_depth_chroma_minus1 as u64, 4);
            w.write_ue(pcm.log2_min_pcm_luma_coding_block_size_minus3);
            w.write_ue(pcm.log2_diff_max_min_pcm_luma_coding_block_size);
            w.write_flag(pcm.loop_filter_disabled_flag);
        }
        w.write_ue(0); // num_short_term_ref_pic_sets
        w.write_flag(false); // long_term_ref_pics_present_flag
        w.write_flag(self.sps_temporal_mvp_enabled_flag);
        w.write_flag(self.strong_intra_smoothing_enabled_flag);
        w.write_flag(self.vui.is_some());
        if let Some(vui) = &self.vui {
            vui.write(w);
        }
        w.write_flag(false); // sps_extension_present_flag
        w.rbsp_trailing_bits();
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PpsTiles {
    pub num_tile_columns_minus1: u32,
    pub num_tile_rows_minus1: u32,
    pub uniform_spacing_flag: bool,
    pub column_width_minus1: Vec<u32>,
    pub row_height_minus1: Vec<u32>,
    pub loop_filter_across_tiles_enabled_flag: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Pps {
    pub nal: NalHeader,
    pub pps_pic_parameter_set_id: u8,
    pub pps_seq_parameter_set_id: u8,
    pub sign_data_hiding_enabled_flag: bool,
    pub cabac_init_present_flag: bool,
    pub num_ref_idx_l0_default_active_minus1: u8,
    pub num_ref_idx_l1_default_active_minus1: u8,
    pub init_qp_minus26: i8,
    pub constrained_intra_pred_flag: bool,
    pub transform_skip_enabled_flag: bool,
    pub cu_qp_delta_enabled_flag: bool,
    pub diff_cu_qp_delta_depth: u8,
    pub pps_cb_qp_offset: i8,
    pub pps_cr_qp_offset: i8,
    pub pps_slice_chroma_qp_offsets_present_flag: bool,
    pub weighted_pred_flag: bool,
    pub weighted_bipred_flag: bool,
    pub transquant_bypass_enabled_flag: bool,
    pub tiles: Option<PpsTiles>,
    pub entropy_coding_sync_enabled_flag: bool,
    pub pps_loop_filter_across_slices_enabled_flag: bool,
    pub log2_parallel_merge_level_minus2: u8,
}

impl Pps {
    pub fn write(&self, w: &mut BitWriter) -> Result<()> {
        self.nal.write(w);
        w.write_ue(self.pps_pic_parameter_set_id as u32);
        w.write_ue(self.pps_seq_parameter_set_id as u32);
        w.write_flag(false); // dependent_slice_segments_enabled_flag
        w.write_flag(false); // output_flag_present_flag
        w.write_bits(0, 3); // num_extra_slice_header_bits
        w.write_flag(self.sign_data_hiding_enabled_flag);
        w.write_flag(self.cabac_init_present_flag);
        w.write_ue(self.num_ref_idx_l0_default_active_minus1 as u32);
        w.write_ue(self.num_ref_idx_l1_default_active_minus1 as u32);
        w.write_se(self.init_qp_minus26 as i32);
        w.write_flag(self.constrained_intra_pred_flag);
        w.write_flag(self.transform_skip_enabled_flag);
        w.write_flag(self.cu_qp_delta_enabled_flag);
        if self.cu_qp_delta_enabled_flag {
            w.write_ue(self.diff_cu_qp_delta_depth as u32);
        }
        w.write_se(self.pps_cb_qp_offset as i32);
        w.write_se(self.pps_cr_qp_offset as i32);
        w.write_flag(self.pps_slice_chroma_qp_offsets_present_flag);
        w.write_flag(self.weighted_pred_flag);
        w.write_flag(self.weighted_bipred_flag);
        w.write_flag(self.transquant_bypass_enabled_flag);
        w.write_flag(self.tiles.is_some());
        w.write_flag(self.entropy_coding_sync_enabled_flag);
        if let Some(tiles) = &self.tiles {
            w.write_ue(tiles.num_tile_columns_minus1);
            w.write_ue(tiles.num_tile_rows_minus1);
            w.write_flag(tiles.uniform_spacing_flag);
            if !tiles.uniform_spacing_flag {
                let cols = tiles.num_tile_columns_minus1 as usize;
                let rows = tiles.num_tile_rows_minus1 as usize;
                if tiles.column_width_minus1.len() < cols || tiles.row_height_minus1.len() < rows {
                    return Err(EncodeError::Invariant("tile sizes missing from PPS".to_string()));
                }
                for &width in &tiles.column_width_minus1[..cols] {
                    w.write_ue(width);
                }
                for &height in &tiles.row_height_minus1[..rows] {
                    w.write_ue(height);
                }
            }
            w.write_flag(tiles.loop_filter_across_tiles_enabled_flag);
        }
        w.write_flag(self.pps_loop_filter_across_slices_enabled_flag);
        w.write_flag(false); // deblocking_filter_control_present_flag
        w.write_flag(false); // pps_scaling_list_data_present_flag
        w.write_flag(false); // lists_modification_present_flag
        w.write_ue(self.log2_parallel_merge_level_minus2 as u32);
        w.write_flag(false); // slice_segment_header_extension_present_flag
        w.write_flag(false); // pps_extension_present_flag
        w.rbsp_trailing_bits();
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Aud {
    /// 0: I only, 1: I and P, 2: I, P and B.
    pub pic_type: u8,
}

impl Aud {
    pub fn write(&self, w: &mut BitWriter) {
        NalHeader::new(NAL_AUD).write(w);
        w.write_bits(self.pic_type as u64, 3);
        w.rbsp_trailing_bits();
    }
}

/// Mastering display colour volume. Primaries are in G, B, R order in
/// units of 0.00002, luminance in units of 0.0001 cd/m².
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MasteringDisplayColourVolume {
    pub display_primaries_x: [u16; 3],
    pub display_primaries_y: [u16; 3],
    pub white_point_x: u16,
    pub white_point_y: u16,
    pub max_display_mastering_luminance: u32,
    pub min_display_mastering_luminance: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContentLightLevelInfo {
    pub max_content_light_level: u16,
    pub max_pic_average_light_level: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeiMessage {
    MasteringDisplay(MasteringDisplayColourVolume),
    ContentLightLevel(ContentLightLevelInfo),
}

impl SeiMessage {
    fn write(&self, w: &mut BitWriter) {
        match self {
            SeiMessage::MasteringDisplay(mdcv) => {
                w.write_bits(SEI_MASTERING_DISPLAY_COLOUR_VOLUME as u64, 8);
                w.write_bits(24, 8);
                for c in 0..3 {
                    w.write_bits(mdcv.display_primaries_x[c] as u64, 16);
                    w.write_bits(mdcv.display_primaries_y[c] as u64, 16);
                }
                w.write_bits(mdcv.white_point_x as u64, 16);
                w.write_bits(mdcv.white_point_y as u64, 16);
                w.write_bits(mdcv.max_display_mastering_luminance as u64, 32);
                w.write_bits(mdcv.min_display_mastering_luminance as u64, 32);
            }
            SeiMessage::ContentLightLevel(cll) => {
                w.write_bits(SEI_CONTENT_LIGHT_LEVEL_INFO as u64, 8);
                w.write_bits(4, 8);
                w.write_bits(cll.max_content_light_level as u64, 16);
                w.write_bits(cll.max_pic_average_light_level as u64, 16);
            }
        }
    }
}

/// Write one prefix SEI NAL unit carrying `messages`.
pub fn write_sei(w: &mut BitWriter, messages: &[SeiMessage]) -> Result<()> {
    if messages.is_empty() {
        return Err(EncodeError::Invariant("empty SEI NAL unit".to_string()));
    }
    NalHeader::new(NAL_PREFIX_SEI).write(w);
    for message in messages {
        message.write(w);
    }
    w.rbsp_trailing_bits();
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StRefPic {
    pub delta_poc_minus1: u32,
    pub used_by_curr_pic_flag: bool,
}

/// Short-term reference picture set coded in the slice header. Negative
/// pictures are ordered by decreasing POC, positive ones by increasing POC.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StRefPicSet {
    pub negative: Vec<StRefPic>,
    pub positive: Vec<StRefPic>,
}

impl StRefPicSet {
    /// Build the set from `(poc, used)` pairs around `current_poc`.
    pub fn from_pictures(current_poc: i32, pictures: &[(i32, bool)]) -> Result<Self> {
        let mut sorted = pictures.to_vec();
        sorted.sort_by_key(|&(poc, _)| poc);
        for pair in sorted.windows(2) {
            if pair[0].0 == pair[1].0 {
                return Err(EncodeError::Invariant(format!(
                    "POC {} twice in reference picture set",
                    pair[0].0
                )));
            }
        }
        if sorted.iter().any(|&(poc, _)| poc == current_poc) {
            return Err(EncodeError::Invariant(format!(
                "current POC {current_poc} in its own reference picture set"
            )));
        }

        let mut set = Self::default();
        let mut poc = current_poc;
        for &(ref_poc, used) in sorted.iter().rev().filter(|&&(p, _)| p < current_poc) {
            set.negative.push(StRefPic {
                delta_poc_minus1: (poc - ref_poc - 1) as u32,
                used_by_curr_pic_flag: used,
            });
            poc = ref_poc;
        }
        poc = current_poc;
        for &(ref_poc, used) in sorted.iter().filter(|&&(p, _)| p > current_poc) {
            set.positive.push(StRefPic {
                delta_poc_minus1: (ref_poc - poc - 1) as u32,
                used_by_curr_pic_flag: used,
            });
            poc = ref_poc;
        }
        Ok(set)
    }

    /// Number of pictures usable as references by the current picture.
    pub fn num_used(&self) -> usize {
        self.negative
            .iter()
            .chain(&self.positive)
            .filter(|p| p.used_by_curr_pic_flag)
            .count()
    }

    // Coded with index num_short_term_ref_pic_sets (zero), so no
    // inter-set prediction.
    fn write(&self, w: &mut BitWriter) {
        w.write_ue(self.negative.len() as u32);
        w.write_ue(self.positive.len() as u32);
        for pic in self.negative.iter().chain(&self.positive) {
            w.write_ue(pic.delta_poc_minus1);
            w.write_flag(pic.used_by_curr_pic_flag);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SliceHeader {
    pub nal: NalHeader,
    pub first_slice_segment_in_pic_flag: bool,
    pub no_output_of_prior_pics_flag: bool,
    pub slice_pic_parameter_set_id: u8,
    pub slice_segment_address: u32,
    pub slice_type: u8,
    pub slice_pic_order_cnt_lsb: u32,
    pub short_term_ref_pic_set: StRefPicSet,
    pub slice_temporal_mvp_enabled_flag: bool,
    pub slice_sao_luma_flag: bool,
    pub slice_sao_chroma_flag: bool,
    pub num_ref_idx_active_override: Option<(u8, u8)>,
    pub mvd_l1_zero_flag: bool,
    pub cabac_init_flag: bool,
    pub collocated_from_l0_flag: bool,
    pub collocated_ref_idx: u8,
    pub five_minus_max_num_merge_cand: u8,
    pub slice_qp_delta: i32,
    pub slice_cb_qp_offset: i8,
    pub slice_cr_qp_offset: i8,
    pub slice_loop_filter_across_slices_enabled_flag: bool,
}

impl SliceHeader {
    pub fn num_ref_idx_active_minus1(&self, pps: &Pps) -> (u8, u8) {
        self.num_ref_idx_active_override.unwrap_or((
            pps.num_ref_idx_l0_default_active_minus1,
            pps.num_ref_idx_l1_default_active_minus1,
        ))
    }

    /// Write the slice segment header, byte alignment included.
    pub fn write(&self, w: &mut BitWriter, sps: &Sps, pps: &Pps) -> Result<()> {
        let nal_unit_type = self.nal.nal_unit_type;
        let is_b = self.slice_type == SLICE_B;
        let is_inter = is_b || self.slice_type == SLICE_P;

        self.nal.write(w);
        w.write_flag(self.first_slice_segment_in_pic_flag);
        if (NAL_BLA_W_LP..=NAL_RSV_IRAP_23).contains(&nal_unit_type) {
            w.write_flag(self.no_output_of_prior_pics_flag);
        }
        w.write_ue(self.slice_pic_parameter_set_id as u32);
        if !self.first_slice_segment_in_pic_flag {
            let ctbs = sps.pic_size_in_ctbs();
            let bits = if ctbs > 1 { 32 - (ctbs - 1).leading_zeros() } else { 0 };
            w.write_bits(self.slice_segment_address as u64, bits as u8);
        }
        w.write_ue(self.slice_type as u32);

        if nal_unit_type != NAL_IDR_W_RADL && nal_unit_type != NAL_IDR_N_LP {
            w.write_bits(
                self.slice_pic_order_cnt_lsb as u64,
                sps.log2_max_pic_order_cnt_lsb_minus4 + 4,
            );
            w.write_flag(false); // short_term_ref_pic_set_sps_flag
            self.short_term_ref_pic_set.write(w);
            if sps.sps_temporal_mvp_enabled_flag {
                w.write_flag(self.slice_temporal_mvp_enabled_flag);
            }
        }

        if sps.sample_adaptive_offset_enabled_flag {
            w.write_flag(self.slice_sao_luma_flag);
            if sps.chroma_format_idc != 0 {
                w.write_flag(self.slice_sao_chroma_flag);
            }
        }

        if is_inter {
            let (l0, l1) = self.num_ref_idx_active_minus1(pps);
            w.write_flag(self.num_ref_idx_active_override.is_some());
            if self.num_ref_idx_active_override.is_some() {
                w.write_ue(l0 as u32);
                if is_b {
                    w.write_ue(l1 as u32);
                }
            }
            if is_b {
                w.write_flag(self.mvd_l1_zero_flag);
            }
            if pps.cabac_init_present_flag {
                w.write_flag(self.cabac_init_flag);
            }
            if self.slice_temporal_mvp_enabled_flag {
                if is_b {
                    w.write_flag(self.collocated_from_l0_flag);
                }
                if (self.collocated_from_l0_flag && l0 > 0) || (!self.collocated_from_l0_flag && l1 > 0) {
                    w.write_ue(self.collocated_ref_idx as u32);
                }
            }
            if (pps.weighted_pred_flag && !is_b) || (pps.weighted_bipred_flag && is_b) {
                return Err(unsupported("weighted prediction"));
            }
            w.write_ue(self.five_minus_max_num_merge_cand as u32);
        }

        w.write_se(self.slice_qp_delta);
        if pps.pps_slice_chroma_qp_offsets_present_flag {
            w.write_se(self.slice_cb_qp_offset as i32);
            w.write_se(self.slice_cr_qp_offset as i32);
        }
        // The deblocking filter is never disabled, so the flag is always present.
        if pps.pps_loop_filter_across_slices_enabled_flag {
            w.write_flag(self.slice_loop_filter_across_slices_enabled_flag);
        }
        if pps.tiles.is_some() || pps.entropy_coding_sync_enabled_flag {
            w.write_ue(0); // num_entry_point_offsets
        }

        w.write_bits(1, 1); // alignment_bit_equal_to_one
        w.byte_align();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn main_ptl(level: u8) -> ProfileTierLevel {
        let mut ptl = ProfileTierLevel {
            general_profile_idc: 1,
            general_progressive_source_flag: true,
            general_non_packed_constraint_flag: true,
            general_frame_only_constraint_flag: true,
            general_level_idc: level,
            ..Default::default()
        };
        ptl.set_compatible(1);
        ptl.set_compatible(2);
        ptl
    }

    #[test]
    fn test_vps_prefix() {
        let vps = Vps {
            nal: NalHeader::new(NAL_VPS),
            vps_base_layer_internal_flag: true,
            vps_base_layer_available_flag: true,
            vps_temporal_id_nesting_flag: true,
            profile_tier_level: main_ptl(93),
            ..Default::default()
        };
        let mut w = BitWriter::new();
        vps.write(&mut w).unwrap();
        let bytes = w.finish();
        assert_eq!(
            &bytes[..18],
            &[0x40, 0x01, 0x0c, 0x01, 0xff, 0xff, 0x01, 0x60, 0, 0, 0, 0xb0, 0, 0, 0, 0, 0, 93]
        );
    }

    #[test]
    fn test_rext_ptl_carries_constraint_flags() {
        let mut ptl = ProfileTierLevel {
            general_profile_idc: 4,
            general_max_12bit_constraint_flag: true,
            general_lower_bit_rate_constraint_flag: true,
            ..Default::default()
        };
        ptl.set_compatible(4);
        let mut w = BitWriter::new();
        ptl.write(&mut w);
        assert_eq!(w.bit_count(), 96);
        let bytes = w.finish();
        // Profile 4, compatibility flag 4.
        assert_eq!(&bytes[..2], &[0x04, 0x08]);
        // After four source flags: max_12bit set, then eight more flags
        // ending with lower_bit_rate.
        assert_eq!(bytes[5], 0b0000_1000);
        assert_eq!(bytes[6], 0b0000_1000);
    }

    #[test]
    fn test_sub_layers_rejected() {
        let sps = Sps {
            sps_max_sub_layers_minus1: 1,
            ..Default::default()
        };
        assert!(matches!(
            sps.write(&mut BitWriter::new()),
            Err(EncodeError::Unsupported(_))
        ));
    }

    #[test]
    fn test_scaling_lists_rejected() {
        let sps = Sps {
            scaling_list_enabled_flag: true,
            ..Default::default()
        };
        assert!(sps.write(&mut BitWriter::new()).is_err());
    }

    #[test]
    fn test_aud() {
        let mut w = BitWriter::new();
        Aud { pic_type: 2 }.write(&mut w);
        // NAL 35, then pic_type 010 and the stop bit.
        assert_eq!(w.finish(), vec![0x46, 0x01, 0x50]);
    }

    #[test]
    fn test_sei_payload_layout() {
        let mut w = BitWriter::new();
        write_sei(
            &mut w,
            &[
                SeiMessage::MasteringDisplay(MasteringDisplayColourVolume::default()),
                SeiMessage::ContentLightLevel(ContentLightLevelInfo {
                    max_content_light_level: 1000,
                    max_pic_average_light_level: 400,
                }),
            ],
        )
        .unwrap();
        let bytes = w.finish();
        assert_eq!(&bytes[..4], &[0x4e, 0x01, 137, 24]);
        assert_eq!(&bytes[28..34], &[144, 4, 0x03, 0xe8, 0x01, 0x90]);
        assert_eq!(bytes[34], 0x80);
        assert_eq!(bytes.len(), 35);
    }

    #[test]
    fn test_rps_from_pictures() {
        let rps = StRefPicSet::from_pictures(4, &[(6, true), (0, false), (3, true)]).unwrap();
        assert_eq!(
            rps.negative,
            vec![
                StRefPic { delta_poc_minus1: 0, used_by_curr_pic_flag: true },
                StRefPic { delta_poc_minus1: 2, used_by_curr_pic_flag: false },
            ]
        );
        assert_eq!(rps.positive, vec![StRefPic { delta_poc_minus1: 1, used_by_curr_pic_flag: true }]);
        assert_eq!(rps.num_used(), 2);
    }

    #[test]
    fn test_rps_rejects_duplicates() {
        assert!(StRefPicSet::from_pictures(4, &[(3, true), (3, false)]).is_err());
        assert!(StRefPicSet::from_pictures(4, &[(4, true)]).is_err());
    }

    #[test]
    fn test_idr_slice_header_skips_poc() {
        let sps = Sps {
            log2_max_pic_order_cnt_lsb_minus4: 8,
            ..Default::default()
        };
        let pps = Pps::default();
        let sh = SliceHeader {
            nal: NalHeader::new(NAL_IDR_W_RADL),
            first_slice_segment_in_pic_flag: true,
            slice_type: SLICE_I,
            slice_pic_order_cnt_lsb: 5,
            ..Default::default()
        };
        let mut w = BitWriter::new();
        sh.write(&mut w, &sps, &pps).unwrap();
        // Header, first_slice 1, no_output 0, pps_id ue(0) 1, slice_type
        // ue(2) 011, slice_qp_delta se(0) 1, then the alignment bit.
        assert_eq!(w.bit_count(), 16 + 8);
        assert_eq!(w.finish(), vec![0x26, 0x01, 0b1010_1111]);
    }

    #[test]
    fn test_weighted_prediction_rejected() {
        let sps = Sps::default();
        let pps = Pps {
            weighted_pred_flag: true,
            ..Default::default()
        };
        let sh = SliceHeader {
            nal: NalHeader::new(NAL_TRAIL_R),
            first_slice_segment_in_pic_flag: true,
            slice_type: SLICE_P,
            ..Default::default()
        };
        assert!(matches!(
            sh.write(&mut BitWriter::new(), &sps, &pps),
            Err(EncodeError::Unsupported(_))
        ));
    }
}
