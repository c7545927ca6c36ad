//! H.264 header syntax and its bitstream writers.
//!
//! Each structure mirrors one syntax table of ITU-T H.264. Writers emit the
//! RBSP (NAL header included) into a [`BitWriter`]; Annex-B framing is done
//! by [`PackedHeader::append_nal`](crate::encoder::packed::PackedHeader::append_nal).
//! Syntax this encoder never produces is rejected with
//! [`EncodeError::Unsupported`] instead of being approximated.

use crate::encoder::bitwriter::BitWriter;
use crate::error::{EncodeError, Result};

pub const NAL_SLICE: u8 = 1;
pub const NAL_IDR_SLICE: u8 = 5;
pub const NAL_SEI: u8 = 6;
pub const NAL_SPS: u8 = 7;
pub const NAL_PPS: u8 = 8;
pub const NAL_AUD: u8 = 9;

pub const SLICE_TYPE_P: u8 = 0;
pub const SLICE_TYPE_B: u8 = 1;
pub const SLICE_TYPE_I: u8 = 2;

const SEI_BUFFERING_PERIOD: u32 = 0;
const SEI_PIC_TIMING: u32 = 1;
const SEI_USER_DATA_UNREGISTERED: u32 = 5;
const SEI_RECOVERY_POINT: u32 = 6;

/// Profiles whose SPS carries chroma format and bit depth fields.
const HIGH_PROFILES: [u8; 13] = [100, 110, 122, 244, 44, 83, 86, 118, 128, 138, 139, 134, 135];

fn unsupported(what: &str) -> EncodeError {
    EncodeError::Unsupported(format!("H.264 {what} is not supported"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NalHeader {
    pub nal_ref_idc: u8,
    pub nal_unit_type: u8,
}

impl NalHeader {
    fn write(&self, w: &mut BitWriter) {
        w.write_bits(0, 1); // forbidden_zero_bit
        w.write_bits(self.nal_ref_idc as u64, 2);
        w.write_bits(self.nal_unit_type as u64, 5);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Hrd {
    pub cpb_cnt_minus1: u8,
    pub bit_rate_scale: u8,
    pub cpb_size_scale: u8,
    pub bit_rate_value_minus1: Vec<u32>,
    pub cpb_size_value_minus1: Vec<u32>,
    pub cbr_flag: Vec<bool>,
    pub initial_cpb_removal_delay_length_minus1: u8,
    pub cpb_removal_delay_length_minus1: u8,
    pub dpb_output_delay_length_minus1: u8,
    pub time_offset_length: u8,
}

impl Hrd {
    fn write(&self, w: &mut BitWriter) -> Result<()> {
        let count = self.cpb_cnt_minus1 as usize + 1;
        if self.bit_rate_value_minus1.len() != count
            || self.cpb_size_value_minus1.len() != count
            || self.cbr_flag.len() != count
        {
            return Err(EncodeError::Invariant(format!(
                "HRD with {count} CPBs has mismatched value lists"
            )));
        }
        w.write_ue(self.cpb_cnt_minus1 as u32);
        w.write_bits(self.bit_rate_scale as u64, 4);
        w.write_bits(self.cpb_size_scale as u64, 4);
        for i in 0..count {
            w.write_ue(self.bit_rate_value_minus1[i]);
            w.write_ue(self.cpb_size_value_minus1[i]);
            w.write_flag(self.cbr_flag[i]);
        }
        w.write_bits(self.initial_cpb_removal_delay_length_minus1 as u64, 5);
        w.write_bits(self.cpb_removal_delay_length_minus1 as u64, 5);
        w.write_bits(self.dpb_output_delay_length_minus1 as u64, 5);
        w.write_bits(self.time_offset_length as u64, 5);
        Ok(())
    }
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

    pub timing_info_present_flag: bool,
    pub num_units_in_tick: u32,
    pub time_scale: u32,
    pub fixed_frame_rate_flag: bool,

    pub nal_hrd_parameters: Option<Hrd>,
    pub low_delay_hrd_flag: bool,

    pub bitstream_restriction_flag: bool,
    pub motion_vectors_over_pic_boundaries_flag: bool,
    pub log2_max_mv_length_horizontal: u8,
    pub log2_max_mv_length_vertical: u8,
    pub max_num_reorder_frames: u32,
    pub max_dec_frame_buffering: u32,
}

impl Vui {
    fn write(&self, w: &mut BitWriter) -> Result<()> {
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

        w.write_flag(self.timing_info_present_flag);
        if self.timing_info_present_flag {
            w.write_bits(self.num_units_in_tick as u64, 32);
            w.write_bits(self.time_scale as u64, 32);
            w.write_flag(self.fixed_frame_rate_flag);
        }

        w.write_flag(self.nal_hrd_parameters.is_some());
        if let Some(hrd) = &self.nal_hrd_parameters {
            hrd.write(w)?;
        }
        w.write_flag(false); // vcl_hrd_parameters_present_flag
        if self.nal_hrd_parameters.is_some() {
            w.write_flag(self.low_delay_hrd_flag);
        }
        w.write_flag(false); // pic_struct_present_flag

        w.write_flag(self.bitstream_restriction_flag);
        if self.bitstream_restriction_flag {
            w.write_flag(self.motion_vectors_over_pic_boundaries_flag);
            w.write_ue(0); // max_bytes_per_pic_denom
            w.write_ue(0); // max_bits_per_mb_denom
            w.write_ue(self.log2_max_mv_length_horizontal as u32);
            w.write_ue(self.log2_max_mv_length_vertical as u32);
            w.write_ue(self.max_num_reorder_frames);
            w.write_ue(self.max_dec_frame_buffering);
        }
        Ok(())
    }
}

/// Frame cropping offsets in chroma sample units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameCrop {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
}

/// Sequence parameter set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Sps {
    pub nal: NalHeader,
    pub profile_idc: u8,
    /// constraint_set0_flag to constraint_set5_flag in bits 0..6.
    pub constraint_flags: u8,
    pub level_idc: u8,
    pub seq_parameter_set_id: u8,

    pub chroma_format_idc: u8,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    pub seq_scaling_matrix_present_flag: bool,

    pub log2_max_frame_num_minus4: u8,
    pub pic_order_cnt_type: u8,
    pub log2_max_pic_order_cnt_lsb_minus4: u8,

    pub max_num_ref_frames: u32,
    pub pic_width_in_mbs_minus1: u32,
    pub pic_height_in_map_units_minus1: u32,
    pub frame_mbs_only_flag: bool,
    pub direct_8x8_inference_flag: bool,
    pub frame_cropping: Option<FrameCrop>,
    pub vui: Option<Vui>,
}

impl Sps {
    pub fn constraint_set(&self, n: u8) -> bool {
        self.constraint_flags & (1 << n) != 0
    }

    pub fn set_constraint(&mut self, n: u8, on: bool) {
        if on {
            self.constraint_flags |= 1 << n;
        } else {
            self.constraint_flags &= !(1 << n);
        }
    }

    pub fn write(&self, w: &mut BitWriter) -> Result<()> {
        self.nal.write(w);
        w.write_bits(self.profile_idc as u64, 8);
        for n in 0..6 {
            w.write_flag(self.constraint_set(n));
        }
        w.write_bits(0, 2); // reserved_zero_2bits
        w.write_bits(self.level_idc as u64, 8);
        w.write_ue(self.seq_parameter_set_id as u32);

        if HIGH_PROFILES.contains(&self.profile_idc) {
            w.write_ue(self.chroma_format_idc as u32);
            if self.chroma_format_idc == 3 {
                w.write_flag(false); // separate_colour_plane_flag
            }
            w.write_ue(self.bit_depth_luma_minus8 as u32);
            w.write_ue(self.bit_depth_chroma_minus8 as u32);
            w.write_flag(false); // qpprime_y_zero_transform_bypass_flag
            if self.seq_scaling_matrix_present_flag {
                return Err(unsupported("sequence scaling matrix"));
            }
            w.write_flag(false);
        }

        w.write_ue(self.log2_max_frame_num_minus4 as u32);
        w.write_ue(self.pic_order_cnt_type as u32);
        match self.pic_order_cnt_type {
            0 => w.write_ue(self.log2_max_pic_order_cnt_lsb_minus4 as u32),
            2 => {}
            other => return Err(unsupported(&format!("pic_order_cnt_type {other}"))),
        }

        w.write_ue(self.max_num_ref_frames);
        w.write_flag(false); // gaps_in_frame_num_value_allowed_flag
        w.write_ue(self.pic_width_in_mbs_minus1);
        w.write_ue(self.pic_height_in_map_units_minus1);
        if !self.frame_mbs_only_flag {
            return Err(unsupported("field coding"));
        }
        w.write_flag(true);
        w.write_flag(self.direct_8x8_inference_flag);

        w.write_flag(self.frame_cropping.is_some());
        if let Some(crop) = &self.frame_cropping {
            w.write_ue(crop.left);
            w.write_ue(crop.right);
            w.write_ue(crop.top);
            w.write_ue(crop.bottom);
        }

        w.write_flag(self.vui.is_some());
        if let Some(vui) = &self.vui {
            vui.write(w)?;
        }
        w.rbsp_trailing_bits();
        Ok(())
    }
}

/// Picture parameter set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Pps {
    pub nal: NalHeader,
    pub pic_parameter_set_id: u8,
    pub seq_parameter_set_id: u8,
    pub entropy_coding_mode_flag: bool,
    pub bottom_field_pic_order_in_frame_present_flag: bool,
    pub num_slice_groups_minus1: u32,
    pub num_ref_idx_l0_default_active_minus1: u8,
    pub num_ref_idx_l1_default_active_minus1: u8,
    pub weighted_pred_flag: bool,
    pub weighted_bipred_idc: u8,
    pub pic_init_qp_minus26: i8,
    pub chroma_qp_index_offset: i8,
    pub deblocking_filter_control_present_flag: bool,
    pub constrained_intra_pred_flag: bool,
    /// Write the High profile extension (transform_8x8_mode_flag onwards).
    pub more_rbsp_data: bool,
    pub transform_8x8_mode_flag: bool,
    pub pic_scaling_matrix_present_flag: bool,
    pub second_chroma_qp_index_offset: i8,
}

impl Pps {
    pub fn write(&self, w: &mut BitWriter) -> Result<()> {
        self.nal.write(w);
        w.write_ue(self.pic_parameter_set_id as u32);
        w.write_ue(self.seq_parameter_set_id as u32);
        w.write_flag(self.entropy_coding_mode_flag);
        w.write_flag(self.bottom_field_pic_order_in_frame_present_flag);
        if self.num_slice_groups_minus1 > 0 {
            return Err(unsupported("slice groups"));
        }
        w.write_ue(0);
        w.write_ue(self.num_ref_idx_l0_default_active_minus1 as u32);
        w.write_ue(self.num_ref_idx_l1_default_active_minus1 as u32);
        w.write_flag(self.weighted_pred_flag);
        w.write_bits(self.weighted_bipred_idc as u64, 2);
        w.write_se(self.pic_init_qp_minus26 as i32);
        w.write_se(0); // pic_init_qs_minus26
        w.write_se(self.chroma_qp_index_offset as i32);
        w.write_flag(self.deblocking_filter_control_present_flag);
        w.write_flag(self.constrained_intra_pred_flag);
        w.write_flag(false); // redundant_pic_cnt_present_flag
        if self.more_rbsp_data {
            w.write_flag(self.transform_8x8_mode_flag);
            if self.pic_scaling_matrix_present_flag {
                return Err(unsupported("picture scaling matrix"));
            }
            w.write_flag(false);
            w.write_se(self.second_chroma_qp_index_offset as i32);
        }
        w.rbsp_trailing_bits();
        Ok(())
    }
}

/// Access unit delimiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Aud {
    pub primary_pic_type: u8,
}

impl Aud {
    pub fn write(&self, w: &mut BitWriter) {
        NalHeader {
            nal_ref_idc: 0,
            nal_unit_type: NAL_AUD,
        }
        .write(w);
        w.write_bits(self.primary_pic_type as u64, 3);
        w.rbsp_trailing_bits();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferingPeriod {
    pub seq_parameter_set_id: u8,
    pub initial_cpb_removal_delay: u32,
    pub initial_cpb_removal_delay_offset: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PicTiming {
    pub cpb_removal_delay: u32,
    pub dpb_output_delay: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecoveryPoint {
    pub recovery_frame_cnt: u32,
    pub exact_match_flag: bool,
    pub broken_link_flag: bool,
}

/// User data unregistered payload: a UUID and opaque bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserDataUnregistered {
    pub uuid: [u8; 16],
    pub data: Vec<u8>,
}

/// One SEI message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeiMessage {
    BufferingPeriod(BufferingPeriod),
    PicTiming(PicTiming),
    RecoveryPoint(RecoveryPoint),
    UserDataUnregistered(UserDataUnregistered),
}

impl SeiMessage {
    fn payload_type(&self) -> u32 {
        match self {
            SeiMessage::BufferingPeriod(_) => SEI_BUFFERING_PERIOD,
            SeiMessage::PicTiming(_) => SEI_PIC_TIMING,
            SeiMessage::RecoveryPoint(_) => SEI_RECOVERY_POINT,
            SeiMessage::UserDataUnregistered(_) => SEI_USER_DATA_UNREGISTERED,
        }
    }

    /// Payload bytes. Timing payloads need the HRD of the active SPS for
    /// their field lengths.
    fn payload(&self, hrd: Option<&Hrd>) -> Result<Vec<u8>> {
        let mut w = BitWriter::new();
        match self {
            SeiMessage::BufferingPeriod(bp) => {
                let hrd = hrd.ok_or_else(|| unsupported("buffering period without NAL HRD"))?;
                w.write_ue(bp.seq_parameter_set_id as u32);
                let len = hrd.initial_cpb_removal_delay_length_minus1 + 1;
                for _ in 0..=hrd.cpb_cnt_minus1 {
                    w.write_bits(bp.initial_cpb_removal_delay as u64, len);
                    w.write_bits(bp.initial_cpb_removal_delay_offset as u64, len);
                }
            }
            SeiMessage::PicTiming(pt) => {
                let hrd = hrd.ok_or_else(|| unsupported("picture timing without NAL HRD"))?;
                w.write_bits(pt.cpb_removal_delay as u64, hrd.cpb_removal_delay_length_minus1 + 1);
                w.write_bits(pt.dpb_output_delay as u64, hrd.dpb_output_delay_length_minus1 + 1);
            }
            SeiMessage::RecoveryPoint(rp) => {
                w.write_ue(rp.recovery_frame_cnt);
                w.write_flag(rp.exact_match_flag);
                w.write_flag(rp.broken_link_flag);
                w.write_bits(0, 2); // changing_slice_group_idc
            }
            SeiMessage::UserDataUnregistered(ud) => {
                w.write_bytes(&ud.uuid);
                w.write_bytes(&ud.data);
            }
        }
        if !w.is_byte_aligned() {
            w.write_bits(1, 1); // bit_equal_to_one
            w.byte_align();
        }
        Ok(w.finish())
    }
}

/// Write `value` in the 0xFF-extended form used for SEI type and size.
fn write_sei_varint(w: &mut BitWriter, mut value: u32) {
    while value >= 255 {
        w.write_bits(0xff, 8);
        value -= 255;
    }
    w.write_bits(value as u64, 8);
}

/// Write one SEI NAL unit carrying `messages`.
pub fn write_sei(w: &mut BitWriter, messages: &[SeiMessage], hrd: Option<&Hrd>) -> Result<()> {
    if messages.is_empty() {
        return Err(EncodeError::Invariant("empty SEI NAL unit".to_string()));
    }
    NalHeader {
        nal_ref_idc: 0,
        nal_unit_type: NAL_SEI,
    }
    .write(w);
    for message in messages {
        let payload = message.payload(hrd)?;
        write_sei_varint(w, message.payload_type());
        write_sei_varint(w, payload.len() as u32);
        w.write_bytes(&payload);
    }
    w.rbsp_trailing_bits();
    Ok(())
}

/// One reference picture list modification entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefListModification {
    pub modification_of_pic_nums_idc: u8,
    pub abs_diff_pic_num_minus1: u32,
}

/// Short-term "unused for reference" marking (MMCO 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mmco {
    pub difference_of_pic_nums_minus1: u32,
}

/// Slice header. Only frame coding with POC type 0 is written.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SliceHeader {
    pub nal: NalHeader,
    pub first_mb_in_slice: u32,
    /// Slice type plus 5, signalling that all slices share it.
    pub slice_type: u8,
    pub pic_parameter_set_id: u8,
    pub frame_num: u32,
    pub idr_pic_id: u16,
    pub pic_order_cnt_lsb: u32,
    pub direct_spatial_mv_pred_flag: bool,
    pub num_ref_idx_active_override: Option<(u8, u8)>,
    /// `None` keeps the default list; `Some` ends with idc 3 implicitly.
    pub ref_pic_list_modification_l0: Option<Vec<RefListModification>>,
    pub ref_pic_list_modification_l1: Option<Vec<RefListModification>>,
    /// Adaptive marking operations; empty means sliding window.
    pub mmco: Vec<Mmco>,
    pub cabac_init_idc: u8,
    pub slice_qp_delta: i32,
}

/// Fields of the active SPS and PPS a slice header depends on.
#[derive(Debug, Clone, Copy)]
pub struct SliceContext {
    pub log2_max_frame_num: u8,
    pub log2_max_pic_order_cnt_lsb: u8,
    pub entropy_coding_mode_flag: bool,
    pub weighted_pred_flag: bool,
    pub weighted_bipred_idc: u8,
    pub deblocking_filter_control_present_flag: bool,
}

impl SliceContext {
    pub fn new(sps: &Sps, pps: &Pps) -> Self {
        Self {
            log2_max_frame_num: sps.log2_max_frame_num_minus4 + 4,
            log2_max_pic_order_cnt_lsb: sps.log2_max_pic_order_cnt_lsb_minus4 + 4,
            entropy_coding_mode_flag: pps.entropy_coding_mode_flag,
            weighted_pred_flag: pps.weighted_pred_flag,
            weighted_bipred_idc: pps.weighted_bipred_idc,
            deblocking_filter_control_present_flag: pps.deblocking_filter_control_present_flag,
        }
    }
}

fn write_modifications(w: &mut BitWriter, list: &Option<Vec<RefListModification>>) -> Result<()> {
    w.write_flag(list.is_some());
    if let Some(entries) = list {
        for entry in entries {
            if entry.modification_of_pic_nums_idc > 1 {
                return Err(unsupported("long-term reference list modification"));
            }
            w.write_ue(entry.modification_of_pic_nums_idc as u32);
            w.write_ue(entry.abs_diff_pic_num_minus1);
        }
        w.write_ue(3);
    }
    Ok(())
}

impl SliceHeader {
    fn base_type(&self) -> u8 {
        self.slice_type % 5
    }

    /// Write the header without slice data. The result is not byte aligned.
    pub fn write(&self, w: &mut BitWriter, ctx: &SliceContext) -> Result<()> {
        let slice_type = self.base_type();
        let is_idr = self.nal.nal_unit_type == NAL_IDR_SLICE;

        self.nal.write(w);
        w.write_ue(self.first_mb_in_slice);
        w.write_ue(self.slice_type as u32);
        w.write_ue(self.pic_parameter_set_id as u32);
        w.write_bits(self.frame_num as u64, ctx.log2_max_frame_num);
        if is_idr {
            w.write_ue(self.idr_pic_id as u32);
        }
        w.write_bits(self.pic_order_cnt_lsb as u64, ctx.log2_max_pic_order_cnt_lsb);

        if slice_type == SLICE_TYPE_B {
            w.write_flag(self.direct_spatial_mv_pred_flag);
        }
        if slice_type == SLICE_TYPE_P || slice_type == SLICE_TYPE_B {
            w.write_flag(self.num_ref_idx_active_override.is_some());
            if let Some((l0, l1)) = self.num_ref_idx_active_override {
                w.write_ue(l0 as u32);
                if slice_type == SLICE_TYPE_B {
                    w.write_ue(l1 as u32);
                }
            }
        }

        if slice_type != SLICE_TYPE_I {
            write_modifications(w, &self.ref_pic_list_modification_l0)?;
            if slice_type == SLICE_TYPE_B {
                write_modifications(w, &self.ref_pic_list_modification_l1)?;
            }
        }

        if (ctx.weighted_pred_flag && slice_type == SLICE_TYPE_P)
            || (ctx.weighted_bipred_idc == 1 && slice_type == SLICE_TYPE_B)
        {
            return Err(unsupported("weighted prediction"));
        }

        if self.nal.nal_ref_idc != 0 {
            if is_idr {
                w.write_flag(false); // no_output_of_prior_pics_flag
                w.write_flag(false); // long_term_reference_flag
            } else {
                w.write_flag(!self.mmco.is_empty());
                if !self.mmco.is_empty() {
                    for op in &self.mmco {
                        w.write_ue(1);
                        w.write_ue(op.difference_of_pic_nums_minus1);
                    }
                    w.write_ue(0);
                }
            }
        }

        if ctx.entropy_coding_mode_flag && slice_type != SLICE_TYPE_I {
            w.write_ue(self.cabac_init_idc as u32);
        }
        w.write_se(self.slice_qp_delta);

        if ctx.deblocking_filter_control_present_flag {
            w.write_ue(0); // disable_deblocking_filter_idc
            w.write_se(0);
            w.write_se(0);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_sps() -> Sps {
        Sps {
            nal: NalHeader {
                nal_ref_idc: 3,
                nal_unit_type: NAL_SPS,
            },
            profile_idc: 77,
            level_idc: 30,
            chroma_format_idc: 1,
            log2_max_frame_num_minus4: 4,
            log2_max_pic_order_cnt_lsb_minus4: 4,
            max_num_ref_frames: 1,
            pic_width_in_mbs_minus1: 19,
            pic_height_in_map_units_minus1: 14,
            frame_mbs_only_flag: true,
            direct_8x8_inference_flag: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_sps_prefix() {
        let mut sps = minimal_sps();
        sps.set_constraint(1, true);
        let mut w = BitWriter::new();
        sps.write(&mut w).unwrap();
        let data = w.finish();
        // NAL header, profile_idc, constraint flags, level_idc.
        assert_eq!(&data[..4], &[0x67, 77, 0b0100_0000, 30]);
        assert_eq!(data.last().map(|b| b.trailing_zeros() < 8), Some(true));
    }

    #[test]
    fn test_sps_high_profile_fields() {
        let mut sps = minimal_sps();
        sps.profile_idc = 100;
        let mut main = BitWriter::new();
        minimal_sps().write(&mut main).unwrap();
        let mut high = BitWriter::new();
        sps.write(&mut high).unwrap();
        // Main: 68 bits of syntax plus the stop bit, padded to 72. High adds
        // chroma_format_idc (3 bits), two depths and two flags.
        assert_eq!(main.bit_count(), 72);
        assert_eq!(high.bit_count(), 80);
    }

    #[test]
    fn test_sps_rejects_field_coding() {
        let mut sps = minimal_sps();
        sps.frame_mbs_only_flag = false;
        assert!(matches!(
            sps.write(&mut BitWriter::new()),
            Err(EncodeError::Unsupported(_))
        ));
    }

    #[test]
    fn test_sps_rejects_scaling_matrix() {
        let mut sps = minimal_sps();
        sps.profile_idc = 100;
        sps.seq_scaling_matrix_present_flag = true;
        assert!(sps.write(&mut BitWriter::new()).is_err());
    }

    #[test]
    fn test_pps_rejects_slice_groups() {
        let pps = Pps {
            num_slice_groups_minus1: 1,
            ..Default::default()
        };
        assert!(matches!(
            pps.write(&mut BitWriter::new()),
            Err(EncodeError::Unsupported(_))
        ));
    }

    #[test]
    fn test_pps_bits() {
        let pps = Pps {
            nal: NalHeader {
                nal_ref_idc: 3,
                nal_unit_type: NAL_PPS,
            },
            entropy_coding_mode_flag: true,
            ..Default::default()
        };
        let mut w = BitWriter::new();
        pps.write(&mut w).unwrap();
        // Both ids, CABAC, no field POC, one slice group, default ref counts,
        // no weighted prediction.
        let data = w.finish();
        assert_eq!(data[0], 0x68);
        assert_eq!(data[1], 0b1110_1110);
    }

    #[test]
    fn test_aud() {
        let mut w = BitWriter::new();
        Aud { primary_pic_type: 2 }.write(&mut w);
        assert_eq!(w.finish(), vec![0x09, 0b0101_0000]);
    }

    #[test]
    fn test_sei_user_data() {
        let message = SeiMessage::UserDataUnregistered(UserDataUnregistered {
            uuid: [0xaa; 16],
            data: b"hi\0".to_vec(),
        });
        let mut w = BitWriter::new();
        write_sei(&mut w, &[message], None).unwrap();
        let data = w.finish();
        assert_eq!(&data[..3], &[0x06, 5, 19]);
        assert_eq!(&data[3..19], &[0xaa; 16]);
        assert_eq!(&data[19..22], b"hi\0");
        assert_eq!(data[22], 0x80);
    }

    #[test]
    fn test_sei_timing_needs_hrd() {
        let message = SeiMessage::PicTiming(PicTiming::default());
        assert!(write_sei(&mut BitWriter::new(), &[message], None).is_err());
    }

    #[test]
    fn test_sei_payload_alignment() {
        // Recovery point: ue(0) 1 0 00 = 5 bits, padded with 1 then zeros.
        let message = SeiMessage::RecoveryPoint(RecoveryPoint {
            recovery_frame_cnt: 0,
            exact_match_flag: true,
            broken_link_flag: false,
        });
        let mut w = BitWriter::new();
        write_sei(&mut w, &[message], None).unwrap();
        assert_eq!(w.finish(), vec![0x06, 6, 1, 0b1100_0100, 0x80]);
    }

    #[test]
    fn test_sei_varint() {
        let mut w = BitWriter::new();
        write_sei_varint(&mut w, 300);
        assert_eq!(w.finish(), vec![0xff, 45]);
    }

    #[test]
    fn test_slice_header_idr() {
        let ctx = SliceContext {
            log2_max_frame_num: 8,
            log2_max_pic_order_cnt_lsb: 8,
            entropy_coding_mode_flag: true,
            weighted_pred_flag: false,
            weighted_bipred_idc: 0,
            deblocking_filter_control_present_flag: false,
        };
        let header = SliceHeader {
            nal: NalHeader {
                nal_ref_idc: 3,
                nal_unit_type: NAL_IDR_SLICE,
            },
            slice_type: SLICE_TYPE_I + 5,
            ..Default::default()
        };
        let mut w = BitWriter::new();
        header.write(&mut w, &ctx).unwrap();
        // 8 NAL + ue(0) 1 + ue(7) 7 + ue(0) 1 + frame_num 8 + ue(0) 1 + poc 8
        // + two marking flags + se(0) 1.
        assert_eq!(w.bit_count(), 8 + 1 + 7 + 1 + 8 + 1 + 8 + 2 + 1);
    }

    #[test]
    fn test_slice_header_rejects_weighted_prediction() {
        let ctx = SliceContext {
            log2_max_frame_num: 8,
            log2_max_pic_order_cnt_lsb: 8,
            entropy_coding_mode_flag: false,
            weighted_pred_flag: true,
            weighted_bipred_idc: 0,
            deblocking_filter_control_present_flag: false,
        };
        let header = SliceHeader {
            nal: NalHeader {
                nal_ref_idc: 2,
                nal_unit_type: NAL_SLICE,
            },
            slice_type: SLICE_TYPE_P + 5,
            ..Default::default()
        };
        assert!(matches!(
            header.write(&mut BitWriter::new(), &ctx),
            Err(EncodeError::Unsupported(_))
        ));
    }
}
