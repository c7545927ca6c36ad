//! AV1 OBU payload syntax: sequence header, uncompressed frame header and
//! HDR metadata. Only the subset of tools this encoder enables is coded;
//! disabled tools take their inferred values.

use super::tiles::TileLayout;
use crate::encoder::bitwriter::BitWriter;
use crate::encoder::obu::{self, MetadataType};
use crate::error::{EncodeError, Result};

pub const NUM_REF_FRAMES: usize = 8;
pub const REFS_PER_FRAME: usize = 7;
pub const PRIMARY_REF_NONE: u8 = 7;
pub const DEFAULT_LOOP_FILTER_REF_DELTAS: [i8; NUM_REF_FRAMES] = [1, 0, 0, 0, -1, 0, -1, -1];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum FrameType {
    #[default]
    Key = 0,
    Inter = 1,
    IntraOnly = 2,
    Switch = 3,
}

impl FrameType {
    pub fn is_intra(self) -> bool {
        matches!(self, FrameType::Key | FrameType::IntraOnly)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TxMode {
    Only4x4 = 0,
    Largest = 1,
    #[default]
    Select = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorConfig {
    pub high_bitdepth: bool,
    pub twelve_bit: bool,
    pub mono_chrome: bool,
    pub color_description_present_flag: bool,
    pub color_primaries: u8,
    pub transfer_characteristics: u8,
    pub matrix_coefficients: u8,
    pub color_range: bool,
    pub subsampling_x: bool,
    pub subsampling_y: bool,
    pub chroma_sample_position: u8,
    pub separate_uv_delta_q: bool,
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            high_bitdepth: false,
            twelve_bit: false,
            mono_chrome: false,
            color_description_present_flag: false,
            color_primaries: 2,
            transfer_characteristics: 2,
            matrix_coefficients: 2,
            color_range: false,
            subsampling_x: true,
            subsampling_y: true,
            chroma_sample_position: 0,
            separate_uv_delta_q: false,
        }
    }
}

impl ColorConfig {
    fn is_srgb(&self) -> bool {
        self.color_primaries == 1 && self.transfer_characteristics == 13 && self.matrix_coefficients == 0
    }

    fn write(&self, w: &mut BitWriter, seq_profile: u8) {
        w.write_flag(self.high_bitdepth);
        if seq_profile == 2 && self.high_bitdepth {
            w.write_flag(self.twelve_bit);
        }
        if seq_profile != 1 {
            w.write_flag(self.mono_chrome);
        }
        w.write_flag(self.color_description_present_flag);
        if self.color_description_present_flag {
            w.write_bits(self.color_primaries as u64, 8);
            w.write_bits(self.transfer_characteristics as u64, 8);
            w.write_bits(self.matrix_coefficients as u64, 8);
        }

        if self.mono_chrome {
            w.write_flag(self.color_range);
            return;
        }
        if !self.is_srgb() {
            w.write_flag(self.color_range);
            if seq_profile == 2 && self.twelve_bit {
                w.write_flag(self.subsampling_x);
                if self.subsampling_x {
                    w.write_flag(self.subsampling_y);
                }
            }
            if self.subsampling_x && self.subsampling_y {
                w.write_bits(self.chroma_sample_position as u64, 2);
            }
        }
        w.write_flag(self.separate_uv_delta_q);
    }

    fn num_planes(&self) -> u32 {
        if self.mono_chrome {
            1
        } else {
            3
        }
    }
}

/// Single operating point sequence header without timing or decoder model
/// information.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SequenceHeader {
    pub seq_profile: u8,
    pub seq_level_idx: u8,
    pub seq_tier: bool,
    pub frame_width_bits_minus_1: u8,
    pub frame_height_bits_minus_1: u8,
    pub max_frame_width_minus_1: u32,
    pub max_frame_height_minus_1: u32,
    pub use_128x128_superblock: bool,
    pub enable_filter_intra: bool,
    pub enable_intra_edge_filter: bool,
    pub enable_interintra_compound: bool,
    pub enable_masked_compound: bool,
    pub enable_warped_motion: bool,
    pub enable_dual_filter: bool,
    pub enable_order_hint: bool,
    pub enable_jnt_comp: bool,
    pub enable_ref_frame_mvs: bool,
    pub order_hint_bits_minus_1: u8,
    pub enable_superres: bool,
    pub enable_cdef: bool,
    pub enable_restoration: bool,
    pub color_config: ColorConfig,
}

impl SequenceHeader {
    pub fn order_hint_bits(&self) -> u8 {
        if self.enable_order_hint {
            self.order_hint_bits_minus_1 + 1
        } else {
            0
        }
    }

    pub fn write(&self, w: &mut BitWriter) -> Result<()> {
        if self.frame_width_bits_minus_1 > 15 || self.frame_height_bits_minus_1 > 15 {
            return Err(EncodeError::Unsupported(format!(
                "frame size {}x{} too large for a sequence header",
                self.max_frame_width_minus_1 + 1,
                self.max_frame_height_minus_1 + 1
            )));
        }
        w.write_bits(self.seq_profile as u64, 3);
        w.write_flag(false); // still_picture
        w.write_flag(false); // reduced_still_picture_header
        w.write_flag(false); // timing_info_present_flag
        w.write_flag(false); // initial_display_delay_present_flag
        w.write_bits(0, 5); // operating_points_cnt_minus_1
        w.write_bits(0, 12); // operating_point_idc[0]
        w.write_bits(self.seq_level_idx as u64, 5);
        if self.seq_level_idx > 7 {
            w.write_flag(self.seq_tier);
        }

        w.write_bits(self.frame_width_bits_minus_1 as u64, 4);
        w.write_bits(self.frame_height_bits_minus_1 as u64, 4);
        w.write_bits(self.max_frame_width_minus_1 as u64, self.frame_width_bits_minus_1 + 1);
        w.write_bits(self.max_frame_height_minus_1 as u64, self.frame_height_bits_minus_1 + 1);
        w.write_flag(false); // frame_id_numbers_present_flag

        w.write_flag(self.use_128x128_superblock);
        w.write_flag(self.enable_filter_intra);
        w.write_flag(self.enable_intra_edge_filter);
        w.write_flag(self.enable_interintra_compound);
        w.write_flag(self.enable_masked_compound);
        w.write_flag(self.enable_warped_motion);
        w.write_flag(self.enable_dual_filter);
        w.write_flag(self.enable_order_hint);
        if self.enable_order_hint {
            w.write_flag(self.enable_jnt_comp);
            w.write_flag(self.enable_ref_frame_mvs);
        }
        w.write_flag(false); // seq_choose_screen_content_tools
        w.write_flag(false); // seq_force_screen_content_tools
        if self.enable_order_hint {
            w.write_bits(self.order_hint_bits_minus_1 as u64, 3);
        }
        w.write_flag(self.enable_superres);
        w.write_flag(self.enable_cdef);
        w.write_flag(self.enable_restoration);
        self.color_config.write(w, self.seq_profile);
        w.write_flag(false); // film_grain_params_present
        obu::trailing_bits(w);
        Ok(())
    }
}

/// Bit positions inside a frame header payload that a device may need to
/// patch when it picks the quantiser itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameHeaderOffsets {
    pub qindex: u32,
    pub loop_filter: u32,
    pub cdef: u32,
    pub cdef_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FrameHeader {
    pub show_existing_frame: bool,
    pub frame_to_show_map_idx: u8,
    pub frame_type: FrameType,
    pub show_frame: bool,
    pub showable_frame: bool,
    pub error_resilient_mode: bool,
    pub disable_cdf_update: bool,
    pub order_hint: u8,
    pub primary_ref_frame: u8,
    pub refresh_frame_flags: u8,
    pub ref_order_hint: [u8; NUM_REF_FRAMES],
    pub ref_frame_idx: [u8; REFS_PER_FRAME],
    pub allow_high_precision_mv: bool,
    pub is_filter_switchable: bool,
    pub interpolation_filter: u8,
    pub is_motion_mode_switchable: bool,
    pub disable_frame_end_update_cdf: bool,
    pub context_update_tile_id: u32,
    pub tile_size_bytes_minus1: u8,
    pub base_q_idx: u8,
    pub loop_filter_level: [u8; 4],
    pub loop_filter_sharpness: u8,
    pub loop_filter_delta_enabled: bool,
    pub loop_filter_delta_update: bool,
    pub loop_filter_ref_deltas: [i8; NUM_REF_FRAMES],
    pub loop_filter_mode_deltas: [i8; 2],
    pub cdef_damping_minus_3: u8,
    pub cdef_bits: u8,
    pub cdef_y_pri_strength: [u8; 8],
    pub cdef_y_sec_strength: [u8; 8],
    pub cdef_uv_pri_strength: [u8; 8],
    pub cdef_uv_sec_strength: [u8; 8],
    pub tx_mode: TxMode,
    pub reference_select: bool,
    pub skip_mode_present: bool,
    pub reduced_tx_set: bool,
}

/// `get_relative_dist()` for `bits`-bit order hints.
pub fn relative_dist(a: u8, b: u8, bits: u8) -> i32 {
    if bits == 0 {
        return 0;
    }
    let diff = a as i32 - b as i32;
    let m = 1 << (bits - 1);
    (diff & (m - 1)) - (diff & m)
}

fn write_increments(w: &mut BitWriter, value: u32, min: u32, max: u32) -> Result<()> {
    if value < min || value > max {
        return Err(EncodeError::Invariant(format!(
            "tile log2 {value} outside {min}..={max}"
        )));
    }
    for _ in min..value {
        w.write_flag(true);
    }
    if value < max {
        w.write_flag(false);
    }
    Ok(())
}

impl FrameHeader {
    /// A header that only shows the frame held in `slot`.
    pub fn show_existing(slot: u8) -> Self {
        Self {
            show_existing_frame: true,
            frame_to_show_map_idx: slot,
            ..Default::default()
        }
    }

    fn frame_is_intra(&self) -> bool {
        self.frame_type.is_intra()
    }

    fn coded_lossless(&self) -> bool {
        self.base_q_idx == 0
    }

    /// Whether `skip_mode_present` is coded, given the order hints held in
    /// each reference slot.
    pub fn skip_mode_allowed(&self, seq: &SequenceHeader, slot_hints: &[u8; NUM_REF_FRAMES]) -> bool {
        if self.frame_is_intra() || !self.reference_select || !seq.enable_order_hint {
            return false;
        }
        let bits = seq.order_hint_bits();
        let dist = |a: u8, b: u8| relative_dist(a, b, bits);

        let mut forward: Option<u8> = None;
        let mut backward: Option<u8> = None;
        for &idx in &self.ref_frame_idx {
            let hint = slot_hints[idx as usize];
            if dist(hint, self.order_hint) < 0 {
                if forward.is_none_or(|f| dist(hint, f) > 0) {
                    forward = Some(hint);
                }
            } else if dist(hint, self.order_hint) > 0 && backward.is_none_or(|b| dist(hint, b) < 0) {
                backward = Some(hint);
            }
        }
        let Some(forward) = forward else {
            return false;
        };
        if backward.is_some() {
            return true;
        }
        self.ref_frame_idx.iter().any(|&idx| dist(slot_hints[idx as usize], forward) < 0)
    }

    /// Write `uncompressed_header()`. Offsets are relative to the writer
    /// position on entry.
    pub fn write(
        &self,
        w: &mut BitWriter,
        seq: &SequenceHeader,
        tiles: &TileLayout,
        slot_hints: &[u8; NUM_REF_FRAMES],
    ) -> Result<FrameHeaderOffsets> {
        let start = w.bit_count();
        let mut offsets = FrameHeaderOffsets::default();
        let order_hint_bits = seq.order_hint_bits();

        w.write_flag(self.show_existing_frame);
        if self.show_existing_frame {
            w.write_bits(self.frame_to_show_map_idx as u64, 3);
            return Ok(offsets);
        }

        w.write_bits(self.frame_type as u64, 2);
        w.write_flag(self.show_frame);
        if !self.show_frame {
            w.write_flag(self.showable_frame);
        }
        let resilient_inferred =
            self.frame_type == FrameType::Switch || (self.frame_type == FrameType::Key && self.show_frame);
        if !resilient_inferred {
            w.write_flag(self.error_resilient_mode);
        }
        let error_resilient_mode = resilient_inferred || self.error_resilient_mode;
        w.write_flag(self.disable_cdf_update);
        if self.frame_type != FrameType::Switch {
            w.write_flag(false); // frame_size_override_flag
        }
        w.write_bits(self.order_hint as u64, order_hint_bits);
        if !self.frame_is_intra() && !error_resilient_mode {
            w.write_bits(self.primary_ref_frame as u64, 3);
        }

        let refresh_inferred = resilient_inferred;
        if !refresh_inferred {
            w.write_bits(self.refresh_frame_flags as u64, 8);
        }
        let refresh_frame_flags = if refresh_inferred { 0xff } else { self.refresh_frame_flags };
        if (!self.frame_is_intra() || refresh_frame_flags != 0xff) && error_resilient_mode && seq.enable_order_hint
        {
            for hint in self.ref_order_hint {
                w.write_bits(hint as u64, order_hint_bits);
            }
        }

        if self.frame_is_intra() {
            // frame_size() is implicit and superres is off.
            w.write_flag(false); // render_and_frame_size_different
        } else {
            if seq.enable_order_hint {
                w.write_flag(false); // frame_refs_short_signaling
            }
            for idx in self.ref_frame_idx {
                w.write_bits(idx as u64, 3);
            }
            w.write_flag(false); // render_and_frame_size_different
            w.write_flag(self.allow_high_precision_mv);
            w.write_flag(self.is_filter_switchable);
            if !self.is_filter_switchable {
                w.write_bits(self.interpolation_filter as u64, 2);
            }
            w.write_flag(self.is_motion_mode_switchable);
            if !error_resilient_mode && seq.enable_ref_frame_mvs {
                w.write_flag(false); // use_ref_frame_mvs
            }
        }

        if !self.disable_cdf_update {
            w.write_flag(self.disable_frame_end_update_cdf);
        }

        self.write_tile_info(w, tiles)?;

        offsets.qindex = (w.bit_count() - start) as u32;
        w.write_bits(self.base_q_idx as u64, 8);
        w.write_flag(false); // DeltaQYDc delta_coded
        let num_planes = seq.color_config.num_planes();
        if num_planes > 1 {
            if seq.color_config.separate_uv_delta_q {
                w.write_flag(false); // diff_uv_delta
            }
            w.write_flag(false); // DeltaQUDc delta_coded
            w.write_flag(false); // DeltaQUAc delta_coded
        }
        w.write_flag(false); // using_qmatrix
        w.write_flag(false); // segmentation_enabled
        if self.base_q_idx > 0 {
            w.write_flag(false); // delta_q_present
        }

        let coded_lossless = self.coded_lossless();
        if !coded_lossless {
            offsets.loop_filter = (w.bit_count() - start) as u32;
            w.write_bits(self.loop_filter_level[0] as u64, 6);
            w.write_bits(self.loop_filter_level[1] as u64, 6);
            if num_planes > 1 && (self.loop_filter_level[0] > 0 || self.loop_filter_level[1] > 0) {
                w.write_bits(self.loop_filter_level[2] as u64, 6);
                w.write_bits(self.loop_filter_level[3] as u64, 6);
            }
            w.write_bits(self.loop_filter_sharpness as u64, 3);
            w.write_flag(self.loop_filter_delta_enabled);
            if self.loop_filter_delta_enabled {
                w.write_flag(self.loop_filter_delta_update);
                if self.loop_filter_delta_update {
                    for delta in self.loop_filter_ref_deltas {
                        w.write_flag(true);
                        w.write_su(delta as i32, 7);
                    }
                    for delta in self.loop_filter_mode_deltas {
                        w.write_flag(true);
                        w.write_su(delta as i32, 7);
                    }
                }
            }

            if seq.enable_cdef {
                let cdef_start = w.bit_count();
                offsets.cdef = (cdef_start - start) as u32;
                w.write_bits(self.cdef_damping_minus_3 as u64, 2);
                w.write_bits(self.cdef_bits as u64, 2);
                for i in 0..(1usize << self.cdef_bits) {
                    w.write_bits(self.cdef_y_pri_strength[i] as u64, 4);
                    w.write_bits(self.cdef_y_sec_strength[i] as u64, 2);
                    if num_planes > 1 {
                        w.write_bits(self.cdef_uv_pri_strength[i] as u64, 4);
                        w.write_bits(self.cdef_uv_sec_strength[i] as u64, 2);
                    }
                }
                offsets.cdef_size = (w.bit_count() - cdef_start) as u32;
            }

            w.write_flag(self.tx_mode == TxMode::Select);
        }

        if !self.frame_is_intra() {
            w.write_flag(self.reference_select);
        }
        if self.skip_mode_allowed(seq, slot_hints) {
            w.write_flag(self.skip_mode_present);
        }
        if !self.frame_is_intra() && !error_resilient_mode && seq.enable_warped_motion {
            w.write_flag(false); // allow_warped_motion
        }
        w.write_flag(self.reduced_tx_set);
        if !self.frame_is_intra() {
            for _ in 0..REFS_PER_FRAME {
                w.write_flag(false); // is_global
            }
        }
        Ok(offsets)
    }

    fn write_tile_info(&self, w: &mut BitWriter, tiles: &TileLayout) -> Result<()> {
        w.write_flag(tiles.uniform);
        if tiles.uniform {
            write_increments(w, tiles.cols_log2, tiles.min_log2_cols, tiles.max_log2_cols)?;
            write_increments(w, tiles.rows_log2, tiles.min_log2_rows, tiles.max_log2_rows)?;
        } else {
            let mut start = 0;
            for &width in &tiles.width_in_sbs {
                w.write_ns(width - 1, (tiles.sb_cols - start).min(tiles.max_width_sb));
                start += width;
            }
            let max_height = tiles.max_height_sb();
            let mut start = 0;
            for &height in &tiles.height_in_sbs {
                w.write_ns(height - 1, (tiles.sb_rows - start).min(max_height));
                start += height;
            }
        }
        let log2 = tiles.cols_log2 + tiles.rows_log2;
        if log2 > 0 {
            w.write_bits(self.context_update_tile_id as u64, log2 as u8);
            w.write_bits(self.tile_size_bytes_minus1 as u64, 2);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HdrMdcv {
    /// R, G, B in 0.16 fixed point.
    pub primary_chromaticity_x: [u16; 3],
    pub primary_chromaticity_y: [u16; 3],
    pub white_point_chromaticity_x: u16,
    pub white_point_chromaticity_y: u16,
    /// 24.8 fixed point.
    pub luminance_max: u32,
    /// 18.14 fixed point.
    pub luminance_min: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HdrCll {
    pub max_cll: u16,
    pub max_fall: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metadata {
    HdrCll(HdrCll),
    HdrMdcv(HdrMdcv),
}

impl Metadata {
    pub fn metadata_type(&self) -> MetadataType {
        match self {
            Metadata::HdrCll(_) => MetadataType::HdrCll,
            Metadata::HdrMdcv(_) => MetadataType::HdrMdcv,
        }
    }

    /// Write the metadata OBU payload.
    pub fn write(&self, w: &mut BitWriter) -> Result<()> {
        obu::write_leb128(w, self.metadata_type() as u64, None)?;
        match self {
            Metadata::HdrCll(cll) => {
                w.write_bits(cll.max_cll as u64, 16);
                w.write_bits(cll.max_fall as u64, 16);
            }
            Metadata::HdrMdcv(mdcv) => {
                for i in 0..3 {
                    w.write_bits(mdcv.primary_chromaticity_x[i] as u64, 16);
                    w.write_bits(mdcv.primary_chromaticity_y[i] as u64, 16);
                }
                w.write_bits(mdcv.white_point_chromaticity_x as u64, 16);
                w.write_bits(mdcv.white_point_chromaticity_y as u64, 16);
                w.write_bits(mdcv.luminance_max as u64, 32);
                w.write_bits(mdcv.luminance_min as u64, 32);
            }
        }
        obu::trailing_bits(w);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::av1::tiles::TileRequest;

    fn tiles_1080p() -> TileLayout {
        TileLayout::search(&TileRequest {
            width: 1920,
            height: 1080,
            use_128x128_superblock: false,
            cols: 0,
            rows: 0,
            max_tile_num_minus1: 0,
        })
        .unwrap()
    }

    fn sequence() -> SequenceHeader {
        SequenceHeader {
            seq_level_idx: 8,
            frame_width_bits_minus_1: 10,
            frame_height_bits_minus_1: 10,
            max_frame_width_minus_1: 1919,
            max_frame_height_minus_1: 1079,
            enable_order_hint: true,
            order_hint_bits_minus_1: 7,
            ..Default::default()
        }
    }

    #[test]
    fn test_relative_dist_wraps() {
        assert_eq!(relative_dist(3, 1, 8), 2);
        assert_eq!(relative_dist(1, 3, 8), -2);
        assert_eq!(relative_dist(2, 254, 8), 4);
        assert_eq!(relative_dist(5, 9, 0), 0);
    }

    #[test]
    fn test_sequence_header_prefix() {
        let mut w = BitWriter::new();
        sequence().write(&mut w).unwrap();
        let bytes = w.finish();
        // Profile 0, one operating point, then level 8, main tier and the
        // start of frame_width_bits_minus_1.
        assert_eq!(&bytes[..4], &[0x00, 0x00, 0x00, 0x42]);
        assert_eq!(bytes.len(), 11);
    }

    #[test]
    fn test_srgb_skips_range_and_subsampling() {
        let mut plain = BitWriter::new();
        ColorConfig::default().write(&mut plain, 0);
        // high_bitdepth, mono_chrome, description flag, range, position, uv delta.
        assert_eq!(plain.bit_count(), 7);

        let srgb = ColorConfig {
            color_description_present_flag: true,
            color_primaries: 1,
            transfer_characteristics: 13,
            matrix_coefficients: 0,
            ..Default::default()
        };
        let mut w = BitWriter::new();
        srgb.write(&mut w, 0);
        assert_eq!(w.bit_count(), 3 + 24 + 1);
    }

    #[test]
    fn test_key_frame_bits() {
        let fh = FrameHeader {
            frame_type: FrameType::Key,
            show_frame: true,
            refresh_frame_flags: 0xff,
            primary_ref_frame: PRIMARY_REF_NONE,
            base_q_idx: 25,
            tx_mode: TxMode::Select,
            ..Default::default()
        };
        let mut w = BitWriter::new();
        let offsets = fh.write(&mut w, &sequence(), &tiles_1080p(), &[0; 8]).unwrap();
        obu::trailing_bits(&mut w);
        assert_eq!(w.finish(), vec![0x10, 0x00, 0x83, 0x20, 0x00, 0x00, 0x50]);
        assert_eq!(offsets.qindex, 19);
        assert_eq!(offsets.loop_filter, 33);
        assert_eq!(offsets.cdef_size, 0);
    }

    #[test]
    fn test_cdef_offsets() {
        let seq = SequenceHeader {
            enable_cdef: true,
            ..sequence()
        };
        let fh = FrameHeader {
            frame_type: FrameType::Key,
            show_frame: true,
            base_q_idx: 100,
            ..Default::default()
        };
        let mut w = BitWriter::new();
        let offsets = fh.write(&mut w, &seq, &tiles_1080p(), &[0; 8]).unwrap();
        assert_eq!(offsets.cdef, 49);
        assert_eq!(offsets.cdef_size, 16);
    }

    #[test]
    fn test_lossless_skips_filters() {
        let fh = FrameHeader {
            frame_type: FrameType::Key,
            show_frame: true,
            base_q_idx: 0,
            ..Default::default()
        };
        let mut w = BitWriter::new();
        fh.write(&mut w, &sequence(), &tiles_1080p(), &[0; 8]).unwrap();
        // Up to and including the qindex, then five zero flags and reduced_tx_set.
        assert_eq!(w.bit_count(), 19 + 8 + 5 + 1);
    }

    #[test]
    fn test_skip_mode_needs_both_directions() {
        let seq = sequence();
        let mut fh = FrameHeader {
            frame_type: FrameType::Inter,
            order_hint: 1,
            reference_select: true,
            ref_frame_idx: [0, 0, 0, 1, 1, 1, 1],
            ..Default::default()
        };
        let mut hints = [0u8; 8];
        hints[1] = 3;
        assert!(fh.skip_mode_allowed(&seq, &hints));

        hints[1] = 0;
        assert!(!fh.skip_mode_allowed(&seq, &hints));

        fh.reference_select = false;
        hints[1] = 3;
        assert!(!fh.skip_mode_allowed(&seq, &hints));
    }

    #[test]
    fn test_show_existing_frame() {
        let mut payload = BitWriter::new();
        FrameHeader::show_existing(1)
            .write(&mut payload, &sequence(), &tiles_1080p(), &[0; 8])
            .unwrap();
        obu::trailing_bits(&mut payload);
        assert_eq!(payload.finish(), vec![0x98]);
    }

    #[test]
    fn test_content_light_level_payload() {
        let mut w = BitWriter::new();
        Metadata::HdrCll(HdrCll {
            max_cll: 1000,
            max_fall: 400,
        })
        .write(&mut w)
        .unwrap();
        assert_eq!(w.finish(), vec![0x01, 0x03, 0xe8, 0x01, 0x90, 0x80]);
    }
}
