//! H.265 / HEVC codec plugin.
//!
//! Writes VPS, SPS, PPS, prefix SEI, AUD and slice segment headers. Every
//! non-IDR slice carries an explicit short-term reference picture set
//! derived from the picture's references and the DPB it must keep alive,
//! so the sequence parameter set never codes one.

pub mod headers;
mod level;
mod params;

use bitflags::bitflags;
use tracing::{debug, info, warn};

use self::headers::{
    Aud, BitstreamRestriction, ConformanceWindow, ContentLightLevelInfo, MasteringDisplayColourVolume,
    NalHeader, Pps, PpsTiles, ProfileTierLevel, SeiMessage, SliceHeader, Sps, StRefPicSet,
    SubLayerOrdering, TimingInfo, Vps, Vui, NAL_CRA, NAL_IDR_W_RADL, NAL_PPS, NAL_RASL_N, NAL_RASL_R,
    NAL_SPS, NAL_TRAIL_N, NAL_TRAIL_R, NAL_VPS, SLICE_B, SLICE_I, SLICE_P,
};
use self::level::LevelRequest;
pub use self::params::{H265PictureParams, H265PictureRef, H265SequenceParams, H265SliceParams};
use super::bitwriter::BitWriter;
use super::codec::{
    CodecDescriptor, CodecFlags, CodecInit, CodecPlugin, EncoderCaps, ProfileEntry, SessionContext,
};
use super::device::{DeviceAttributes, Profile};
use super::gop::PictureType;
use super::nal;
use super::packed::{PackedHeader, PackedHeaderFlags, PackedHeaderType};
use super::reorder::{PictureArena, PictureId};
use super::slice::{Slice, TileGrid};
use super::{CodecOptions, ColourRange, EncodeConfig, HdrMetadata, PixelFormat, RateControlMode};
use crate::error::{EncodeError, Result};

const DEFAULT_CTU_SIZE: u32 = 32;
const DEFAULT_MIN_CB_SIZE: u32 = 16;

/// H.265 profiles a user may ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum H265Profile {
    Main,
    Main10,
    /// Format range extensions (4:2:2, 4:4:4, 12-bit).
    Rext,
}

impl H265Profile {
    pub fn profile_idc(self) -> u8 {
        match self {
            H265Profile::Main => 1,
            H265Profile::Main10 => 2,
            H265Profile::Rext => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum H265Tier {
    #[default]
    Main,
    High,
}

bitflags! {
    /// SEI messages to include.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct H265Sei: u32 {
        /// Mastering display colour volume from frame HDR metadata.
        const MASTERING_DISPLAY = 0x08;
        /// Content light level from frame HDR metadata.
        const CONTENT_LIGHT_LEVEL = 0x10;
    }
}

impl Default for H265Sei {
    fn default() -> Self {
        Self::all()
    }
}

/// H.265 specific options.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct H265Options {
    pub profile: Option<H265Profile>,
    pub tier: H265Tier,
    /// `general_level_idc`, thirty times the level number. Guessed when unset.
    pub level: Option<u32>,
    pub aud: bool,
    pub sei: H265Sei,
}

/// Per-picture H.265 state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct H265Picture {
    pub pic_order_cnt: i32,
    pub last_idr_frame: i64,
    pub slice_nal_unit: u8,
    pub slice_type: u8,
    /// AUD `pic_type`.
    pub pic_type: u8,
}

const PROFILES: &[ProfileEntry] = &[
    ProfileEntry {
        codec_profile: 1,
        bit_depth: 8,
        pixel_format: PixelFormat::Yuv420,
        profile: Profile::HevcMain,
    },
    ProfileEntry {
        codec_profile: 4,
        bit_depth: 8,
        pixel_format: PixelFormat::Yuv420,
        profile: Profile::HevcMain,
    },
    ProfileEntry {
        codec_profile: 2,
        bit_depth: 10,
        pixel_format: PixelFormat::Yuv420,
        profile: Profile::HevcMain10,
    },
    ProfileEntry {
        codec_profile: 4,
        bit_depth: 10,
        pixel_format: PixelFormat::Yuv420,
        profile: Profile::HevcMain10,
    },
    ProfileEntry {
        codec_profile: 4,
        bit_depth: 12,
        pixel_format: PixelFormat::Yuv420,
        profile: Profile::HevcMain12,
    },
    ProfileEntry {
        codec_profile: 4,
        bit_depth: 8,
        pixel_format: PixelFormat::Yuv422,
        profile: Profile::HevcMain422_10,
    },
    ProfileEntry {
        codec_profile: 4,
        bit_depth: 10,
        pixel_format: PixelFormat::Yuv422,
        profile: Profile::HevcMain422_10,
    },
    ProfileEntry {
        codec_profile: 4,
        bit_depth: 8,
        pixel_format: PixelFormat::Yuv444,
        profile: Profile::HevcMain444,
    },
];

fn log2(value: u32) -> u8 {
    (31 - value.max(1).leading_zeros()) as u8
}

fn scaled_qp(base: u8, factor: f32, offset: f32) -> u8 {
    if factor > 0.0 {
        ((factor * base as f32 + offset + 0.5) as i32).clamp(1, 51) as u8
    } else {
        base
    }
}

/// Whether `sizes` is what uniform spacing over `total` would give.
fn is_uniform(sizes: &[u32], total: u32) -> bool {
    let n = sizes.len() as u32;
    sizes
        .iter()
        .enumerate()
        .all(|(i, &size)| size == (i as u32 + 1) * total / n - i as u32 * total / n)
}

fn mastering_display(hdr: &HdrMetadata) -> Option<MasteringDisplayColourVolume> {
    const CHROMA_DEN: f64 = 50_000.0;
    const LUMA_DEN: f64 = 10_000.0;
    let mdm = hdr.mastering_display?;
    let chroma = |v: f64| (CHROMA_DEN * v).round().clamp(0.0, CHROMA_DEN) as u16;

    let mut mdcv = MasteringDisplayColourVolume::default();
    // Input is R, G, B; the SEI wants G, B, R.
    for (i, j) in [1, 2, 0].into_iter().enumerate() {
        mdcv.display_primaries_x[i] = chroma(mdm.primaries[j].0);
        mdcv.display_primaries_y[i] = chroma(mdm.primaries[j].1);
    }
    mdcv.white_point_x = chroma(mdm.white_point.0);
    mdcv.white_point_y = chroma(mdm.white_point.1);
    mdcv.max_display_mastering_luminance = (LUMA_DEN * mdm.max_luminance).round().max(0.0) as u32;
    mdcv.min_display_mastering_luminance = ((LUMA_DEN * mdm.min_luminance).round().max(0.0) as u32)
        .min(mdcv.max_display_mastering_luminance);
    Some(mdcv)
}

/// H.265 codec state for one session.
#[derive(Debug, Clone, Default)]
pub struct H265Codec {
    options: H265Options,
    ctu_size: u32,
    min_cb_size: u32,
    fixed_qp_idr: u8,
    fixed_qp_p: u8,
    fixed_qp_b: u8,

    vps: Vps,
    sps: Sps,
    pps: Pps,

    aud: Option<Aud>,
    sei_needed: H265Sei,
    mastering_display: MasteringDisplayColourVolume,
    content_light_level: ContentLightLevelInfo,
    slice: SliceHeader,
}

impl H265Codec {
    pub fn vps(&self) -> &Vps {
        &self.vps
    }

    pub fn sps(&self) -> &Sps {
        &self.sps
    }

    pub fn pps(&self) -> &Pps {
        &self.pps
    }

    /// CTU and minimum coding block size in luma samples.
    pub fn block_sizes(&self) -> (u32, u32) {
        (self.ctu_size, self.min_cb_size)
    }

    fn append_aud(&mut self, out: &mut PackedHeader) -> Result<()> {
        if let Some(aud) = self.aud.take() {
            let mut w = BitWriter::new();
            aud.write(&mut w);
            out.append_nal(w)?;
        }
        Ok(())
    }

    fn profile_tier_level(&self, ctx: &SessionContext) -> ProfileTierLevel {
        let profile_idc = ctx.profile.codec_profile;
        let depth = ctx.profile.bit_depth;
        let (shift_w, shift_h) = ctx.profile.pixel_format.chroma_shift();

        let mut ptl = ProfileTierLevel {
            general_profile_idc: profile_idc,
            general_tier_flag: self.options.tier == H265Tier::High,
            general_progressive_source_flag: true,
            general_non_packed_constraint_flag: true,
            general_frame_only_constraint_flag: true,
            general_max_14bit_constraint_flag: depth <= 14,
            general_max_12bit_constraint_flag: depth <= 12,
            general_max_10bit_constraint_flag: depth <= 10,
            general_max_8bit_constraint_flag: depth <= 8,
            general_max_422chroma_constraint_flag: shift_w >= 1,
            general_max_420chroma_constraint_flag: shift_w >= 1 && shift_h >= 1,
            general_intra_constraint_flag: ctx.gop.gop_size == 1,
            general_lower_bit_rate_constraint_flag: true,
            ..Default::default()
        };
        ptl.set_compatible(profile_idc);
        if ptl.compatible(1) {
            ptl.set_compatible(2);
        }
        if ptl.compatible(3) {
            ptl.set_compatible(1);
            ptl.set_compatible(2);
        }
        ptl
    }

    fn choose_level(&self, ctx: &SessionContext, ptl: &mut ProfileTierLevel, dec_pic_buffering: u32) {
        if let Some(level) = self.options.level {
            ptl.general_level_idc = level as u8;
            return;
        }
        let (tile_cols, tile_rows) = ctx.slices.tiles.as_ref().map_or((1, 1), |t| (t.cols, t.rows));
        let req = LevelRequest {
            cpb_factor: level::cpb_vcl_factor(ctx.profile.bit_depth, ctx.profile.pixel_format.chroma_format_idc()),
            tier: self.options.tier,
            bitrate: ctx.rc.bits_per_second as u64,
            width: ctx.config.dimensions.width,
            height: ctx.config.dimensions.height,
            slice_segments: ctx.slices.nb_slices as u32,
            tile_rows,
            tile_cols,
            max_dec_pic_buffering: dec_pic_buffering,
        };
        match level::guess_level(&req) {
            Some(level) => {
                info!("Using level {}", level.name);
                ptl.general_level_idc = level.level_idc;
            }
            None => {
                warn!("Stream will not conform to any normal level: using level 8.5");
                ptl.general_level_idc = 255;
                ptl.general_tier_flag = true;
            }
        }
    }

    fn build_vui(&self, ctx: &SessionContext) -> Vui {
        let config = &ctx.config;
        let mut vui = Vui::default();

        if let Some((num, den)) = config.sample_aspect_ratio.filter(|&(n, d)| n > 0 && d > 0) {
            vui.aspect_ratio_info_present_flag = true;
            (vui.aspect_ratio_idc, vui.sar_width, vui.sar_height) = nal::aspect_ratio_idc(num, den);
        }

        vui.video_format = 5;
        let colour = &config.colour;
        vui.video_full_range_flag = colour.range == ColourRange::Full;
        vui.colour_primaries = colour.primaries;
        vui.transfer_characteristics = colour.transfer;
        vui.matrix_coefficients = colour.matrix;
        vui.colour_description_present_flag = colour.is_specified();
        vui.video_signal_type_present_flag =
            colour.range != ColourRange::Unspecified || vui.colour_description_present_flag;

        if let Some(loc) = colour.chroma_location {
            vui.chroma_loc_info_present_flag = true;
            vui.chroma_sample_loc_type_top_field = loc;
            vui.chroma_sample_loc_type_bottom_field = loc;
        }

        vui.timing = Some(TimingInfo {
            num_units_in_tick: config.frame_rate_denominator,
            time_scale: config.frame_rate_numerator,
            num_ticks_poc_diff_one_minus1: Some(0),
        });
        vui.bitstream_restriction = Some(BitstreamRestriction {
            motion_vectors_over_pic_boundaries_flag: true,
            restricted_ref_pic_lists_flag: true,
            max_bits_per_min_cu_denom: 1,
            log2_max_mv_length_horizontal: 15,
            log2_max_mv_length_vertical: 15,
            ..Default::default()
        });
        vui
    }

    fn pps_tiles(grid: &TileGrid, block_cols: u32, block_rows: u32) -> PpsTiles {
        PpsTiles {
            num_tile_columns_minus1: grid.cols - 1,
            num_tile_rows_minus1: grid.rows - 1,
            uniform_spacing_flag: is_uniform(&grid.col_width, block_cols)
                && is_uniform(&grid.row_height, block_rows),
            column_width_minus1: grid.col_width.iter().map(|w| w - 1).collect(),
            row_height_minus1: grid.row_height.iter().map(|h| h - 1).collect(),
            loop_filter_across_tiles_enabled_flag: true,
        }
    }

    fn picture_ref(
        pictures: &PictureArena<H265Picture>,
        id: PictureId,
        current_poc: i32,
    ) -> Result<H265PictureRef> {
        let picture = pictures.picture(id)?;
        let poc = picture.codec.pic_order_cnt;
        Ok(H265PictureRef {
            surface: picture
                .recon_surface
                .ok_or_else(|| EncodeError::Invariant("reference without recon surface".to_string()))?,
            pic_order_cnt: poc,
            rps_st_curr_before: poc < current_poc,
            rps_st_curr_after: poc > current_poc,
        })
    }

    /// Short-term RPS: the references (used) then whatever else the DPB
    /// keeps alive (unused).
    fn reference_picture_set(pictures: &PictureArena<H265Picture>, id: PictureId) -> Result<StRefPicSet> {
        let picture = pictures.picture(id)?;
        let mut entries = Vec::new();
        for r in picture.all_refs() {
            entries.push((pictures.picture(r)?.codec.pic_order_cnt, true));
        }
        for &d in &picture.dpb {
            if d == id || picture.refs.iter().any(|list| list.contains(&d)) {
                continue;
            }
            entries.push((pictures.picture(d)?.codec.pic_order_cnt, false));
        }
        debug!("RPS for POC {}: {:?}", picture.codec.pic_order_cnt, entries);
        StRefPicSet::from_pictures(picture.codec.pic_order_cnt, &entries)
    }
}

impl CodecPlugin for H265Codec {
    type SequenceParams = H265SequenceParams;
    type PictureParams = H265PictureParams;
    type SliceParams = H265SliceParams;
    type PictureData = H265Picture;

    const DESCRIPTOR: CodecDescriptor = CodecDescriptor {
        codec: super::Codec::H265,
        flags: CodecFlags::SLICE_CONTROL
            .union(CodecFlags::B_PICTURES)
            .union(CodecFlags::B_PICTURE_REFERENCES)
            .union(CodecFlags::NON_IDR_KEY_PICTURES),
        default_quality: 25,
        sequence_header_type: PackedHeaderType::Sequence,
        picture_header_type: PackedHeaderType::Picture,
        slice_header_type: PackedHeaderType::Slice,
    };

    fn profiles() -> &'static [ProfileEntry] {
        PROFILES
    }

    fn init(&mut self, config: &EncodeConfig) -> Result<CodecInit> {
        let CodecOptions::H265(options) = &config.codec_options else {
            return Err(EncodeError::InvalidConfig(
                "H.265 encoder needs H.265 options".to_string(),
            ));
        };
        self.options = options.clone();

        if let Some(level) = options.level {
            if level > 0xff {
                return Err(EncodeError::InvalidConfig(format!(
                    "invalid level {level}: must fit in 8-bit unsigned integer"
                )));
            }
        }

        Ok(CodecInit {
            requested_profile: options.profile.map(H265Profile::profile_idc),
            desired_packed_headers: PackedHeaderFlags::SEQUENCE
                | PackedHeaderFlags::SLICE
                | PackedHeaderFlags::MISC,
            compression_level: None,
        })
    }

    fn encoder_caps(&mut self, config: &EncodeConfig, attrs: &DeviceAttributes) -> Result<EncoderCaps> {
        match attrs.hevc_block_sizes {
            Some(sizes) => {
                self.ctu_size = 1 << sizes.log2_max_coding_tree_block_size;
                self.min_cb_size = 1 << sizes.log2_min_luma_coding_block_size;
            }
            None => {
                warn!("Driver does not advertise encoder block size, using guessed defaults");
                self.ctu_size = DEFAULT_CTU_SIZE;
                self.min_cb_size = DEFAULT_MIN_CB_SIZE;
            }
        }
        if self.min_cb_size > self.ctu_size {
            return Err(EncodeError::Device(format!(
                "minimum coding block {} larger than CTU {}",
                self.min_cb_size, self.ctu_size
            )));
        }
        debug!(
            "Using CTU size {0}x{0}, min CB size {1}x{1}",
            self.ctu_size, self.min_cb_size
        );

        Ok(EncoderCaps {
            surface_width: config.dimensions.width.next_multiple_of(self.min_cb_size),
            surface_height: config.dimensions.height.next_multiple_of(self.min_cb_size),
            slice_block_width: self.ctu_size,
            slice_block_height: self.ctu_size,
        })
    }

    fn configure(&mut self, ctx: &SessionContext) -> Result<()> {
        if ctx.rc.mode == RateControlMode::Cqp {
            let config = &ctx.config;
            self.fixed_qp_p = ctx.rc.quality.clamp(1, 51) as u8;
            self.fixed_qp_idr = scaled_qp(self.fixed_qp_p, config.i_quant_factor, config.i_quant_offset);
            self.fixed_qp_b = scaled_qp(self.fixed_qp_p, config.b_quant_factor, config.b_quant_offset);
            debug!(
                "Using fixed QP = {} / {} / {} for IDR- / P- / B-frames",
                self.fixed_qp_idr, self.fixed_qp_p, self.fixed_qp_b
            );
        } else {
            self.fixed_qp_idr = 30;
            self.fixed_qp_p = 30;
            self.fixed_qp_b = 30;
        }
        Ok(())
    }

    fn init_sequence_params(
        &mut self,
        ctx: &SessionContext,
        seq: &mut H265SequenceParams,
        pic: &mut H265PictureParams,
    ) -> Result<()> {
        let config = &ctx.config;
        let gop = &ctx.gop;
        let format = ctx.profile.pixel_format;
        let depth = ctx.profile.bit_depth;

        let ordering = SubLayerOrdering {
            max_dec_pic_buffering_minus1: gop.max_b_depth + 1,
            max_num_reorder_pics: gop.max_b_depth,
            max_latency_increase_plus1: 0,
        };
        let mut ptl = self.profile_tier_level(ctx);
        self.choose_level(ctx, &mut ptl, ordering.max_dec_pic_buffering_minus1 + 1);

        let vps = Vps {
            nal: NalHeader::new(NAL_VPS),
            vps_video_parameter_set_id: 0,
            vps_base_layer_internal_flag: true,
            vps_base_layer_available_flag: true,
            vps_max_layers_minus1: 0,
            vps_max_sub_layers_minus1: 0,
            vps_temporal_id_nesting_flag: true,
            profile_tier_level: ptl,
            vps_sub_layer_ordering_info_present_flag: false,
            ordering,
            vps_max_layer_id: 0,
            vps_num_layer_sets_minus1: 0,
            timing: Some(TimingInfo {
                num_units_in_tick: config.frame_rate_denominator,
                time_scale: config.frame_rate_numerator,
                num_ticks_poc_diff_one_minus1: Some(0),
            }),
        };

        let (width, height) = (config.dimensions.width, config.dimensions.height);
        let (shift_w, shift_h) = format.chroma_shift();
        let conformance_window = (ctx.surface_width != width || ctx.surface_height != height).then(|| {
            ConformanceWindow {
                left: 0,
                right: (ctx.surface_width - width) >> shift_w,
                top: 0,
                bottom: (ctx.surface_height - height) >> shift_h,
            }
        });

        let min_cb_log2 = log2(self.min_cb_size);
        let ctu_log2 = log2(self.ctu_size);
        let sps = Sps {
            nal: NalHeader::new(NAL_SPS),
            sps_video_parameter_set_id: 0,
            sps_max_sub_layers_minus1: 0,
            sps_temporal_id_nesting_flag: true,
            profile_tier_level: ptl,
            sps_seq_parameter_set_id: 0,
            chroma_format_idc: format.chroma_format_idc(),
            pic_width_in_luma_samples: ctx.surface_width,
            pic_height_in_luma_samples: ctx.surface_height,
            conformance_window,
            bit_depth_luma_minus8: depth - 8,
            bit_depth_chroma_minus8: depth - 8,
            log2_max_pic_order_cnt_lsb_minus4: 8,
            sps_sub_layer_ordering_info_present_flag: false,
            ordering,
            log2_min_luma_coding_block_size_minus3: min_cb_log2.saturating_sub(3),
            log2_diff_max_min_luma_coding_block_size: ctu_log2 - min_cb_log2,
            log2_min_luma_transform_block_size_minus2: 0,
            log2_diff_max_min_luma_transform_block_size: 3,
            max_transform_hierarchy_depth_inter: 3,
            max_transform_hierarchy_depth_intra: 3,
            scaling_list_enabled_flag: false,
            amp_enabled_flag: true,
            sample_adaptive_offset_enabled_flag: false,
            pcm: None,
            sps_temporal_mvp_enabled_flag: false,
            strong_intra_smoothing_enabled_flag: false,
            vui: Some(self.build_vui(ctx)),
        };

        let tiles = ctx
            .slices
            .tiles
            .as_ref()
            .map(|grid| Self::pps_tiles(grid, ctx.slices.block_cols, ctx.slices.block_rows));
        let cu_qp_delta = ctx.rc.mode != RateControlMode::Cqp;
        let pps = Pps {
            nal: NalHeader::new(NAL_PPS),
            pps_pic_parameter_set_id: 0,
            pps_seq_parameter_set_id: 0,
            init_qp_minus26: self.fixed_qp_idr as i8 - 26,
            cu_qp_delta_enabled_flag: cu_qp_delta,
            diff_cu_qp_delta_depth: 0,
            tiles,
            pps_loop_filter_across_slices_enabled_flag: true,
            ..Default::default()
        };

        let vui = sps.vui.as_ref();
        *seq = H265SequenceParams {
            general_profile_idc: ptl.general_profile_idc,
            general_level_idc: ptl.general_level_idc,
            general_tier_flag: ptl.general_tier_flag,
            intra_period: gop.gop_size,
            intra_idr_period: gop.gop_size,
            ip_period: gop.b_per_p + 1,
            bits_per_second: ctx.rc.bits_per_second,
            pic_width_in_luma_samples: sps.pic_width_in_luma_samples,
            pic_height_in_luma_samples: sps.pic_height_in_luma_samples,
            chroma_format_idc: sps.chroma_format_idc,
            bit_depth_luma_minus8: sps.bit_depth_luma_minus8,
            bit_depth_chroma_minus8: sps.bit_depth_chroma_minus8,
            log2_min_luma_coding_block_size_minus3: sps.log2_min_luma_coding_block_size_minus3,
            log2_diff_max_min_luma_coding_block_size: sps.log2_diff_max_min_luma_coding_block_size,
            log2_min_transform_block_size_minus2: sps.log2_min_luma_transform_block_size_minus2,
            log2_diff_max_min_transform_block_size: sps.log2_diff_max_min_luma_transform_block_size,
            max_transform_hierarchy_depth_inter: sps.max_transform_hierarchy_depth_inter,
            max_transform_hierarchy_depth_intra: sps.max_transform_hierarchy_depth_intra,
            amp_enabled_flag: sps.amp_enabled_flag,
            sample_adaptive_offset_enabled_flag: sps.sample_adaptive_offset_enabled_flag,
            pcm_enabled_flag: sps.pcm.is_some(),
            sps_temporal_mvp_enabled_flag: sps.sps_temporal_mvp_enabled_flag,
            strong_intra_smoothing_enabled_flag: sps.strong_intra_smoothing_enabled_flag,
            vui_parameters_present_flag: vui.is_some(),
            aspect_ratio_idc: vui.map_or(0, |v| v.aspect_ratio_idc),
            sar_width: vui.map_or(0, |v| v.sar_width),
            sar_height: vui.map_or(0, |v| v.sar_height),
            num_units_in_tick: vui.and_then(|v| v.timing).map_or(0, |t| t.num_units_in_tick),
            time_scale: vui.and_then(|v| v.timing).map_or(0, |t| t.time_scale),
        };

        let pps_tiles = pps.tiles.as_ref();
        *pic = H265PictureParams {
            pic_init_qp: (pps.init_qp_minus26 + 26) as u8,
            diff_cu_qp_delta_depth: pps.diff_cu_qp_delta_depth,
            pps_cb_qp_offset: pps.pps_cb_qp_offset,
            pps_cr_qp_offset: pps.pps_cr_qp_offset,
            num_tile_columns_minus1: pps_tiles.map_or(0, |t| t.num_tile_columns_minus1),
            num_tile_rows_minus1: pps_tiles.map_or(0, |t| t.num_tile_rows_minus1),
            column_width_minus1: pps_tiles.map_or_else(Vec::new, |t| t.column_width_minus1.clone()),
            row_height_minus1: pps_tiles.map_or_else(Vec::new, |t| t.row_height_minus1.clone()),
            log2_parallel_merge_level_minus2: pps.log2_parallel_merge_level_minus2,
            num_ref_idx_l0_default_active_minus1: pps.num_ref_idx_l0_default_active_minus1,
            num_ref_idx_l1_default_active_minus1: pps.num_ref_idx_l1_default_active_minus1,
            slice_pic_parameter_set_id: pps.pps_pic_parameter_set_id,
            cu_qp_delta_enabled_flag: pps.cu_qp_delta_enabled_flag,
            tiles_enabled_flag: pps_tiles.is_some(),
            pps_loop_filter_across_slices_enabled_flag: pps.pps_loop_filter_across_slices_enabled_flag,
            ..Default::default()
        };

        self.vps = vps;
        self.sps = sps;
        self.pps = pps;
        Ok(())
    }

    fn init_picture_params(
        &mut self,
        ctx: &SessionContext,
        pictures: &mut PictureArena<H265Picture>,
        id: PictureId,
        params: &mut H265PictureParams,
    ) -> Result<()> {
        let picture = pictures.picture(id)?;
        let mut data = H265Picture::default();

        if picture.picture_type == PictureType::Idr {
            if picture.display_order != picture.encode_order {
                return Err(EncodeError::Invariant(format!(
                    "IDR picture {} coded out of order",
                    picture.display_order
                )));
            }
            data.last_idr_frame = picture.display_order;
            data.slice_nal_unit = NAL_IDR_W_RADL;
            data.slice_type = SLICE_I;
            data.pic_type = 0;
        } else {
            let prev = picture.prev.ok_or_else(|| {
                EncodeError::Invariant(format!(
                    "{:?} picture {} has no previous picture",
                    picture.picture_type, picture.display_order
                ))
            })?;
            data.last_idr_frame = pictures.picture(prev)?.codec.last_idr_frame;

            match picture.picture_type {
                PictureType::I | PictureType::Idr => {
                    data.slice_nal_unit = NAL_CRA;
                    data.slice_type = SLICE_I;
                    data.pic_type = 0;
                }
                PictureType::P => {
                    data.slice_nal_unit = NAL_TRAIL_R;
                    data.slice_type = SLICE_P;
                    data.pic_type = 1;
                }
                PictureType::B => {
                    // Leading pictures of a CRA are skipped on random access.
                    let mut leads_irap = false;
                    let mut walk = Some(id);
                    while let Some(current) = walk {
                        let p = pictures.picture(current)?;
                        if p.picture_type == PictureType::I {
                            leads_irap = true;
                            break;
                        }
                        walk = p.refs[1].first().copied();
                    }
                    let non_reference = picture.b_depth == ctx.gop.max_b_depth;
                    data.slice_nal_unit = match (leads_irap, non_reference) {
                        (true, true) => NAL_RASL_N,
                        (true, false) => NAL_RASL_R,
                        (false, true) => NAL_TRAIL_N,
                        (false, false) => NAL_TRAIL_R,
                    };
                    data.slice_type = SLICE_B;
                    data.pic_type = 2;
                }
            }
        }
        data.pic_order_cnt = (picture.display_order - data.last_idr_frame) as i32;

        self.aud = self.options.aud.then_some(Aud { pic_type: data.pic_type });

        self.sei_needed = H265Sei::empty();
        if picture.picture_type.is_intra() {
            if let Some(hdr) = &picture.hdr {
                if self.options.sei.contains(H265Sei::MASTERING_DISPLAY) {
                    if let Some(mdcv) = mastering_display(hdr) {
                        self.mastering_display = mdcv;
                        self.sei_needed |= H265Sei::MASTERING_DISPLAY;
                    }
                }
                if self.options.sei.contains(H265Sei::CONTENT_LIGHT_LEVEL) {
                    if let Some(cll) = hdr.content_light_level {
                        self.content_light_level = ContentLightLevelInfo {
                            max_content_light_level: cll.max_content_light_level,
                            max_pic_average_light_level: cll.max_pic_average_light_level,
                        };
                        self.sei_needed |= H265Sei::CONTENT_LIGHT_LEVEL;
                    }
                }
            }
        }

        let recon = picture
            .recon_surface
            .ok_or_else(|| EncodeError::Invariant("picture without recon surface".to_string()))?;
        params.decoded_curr_pic = Some(H265PictureRef {
            surface: recon,
            pic_order_cnt: data.pic_order_cnt,
            rps_st_curr_before: false,
            rps_st_curr_after: false,
        });

        let refs: Vec<PictureId> = picture.all_refs().collect();
        let picture_type = picture.picture_type;
        let is_reference = picture.is_reference;
        params.coded_buf = picture.output_buffer;
        pictures.picture_mut(id)?.codec = data;

        params.reference_frames.clear();
        for r in refs {
            params
                .reference_frames
                .push(Self::picture_ref(pictures, r, data.pic_order_cnt)?);
        }
        params.collocated_ref_pic_index = None;
        params.nal_unit_type = data.slice_nal_unit;
        params.idr_pic_flag = picture_type == PictureType::Idr;
        params.coding_type = match picture_type {
            PictureType::Idr | PictureType::I => 1,
            PictureType::P => 2,
            PictureType::B => 3,
        };
        params.reference_pic_flag = is_reference;
        params.ctu_max_bitsize_allowed = 0;
        Ok(())
    }

    fn init_slice_params(
        &mut self,
        _ctx: &SessionContext,
        pictures: &PictureArena<H265Picture>,
        id: PictureId,
        _picture: &H265PictureParams,
        slice: &mut Slice<H265SliceParams>,
    ) -> Result<()> {
        let picture = pictures.picture(id)?;
        let data = picture.codec;
        let poc_mask = (1u32 << (self.sps.log2_max_pic_order_cnt_lsb_minus4 + 4)) - 1;

        let mut sh = SliceHeader {
            nal: NalHeader::new(data.slice_nal_unit),
            first_slice_segment_in_pic_flag: slice.index == 0,
            slice_pic_parameter_set_id: self.pps.pps_pic_parameter_set_id,
            slice_segment_address: slice.block_start,
            slice_type: data.slice_type,
            slice_pic_order_cnt_lsb: data.pic_order_cnt as u32 & poc_mask,
            collocated_from_l0_flag: true,
            slice_sao_luma_flag: self.sps.sample_adaptive_offset_enabled_flag,
            slice_sao_chroma_flag: self.sps.sample_adaptive_offset_enabled_flag,
            slice_loop_filter_across_slices_enabled_flag: self.pps.pps_loop_filter_across_slices_enabled_flag,
            ..Default::default()
        };

        if picture.picture_type != PictureType::Idr {
            sh.short_term_ref_pic_set = Self::reference_picture_set(pictures, id)?;
            sh.slice_temporal_mvp_enabled_flag = self.sps.sps_temporal_mvp_enabled_flag;
        }

        let init_qp = self.pps.init_qp_minus26 as i32 + 26;
        sh.slice_qp_delta = match picture.picture_type {
            PictureType::B => self.fixed_qp_b as i32,
            PictureType::P => self.fixed_qp_p as i32,
            PictureType::I | PictureType::Idr => self.fixed_qp_idr as i32,
        } - init_qp;

        let (l0, l1) = sh.num_ref_idx_active_minus1(&self.pps);
        let current_poc = data.pic_order_cnt;
        let list = |n: usize| -> Result<Vec<H265PictureRef>> {
            picture.refs[n]
                .first()
                .map(|&r| Self::picture_ref(pictures, r, current_poc))
                .into_iter()
                .collect()
        };

        let nb_slices = picture.nb_slices.max(1);
        let params = &mut slice.params;
        params.slice_segment_address = sh.slice_segment_address;
        params.num_ctu_in_slice = slice.block_size;
        params.slice_type = sh.slice_type;
        params.slice_pic_parameter_set_id = sh.slice_pic_parameter_set_id;
        params.num_ref_idx_l0_active_minus1 = l0;
        params.num_ref_idx_l1_active_minus1 = l1;
        params.ref_pic_list0 = list(0)?;
        params.ref_pic_list1 = list(1)?;
        params.max_num_merge_cand = 5 - sh.five_minus_max_num_merge_cand;
        params.slice_qp_delta = sh.slice_qp_delta;
        params.slice_cb_qp_offset = sh.slice_cb_qp_offset;
        params.slice_cr_qp_offset = sh.slice_cr_qp_offset;
        params.last_slice_of_pic_flag = slice.index == nb_slices - 1;
        params.slice_sao_luma_flag = sh.slice_sao_luma_flag;
        params.slice_sao_chroma_flag = sh.slice_sao_chroma_flag;
        params.slice_temporal_mvp_enabled_flag = sh.slice_temporal_mvp_enabled_flag;
        params.collocated_from_l0_flag = sh.collocated_from_l0_flag;
        params.slice_loop_filter_across_slices_enabled_flag = sh.slice_loop_filter_across_slices_enabled_flag;

        self.slice = sh;
        Ok(())
    }

    fn write_sequence_header(&mut self, _ctx: &SessionContext, out: &mut PackedHeader) -> Result<()> {
        self.append_aud(out)?;
        let mut w = BitWriter::new();
        self.vps.write(&mut w)?;
        out.append_nal(w)?;
        let mut w = BitWriter::new();
        self.sps.write(&mut w)?;
        out.append_nal(w)?;
        let mut w = BitWriter::new();
        self.pps.write(&mut w)?;
        out.append_nal(w)
    }

    fn write_slice_header(
        &mut self,
        _ctx: &SessionContext,
        _pictures: &PictureArena<H265Picture>,
        _id: PictureId,
        _slice: &Slice<H265SliceParams>,
        out: &mut PackedHeader,
    ) -> Result<()> {
        self.append_aud(out)?;
        let mut w = BitWriter::new();
        self.slice.write(&mut w, &self.sps, &self.pps)?;
        out.append_nal(w)
    }

    fn write_extra_header(
        &mut self,
        _ctx: &SessionContext,
        _pictures: &mut PictureArena<H265Picture>,
        _id: PictureId,
        index: usize,
        out: &mut PackedHeader,
    ) -> Result<Option<PackedHeaderType>> {
        if index > 0 || self.sei_needed.is_empty() {
            return Ok(None);
        }
        self.append_aud(out)?;

        let mut messages = Vec::new();
        if self.sei_needed.contains(H265Sei::MASTERING_DISPLAY) {
            messages.push(SeiMessage::MasteringDisplay(self.mastering_display));
        }
        if self.sei_needed.contains(H265Sei::CONTENT_LIGHT_LEVEL) {
            messages.push(SeiMessage::ContentLightLevel(self.content_light_level));
        }
        self.sei_needed = H265Sei::empty();

        let mut w = BitWriter::new();
        headers::write_sei(&mut w, &messages)?;
        out.append_nal(w)?;
        Ok(Some(PackedHeaderType::RawData))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::device::SurfaceId;
    use crate::encoder::loopback::LoopbackDevice;
    use crate::encoder::reorder::{Pick, Picture, ReorderWindow};
    use crate::encoder::session::EncodeSession;
    use crate::encoder::{BitDepth, ContentLightLevel, Encoder, InputFrame, MasteringDisplay};

    fn setup_on(device: LoopbackDevice, config: EncodeConfig) -> (H265Codec, SessionContext) {
        let session = EncodeSession::<H265Codec, _>::new(device, config).unwrap();
        (session.codec().clone(), session.context().clone())
    }

    fn setup(config: EncodeConfig) -> (H265Codec, SessionContext) {
        setup_on(LoopbackDevice::new(), config)
    }

    /// Run `frames` pictures through the codec in encode order, returning
    /// the RPS of every slice header.
    fn run(
        codec: &mut H265Codec,
        ctx: &SessionContext,
        frames: u32,
    ) -> (ReorderWindow<H265Picture>, Vec<PictureId>, Vec<StRefPicSet>) {
        let mut window = ReorderWindow::new();
        for i in 0..frames {
            let mut picture = Picture::new(SurfaceId(i), i as i64);
            picture.force_idr = i == 0;
            window.push(picture);
        }
        window.set_end_of_stream();

        let mut order = Vec::new();
        let mut sets = Vec::new();
        while let Pick::Ready(id) = window.pick_next(&ctx.gop).unwrap() {
            {
                let picture = window.pictures_mut().picture_mut(id).unwrap();
                picture.encode_order = order.len() as i64;
                picture.recon_surface = Some(SurfaceId(100 + order.len() as u32));
            }
            let mut params = H265PictureParams::default();
            codec
                .init_picture_params(ctx, window.pictures_mut(), id, &mut params)
                .unwrap();
            let mut slices = ctx.slices.make_slices::<H265SliceParams>(1).unwrap();
            codec
                .init_slice_params(ctx, window.pictures(), id, &params, &mut slices[0])
                .unwrap();
            sets.push(codec.slice.short_term_ref_pic_set.clone());
            let picture = window.pictures_mut().picture_mut(id).unwrap();
            picture.encode_issued = true;
            picture.encode_complete = true;
            order.push(id);
        }
        (window, order, sets)
    }

    fn options(config: &mut EncodeConfig) -> &mut H265Options {
        match &mut config.codec_options {
            CodecOptions::H265(options) => options,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_level_must_fit_in_a_byte() {
        let mut config = EncodeConfig::h265(640, 480);
        options(&mut config).level = Some(256);
        assert!(H265Codec::default().init(&config).is_err());
    }

    #[test]
    fn test_block_sizes_from_device() {
        let (codec, ctx) = setup(EncodeConfig::h265(1920, 1080));
        assert_eq!(codec.block_sizes(), (32, 8));
        assert_eq!((ctx.surface_width, ctx.surface_height), (1920, 1080));
        assert_eq!(ctx.slices.block_width, 32);
        let sps = codec.sps();
        assert_eq!(sps.log2_min_luma_coding_block_size_minus3, 0);
        assert_eq!(sps.log2_diff_max_min_luma_coding_block_size, 2);
        assert!(sps.conformance_window.is_none());
    }

    #[test]
    fn test_guessed_block_sizes() {
        let mut attrs = LoopbackDevice::full_attributes();
        attrs.hevc_block_sizes = None;
        let device = LoopbackDevice::new().with_attributes(attrs);
        let (codec, ctx) = setup_on(device, EncodeConfig::h265(1920, 1080));
        assert_eq!(codec.block_sizes(), (32, 16));
        assert_eq!(ctx.surface_height, 1088);
        // Chroma units for 4:2:0.
        assert_eq!(codec.sps().conformance_window.map(|w| w.bottom), Some(4));
    }

    #[test]
    fn test_level_guess() {
        let (codec, _) = setup(EncodeConfig::h265(1920, 1080));
        assert_eq!(codec.sps().profile_tier_level.general_level_idc, 120);
        assert_eq!(codec.vps().profile_tier_level, codec.sps().profile_tier_level);

        let mut config = EncodeConfig::h265(1920, 1080);
        options(&mut config).level = Some(153);
        let (codec, _) = setup(config);
        assert_eq!(codec.sps().profile_tier_level.general_level_idc, 153);
    }

    #[test]
    fn test_main_profile_compatibility() {
        let (codec, ctx) = setup(EncodeConfig::h265(640, 480));
        let ptl = codec.sps().profile_tier_level;
        assert_eq!(ctx.profile.profile, Profile::HevcMain);
        assert_eq!(ptl.general_profile_idc, 1);
        assert!(ptl.compatible(1) && ptl.compatible(2));
        assert!(!ptl.compatible(4));
    }

    #[test]
    fn test_ten_bit_selects_main10() {
        let (codec, ctx) = setup(EncodeConfig::h265(640, 480).with_bit_depth(BitDepth::Ten));
        assert_eq!(ctx.profile.codec_profile, 2);
        assert_eq!(codec.sps().bit_depth_luma_minus8, 2);
    }

    #[test]
    fn test_422_uses_rext() {
        let (codec, ctx) = setup(EncodeConfig::h265(640, 480).with_pixel_format(PixelFormat::Yuv422));
        assert_eq!(ctx.profile.codec_profile, 4);
        let ptl = codec.sps().profile_tier_level;
        assert!(ptl.general_max_422chroma_constraint_flag);
        assert!(!ptl.general_max_420chroma_constraint_flag);
        assert_eq!(codec.sps().chroma_format_idc, 2);
    }

    #[test]
    fn test_qp_and_cu_qp_delta() {
        let (codec, _) = setup(EncodeConfig::h265(640, 480).with_qp(28));
        assert_eq!(codec.pps().init_qp_minus26, 2);
        assert!(!codec.pps().cu_qp_delta_enabled_flag);

        let (codec, _) = setup(EncodeConfig::h265(640, 480));
        assert_eq!(codec.pps().init_qp_minus26, 4);
        assert!(codec.pps().cu_qp_delta_enabled_flag);
    }

    #[test]
    fn test_nal_types_and_rps() {
        let (mut codec, ctx) = setup(EncodeConfig::h265(640, 480));
        let (window, order, sets) = run(&mut codec, &ctx, 7);
        let data: Vec<H265Picture> = order
            .iter()
            .map(|&id| window.pictures().picture(id).unwrap().codec)
            .collect();
        let pocs: Vec<i32> = data.iter().map(|d| d.pic_order_cnt).collect();
        assert_eq!(pocs, vec![0, 3, 1, 2, 6, 4, 5]);
        let nal_types: Vec<u8> = data.iter().map(|d| d.slice_nal_unit).collect();
        assert_eq!(
            nal_types,
            vec![NAL_IDR_W_RADL, NAL_TRAIL_R, NAL_TRAIL_N, NAL_TRAIL_N, NAL_TRAIL_R, NAL_TRAIL_N, NAL_TRAIL_N]
        );

        // B1 predicts from POC 0 and POC 3.
        let b1 = &sets[2];
        assert_eq!(b1.negative[0].delta_poc_minus1, 0);
        assert!(b1.negative[0].used_by_curr_pic_flag);
        assert_eq!(b1.positive[0].delta_poc_minus1, 1);
        assert!(b1.positive[0].used_by_curr_pic_flag);

        // P6 predicts from POC 3 only.
        let p6 = &sets[4];
        assert_eq!(p6.negative[0].delta_poc_minus1, 2);
        assert!(p6.negative[0].used_by_curr_pic_flag);
        assert_eq!(p6.num_used(), 1);
        assert!(p6.positive.is_empty());
    }

    #[test]
    fn test_tile_grid() {
        let (codec, ctx) = setup(EncodeConfig::h265(1280, 720).with_tiles(2, 2));
        assert_eq!(ctx.slices.nb_slices, 4);
        let tiles = codec.pps().tiles.clone().unwrap();
        assert_eq!(tiles.num_tile_columns_minus1, 1);
        assert_eq!(tiles.num_tile_rows_minus1, 1);
        assert!(tiles.uniform_spacing_flag);
        assert_eq!(tiles.column_width_minus1, vec![19, 19]);
        assert_eq!(tiles.row_height_minus1, vec![10, 11]);
    }

    #[test]
    fn test_mastering_display_conversion() {
        let hdr = HdrMetadata {
            mastering_display: Some(MasteringDisplay {
                primaries: [(0.708, 0.292), (0.170, 0.797), (0.131, 0.046)],
                white_point: (0.3127, 0.3290),
                max_luminance: 1000.0,
                min_luminance: 0.0001,
            }),
            content_light_level: None,
        };
        let mdcv = mastering_display(&hdr).unwrap();
        // Green first.
        assert_eq!(mdcv.display_primaries_x, [8500, 6550, 35400]);
        assert_eq!(mdcv.display_primaries_y, [39850, 2300, 14600]);
        assert_eq!((mdcv.white_point_x, mdcv.white_point_y), (15635, 16450));
        assert_eq!(mdcv.max_display_mastering_luminance, 10_000_000);
        assert_eq!(mdcv.min_display_mastering_luminance, 1);
    }

    #[test]
    fn test_stream_headers_and_hdr_sei() {
        let hdr = HdrMetadata {
            mastering_display: None,
            content_light_level: Some(ContentLightLevel {
                max_content_light_level: 1000,
                max_pic_average_light_level: 400,
            }),
        };
        let mut encoder = Encoder::new(LoopbackDevice::new(), EncodeConfig::h265(640, 480)).unwrap();
        encoder
            .encode(InputFrame::new(SurfaceId(0), 0).with_hdr(hdr))
            .unwrap();
        encoder
            .encode(InputFrame::new(SurfaceId(1), 1).with_hdr(hdr))
            .unwrap();
        encoder.flush().unwrap();

        let submissions = encoder.device().submissions();
        let sequence = submissions[0].packed(PackedHeaderType::Sequence).next().unwrap();
        // VPS first.
        assert_eq!(&sequence[..6], &[0, 0, 0, 1, 0x40, 0x01]);
        let sps_start = [0, 0, 0, 1, 0x42, 0x01];
        assert!(sequence.windows(6).any(|w| w == sps_start));
        let pps_start = [0, 0, 0, 1, 0x44, 0x01];
        assert!(sequence.windows(6).any(|w| w == pps_start));

        let sei = submissions[0].packed(PackedHeaderType::RawData).next().unwrap();
        assert_eq!(&sei[..8], &[0, 0, 0, 1, 0x4e, 0x01, 144, 4]);

        let slice = submissions[0].packed(PackedHeaderType::Slice).next().unwrap();
        assert_eq!(&slice[..6], &[0, 0, 0, 1, 0x26, 0x01]);

        // The P picture carries neither HDR SEI nor parameter sets.
        assert!(submissions[1].packed(PackedHeaderType::RawData).next().is_none());
        assert!(!submissions[1].has_sequence());
    }

    #[test]
    fn test_aud_before_parameter_sets() {
        let mut config = EncodeConfig::h265(640, 480);
        options(&mut config).aud = true;
        let mut encoder = Encoder::new(LoopbackDevice::new(), config).unwrap();
        encoder.encode(InputFrame::new(SurfaceId(0), 0)).unwrap();
        encoder.flush().unwrap();
        let sequence = encoder.device().submissions()[0]
            .packed(PackedHeaderType::Sequence)
            .next()
            .unwrap();
        assert_eq!(&sequence[..7], &[0, 0, 0, 1, 0x46, 0x01, 0x10]);
    }
}
