//! H.264 / AVC codec plugin.
//!
//! Writes SPS, PPS, SEI, AUD and slice headers itself and fills the
//! sequence, picture and slice parameter buffers the device encodes from.
//! Frames are coded progressive with POC type 0; B pictures may be used as
//! references, in which case explicit reference list modification and
//! memory management operations keep the decoder DPB in step with ours.

pub mod headers;
mod level;
mod params;

use bitflags::bitflags;
use tracing::{debug, info, warn};

use self::headers::{
    Aud, BufferingPeriod, FrameCrop, Hrd, Mmco, NalHeader, PicTiming, Pps, RecoveryPoint,
    RefListModification, SeiMessage, SliceContext, SliceHeader, Sps, UserDataUnregistered, Vui,
    NAL_IDR_SLICE, NAL_PPS, NAL_SLICE, NAL_SPS,
};
pub use self::params::{H264PictureParams, H264PictureRef, H264SequenceParams, H264SliceParams};
use super::bitwriter::BitWriter;
use super::codec::{CodecDescriptor, CodecFlags, CodecInit, CodecPlugin, ProfileEntry, SessionContext};
use super::device::Profile;
use super::gop::PictureType;
use super::nal;
use super::packed::{PackedHeader, PackedHeaderFlags, PackedHeaderType};
use super::reorder::{PictureArena, PictureId};
use super::slice::Slice;
use super::{CodecOptions, ColourRange, EncodeConfig, PixelFormat, RateControlMode};
use crate::error::{EncodeError, Result};

/// H.264 macroblock size in pixels.
pub const MB_SIZE: u32 = 16;

/// Version 4 UUID tagging the encoder identifier SEI.
const SEI_IDENTIFIER_UUID: [u8; 16] = [
    0x3c, 0x8e, 0x51, 0x0d, 0x92, 0x47, 0x4b, 0x36, 0xa1, 0x5e, 0x0b, 0x77, 0xd2, 0xc4, 0x19, 0x6a,
];

/// H.264 profiles a user may ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum H264Profile {
    Baseline,
    ConstrainedBaseline,
    Main,
    Extended,
    High,
    High10,
    High422,
    High444,
}

impl H264Profile {
    pub fn profile_idc(self) -> u8 {
        match self {
            H264Profile::Baseline | H264Profile::ConstrainedBaseline => 66,
            H264Profile::Main => 77,
            H264Profile::Extended => 88,
            H264Profile::High => 100,
            H264Profile::High10 => 110,
            H264Profile::High422 => 122,
            H264Profile::High444 => 244,
        }
    }
}

/// Entropy coder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum H264Coder {
    Cavlc,
    #[default]
    Cabac,
}

bitflags! {
    /// SEI messages to include.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct H264Sei: u32 {
        /// Buffering period and picture timing.
        const TIMING = 0x01;
        /// Encoder identifier string.
        const IDENTIFIER = 0x02;
        /// Recovery points on I pictures.
        const RECOVERY_POINT = 0x04;
    }
}

impl Default for H264Sei {
    fn default() -> Self {
        Self::all()
    }
}

/// H.264 specific options.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct H264Options {
    pub profile: Option<H264Profile>,
    /// `level_idc`, e.g. 41 for level 4.1. Guessed when unset.
    pub level: Option<u32>,
    /// Encode speed/quality trade-off passed to the driver.
    pub quality: Option<u32>,
    pub coder: H264Coder,
    /// Insert an access unit delimiter before every picture.
    pub aud: bool,
    pub sei: H264Sei,
}

/// Per-picture H.264 state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct H264Picture {
    pub frame_num: u32,
    pub pic_order_cnt: i32,
    pub last_idr_frame: i64,
    pub idr_pic_id: u16,
    pub primary_pic_type: u8,
    /// Slice type plus 5.
    pub slice_type: u8,
    pub cpb_delay: i64,
    pub dpb_delay: i64,
}

const PROFILES: &[ProfileEntry] = &[
    ProfileEntry {
        codec_profile: 100,
        bit_depth: 8,
        pixel_format: PixelFormat::Yuv420,
        profile: Profile::H264High,
    },
    ProfileEntry {
        codec_profile: 77,
        bit_depth: 8,
        pixel_format: PixelFormat::Yuv420,
        profile: Profile::H264Main,
    },
    ProfileEntry {
        codec_profile: 66,
        bit_depth: 8,
        pixel_format: PixelFormat::Yuv420,
        profile: Profile::H264ConstrainedBaseline,
    },
];

fn log2(value: u32) -> i32 {
    31 - value.max(1).leading_zeros() as i32
}

fn scaled_qp(base: u8, factor: f32, offset: f32) -> u8 {
    if factor > 0.0 {
        ((factor * base as f32 + offset + 0.5) as i32).clamp(1, 51) as u8
    } else {
        base
    }
}

/// H.264 codec state for one session.
#[derive(Debug, Clone, Default)]
pub struct H264Codec {
    options: H264Options,
    mb_width: u32,
    mb_height: u32,
    fixed_qp_idr: u8,
    fixed_qp_p: u8,
    fixed_qp_b: u8,
    dpb_frames: u32,
    /// SEI kinds in use after configuration.
    sei: H264Sei,
    identifier: Option<UserDataUnregistered>,

    sps: Sps,
    pps: Pps,
    buffering_period: BufferingPeriod,
    pic_timing: PicTiming,
    recovery_point: RecoveryPoint,

    /// Delimiter still to be written for the current picture.
    aud: Option<Aud>,
    sei_needed: H264Sei,
    slice: SliceHeader,
}

impl H264Codec {
    pub fn sps(&self) -> &Sps {
        &self.sps
    }

    pub fn pps(&self) -> &Pps {
        &self.pps
    }

    /// Fixed QPs for IDR, P and B pictures.
    pub fn fixed_qp(&self) -> (u8, u8, u8) {
        (self.fixed_qp_idr, self.fixed_qp_p, self.fixed_qp_b)
    }

    fn append_aud(&mut self, out: &mut PackedHeader) -> Result<()> {
        if let Some(aud) = self.aud.take() {
            let mut w = BitWriter::new();
            aud.write(&mut w);
            out.append_nal(w)?;
        }
        Ok(())
    }

    fn build_vui(&mut self, ctx: &SessionContext) -> Vui {
        let config = &ctx.config;
        let mut vui = Vui::default();

        if let Some((num, den)) = config.sample_aspect_ratio.filter(|&(n, d)| n > 0 && d > 0) {
            vui.aspect_ratio_info_present_flag = true;
            (vui.aspect_ratio_idc, vui.sar_width, vui.sar_height) = nal::aspect_ratio_idc(num, den);
        }

        // Unspecified video format.
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

        vui.timing_info_present_flag = true;
        vui.num_units_in_tick = config.frame_rate_denominator;
        vui.time_scale = config.frame_rate_numerator.saturating_mul(2);
        vui.fixed_frame_rate_flag = true;

        if self.sei.contains(H264Sei::TIMING) {
            let bits_per_second = ctx.rc.bits_per_second;
            let buffer_size = ctx.rc.hrd_buffer_size;
            let bit_rate_scale = (log2(bits_per_second) - 15 - 6).clamp(0, 15) as u8;
            let cpb_size_scale = (log2(buffer_size) - 15 - 4).clamp(0, 15) as u8;
            vui.nal_hrd_parameters = Some(Hrd {
                cpb_cnt_minus1: 0,
                bit_rate_scale,
                cpb_size_scale,
                bit_rate_value_minus1: vec![(bits_per_second >> (bit_rate_scale + 6)).saturating_sub(1)],
                cpb_size_value_minus1: vec![(buffer_size >> (cpb_size_scale + 4)).saturating_sub(1)],
                // HRD CBR needs filler data, which is never inserted.
                cbr_flag: vec![false],
                initial_cpb_removal_delay_length_minus1: 23,
                cpb_removal_delay_length_minus1: 23,
                dpb_output_delay_length_minus1: 7,
                time_offset_length: 0,
            });
            self.buffering_period = BufferingPeriod {
                seq_parameter_set_id: 0,
                initial_cpb_removal_delay: (90_000 * ctx.rc.hrd_initial_buffer_fullness as u64
                    / buffer_size.max(1) as u64) as u32,
                initial_cpb_removal_delay_offset: 0,
            };
        } else {
            vui.low_delay_hrd_flag = !vui.fixed_frame_rate_flag;
        }

        vui.bitstream_restriction_flag = true;
        vui.motion_vectors_over_pic_boundaries_flag = true;
        vui.log2_max_mv_length_horizontal = 15;
        vui.log2_max_mv_length_vertical = 15;
        vui.max_num_reorder_frames = ctx.gop.max_b_depth;
        vui.max_dec_frame_buffering = ctx.gop.max_b_depth + 1;
        vui
    }

    /// Default reference lists (8.2.4.2) built from the DPB the decoder
    /// holds after decoding the previous picture.
    fn default_ref_lists(
        pictures: &PictureArena<H264Picture>,
        id: PictureId,
    ) -> Result<(Vec<PictureId>, Vec<PictureId>)> {
        let picture = pictures.picture(id)?;
        let current = picture.codec;
        let prev = picture
            .prev
            .ok_or_else(|| EncodeError::Invariant("inter picture without previous picture".to_string()))?;

        let mut dpb: Vec<(PictureId, H264Picture)> = Vec::new();
        for &entry in &pictures.picture(prev)?.dpb {
            let data = pictures.picture(entry)?.codec;
            if data.frame_num >= current.frame_num {
                return Err(EncodeError::Invariant(format!(
                    "DPB picture frame_num {} not before current {}",
                    data.frame_num, current.frame_num
                )));
            }
            dpb.push((entry, data));
        }

        match picture.picture_type {
            PictureType::P => {
                dpb.sort_by(|a, b| b.1.frame_num.cmp(&a.1.frame_num));
                Ok((dpb.into_iter().map(|(id, _)| id).collect(), Vec::new()))
            }
            PictureType::B => {
                let poc = current.pic_order_cnt;
                let (mut before, mut after): (Vec<_>, Vec<_>) =
                    dpb.into_iter().partition(|(_, data)| data.pic_order_cnt < poc);
                before.sort_by(|a, b| b.1.pic_order_cnt.cmp(&a.1.pic_order_cnt));
                after.sort_by(|a, b| a.1.pic_order_cnt.cmp(&b.1.pic_order_cnt));

                let l0: Vec<PictureId> = before.iter().chain(after.iter()).map(|(id, _)| *id).collect();
                let mut l1: Vec<PictureId> = after.iter().chain(before.iter()).map(|(id, _)| *id).collect();
                if l1.len() > 1 && l0 == l1 {
                    l1.swap(0, 1);
                }
                Ok((l0, l1))
            }
            _ => Ok((Vec::new(), Vec::new())),
        }
    }

    /// Modifications moving `refs` to the front of a list, or `None` when
    /// the default list already starts with them.
    fn list_modification(
        pictures: &PictureArena<H264Picture>,
        frame_num: u32,
        refs: &[PictureId],
        default: &[PictureId],
    ) -> Result<Option<Vec<RefListModification>>> {
        let matches = refs
            .iter()
            .enumerate()
            .all(|(i, r)| default.get(i) == Some(r));
        if matches {
            return Ok(None);
        }

        let mut pic_num = frame_num;
        let mut entries = Vec::with_capacity(refs.len());
        for &r in refs {
            let ref_num = pictures.picture(r)?.codec.frame_num;
            let entry = if ref_num < pic_num {
                RefListModification {
                    modification_of_pic_nums_idc: 0,
                    abs_diff_pic_num_minus1: pic_num - ref_num - 1,
                }
            } else if ref_num > pic_num {
                RefListModification {
                    modification_of_pic_nums_idc: 1,
                    abs_diff_pic_num_minus1: ref_num - pic_num - 1,
                }
            } else {
                return Err(EncodeError::Invariant(format!(
                    "reference with the same picture number {ref_num}"
                )));
            };
            entries.push(entry);
            pic_num = ref_num;
        }
        Ok(Some(entries))
    }

    fn picture_ref(pictures: &PictureArena<H264Picture>, id: PictureId) -> Result<H264PictureRef> {
        let picture = pictures.picture(id)?;
        Ok(H264PictureRef {
            surface: picture
                .recon_surface
                .ok_or_else(|| EncodeError::Invariant("reference without recon surface".to_string()))?,
            frame_idx: picture.codec.frame_num,
            pic_order_cnt: picture.codec.pic_order_cnt,
        })
    }
}

impl CodecPlugin for H264Codec {
    type SequenceParams = H264SequenceParams;
    type PictureParams = H264PictureParams;
    type SliceParams = H264SliceParams;
    type PictureData = H264Picture;

    const DESCRIPTOR: CodecDescriptor = CodecDescriptor {
        codec: super::Codec::H264,
        flags: CodecFlags::SLICE_CONTROL
            .union(CodecFlags::B_PICTURES)
            .union(CodecFlags::B_PICTURE_REFERENCES)
            .union(CodecFlags::NON_IDR_KEY_PICTURES),
        default_quality: 20,
        sequence_header_type: PackedHeaderType::Sequence,
        picture_header_type: PackedHeaderType::Picture,
        slice_header_type: PackedHeaderType::Slice,
    };

    fn profiles() -> &'static [ProfileEntry] {
        PROFILES
    }

    fn init(&mut self, config: &EncodeConfig) -> Result<CodecInit> {
        let CodecOptions::H264(options) = &config.codec_options else {
            return Err(EncodeError::InvalidConfig(
                "H.264 encoder needs H.264 options".to_string(),
            ));
        };
        self.options = options.clone();

        let profile = match options.profile {
            Some(H264Profile::Baseline) => {
                warn!("H.264 baseline profile is not supported, using constrained baseline profile instead");
                Some(H264Profile::ConstrainedBaseline)
            }
            Some(H264Profile::Extended) => {
                return Err(EncodeError::InvalidConfig(
                    "H.264 extended profile is not supported".to_string(),
                ));
            }
            Some(H264Profile::High10) => {
                return Err(EncodeError::InvalidConfig(
                    "H.264 10-bit profiles are not supported".to_string(),
                ));
            }
            Some(H264Profile::High422 | H264Profile::High444) => {
                return Err(EncodeError::InvalidConfig(
                    "H.264 non-4:2:0 profiles are not supported".to_string(),
                ));
            }
            other => other,
        };

        if let Some(level) = options.level {
            if level > 0xff {
                return Err(EncodeError::InvalidConfig(format!(
                    "invalid level {level}: must fit in 8-bit unsigned integer"
                )));
            }
        }

        Ok(CodecInit {
            requested_profile: profile.map(H264Profile::profile_idc),
            // SPS and PPS, slice headers, SEI.
            desired_packed_headers: PackedHeaderFlags::SEQUENCE
                | PackedHeaderFlags::SLICE
                | PackedHeaderFlags::MISC,
            compression_level: options.quality,
        })
    }

    fn configure(&mut self, ctx: &SessionContext) -> Result<()> {
        self.mb_width = ctx.surface_width / MB_SIZE;
        self.mb_height = ctx.surface_height / MB_SIZE;

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
            // Still needed for pic_init_qp and slice_qp_delta.
            self.fixed_qp_idr = 26;
            self.fixed_qp_p = 26;
            self.fixed_qp_b = 26;
        }

        self.sei = self.options.sei;
        if !ctx.rc.mode.has_hrd() {
            // Timing SEI needs a mode with HRD parameters.
            self.sei.remove(H264Sei::TIMING);
        }

        if self.sei.contains(H264Sei::IDENTIFIER) {
            let mut data = format!("vaforge / {}", ctx.vendor).into_bytes();
            data.push(0);
            self.identifier = Some(UserDataUnregistered {
                uuid: SEI_IDENTIFIER_UUID,
                data,
            });
        }
        Ok(())
    }

    fn init_sequence_params(
        &mut self,
        ctx: &SessionContext,
        seq: &mut H264SequenceParams,
        pic: &mut H264PictureParams,
    ) -> Result<()> {
        let config = &ctx.config;
        let gop = &ctx.gop;
        let profile_idc = ctx.profile.codec_profile;

        let mut sps = Sps {
            nal: NalHeader {
                nal_ref_idc: 3,
                nal_unit_type: NAL_SPS,
            },
            profile_idc,
            ..Default::default()
        };
        sps.set_constraint(1, profile_idc == 66 || profile_idc == 77);
        sps.set_constraint(3, profile_idc == 100 && gop.gop_size == 1);
        if profile_idc == 77 || profile_idc == 100 {
            sps.set_constraint(4, true);
            sps.set_constraint(5, gop.b_per_p == 0);
        }

        self.dpb_frames = if gop.gop_size == 1 { 0 } else { 1 + gop.max_b_depth };

        match self.options.level {
            Some(level) => sps.level_idc = level as u8,
            None => {
                let framerate = config.frame_rate_numerator / config.frame_rate_denominator.max(1);
                match level::guess_level(
                    profile_idc,
                    ctx.rc.bits_per_second as u64,
                    framerate,
                    self.mb_width * MB_SIZE,
                    self.mb_height * MB_SIZE,
                    self.dpb_frames,
                ) {
                    Some(level) => {
                        info!("Using level {}", level.name);
                        if level.constraint_set3_flag {
                            sps.set_constraint(3, true);
                        }
                        sps.level_idc = level.level_idc;
                    }
                    None => {
                        warn!("Stream will not conform to any level: using level 6.2");
                        sps.level_idc = 62;
                    }
                }
            }
        }

        sps.seq_parameter_set_id = 0;
        sps.chroma_format_idc = 1;
        sps.log2_max_frame_num_minus4 = 4;
        sps.pic_order_cnt_type = 0;
        sps.log2_max_pic_order_cnt_lsb_minus4 = 4;
        sps.max_num_ref_frames = self.dpb_frames;
        sps.pic_width_in_mbs_minus1 = self.mb_width - 1;
        sps.pic_height_in_map_units_minus1 = self.mb_height - 1;
        sps.frame_mbs_only_flag = true;
        sps.direct_8x8_inference_flag = true;

        let (width, height) = (config.dimensions.width, config.dimensions.height);
        if width != MB_SIZE * self.mb_width || height != MB_SIZE * self.mb_height {
            sps.frame_cropping = Some(FrameCrop {
                left: 0,
                right: (MB_SIZE * self.mb_width - width) / 2,
                top: 0,
                bottom: (MB_SIZE * self.mb_height - height) / 2,
            });
        }
        sps.vui = Some(self.build_vui(ctx));

        let entropy_allowed = !matches!(profile_idc, 66 | 88 | 44);
        let high = !matches!(profile_idc, 66 | 88 | 77);
        let pps = Pps {
            nal: NalHeader {
                nal_ref_idc: 3,
                nal_unit_type: NAL_PPS,
            },
            pic_parameter_set_id: 0,
            seq_parameter_set_id: 0,
            entropy_coding_mode_flag: entropy_allowed && self.options.coder == H264Coder::Cabac,
            pic_init_qp_minus26: self.fixed_qp_idr as i8 - 26,
            more_rbsp_data: high,
            transform_8x8_mode_flag: high,
            ..Default::default()
        };

        let vui = sps.vui.as_ref();
        *seq = H264SequenceParams {
            seq_parameter_set_id: sps.seq_parameter_set_id,
            level_idc: sps.level_idc,
            intra_period: gop.gop_size,
            intra_idr_period: gop.gop_size,
            ip_period: gop.b_per_p + 1,
            bits_per_second: ctx.rc.bits_per_second,
            max_num_ref_frames: sps.max_num_ref_frames,
            picture_width_in_mbs: self.mb_width,
            picture_height_in_mbs: self.mb_height,
            chroma_format_idc: sps.chroma_format_idc,
            frame_mbs_only_flag: sps.frame_mbs_only_flag,
            direct_8x8_inference_flag: sps.direct_8x8_inference_flag,
            log2_max_frame_num_minus4: sps.log2_max_frame_num_minus4,
            pic_order_cnt_type: sps.pic_order_cnt_type,
            log2_max_pic_order_cnt_lsb_minus4: sps.log2_max_pic_order_cnt_lsb_minus4,
            bit_depth_luma_minus8: 0,
            bit_depth_chroma_minus8: 0,
            frame_crop: sps.frame_cropping,
            vui_parameters_present_flag: vui.is_some(),
            aspect_ratio_idc: vui.map_or(0, |v| v.aspect_ratio_idc),
            sar_width: vui.map_or(0, |v| v.sar_width),
            sar_height: vui.map_or(0, |v| v.sar_height),
            num_units_in_tick: vui.map_or(0, |v| v.num_units_in_tick),
            time_scale: vui.map_or(0, |v| v.time_scale),
        };

        *pic = H264PictureParams {
            pic_parameter_set_id: pps.pic_parameter_set_id,
            seq_parameter_set_id: pps.seq_parameter_set_id,
            pic_init_qp: (pps.pic_init_qp_minus26 + 26) as u8,
            num_ref_idx_l0_active_minus1: pps.num_ref_idx_l0_default_active_minus1,
            num_ref_idx_l1_active_minus1: pps.num_ref_idx_l1_default_active_minus1,
            entropy_coding_mode_flag: pps.entropy_coding_mode_flag,
            transform_8x8_mode_flag: pps.transform_8x8_mode_flag,
            ..Default::default()
        };

        self.sps = sps;
        self.pps = pps;
        Ok(())
    }

    fn init_picture_params(
        &mut self,
        ctx: &SessionContext,
        pictures: &mut PictureArena<H264Picture>,
        id: PictureId,
        params: &mut H264PictureParams,
    ) -> Result<()> {
        let picture = pictures.picture(id)?;
        let prev = match picture.prev {
            Some(prev) => {
                let prev = pictures.picture(prev)?;
                Some((prev.codec, prev.is_reference))
            }
            None => None,
        };

        let mut data = H264Picture::default();
        if picture.picture_type == PictureType::Idr {
            if picture.display_order != picture.encode_order {
                return Err(EncodeError::Invariant(format!(
                    "IDR picture {} coded out of order",
                    picture.display_order
                )));
            }
            data.frame_num = 0;
            data.last_idr_frame = picture.display_order;
            data.idr_pic_id = prev.map_or(0, |(p, _)| p.idr_pic_id.wrapping_add(1));
            data.primary_pic_type = 0;
            data.slice_type = 7;
        } else {
            let (prev, prev_is_reference) = prev.ok_or_else(|| {
                EncodeError::Invariant(format!(
                    "{:?} picture {} has no previous picture",
                    picture.picture_type, picture.display_order
                ))
            })?;
            data.frame_num = prev.frame_num + prev_is_reference as u32;
            data.last_idr_frame = prev.last_idr_frame;
            data.idr_pic_id = prev.idr_pic_id;
            (data.slice_type, data.primary_pic_type) = match picture.picture_type {
                PictureType::I | PictureType::Idr => (7, 0),
                PictureType::P => (5, 1),
                PictureType::B => (6, 2),
            };
        }
        data.pic_order_cnt = (picture.display_order - data.last_idr_frame) as i32;
        data.dpb_delay = picture.display_order - picture.encode_order + ctx.gop.max_b_depth as i64;
        data.cpb_delay = picture.encode_order - data.last_idr_frame;

        self.aud = self.options.aud.then_some(Aud {
            primary_pic_type: data.primary_pic_type,
        });

        self.sei_needed = H264Sei::empty();
        if self.sei.contains(H264Sei::IDENTIFIER) && picture.encode_order == 0 {
            self.sei_needed |= H264Sei::IDENTIFIER;
        }
        if self.sei.contains(H264Sei::TIMING) {
            self.pic_timing = PicTiming {
                cpb_removal_delay: (2 * data.cpb_delay) as u32,
                dpb_output_delay: (2 * data.dpb_delay) as u32,
            };
            self.sei_needed |= H264Sei::TIMING;
        }
        if self.sei.contains(H264Sei::RECOVERY_POINT) && picture.picture_type == PictureType::I {
            self.recovery_point = RecoveryPoint {
                recovery_frame_cnt: 0,
                exact_match_flag: true,
                broken_link_flag: ctx.gop.b_per_p > 0,
            };
            self.sei_needed |= H264Sei::RECOVERY_POINT;
        }

        let recon = picture
            .recon_surface
            .ok_or_else(|| EncodeError::Invariant("picture without recon surface".to_string()))?;
        params.curr_pic = Some(H264PictureRef {
            surface: recon,
            frame_idx: data.frame_num,
            pic_order_cnt: data.pic_order_cnt,
        });
        params.reference_frames.clear();
        let refs: Vec<PictureId> = picture.all_refs().collect();
        for r in refs {
            let reference = pictures.picture(r)?;
            if reference.encode_order >= picture.encode_order {
                return Err(EncodeError::Invariant(format!(
                    "reference {} not coded before picture {}",
                    reference.display_order, picture.display_order
                )));
            }
            params.reference_frames.push(Self::picture_ref(pictures, r)?);
        }
        params.coded_buf = picture.output_buffer;
        params.frame_num = data.frame_num;
        params.idr_pic_flag = picture.picture_type == PictureType::Idr;
        params.reference_pic_flag = picture.is_reference;

        pictures.picture_mut(id)?.codec = data;
        Ok(())
    }

    fn init_slice_params(
        &mut self,
        _ctx: &SessionContext,
        pictures: &PictureArena<H264Picture>,
        id: PictureId,
        _picture: &H264PictureParams,
        slice: &mut Slice<H264SliceParams>,
    ) -> Result<()> {
        let picture = pictures.picture(id)?;
        let data = picture.codec;
        let ctx = SliceContext::new(&self.sps, &self.pps);

        let mut sh = SliceHeader {
            nal: if picture.picture_type == PictureType::Idr {
                NalHeader {
                    nal_ref_idc: 3,
                    nal_unit_type: NAL_IDR_SLICE,
                }
            } else {
                NalHeader {
                    nal_ref_idc: picture.is_reference as u8,
                    nal_unit_type: NAL_SLICE,
                }
            },
            first_mb_in_slice: slice.block_start,
            slice_type: data.slice_type,
            pic_parameter_set_id: self.pps.pic_parameter_set_id,
            frame_num: data.frame_num & ((1u32 << ctx.log2_max_frame_num) - 1),
            idr_pic_id: data.idr_pic_id,
            pic_order_cnt_lsb: data.pic_order_cnt as u32 & ((1u32 << ctx.log2_max_pic_order_cnt_lsb) - 1),
            direct_spatial_mv_pred_flag: true,
            ..Default::default()
        };

        let init_qp = self.pps.pic_init_qp_minus26 as i32 + 26;
        sh.slice_qp_delta = match picture.picture_type {
            PictureType::B => self.fixed_qp_b as i32,
            PictureType::P => self.fixed_qp_p as i32,
            PictureType::I | PictureType::Idr => self.fixed_qp_idr as i32,
        } - init_qp;

        if picture.is_reference && picture.picture_type != PictureType::Idr {
            let prev = picture
                .prev
                .ok_or_else(|| EncodeError::Invariant("reference picture without previous picture".to_string()))?;
            // Drop everything the previous picture kept that this one does not.
            let mut keep = 0;
            for &old in &pictures.picture(prev)?.dpb {
                if picture.dpb.contains(&old) {
                    keep += 1;
                    continue;
                }
                let old_num = pictures.picture(old)?.codec.frame_num;
                if old_num >= data.frame_num {
                    return Err(EncodeError::Invariant(format!(
                        "discarding frame_num {} from picture with frame_num {}",
                        old_num, data.frame_num
                    )));
                }
                sh.mmco.push(Mmco {
                    difference_of_pic_nums_minus1: data.frame_num - old_num - 1,
                });
            }
            if keep > self.dpb_frames {
                return Err(EncodeError::Invariant(format!(
                    "keeping {} pictures in a DPB of {}",
                    keep, self.dpb_frames
                )));
            }
        }

        if matches!(picture.picture_type, PictureType::P | PictureType::B) {
            let (def_l0, def_l1) = Self::default_ref_lists(pictures, id)?;
            sh.ref_pic_list_modification_l0 =
                Self::list_modification(pictures, data.frame_num, &picture.refs[0], &def_l0)?;
            if picture.picture_type == PictureType::B {
                sh.ref_pic_list_modification_l1 =
                    Self::list_modification(pictures, data.frame_num, &picture.refs[1], &def_l1)?;
            }
            let (n0, n1) = (picture.refs[0].len(), picture.refs[1].len());
            if n0 > 1 || n1 > 1 {
                sh.num_ref_idx_active_override =
                    Some((n0.max(1) as u8 - 1, n1.max(1) as u8 - 1));
            }
        }

        let params = &mut slice.params;
        params.macroblock_address = slice.block_start;
        params.num_macroblocks = slice.block_size;
        params.slice_type = sh.slice_type % 5;
        params.pic_parameter_set_id = sh.pic_parameter_set_id;
        params.idr_pic_id = sh.idr_pic_id;
        params.pic_order_cnt_lsb = sh.pic_order_cnt_lsb;
        params.direct_spatial_mv_pred_flag = sh.direct_spatial_mv_pred_flag;
        params.ref_pic_list0 = picture
            .refs[0]
            .iter()
            .map(|&r| Self::picture_ref(pictures, r))
            .collect::<Result<_>>()?;
        params.ref_pic_list1 = picture
            .refs[1]
            .iter()
            .map(|&r| Self::picture_ref(pictures, r))
            .collect::<Result<_>>()?;
        params.slice_qp_delta = sh.slice_qp_delta;

        self.slice = sh;
        Ok(())
    }

    fn write_sequence_header(&mut self, _ctx: &SessionContext, out: &mut PackedHeader) -> Result<()> {
        self.append_aud(out)?;
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
        _pictures: &PictureArena<H264Picture>,
        _id: PictureId,
        _slice: &Slice<H264SliceParams>,
        out: &mut PackedHeader,
    ) -> Result<()> {
        self.append_aud(out)?;
        let mut w = BitWriter::new();
        self.slice.write(&mut w, &SliceContext::new(&self.sps, &self.pps))?;
        out.append_nal(w)
    }

    fn write_extra_header(
        &mut self,
        _ctx: &SessionContext,
        pictures: &mut PictureArena<H264Picture>,
        id: PictureId,
        index: usize,
        out: &mut PackedHeader,
    ) -> Result<Option<PackedHeaderType>> {
        if index > 0 || self.sei_needed.is_empty() {
            return Ok(None);
        }
        let is_idr = pictures.picture(id)?.picture_type == PictureType::Idr;
        self.append_aud(out)?;

        let mut messages = Vec::new();
        if self.sei_needed.contains(H264Sei::IDENTIFIER) {
            if let Some(identifier) = &self.identifier {
                messages.push(SeiMessage::UserDataUnregistered(identifier.clone()));
            }
        }
        if self.sei_needed.contains(H264Sei::TIMING) {
            if is_idr {
                messages.push(SeiMessage::BufferingPeriod(self.buffering_period));
            }
            messages.push(SeiMessage::PicTiming(self.pic_timing));
        }
        if self.sei_needed.contains(H264Sei::RECOVERY_POINT) {
            messages.push(SeiMessage::RecoveryPoint(self.recovery_point));
        }
        self.sei_needed = H264Sei::empty();

        let hrd = self.sps.vui.as_ref().and_then(|v| v.nal_hrd_parameters.as_ref());
        let mut w = BitWriter::new();
        headers::write_sei(&mut w, &messages, hrd)?;
        out.append_nal(w)?;
        Ok(Some(PackedHeaderType::RawData))
    }
}
