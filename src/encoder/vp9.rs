//! VP9 codec plugin.
//!
//! The driver writes every header from the picture parameters. Anchor
//! pictures alternate between slots 0 and 1 when B pictures are in use;
//! referenced B pictures take slot `1 + b_depth` and the rest are not
//! stored. A picture coded ahead of its display position is hidden, and a
//! one-byte `show_existing_frame` header carried as its tail data shows it
//! later.

use tracing::debug;

use super::bitwriter::BitWriter;
use super::codec::{
    CodecDescriptor, CodecFlags, CodecInit, CodecPlugin, EncoderCaps, ProfileEntry, SessionContext,
};
use super::device::{DeviceAttributes, OutputBufferId, Profile, SurfaceId};
use super::gop::PictureType;
use super::packed::{PackedHeaderFlags, PackedHeaderType};
use super::reorder::{Picture, PictureArena, PictureId};
use super::{CodecOptions, EncodeConfig, PixelFormat};
use crate::error::{EncodeError, Result};

const MAX_QUANT: i32 = 255;
const NUM_REF_FRAMES: usize = 8;
/// Slot of pictures that are never stored.
pub const SLOT_NONE: u8 = 8;
/// Widest tile in 64x64 superblocks.
const MAX_TILE_WIDTH_B64: u32 = 64;
const MIN_TILE_WIDTH_B64: u32 = 4;
/// q index used when the driver controls the rate.
const DEFAULT_Q_IDX: u8 = 100;
const FRAME_MARKER: u64 = 2;

/// VP9 specific options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vp9Options {
    pub loop_filter_level: u8,
    pub loop_filter_sharpness: u8,
}

impl Default for Vp9Options {
    fn default() -> Self {
        Self {
            loop_filter_level: 16,
            loop_filter_sharpness: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Vp9SequenceParams {
    pub max_frame_width: u32,
    pub max_frame_height: u32,
    pub kf_auto: bool,
    pub kf_min_dist: u32,
    pub kf_max_dist: u32,
    pub bits_per_second: u32,
    pub intra_period: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Vp9PictureParams {
    pub frame_width_src: u32,
    pub frame_height_src: u32,
    pub frame_width_dst: u32,
    pub frame_height_dst: u32,
    pub reconstructed_frame: Option<SurfaceId>,
    pub coded_buf: Option<OutputBufferId>,
    pub reference_frames: [Option<SurfaceId>; NUM_REF_FRAMES],
    pub force_kf: bool,
    /// Reference search order: bit 0 last, bit 1 golden.
    pub ref_frame_ctrl_l0: u8,
    pub ref_frame_ctrl_l1: u8,
    pub ref_last_idx: u8,
    pub ref_last_sign_bias: bool,
    pub ref_gf_idx: u8,
    pub ref_gf_sign_bias: bool,
    pub refresh_frame_flags: u8,
    /// False for key frames.
    pub inter_frame: bool,
    pub show_frame: bool,
    pub luma_ac_qindex: u8,
    pub luma_dc_qindex_delta: i8,
    pub chroma_ac_qindex_delta: i8,
    pub chroma_dc_qindex_delta: i8,
    pub filter_level: u8,
    pub sharpness_level: u8,
    pub log2_tile_columns: u8,
}

/// VP9 has no slice parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Vp9SliceParams;

/// Per-picture VP9 state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Vp9Picture {
    pub slot: u8,
}

const PROFILES: &[ProfileEntry] = &[
    ProfileEntry {
        codec_profile: 0,
        bit_depth: 8,
        pixel_format: PixelFormat::Yuv420,
        profile: Profile::Vp9Profile0,
    },
    ProfileEntry {
        codec_profile: 1,
        bit_depth: 8,
        pixel_format: PixelFormat::Yuv422,
        profile: Profile::Vp9Profile1,
    },
    ProfileEntry {
        codec_profile: 1,
        bit_depth: 8,
        pixel_format: PixelFormat::Yuv444,
        profile: Profile::Vp9Profile1,
    },
    ProfileEntry {
        codec_profile: 2,
        bit_depth: 10,
        pixel_format: PixelFormat::Yuv420,
        profile: Profile::Vp9Profile2,
    },
    ProfileEntry {
        codec_profile: 3,
        bit_depth: 10,
        pixel_format: PixelFormat::Yuv422,
        profile: Profile::Vp9Profile3,
    },
    ProfileEntry {
        codec_profile: 3,
        bit_depth: 10,
        pixel_format: PixelFormat::Yuv444,
        profile: Profile::Vp9Profile3,
    },
];

fn scaled_q_idx(base: u8, factor: f32, offset: f32) -> u8 {
    if factor > 0.0 {
        ((factor * base as f32 + offset + 0.5) as i32).clamp(0, MAX_QUANT) as u8
    } else {
        base
    }
}

/// Smallest `log2_tile_cols` keeping tiles at most 4096 pixels wide.
fn min_log2_tile_cols(width: u32) -> u8 {
    let sb64_cols = width.div_ceil(64);
    let mut k = 0;
    while (MAX_TILE_WIDTH_B64 << k) < sb64_cols {
        k += 1;
    }
    k
}

/// Largest `log2_tile_cols` keeping tiles at least 256 pixels wide.
fn max_log2_tile_cols(width: u32) -> u8 {
    let sb64_cols = width.div_ceil(64);
    let mut k = 1;
    while (sb64_cols >> k) >= MIN_TILE_WIDTH_B64 {
        k += 1;
    }
    k - 1
}

/// Uncompressed header showing the frame held in `slot`.
pub fn show_existing_frame(profile: u8, slot: u8) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write_bits(FRAME_MARKER, 2);
    w.write_bits((profile & 1) as u64, 1);
    w.write_bits((profile >> 1) as u64, 1);
    if profile == 3 {
        w.write_bits(0, 1); // reserved_zero
    }
    w.write_flag(true);
    w.write_bits(slot as u64, 3);
    w.finish()
}

/// VP9 codec state for one session.
#[derive(Debug, Clone, Default)]
pub struct Vp9Codec {
    options: Vp9Options,
    q_idx_idr: u8,
    q_idx_p: u8,
    q_idx_b: u8,
    log2_tile_columns: u8,
}

impl Vp9Codec {
    /// Quantiser indices for IDR, P and B pictures.
    pub fn q_idx(&self) -> (u8, u8, u8) {
        (self.q_idx_idr, self.q_idx_p, self.q_idx_b)
    }

    fn reference<'a>(
        pictures: &'a PictureArena<Vp9Picture>,
        picture: &Picture<Vp9Picture>,
        list: usize,
    ) -> Result<&'a Picture<Vp9Picture>> {
        let id = picture.nearest_ref(list).ok_or_else(|| {
            EncodeError::Invariant(format!(
                "{:?} picture {} has no L{} reference",
                picture.picture_type, picture.display_order, list
            ))
        })?;
        pictures.picture(id)
    }
}

impl CodecPlugin for Vp9Codec {
    type SequenceParams = Vp9SequenceParams;
    type PictureParams = Vp9PictureParams;
    type SliceParams = Vp9SliceParams;
    type PictureData = Vp9Picture;

    const DESCRIPTOR: CodecDescriptor = CodecDescriptor {
        codec: super::Codec::Vp9,
        flags: CodecFlags::B_PICTURES
            .union(CodecFlags::B_PICTURE_REFERENCES)
            .union(CodecFlags::TIMESTAMP_NO_DELAY)
            .union(CodecFlags::HIDDEN_FRAMES),
        default_quality: 100,
        sequence_header_type: PackedHeaderType::Sequence,
        picture_header_type: PackedHeaderType::Picture,
        slice_header_type: PackedHeaderType::Slice,
    };

    fn profiles() -> &'static [ProfileEntry] {
        PROFILES
    }

    fn init(&mut self, config: &EncodeConfig) -> Result<CodecInit> {
        let CodecOptions::Vp9(options) = &config.codec_options else {
            return Err(EncodeError::InvalidConfig(
                "VP9 encoder needs VP9 options".to_string(),
            ));
        };
        if options.loop_filter_level > 63 || options.loop_filter_sharpness > 7 {
            return Err(EncodeError::InvalidConfig(format!(
                "invalid loop filter level {} / sharpness {}",
                options.loop_filter_level, options.loop_filter_sharpness
            )));
        }
        self.options = *options;

        Ok(CodecInit {
            requested_profile: None,
            desired_packed_headers: PackedHeaderFlags::empty(),
            compression_level: None,
        })
    }

    fn encoder_caps(&mut self, config: &EncodeConfig, _attrs: &DeviceAttributes) -> Result<EncoderCaps> {
        // Surfaces cover whole superblocks.
        Ok(EncoderCaps::aligned(config, 64, false))
    }

    fn configure(&mut self, ctx: &SessionContext) -> Result<()> {
        if ctx.rc.mode.uses_quality() {
            let config = &ctx.config;
            self.q_idx_p = ctx.rc.quality.clamp(0, MAX_QUANT) as u8;
            self.q_idx_idr = scaled_q_idx(self.q_idx_p, config.i_quant_factor, config.i_quant_offset);
            self.q_idx_b = scaled_q_idx(self.q_idx_p, config.b_quant_factor, config.b_quant_offset);
        } else {
            self.q_idx_idr = DEFAULT_Q_IDX;
            self.q_idx_p = DEFAULT_Q_IDX;
            self.q_idx_b = DEFAULT_Q_IDX;
        }
        if [self.q_idx_idr, self.q_idx_p, self.q_idx_b].contains(&0) {
            return Err(EncodeError::Unsupported(
                "lossless VP9 (q index 0) is not supported".to_string(),
            ));
        }
        debug!(
            "Using q_idx {} / {} / {} for IDR- / P- / B-frames",
            self.q_idx_idr, self.q_idx_p, self.q_idx_b
        );

        let width = ctx.config.dimensions.width;
        self.log2_tile_columns = min_log2_tile_cols(width).min(max_log2_tile_cols(width));
        Ok(())
    }

    fn init_sequence_params(
        &mut self,
        ctx: &SessionContext,
        seq: &mut Vp9SequenceParams,
        pic: &mut Vp9PictureParams,
    ) -> Result<()> {
        let (width, height) = (ctx.config.dimensions.width, ctx.config.dimensions.height);
        *seq = Vp9SequenceParams {
            max_frame_width: width,
            max_frame_height: height,
            kf_auto: false,
            kf_min_dist: 1,
            kf_max_dist: ctx.gop.gop_size,
            bits_per_second: ctx.rc.bits_per_second,
            intra_period: ctx.gop.gop_size,
        };
        *pic = Vp9PictureParams {
            frame_width_src: width,
            frame_height_src: height,
            frame_width_dst: width,
            frame_height_dst: height,
            filter_level: self.options.loop_filter_level,
            sharpness_level: self.options.loop_filter_sharpness,
            log2_tile_columns: self.log2_tile_columns,
            ..Default::default()
        };
        Ok(())
    }

    fn init_picture_params(
        &mut self,
        ctx: &SessionContext,
        pictures: &mut PictureArena<Vp9Picture>,
        id: PictureId,
        params: &mut Vp9PictureParams,
    ) -> Result<()> {
        let picture = pictures.picture(id)?;
        let slot = match picture.picture_type {
            PictureType::Idr => {
                params.force_kf = true;
                params.refresh_frame_flags = 0xff;
                params.luma_ac_qindex = self.q_idx_idr;
                0
            }
            PictureType::P => {
                let reference = Self::reference(pictures, picture, 0)?;
                let ref_slot = reference.codec.slot;
                if ref_slot > 1 {
                    return Err(EncodeError::Invariant(format!(
                        "P picture {} references slot {}",
                        picture.display_order, ref_slot
                    )));
                }
                let slot = if ctx.gop.b_per_p > 0 {
                    params.refresh_frame_flags = (1 << (1 - ref_slot)) | 0xfc;
                    1 - ref_slot
                } else {
                    params.refresh_frame_flags = 0xff;
                    0
                };
                params.force_kf = false;
                params.ref_frame_ctrl_l0 = 1;
                params.ref_last_idx = ref_slot;
                params.ref_last_sign_bias = true;
                params.luma_ac_qindex = self.q_idx_p;
                slot
            }
            PictureType::B => {
                let past = Self::reference(pictures, picture, 0)?.codec.slot;
                let future = Self::reference(pictures, picture, 1)?.codec.slot;
                let limit = picture.b_depth as u8 + 1;
                if past >= limit || future >= limit {
                    return Err(EncodeError::Invariant(format!(
                        "B picture {} at depth {} references slots {} and {}",
                        picture.display_order, picture.b_depth, past, future
                    )));
                }
                let slot = if picture.is_reference {
                    params.refresh_frame_flags = ((0xfe_u32 << picture.b_depth) & 0xff) as u8;
                    1 + picture.b_depth as u8
                } else {
                    params.refresh_frame_flags = 0;
                    SLOT_NONE
                };
                params.force_kf = false;
                params.ref_frame_ctrl_l0 = 1;
                params.ref_frame_ctrl_l1 = 2;
                params.ref_last_idx = past;
                params.ref_last_sign_bias = true;
                params.ref_gf_idx = future;
                params.ref_gf_sign_bias = false;
                params.luma_ac_qindex = self.q_idx_b;
                slot
            }
            PictureType::I => {
                return Err(EncodeError::Invariant(format!(
                    "non-IDR intra picture {} in a VP9 stream",
                    picture.display_order
                )));
            }
        };
        if params.refresh_frame_flags == 0 {
            debug!("Pic {} not stored", picture.display_order);
        } else {
            debug!("Pic {} stored in slot {}", picture.display_order, slot);
        }

        let mut reference_frames = [None; NUM_REF_FRAMES];
        for r in picture.all_refs() {
            let reference = pictures.picture(r)?;
            let ref_slot = reference.codec.slot as usize;
            if ref_slot >= NUM_REF_FRAMES || reference_frames[ref_slot].is_some() {
                return Err(EncodeError::Invariant(format!(
                    "picture {} has an unusable reference in slot {}",
                    picture.display_order, ref_slot
                )));
            }
            reference_frames[ref_slot] = reference.recon_surface;
        }

        params.reference_frames = reference_frames;
        params.reconstructed_frame = picture.recon_surface;
        params.coded_buf = picture.output_buffer;
        params.inter_frame = picture.picture_type != PictureType::Idr;
        params.show_frame = !picture.hidden;
        let hidden = !params.show_frame;

        let picture = pictures.picture_mut(id)?;
        picture.codec.slot = slot;
        if hidden {
            picture.tail_data = show_existing_frame(ctx.profile.codec_profile, slot);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::loopback::LoopbackDevice;
    use crate::encoder::reorder::{Pick, ReorderWindow};
    use crate::encoder::session::EncodeSession;
    use crate::encoder::{BitDepth, EncodedPacket, Encoder, InputFrame, IssueMode};

    fn setup(config: EncodeConfig) -> (Vp9Codec, SessionContext) {
        let session = EncodeSession::<Vp9Codec, _>::new(LoopbackDevice::new(), config).unwrap();
        (session.codec().clone(), session.context().clone())
    }

    /// Slot, refresh flags and shown flag of each picture in encode order.
    fn run(codec: &mut Vp9Codec, ctx: &SessionContext, frames: u32) -> Vec<(u8, u8, bool)> {
        let mut window = ReorderWindow::new();
        for i in 0..frames {
            let mut picture = Picture::new(SurfaceId(i), i as i64);
            picture.force_idr = i == 0;
            window.push(picture);
        }
        window.set_end_of_stream();

        let mut out = Vec::new();
        while let Pick::Ready(id) = window.pick_next(&ctx.gop).unwrap() {
            {
                let picture = window.pictures_mut().picture_mut(id).unwrap();
                picture.encode_order = out.len() as i64;
                picture.recon_surface = Some(SurfaceId(100 + out.len() as u32));
            }
            let mut params = Vp9PictureParams::default();
            codec
                .init_picture_params(ctx, window.pictures_mut(), id, &mut params)
                .unwrap();
            let picture = window.pictures_mut().picture_mut(id).unwrap();
            picture.encode_issued = true;
            picture.encode_complete = true;
            out.push((picture.codec.slot, params.refresh_frame_flags, params.show_frame));
        }
        out
    }

    #[test]
    fn test_superblock_alignment() {
        let (_, ctx) = setup(EncodeConfig::vp9(1920, 1080));
        assert_eq!((ctx.surface_width, ctx.surface_height), (1920, 1088));
        assert!(ctx.packed_headers.is_empty());
    }

    #[test]
    fn test_profiles() {
        let (_, ctx) = setup(EncodeConfig::vp9(640, 480).with_bit_depth(BitDepth::Ten));
        assert_eq!(ctx.profile.profile, Profile::Vp9Profile2);
        let (_, ctx) = setup(EncodeConfig::vp9(640, 480).with_pixel_format(PixelFormat::Yuv444));
        assert_eq!(ctx.profile.profile, Profile::Vp9Profile1);
    }

    #[test]
    fn test_q_idx_ladder() {
        let (codec, _) = setup(EncodeConfig::vp9(640, 480).with_qp(80));
        assert_eq!(codec.q_idx(), (80, 80, 96));

        let (codec, _) = setup(EncodeConfig::vp9(640, 480).with_bitrate(2_000_000));
        assert_eq!(codec.q_idx(), (100, 100, 100));

        let result = EncodeSession::<Vp9Codec, _>::new(LoopbackDevice::new(), EncodeConfig::vp9(640, 480).with_qp(0));
        assert!(matches!(result, Err(EncodeError::Unsupported(_))));
    }

    #[test]
    fn test_tile_columns() {
        assert_eq!(min_log2_tile_cols(1920), 0);
        assert_eq!(min_log2_tile_cols(8192), 1);
        assert_eq!(max_log2_tile_cols(1920), 2);
        assert_eq!(max_log2_tile_cols(256), 0);
    }

    #[test]
    fn test_single_slot_without_b_pictures() {
        let (mut codec, ctx) = setup(EncodeConfig::vp9(640, 480));
        let out = run(&mut codec, &ctx, 3);
        assert_eq!(out, vec![(0, 0xff, true), (0, 0xff, true), (0, 0xff, true)]);
    }

    #[test]
    fn test_ping_pong_slots() {
        let (mut codec, ctx) = setup(EncodeConfig::vp9(640, 480).with_b_frames(2));
        let out = run(&mut codec, &ctx, 7);
        assert_eq!(
            out,
            vec![
                (0, 0xff, true),
                (1, 0xfe, false),
                (SLOT_NONE, 0, true),
                (SLOT_NONE, 0, true),
                (0, 0xfd, false),
                (SLOT_NONE, 0, true),
                (SLOT_NONE, 0, true),
            ]
        );
    }

    #[test]
    fn test_pyramid_slots() {
        let config = EncodeConfig::vp9(640, 480).with_b_frames(3).with_b_depth(2);
        let (mut codec, ctx) = setup(config);
        assert_eq!(ctx.gop.max_b_depth, 2);
        let out = run(&mut codec, &ctx, 5);
        let slots: Vec<(u8, u8)> = out.iter().map(|&(slot, refresh, _)| (slot, refresh)).collect();
        assert_eq!(
            slots,
            vec![(0, 0xff), (1, 0xfe), (2, 0xfc), (SLOT_NONE, 0), (SLOT_NONE, 0)]
        );
    }

    #[test]
    fn test_show_existing_frame() {
        assert_eq!(show_existing_frame(0, 1), vec![0x89]);
        assert_eq!(show_existing_frame(2, 0), vec![0x98]);
        assert_eq!(show_existing_frame(3, 2), vec![0xb5, 0x00]);
    }

    fn encode_all(config: EncodeConfig, frames: u32) -> Vec<EncodedPacket> {
        let mut encoder = Encoder::new(LoopbackDevice::new(), config).unwrap();
        let mut packets = Vec::new();
        for i in 0..frames {
            packets.extend(encoder.encode(InputFrame::new(SurfaceId(i), i as i64)).unwrap());
        }
        packets.extend(encoder.flush().unwrap());
        packets
    }

    #[test]
    fn test_hidden_frames_are_shown_later() {
        let config = EncodeConfig::vp9(640, 480)
            .with_b_frames(2)
            .with_issue_mode(IssueMode::SerialiseEverything);
        let packets = encode_all(config, 4);

        let pts: Vec<i64> = packets.iter().map(|p| p.pts).collect();
        assert_eq!(pts, vec![0, 1, 2, 3]);
        assert_eq!(packets[3].data, vec![0x89]);
        for packet in &packets {
            assert_eq!(packet.dts, packet.pts);
        }
    }

    #[test]
    fn test_referenced_b_is_shown_in_display_order() {
        let config = EncodeConfig::vp9(640, 480)
            .with_b_frames(3)
            .with_b_depth(2)
            .with_issue_mode(IssueMode::SerialiseEverything);
        let packets = encode_all(config, 5);

        let pts: Vec<i64> = packets.iter().map(|p| p.pts).collect();
        assert_eq!(pts, vec![0, 1, 2, 3, 4]);
        // B2 waits in slot 2 until B1 is out, P4 in slot 1 until B3 is.
        assert_eq!(packets[2].data, vec![0x8a]);
        assert_eq!(packets[4].data, vec![0x89]);
    }

    #[test]
    fn test_deep_pyramid_timestamps() {
        for mode in [
            IssueMode::SerialiseEverything,
            IssueMode::MinimiseLatency,
            IssueMode::MaximiseThroughput,
        ] {
            for (b_frames, b_depth) in [(3, 2), (7, 2), (7, 3)] {
                let config = EncodeConfig::vp9(640, 480)
                    .with_b_frames(b_frames)
                    .with_b_depth(b_depth)
                    .with_issue_mode(mode);
                let packets = encode_all(config, 20);

                let pts: Vec<i64> = packets.iter().map(|p| p.pts).collect();
                assert_eq!(pts, (0..20).collect::<Vec<i64>>(), "{mode:?} b={b_frames} depth={b_depth}");
                for pair in packets.windows(2) {
                    assert!(pair[0].dts <= pair[1].dts);
                }
                for packet in &packets {
                    assert_eq!(packet.dts, packet.pts);
                }
            }
        }
    }
}
