//! VP8 codec plugin.
//!
//! VP8 has no packed headers; the driver writes the frame header from the
//! picture parameters. Quantiser indices travel in a separate quantisation
//! matrix buffer. Only intra and P pictures are coded, each P referencing
//! the previous picture through the last frame slot.

use tracing::debug;

use super::codec::{CodecDescriptor, CodecFlags, CodecInit, CodecPlugin, ProfileEntry, SessionContext};
use super::device::{ExtraBuffer, OutputBufferId, Profile, SurfaceId};
use super::gop::PictureType;
use super::packed::{PackedHeaderFlags, PackedHeaderType};
use super::reorder::{PictureArena, PictureId};
use super::{CodecOptions, EncodeConfig, PixelFormat};
use crate::error::{EncodeError, Result};

const MAX_QUANT: i32 = 127;
const MAX_LOOP_FILTER_LEVEL: u8 = 63;
const MAX_LOOP_FILTER_SHARPNESS: u8 = 7;

/// VP8 specific options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vp8Options {
    pub loop_filter_level: u8,
    pub loop_filter_sharpness: u8,
}

impl Default for Vp8Options {
    fn default() -> Self {
        Self {
            loop_filter_level: 16,
            loop_filter_sharpness: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Vp8SequenceParams {
    pub frame_width: u32,
    pub frame_height: u32,
    pub error_resilient: bool,
    pub kf_auto: bool,
    pub kf_min_dist: u32,
    pub kf_max_dist: u32,
    pub bits_per_second: u32,
    pub intra_period: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Vp8PictureParams {
    pub reconstructed_frame: Option<SurfaceId>,
    pub coded_buf: Option<OutputBufferId>,
    pub ref_last_frame: Option<SurfaceId>,
    pub ref_gf_frame: Option<SurfaceId>,
    pub ref_arf_frame: Option<SurfaceId>,
    pub force_kf: bool,
    pub no_ref_last: bool,
    pub no_ref_gf: bool,
    pub no_ref_arf: bool,
    /// False for key frames.
    pub inter_frame: bool,
    pub show_frame: bool,
    pub refresh_last: bool,
    pub refresh_golden_frame: bool,
    pub refresh_alternate_frame: bool,
    pub loop_filter_level: [u8; 4],
    pub ref_lf_delta: [i8; 4],
    pub mode_lf_delta: [i8; 4],
    pub sharpness_level: u8,
    pub clamping_qindex: u8,
}

/// VP8 has no slice parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Vp8SliceParams;

const PROFILES: &[ProfileEntry] = &[ProfileEntry {
    codec_profile: 0,
    bit_depth: 8,
    pixel_format: PixelFormat::Yuv420,
    profile: Profile::Vp8Version0_3,
}];

/// VP8 codec state for one session.
#[derive(Debug, Clone, Default)]
pub struct Vp8Codec {
    options: Vp8Options,
    q_index_i: u8,
    q_index_p: u8,
}

impl Vp8Codec {
    /// Quantiser indices for intra and P pictures.
    pub fn q_index(&self) -> (u8, u8) {
        (self.q_index_i, self.q_index_p)
    }
}

impl CodecPlugin for Vp8Codec {
    type SequenceParams = Vp8SequenceParams;
    type PictureParams = Vp8PictureParams;
    type SliceParams = Vp8SliceParams;
    type PictureData = ();

    const DESCRIPTOR: CodecDescriptor = CodecDescriptor {
        codec: super::Codec::Vp8,
        flags: CodecFlags::empty(),
        default_quality: 40,
        sequence_header_type: PackedHeaderType::Sequence,
        picture_header_type: PackedHeaderType::Picture,
        slice_header_type: PackedHeaderType::Slice,
    };

    fn profiles() -> &'static [ProfileEntry] {
        PROFILES
    }

    fn init(&mut self, config: &EncodeConfig) -> Result<CodecInit> {
        let CodecOptions::Vp8(options) = &config.codec_options else {
            return Err(EncodeError::InvalidConfig(
                "VP8 encoder needs VP8 options".to_string(),
            ));
        };
        if options.loop_filter_level > MAX_LOOP_FILTER_LEVEL {
            return Err(EncodeError::InvalidConfig(format!(
                "loop filter level {} exceeds {MAX_LOOP_FILTER_LEVEL}",
                options.loop_filter_level
            )));
        }
        if options.loop_filter_sharpness > MAX_LOOP_FILTER_SHARPNESS {
            return Err(EncodeError::InvalidConfig(format!(
                "loop filter sharpness {} exceeds {MAX_LOOP_FILTER_SHARPNESS}",
                options.loop_filter_sharpness
            )));
        }
        self.options = *options;

        Ok(CodecInit {
            requested_profile: None,
            desired_packed_headers: PackedHeaderFlags::empty(),
            compression_level: None,
        })
    }

    fn configure(&mut self, ctx: &SessionContext) -> Result<()> {
        let config = &ctx.config;
        self.q_index_p = ctx.rc.quality.clamp(0, MAX_QUANT) as u8;
        self.q_index_i = if config.i_quant_factor > 0.0 {
            ((config.i_quant_factor * self.q_index_p as f32 + config.i_quant_offset + 0.5) as i32)
                .clamp(0, MAX_QUANT) as u8
        } else {
            self.q_index_p
        };
        debug!("Using q_index {} / {} for intra / P frames", self.q_index_i, self.q_index_p);
        Ok(())
    }

    fn init_sequence_params(
        &mut self,
        ctx: &SessionContext,
        seq: &mut Vp8SequenceParams,
        pic: &mut Vp8PictureParams,
    ) -> Result<()> {
        *seq = Vp8SequenceParams {
            frame_width: ctx.config.dimensions.width,
            frame_height: ctx.config.dimensions.height,
            error_resilient: true,
            kf_auto: false,
            kf_min_dist: 1,
            kf_max_dist: ctx.gop.gop_size,
            bits_per_second: ctx.rc.bits_per_second,
            intra_period: ctx.gop.gop_size,
        };
        *pic = Vp8PictureParams {
            show_frame: true,
            refresh_last: true,
            loop_filter_level: [self.options.loop_filter_level; 4],
            sharpness_level: self.options.loop_filter_sharpness,
            ..Default::default()
        };
        Ok(())
    }

    fn init_picture_params(
        &mut self,
        _ctx: &SessionContext,
        pictures: &mut PictureArena<()>,
        id: PictureId,
        params: &mut Vp8PictureParams,
    ) -> Result<()> {
        let picture = pictures.picture(id)?;
        match picture.picture_type {
            PictureType::Idr | PictureType::I => {
                if picture.nb_refs() != 0 {
                    return Err(EncodeError::Invariant(format!(
                        "intra picture {} has references",
                        picture.display_order
                    )));
                }
                params.force_kf = true;
                params.inter_frame = false;
                params.ref_last_frame = None;
                params.ref_gf_frame = None;
                params.ref_arf_frame = None;
                // Key frames fill every slot.
                params.refresh_golden_frame = true;
                params.refresh_alternate_frame = true;
            }
            PictureType::P => {
                if !picture.refs[1].is_empty() {
                    return Err(EncodeError::Invariant(format!(
                        "P picture {} has backward references",
                        picture.display_order
                    )));
                }
                let reference = picture.nearest_ref(0).ok_or_else(|| {
                    EncodeError::Invariant(format!(
                        "P picture {} has no reference",
                        picture.display_order
                    ))
                })?;
                let surface = pictures.picture(reference)?.recon_surface;
                params.force_kf = false;
                params.inter_frame = true;
                params.no_ref_last = false;
                params.no_ref_gf = true;
                params.no_ref_arf = true;
                params.ref_last_frame = surface;
                params.ref_gf_frame = surface;
                params.ref_arf_frame = surface;
                params.refresh_golden_frame = false;
                params.refresh_alternate_frame = false;
            }
            PictureType::B => {
                return Err(EncodeError::Invariant(format!(
                    "B picture {} in a VP8 stream",
                    picture.display_order
                )));
            }
        }
        params.reconstructed_frame = picture.recon_surface;
        params.coded_buf = picture.output_buffer;
        Ok(())
    }

    fn write_extra_buffer(
        &mut self,
        _ctx: &SessionContext,
        pictures: &PictureArena<()>,
        id: PictureId,
        index: usize,
    ) -> Result<Option<ExtraBuffer>> {
        if index > 0 {
            return Ok(None);
        }
        let q = match pictures.picture(id)?.picture_type {
            PictureType::P => self.q_index_p,
            _ => self.q_index_i,
        };
        Ok(Some(ExtraBuffer::QuantMatrix {
            quantization_index: [q; 4],
            quantization_index_delta: [0; 5],
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::loopback::LoopbackDevice;
    use crate::encoder::reorder::Picture;
    use crate::encoder::session::EncodeSession;
    use crate::encoder::{Encoder, InputFrame, IssueMode};

    fn setup(config: EncodeConfig) -> (Vp8Codec, SessionContext) {
        let session = EncodeSession::<Vp8Codec, _>::new(LoopbackDevice::new(), config).unwrap();
        (session.codec().clone(), session.context().clone())
    }

    #[test]
    fn test_option_limits() {
        let config = EncodeConfig::vp8(640, 480).with_codec_options(CodecOptions::Vp8(Vp8Options {
            loop_filter_level: 64,
            loop_filter_sharpness: 4,
        }));
        assert!(Vp8Codec::default().init(&config).is_err());

        let config = EncodeConfig::vp8(640, 480).with_codec_options(CodecOptions::Vp8(Vp8Options {
            loop_filter_level: 16,
            loop_filter_sharpness: 8,
        }));
        assert!(Vp8Codec::default().init(&config).is_err());
    }

    #[test]
    fn test_no_packed_headers() {
        let (_, ctx) = setup(EncodeConfig::vp8(640, 480));
        assert!(ctx.packed_headers.is_empty());
        assert_eq!(ctx.gop.b_per_p, 0);
        assert_eq!((ctx.surface_width, ctx.surface_height), (640, 480));
    }

    #[test]
    fn test_q_index() {
        let (codec, _) = setup(EncodeConfig::vp8(640, 480).with_qp(60));
        assert_eq!(codec.q_index(), (60, 60));

        let mut config = EncodeConfig::vp8(640, 480).with_qp(100);
        config.i_quant_factor = 0.5;
        config.i_quant_offset = 10.0;
        let (codec, _) = setup(config);
        assert_eq!(codec.q_index(), (60, 100));
    }

    #[test]
    fn test_reference_slots() {
        let (mut codec, ctx) = setup(EncodeConfig::vp8(640, 480));
        let mut pictures = PictureArena::new();

        let mut idr = Picture::<()>::new(SurfaceId(0), 0);
        idr.recon_surface = Some(SurfaceId(100));
        let idr = pictures.insert(idr);
        let mut params = Vp8PictureParams::default();
        codec.init_picture_params(&ctx, &mut pictures, idr, &mut params).unwrap();
        assert!(params.force_kf && !params.inter_frame);
        assert!(params.refresh_golden_frame && params.refresh_alternate_frame);

        let mut p = Picture::<()>::new(SurfaceId(1), 1);
        p.picture_type = PictureType::P;
        p.refs[0].push(idr);
        let p = pictures.insert(p);
        let mut params = Vp8PictureParams::default();
        codec.init_picture_params(&ctx, &mut pictures, p, &mut params).unwrap();
        assert!(params.inter_frame);
        assert_eq!(params.ref_last_frame, Some(SurfaceId(100)));
        assert!(!params.no_ref_last && params.no_ref_gf && params.no_ref_arf);
        assert!(!params.refresh_golden_frame);

        let mut orphan = Picture::<()>::new(SurfaceId(2), 2);
        orphan.picture_type = PictureType::P;
        let orphan = pictures.insert(orphan);
        let result = codec.init_picture_params(&ctx, &mut pictures, orphan, &mut Vp8PictureParams::default());
        assert!(matches!(result, Err(EncodeError::Invariant(_))));
    }

    #[test]
    fn test_quant_matrix_buffer() {
        let config = EncodeConfig::vp8(640, 480)
            .with_qp(50)
            .with_issue_mode(IssueMode::SerialiseEverything);
        let mut encoder = Encoder::new(LoopbackDevice::new(), config).unwrap();
        let mut packets = Vec::new();
        for i in 0..3 {
            packets.extend(encoder.encode(InputFrame::new(SurfaceId(i), i as i64)).unwrap());
        }
        packets.extend(encoder.flush().unwrap());
        assert_eq!(packets.len(), 3);
        assert!(packets[0].is_key_frame);
        for packet in &packets {
            assert_eq!(packet.dts, packet.pts);
        }

        let submissions = encoder.device().submissions();
        for submission in submissions {
            assert!(submission.packed_headers.is_empty());
            assert_eq!(
                submission.extra_buffers,
                vec![ExtraBuffer::QuantMatrix {
                    quantization_index: [50; 4],
                    quantization_index_delta: [0; 5],
                }]
            );
        }
        assert!(encoder.extradata().is_none());
    }
}
