//! MPEG-2 video codec plugin.
//!
//! Writes the sequence header group (sequence header, sequence extension,
//! sequence display extension and GOP header) on every IDR picture and a
//! picture header with its coding extension on every picture. Slices are
//! runs of macroblock rows. B pictures are never references.

pub mod headers;
mod params;

use tracing::{debug, warn};

use self::headers::{
    GopHeader, PictureCodingExtension, PictureHeader, SequenceDisplayExtension, SequenceExtension,
    SequenceHeader, FRAME_PICTURE, FRAME_RATES, PICTURE_CODING_B, PICTURE_CODING_I, PICTURE_CODING_P,
};
pub use self::params::{Mpeg2PictureParams, Mpeg2SequenceParams, Mpeg2SliceParams};
use super::bitwriter::BitWriter;
use super::codec::{CodecDescriptor, CodecFlags, CodecInit, CodecPlugin, ProfileEntry, SessionContext};
use super::device::{Profile, SurfaceId};
use super::gop::PictureType;
use super::packed::{PackedHeader, PackedHeaderFlags, PackedHeaderType};
use super::reorder::{Picture, PictureArena, PictureId};
use super::slice::Slice;
use super::{CodecOptions, EncodeConfig, PixelFormat, RateControlMode};
use crate::error::{EncodeError, Result};

const MB_SIZE: u32 = 16;
const MAX_QUANT: i32 = 31;
/// Quantiser scale code used when the driver controls the rate.
const DEFAULT_QUANT: u8 = 10;
/// Largest size codable with the 2-bit size extensions.
const MAX_DIMENSION: u32 = (1 << 14) - 1;
const VIDEO_FORMAT_UNSPECIFIED: u8 = 5;
const VBV_DELAY_VARIABLE: u16 = 0xffff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Mpeg2Profile {
    /// No B pictures.
    Simple,
    #[default]
    Main,
}

impl Mpeg2Profile {
    /// Profile identification in `profile_and_level_indication`.
    pub fn code(self) -> u8 {
        match self {
            Mpeg2Profile::Simple => 5,
            Mpeg2Profile::Main => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Mpeg2Level {
    Low,
    #[default]
    Main,
    High1440,
    High,
}

impl Mpeg2Level {
    /// Level identification in `profile_and_level_indication`.
    pub fn code(self) -> u8 {
        match self {
            Mpeg2Level::Low => 10,
            Mpeg2Level::Main => 8,
            Mpeg2Level::High1440 => 6,
            Mpeg2Level::High => 4,
        }
    }

    /// Largest horizontal and vertical `f_code`.
    fn f_code(self) -> (u8, u8) {
        match self {
            Mpeg2Level::Low => (7, 4),
            Mpeg2Level::Main => (8, 5),
            Mpeg2Level::High1440 | Mpeg2Level::High => (9, 5),
        }
    }

    fn max_size(self) -> (u32, u32) {
        match self {
            Mpeg2Level::Low => (352, 288),
            Mpeg2Level::Main => (720, 576),
            Mpeg2Level::High1440 => (1440, 1152),
            Mpeg2Level::High => (1920, 1152),
        }
    }
}

/// MPEG-2 specific options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Mpeg2Options {
    pub profile: Mpeg2Profile,
    pub level: Mpeg2Level,
}

const PROFILES: &[ProfileEntry] = &[
    ProfileEntry {
        codec_profile: 4,
        bit_depth: 8,
        pixel_format: PixelFormat::Yuv420,
        profile: Profile::Mpeg2Main,
    },
    ProfileEntry {
        codec_profile: 5,
        bit_depth: 8,
        pixel_format: PixelFormat::Yuv420,
        profile: Profile::Mpeg2Simple,
    },
];

fn scaled_quant(base: u8, factor: f32, offset: f32) -> u8 {
    if factor > 0.0 {
        ((factor * base as f32 + offset + 0.5) as i32).clamp(1, MAX_QUANT) as u8
    } else {
        base
    }
}

/// Closest `frame_rate_code` with its extension numerator and denominator.
/// Ties prefer the smaller extension.
pub fn find_frame_rate(num: u32, den: u32) -> (u8, u8, u8) {
    let target = num as f64 / den.max(1) as f64;
    let mut best = (1u8, 0u8, 0u8);
    let mut best_error = f64::INFINITY;
    let mut best_ext = u32::MAX;
    for (code, &(rate_num, rate_den)) in (1u8..).zip(FRAME_RATES.iter()) {
        for n in 0u32..4 {
            for d in 0u32..32 {
                let rate = (rate_num as u64 * (n as u64 + 1)) as f64 / (rate_den as u64 * (d as u64 + 1)) as f64;
                let error = (rate / target - 1.0).abs();
                if error < best_error || (error == best_error && n + d < best_ext) {
                    best = (code, n as u8, d as u8);
                    best_error = error;
                    best_ext = n + d;
                }
            }
        }
    }
    if best_error > 0.0 {
        warn!(
            "Frame rate {}/{} is not exactly representable, using code {} ({}/{})",
            num, den, best.0, best.1, best.2
        );
    }
    best
}

/// `aspect_ratio_information` for a sample aspect ratio.
pub fn aspect_ratio_information(sar: Option<(u32, u32)>, width: u32, height: u32) -> u8 {
    let Some((num, den)) = sar.filter(|&(n, d)| n > 0 && d > 0) else {
        return 1;
    };
    if num == den {
        return 1;
    }
    // Display aspect ratio as dar_num : dar_den.
    let dar_num = num as u64 * width as u64;
    let dar_den = den as u64 * height as u64;
    for (info, (w, h)) in [(2, (4, 3)), (3, (16, 9)), (4, (221, 100))] {
        if dar_num * h == dar_den * w {
            return info;
        }
    }
    warn!("Sample aspect ratio {num}:{den} is not representable, signalling square pixels instead");
    1
}

/// MPEG-2 codec state for one session.
#[derive(Debug, Clone, Default)]
pub struct Mpeg2Codec {
    options: Mpeg2Options,
    mb_width: u32,
    mb_height: u32,
    quant_i: u8,
    quant_p: u8,
    quant_b: u8,
    f_code: (u8, u8),
    /// Display order of the last intra picture, origin of temporal references.
    last_i_frame: i64,

    sequence_header: SequenceHeader,
    sequence_extension: SequenceExtension,
    sequence_display_extension: SequenceDisplayExtension,
    gop_header: GopHeader,
    picture_header: PictureHeader,
    picture_coding_extension: PictureCodingExtension,
}

impl Mpeg2Codec {
    pub fn sequence_header(&self) -> &SequenceHeader {
        &self.sequence_header
    }

    pub fn sequence_extension(&self) -> &SequenceExtension {
        &self.sequence_extension
    }

    /// Header of the last picture set up.
    pub fn picture_header(&self) -> &PictureHeader {
        &self.picture_header
    }

    /// Quantiser scale codes for I, P and B pictures.
    pub fn quant(&self) -> (u8, u8, u8) {
        (self.quant_i, self.quant_p, self.quant_b)
    }

    fn reference_surface(
        pictures: &PictureArena<()>,
        picture: &Picture<()>,
        list: usize,
    ) -> Result<Option<SurfaceId>> {
        let id = picture.nearest_ref(list).ok_or_else(|| {
            EncodeError::Invariant(format!(
                "{:?} picture {} has no L{} reference",
                picture.picture_type, picture.display_order, list
            ))
        })?;
        Ok(pictures.picture(id)?.recon_surface)
    }
}

impl CodecPlugin for Mpeg2Codec {
    type SequenceParams = Mpeg2SequenceParams;
    type PictureParams = Mpeg2PictureParams;
    type SliceParams = Mpeg2SliceParams;
    type PictureData = ();

    const DESCRIPTOR: CodecDescriptor = CodecDescriptor {
        codec: super::Codec::Mpeg2,
        flags: CodecFlags::SLICE_CONTROL.union(CodecFlags::B_PICTURES),
        default_quality: 10,
        sequence_header_type: PackedHeaderType::Sequence,
        picture_header_type: PackedHeaderType::Picture,
        slice_header_type: PackedHeaderType::Slice,
    };

    fn profiles() -> &'static [ProfileEntry] {
        PROFILES
    }

    fn init(&mut self, config: &EncodeConfig) -> Result<CodecInit> {
        let CodecOptions::Mpeg2(options) = &config.codec_options else {
            return Err(EncodeError::InvalidConfig(
                "MPEG-2 encoder needs MPEG-2 options".to_string(),
            ));
        };
        if options.profile == Mpeg2Profile::Simple && config.b_frames > 0 {
            return Err(EncodeError::InvalidConfig(
                "simple profile does not allow B pictures".to_string(),
            ));
        }
        let (width, height) = (config.dimensions.width, config.dimensions.height);
        if width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(EncodeError::InvalidConfig(format!(
                "{width}x{height} exceeds the largest MPEG-2 picture ({MAX_DIMENSION}x{MAX_DIMENSION})"
            )));
        }
        let (max_width, max_height) = options.level.max_size();
        if width > max_width || height > max_height {
            warn!(
                "{}x{} exceeds the limits of level {:?} ({}x{})",
                width, height, options.level, max_width, max_height
            );
        }
        self.options = *options;

        Ok(CodecInit {
            requested_profile: Some(options.profile.code()),
            desired_packed_headers: PackedHeaderFlags::SEQUENCE | PackedHeaderFlags::PICTURE,
            compression_level: None,
        })
    }

    fn configure(&mut self, ctx: &SessionContext) -> Result<()> {
        self.mb_width = ctx.surface_width / MB_SIZE;
        self.mb_height = ctx.surface_height / MB_SIZE;

        if ctx.rc.mode == RateControlMode::Cqp {
            let config = &ctx.config;
            self.quant_p = ctx.rc.quality.clamp(1, MAX_QUANT) as u8;
            self.quant_i = scaled_quant(self.quant_p, config.i_quant_factor, config.i_quant_offset);
            self.quant_b = scaled_quant(self.quant_p, config.b_quant_factor, config.b_quant_offset);
            debug!(
                "Using fixed quantiser scale {} / {} / {} for I- / P- / B-frames",
                self.quant_i, self.quant_p, self.quant_b
            );
        } else {
            self.quant_i = DEFAULT_QUANT;
            self.quant_p = DEFAULT_QUANT;
            self.quant_b = DEFAULT_QUANT;
        }

        self.f_code = self.options.level.f_code();
        Ok(())
    }

    fn init_sequence_params(
        &mut self,
        ctx: &SessionContext,
        seq: &mut Mpeg2SequenceParams,
        pic: &mut Mpeg2PictureParams,
    ) -> Result<()> {
        let config = &ctx.config;
        let (width, height) = (config.dimensions.width, config.dimensions.height);

        let bit_rate = if ctx.rc.bits_per_second > 0 {
            ctx.rc.bits_per_second.div_ceil(400)
        } else {
            // All ones signals a variable rate stream.
            0x3fff_ffff
        };
        let vbv_buffer_size = if ctx.rc.hrd_buffer_size > 0 {
            ctx.rc.hrd_buffer_size.div_ceil(1 << 14).min(0x3ffff)
        } else {
            0x3ffff
        };
        let (frame_rate_code, frame_rate_extension_n, frame_rate_extension_d) =
            find_frame_rate(config.frame_rate_numerator, config.frame_rate_denominator);
        let aspect_ratio_information = aspect_ratio_information(config.sample_aspect_ratio, width, height);

        self.sequence_header = SequenceHeader {
            horizontal_size_value: (width & 0xfff) as u16,
            vertical_size_value: (height & 0xfff) as u16,
            aspect_ratio_information,
            frame_rate_code,
            bit_rate_value: bit_rate & 0x3ffff,
            vbv_buffer_size_value: (vbv_buffer_size & 0x3ff) as u16,
            constrained_parameters_flag: false,
        };
        self.sequence_extension = SequenceExtension {
            profile_and_level_indication: self.options.profile.code() << 4 | self.options.level.code(),
            progressive_sequence: true,
            chroma_format: 1,
            horizontal_size_extension: (width >> 12) as u8,
            vertical_size_extension: (height >> 12) as u8,
            bit_rate_extension: ((bit_rate >> 18) & 0xfff) as u16,
            vbv_buffer_size_extension: (vbv_buffer_size >> 10) as u8,
            low_delay: ctx.gop.b_per_p == 0,
            frame_rate_extension_n,
            frame_rate_extension_d,
        };

        let colour = &config.colour;
        self.sequence_display_extension = SequenceDisplayExtension {
            video_format: VIDEO_FORMAT_UNSPECIFIED,
            colour_description: colour.primaries != 2 || colour.transfer != 2 || colour.matrix != 2,
            colour_primaries: colour.primaries,
            transfer_characteristics: colour.transfer,
            matrix_coefficients: colour.matrix,
            display_horizontal_size: width as u16,
            display_vertical_size: height as u16,
        };
        self.gop_header = GopHeader {
            time_code: GopHeader::ZERO_TIME_CODE,
            closed_gop: true,
            broken_link: false,
        };

        *seq = Mpeg2SequenceParams {
            intra_period: ctx.gop.gop_size,
            ip_period: ctx.gop.b_per_p + 1,
            picture_width: width as u16,
            picture_height: height as u16,
            bits_per_second: ctx.rc.bits_per_second,
            frame_rate: config.frame_rate_numerator as f32 / config.frame_rate_denominator as f32,
            aspect_ratio_information,
            vbv_buffer_size: vbv_buffer_size << 14,
            profile_and_level_indication: self.sequence_extension.profile_and_level_indication,
            progressive_sequence: true,
            chroma_format: 1,
            low_delay: self.sequence_extension.low_delay,
            frame_rate_extension_n,
            frame_rate_extension_d,
            new_gop_header: true,
            time_code: self.gop_header.time_code,
            closed_gop: self.gop_header.closed_gop,
            broken_link: self.gop_header.broken_link,
        };

        *pic = Mpeg2PictureParams {
            vbv_delay: VBV_DELAY_VARIABLE,
            picture_structure: FRAME_PICTURE,
            frame_pred_frame_dct: true,
            progressive_frame: true,
            ..Default::default()
        };
        Ok(())
    }

    fn init_picture_params(
        &mut self,
        _ctx: &SessionContext,
        pictures: &mut PictureArena<()>,
        id: PictureId,
        params: &mut Mpeg2PictureParams,
    ) -> Result<()> {
        let picture = pictures.picture(id)?;
        let (fh, fv) = self.f_code;

        let (coding_type, f_code) = match picture.picture_type {
            PictureType::Idr | PictureType::I => {
                self.last_i_frame = picture.display_order;
                (PICTURE_CODING_I, [[15, 15], [15, 15]])
            }
            PictureType::P => {
                params.forward_reference_picture = Self::reference_surface(pictures, picture, 0)?;
                (PICTURE_CODING_P, [[fh, fv], [15, 15]])
            }
            PictureType::B => {
                params.forward_reference_picture = Self::reference_surface(pictures, picture, 0)?;
                params.backward_reference_picture = Self::reference_surface(pictures, picture, 1)?;
                (PICTURE_CODING_B, [[fh, fv], [fh, fv]])
            }
        };

        self.picture_header = PictureHeader {
            temporal_reference: ((picture.display_order - self.last_i_frame) & 0x3ff) as u16,
            picture_coding_type: coding_type,
            vbv_delay: VBV_DELAY_VARIABLE,
        };
        self.picture_coding_extension = PictureCodingExtension {
            f_code,
            intra_dc_precision: 0,
            picture_structure: FRAME_PICTURE,
            frame_pred_frame_dct: true,
            chroma_420_type: true,
            progressive_frame: true,
            ..Default::default()
        };

        params.reconstructed_picture = picture.recon_surface;
        params.coded_buf = picture.output_buffer;
        params.picture_type = coding_type;
        params.temporal_reference = self.picture_header.temporal_reference;
        params.f_code = f_code;
        Ok(())
    }

    fn init_slice_params(
        &mut self,
        _ctx: &SessionContext,
        pictures: &PictureArena<()>,
        id: PictureId,
        _picture: &Mpeg2PictureParams,
        slice: &mut Slice<Mpeg2SliceParams>,
    ) -> Result<()> {
        let (quant, is_intra) = match pictures.picture(id)?.picture_type {
            PictureType::Idr | PictureType::I => (self.quant_i, true),
            PictureType::P => (self.quant_p, false),
            PictureType::B => (self.quant_b, false),
        };
        if slice.block_start + slice.block_size > self.mb_width * self.mb_height {
            return Err(EncodeError::Invariant(format!(
                "slice {} ends past macroblock {}",
                slice.index,
                self.mb_width * self.mb_height
            )));
        }
        slice.params = Mpeg2SliceParams {
            macroblock_address: slice.block_start,
            num_macroblocks: slice.block_size,
            quantiser_scale_code: quant,
            is_intra_slice: is_intra,
        };
        Ok(())
    }

    fn write_sequence_header(&mut self, _ctx: &SessionContext, out: &mut PackedHeader) -> Result<()> {
        let mut w = BitWriter::new();
        self.sequence_header.write(&mut w);
        self.sequence_extension.write(&mut w);
        self.sequence_display_extension.write(&mut w);
        self.gop_header.write(&mut w);
        out.append_writer(w)
    }

    fn write_picture_header(
        &mut self,
        _ctx: &SessionContext,
        _pictures: &mut PictureArena<()>,
        _id: PictureId,
        out: &mut PackedHeader,
    ) -> Result<()> {
        let mut w = BitWriter::new();
        self.picture_header.write(&mut w);
        self.picture_coding_extension.write(&mut w);
        out.append_writer(w)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::loopback::LoopbackDevice;
    use crate::encoder::session::EncodeSession;
    use crate::encoder::{Encoder, InputFrame, IssueMode};

    fn setup(config: EncodeConfig) -> (Mpeg2Codec, SessionContext) {
        let session = EncodeSession::<Mpeg2Codec, _>::new(LoopbackDevice::new(), config).unwrap();
        (session.codec().clone(), session.context().clone())
    }

    fn with_options(config: EncodeConfig, profile: Mpeg2Profile, level: Mpeg2Level) -> EncodeConfig {
        config.with_codec_options(CodecOptions::Mpeg2(Mpeg2Options { profile, level }))
    }

    #[test]
    fn test_profile_and_level() {
        let (codec, ctx) = setup(EncodeConfig::mpeg2(720, 576));
        assert_eq!(codec.sequence_extension().profile_and_level_indication, 0x48);
        assert_eq!(ctx.profile.profile, Profile::Mpeg2Main);

        let config = with_options(
            EncodeConfig::mpeg2(1920, 1080).with_b_frames(0),
            Mpeg2Profile::Simple,
            Mpeg2Level::High,
        );
        let (codec, ctx) = setup(config);
        assert_eq!(codec.sequence_extension().profile_and_level_indication, 0x54);
        assert_eq!(ctx.profile.profile, Profile::Mpeg2Simple);
        assert!(codec.sequence_extension().low_delay);
    }

    #[test]
    fn test_simple_profile_rejects_b_pictures() {
        let config = with_options(EncodeConfig::mpeg2(720, 576), Mpeg2Profile::Simple, Mpeg2Level::Main);
        assert!(matches!(
            Mpeg2Codec::default().init(&config),
            Err(EncodeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_size_limit() {
        assert!(Mpeg2Codec::default().init(&EncodeConfig::mpeg2(16384, 64)).is_err());
        assert!(Mpeg2Codec::default().init(&EncodeConfig::mpeg2(4096, 2160)).is_ok());
    }

    #[test]
    fn test_frame_rate_codes() {
        assert_eq!(find_frame_rate(25, 1), (3, 0, 0));
        assert_eq!(find_frame_rate(30000, 1001), (4, 0, 0));
        assert_eq!(find_frame_rate(60, 1), (8, 0, 0));
        // 30 / 2 beats 25 * 3 / 5 on extension size.
        assert_eq!(find_frame_rate(15, 1), (5, 0, 1));
    }

    #[test]
    fn test_aspect_ratio() {
        assert_eq!(aspect_ratio_information(None, 720, 576), 1);
        assert_eq!(aspect_ratio_information(Some((1, 1)), 720, 576), 1);
        assert_eq!(aspect_ratio_information(Some((16, 15)), 720, 576), 2);
        assert_eq!(aspect_ratio_information(Some((64, 45)), 720, 576), 3);
        assert_eq!(aspect_ratio_information(Some((7, 5)), 720, 576), 1);
    }

    #[test]
    fn test_quant_ladder() {
        let (codec, _) = setup(EncodeConfig::mpeg2(720, 576).with_qp(8));
        assert_eq!(codec.quant(), (8, 8, 10));

        let (codec, _) = setup(EncodeConfig::mpeg2(720, 576).with_qp(30));
        assert_eq!(codec.quant(), (30, 30, 31));

        let (codec, ctx) = setup(EncodeConfig::mpeg2(720, 576).with_bitrate(8_000_000));
        assert_ne!(ctx.rc.mode, RateControlMode::Cqp);
        assert_eq!(codec.quant(), (10, 10, 10));
        assert_eq!(codec.sequence_header().bit_rate_value, 20_000);
    }

    #[test]
    fn test_packed_headers() {
        let config = EncodeConfig::mpeg2(720, 576)
            .with_frame_rate(25, 1)
            .with_qp(8)
            .with_issue_mode(IssueMode::SerialiseEverything);
        let mut encoder = Encoder::new(LoopbackDevice::new(), config).unwrap();
        for i in 0..3 {
            encoder.encode(InputFrame::new(SurfaceId(i), i as i64)).unwrap();
        }
        encoder.flush().unwrap();

        let submissions = encoder.device().submissions();
        let sequence = submissions[0].packed(PackedHeaderType::Sequence).next().unwrap();
        let expected: Vec<u8> = [
            // sequence_header
            &[0x00, 0x00, 0x01, 0xb3, 0x2d, 0x02, 0x40, 0x13, 0xff, 0xff, 0xff, 0xf8][..],
            // sequence_extension
            &[0x00, 0x00, 0x01, 0xb5, 0x14, 0x8a, 0x1f, 0xff, 0xff, 0x00][..],
            // sequence_display_extension
            &[0x00, 0x00, 0x01, 0xb5, 0x2a, 0x0b, 0x42, 0x12, 0x00][..],
            // group_of_pictures_header
            &[0x00, 0x00, 0x01, 0xb8, 0x00, 0x08, 0x00, 0x40][..],
        ]
        .concat();
        assert_eq!(sequence, expected.as_slice());

        let picture = submissions[0].packed(PackedHeaderType::Picture).next().unwrap();
        assert_eq!(
            picture,
            &[
                0x00, 0x00, 0x01, 0x00, 0x00, 0x0f, 0xff, 0xf8, // picture_header
                0x00, 0x00, 0x01, 0xb5, 0x8f, 0xff, 0xf3, 0x41, 0x80, // picture_coding_extension
            ]
        );

        // Only the IDR picture carries the sequence group.
        assert!(submissions[1].packed(PackedHeaderType::Sequence).next().is_none());
        assert_eq!(submissions.len(), 3);
    }

    #[test]
    fn test_temporal_reference_and_references() {
        let config = EncodeConfig::mpeg2(352, 288).with_issue_mode(IssueMode::SerialiseEverything);
        let mut session = EncodeSession::<Mpeg2Codec, _>::new(LoopbackDevice::new(), config).unwrap();
        let mut seen = Vec::new();
        for i in 0..3 {
            session.send_frame(Some(InputFrame::new(SurfaceId(i), i as i64))).unwrap();
            while session.receive_packet().unwrap().is_some() {}
            seen.push(session.codec().picture_header().temporal_reference);
        }
        session.send_frame(None).unwrap();
        while session.receive_packet().unwrap().is_some() {}
        seen.push(session.codec().picture_header().temporal_reference);

        // IDR 0, then P2 once input 2 arrives, then B1.
        assert_eq!(seen.first(), Some(&0));
        assert_eq!(seen.last(), Some(&1));
        assert_eq!(session.codec().picture_header().picture_coding_type, PICTURE_CODING_B);
    }

    #[test]
    fn test_macroblock_row_slices() {
        let config = EncodeConfig::mpeg2(720, 576).with_slices(2);
        let (mut codec, ctx) = setup(config);
        assert_eq!(ctx.slices.nb_slices, 2);

        let mut pictures = PictureArena::new();
        let mut picture = Picture::<()>::new(SurfaceId(0), 0);
        picture.picture_type = PictureType::Idr;
        let id = pictures.insert(picture);
        let mut params = Mpeg2PictureParams::default();
        codec.init_picture_params(&ctx, &mut pictures, id, &mut params).unwrap();

        let mut slices = ctx.slices.make_slices::<Mpeg2SliceParams>(2).unwrap();
        for slice in slices.iter_mut() {
            codec
                .init_slice_params(&ctx, &pictures, id, &params, slice)
                .unwrap();
        }
        assert_eq!(slices[0].params.macroblock_address, 0);
        assert_eq!(slices[0].params.num_macroblocks, 45 * 18);
        assert_eq!(slices[1].params.macroblock_address, 45 * 18);
        assert!(slices[1].params.is_intra_slice);
        assert_eq!(params.f_code, [[15, 15], [15, 15]]);
    }
}
