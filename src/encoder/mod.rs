//! Encoder types, configuration, and the codec-dispatching [`Encoder`].
//!
//! This module provides:
//! - Core encoder types and configuration (`EncodeConfig`, `EncodedPacket`, etc.)
//! - The generic encode session (`session`) with its reorder window, pools
//!   and timestamp bookkeeping.
//! - Codec plugins for AV1, H.264, H.265, MPEG-2, VP8 and VP9.
//! - Bitstream helpers shared by the header writers (`bitwriter`, `nal`, `obu`, `packed`).

pub mod av1;
pub mod bitwriter;
pub mod codec;
pub mod device;
pub mod gop;
pub mod h264;
pub mod h265;
pub mod loopback;
pub mod mpeg2;
pub mod nal;
pub mod obu;
pub mod packed;
pub mod pool;
pub mod ratecontrol;
pub mod reorder;
pub mod session;
pub mod slice;
pub mod timestamp;
pub mod vp8;
pub mod vp9;

pub use gop::PictureType;

use self::av1::{Av1Codec, Av1Options};
use self::device::{EncodeDevice, SurfaceId};
use self::h264::{H264Codec, H264Options};
use self::h265::{H265Codec, H265Options};
use self::mpeg2::{Mpeg2Codec, Mpeg2Options};
use self::session::EncodeSession;
use self::vp8::{Vp8Codec, Vp8Options};
use self::vp9::{Vp9Codec, Vp9Options};
use crate::error::{EncodeError, Result};

// Default encoder configuration constants.

/// Default frame rate (frames per second).
pub const DEFAULT_FRAME_RATE: u32 = 30;

/// Default number of pictures kept in flight on the device.
pub const DEFAULT_ASYNC_DEPTH: u32 = 2;

/// Default B pyramid depth.
pub const DEFAULT_B_DEPTH: u32 = 1;

/// Default anchor pictures per GOP for H.264, H.265 and AV1.
pub const DEFAULT_GOP_SIZE: u32 = 40;

/// Default B pictures between anchors for H.264, H.265 and AV1.
pub const DEFAULT_B_FRAMES: u32 = 2;

/// Deepest async queue accepted.
pub const MAX_ASYNC_DEPTH: u32 = 64;

/// Video codec types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    /// H.264/AVC codec.
    H264,
    /// H.265/HEVC codec.
    H265,
    /// AV1 codec.
    Av1,
    /// MPEG-2 video.
    Mpeg2,
    Vp8,
    Vp9,
}

/// Pixel format / chroma subsampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelFormat {
    /// YUV 4:2:0 (half horizontal and vertical chroma resolution).
    #[default]
    Yuv420,
    /// YUV 4:2:2 (half horizontal chroma resolution).
    Yuv422,
    /// YUV 4:4:4 (full chroma resolution).
    Yuv444,
}

impl PixelFormat {
    /// Calculate frame size in bytes for given dimensions at 8 bits.
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        let luma_size = width as usize * height as usize;
        match self {
            PixelFormat::Yuv420 => luma_size * 3 / 2, // Y + U/4 + V/4
            PixelFormat::Yuv422 => luma_size * 2,     // Y + U/2 + V/2
            PixelFormat::Yuv444 => luma_size * 3,     // Y + U + V
        }
    }

    /// log2 of the horizontal and vertical chroma subsampling.
    pub fn chroma_shift(&self) -> (u8, u8) {
        match self {
            PixelFormat::Yuv420 => (1, 1),
            PixelFormat::Yuv422 => (1, 0),
            PixelFormat::Yuv444 => (0, 0),
        }
    }

    /// `chroma_format_idc` as coded in H.264/H.265 sequence headers.
    pub fn chroma_format_idc(&self) -> u8 {
        match self {
            PixelFormat::Yuv420 => 1,
            PixelFormat::Yuv422 => 2,
            PixelFormat::Yuv444 => 3,
        }
    }
}

/// Bit depth for video encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BitDepth {
    /// 8-bit per component (standard).
    #[default]
    Eight,
    /// 10-bit per component (HDR, Main10 profile).
    Ten,
    /// 12-bit per component.
    Twelve,
}

impl BitDepth {
    pub fn bits(&self) -> u8 {
        match self {
            BitDepth::Eight => 8,
            BitDepth::Ten => 10,
            BitDepth::Twelve => 12,
        }
    }
}

/// Rate control modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateControlMode {
    /// Constant QP mode.
    Cqp,
    /// Constant bitrate mode.
    Cbr,
    /// Variable bitrate mode.
    Vbr,
    /// Intelligent constant quality.
    Icq,
    /// Quality-defined variable bitrate.
    Qvbr,
    /// Average variable bitrate.
    Avbr,
}

/// Rate control request. Unset fields leave the choice to the session,
/// which picks the best mode the device supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateControl {
    /// Explicit mode; fails setup if the device lacks it.
    pub mode: Option<RateControlMode>,
    /// Target bitrate in bits per second.
    pub bitrate: u64,
    /// Maximum bitrate in bits per second.
    pub max_bitrate: u64,
    /// HRD buffer size in bits.
    pub buffer_size: u64,
    /// Initial HRD buffer occupancy in bits.
    pub initial_buffer_fullness: u64,
    /// Quality for the quality-driven modes.
    pub global_quality: Option<i32>,
    /// Constant QP (P pictures; I and B are derived via the quant factors).
    pub qp: Option<i32>,
    pub qmin: Option<i32>,
    pub qmax: Option<i32>,
}

/// Trade-off between latency and device utilisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IssueMode {
    /// Wait for every picture before issuing the next.
    SerialiseEverything,
    /// Return each packet as soon as its picture completes.
    MinimiseLatency,
    /// Keep the device queue full.
    #[default]
    MaximiseThroughput,
}

/// Sample range of the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColourRange {
    #[default]
    Unspecified,
    /// Studio swing.
    Limited,
    Full,
}

/// Colour description signalled in the VUI or sequence header. Code points
/// follow ITU-T H.273; 2 means unspecified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColourDescription {
    pub primaries: u8,
    pub transfer: u8,
    pub matrix: u8,
    pub range: ColourRange,
    /// Chroma sample location type (0..=5).
    pub chroma_location: Option<u8>,
}

impl Default for ColourDescription {
    fn default() -> Self {
        Self {
            primaries: 2,
            transfer: 2,
            matrix: 2,
            range: ColourRange::Unspecified,
            chroma_location: None,
        }
    }
}

impl ColourDescription {
    /// Whether anything beyond the defaults needs signalling.
    pub fn is_specified(&self) -> bool {
        self.primaries != 2 || self.transfer != 2 || self.matrix != 2
    }
}

/// Mastering display colour volume. Chromaticities are CIE 1931 xy in
/// R, G, B order; luminance is in cd/m².
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MasteringDisplay {
    pub primaries: [(f64, f64); 3],
    pub white_point: (f64, f64),
    pub max_luminance: f64,
    pub min_luminance: f64,
}

/// Content light level information in cd/m².
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentLightLevel {
    pub max_content_light_level: u16,
    pub max_pic_average_light_level: u16,
}

/// HDR side data attached to a frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HdrMetadata {
    pub mastering_display: Option<MasteringDisplay>,
    pub content_light_level: Option<ContentLightLevel>,
}

/// Video dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Per-codec options.
#[derive(Debug, Clone, PartialEq)]
pub enum CodecOptions {
    H264(H264Options),
    H265(H265Options),
    Av1(Av1Options),
    Mpeg2(Mpeg2Options),
    Vp8(Vp8Options),
    Vp9(Vp9Options),
}

impl CodecOptions {
    pub fn codec(&self) -> Codec {
        match self {
            CodecOptions::H264(_) => Codec::H264,
            CodecOptions::H265(_) => Codec::H265,
            CodecOptions::Av1(_) => Codec::Av1,
            CodecOptions::Mpeg2(_) => Codec::Mpeg2,
            CodecOptions::Vp8(_) => Codec::Vp8,
            CodecOptions::Vp9(_) => Codec::Vp9,
        }
    }
}

/// Encode configuration.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub struct EncodeConfig {
    /// Video dimensions.
    pub dimensions: Dimensions,
    /// Pixel format (chroma subsampling).
    pub pixel_format: PixelFormat,
    /// Bit depth per component.
    pub bit_depth: BitDepth,
    /// Frame rate numerator.
    pub frame_rate_numerator: u32,
    /// Frame rate denominator.
    pub frame_rate_denominator: u32,
    pub rate_control: RateControl,
    /// Anchor (I/P) pictures per GOP. One or zero means intra only.
    pub gop_size: u32,
    /// B pictures between consecutive anchors.
    pub b_frames: u32,
    /// Desired B pyramid depth.
    pub b_depth: u32,
    /// GOPs between IDR pictures, minus one, for codecs with open GOPs.
    pub idr_interval: u32,
    pub closed_gop: bool,
    /// Requested slices per picture; zero or one means one.
    pub slices: u32,
    /// Requested tile columns and rows.
    pub tiles: Option<(u32, u32)>,
    /// Pictures in flight on the device.
    pub async_depth: u32,
    pub issue_mode: IssueMode,
    /// Prefer the low-power entrypoint.
    pub low_power: bool,
    /// Keep sequence headers out of the stream and expose them as extradata.
    pub global_header: bool,
    /// Driver quality level (speed trade-off), 1 is best.
    pub compression_level: Option<u32>,
    /// Maximum coded picture size in bytes.
    pub max_frame_size: Option<u32>,
    pub i_quant_factor: f32,
    pub i_quant_offset: f32,
    pub b_quant_factor: f32,
    pub b_quant_offset: f32,
    pub colour: ColourDescription,
    pub sample_aspect_ratio: Option<(u32, u32)>,
    pub codec_options: CodecOptions,
}

impl EncodeConfig {
    fn new(width: u32, height: u32, codec_options: CodecOptions) -> Self {
        Self {
            dimensions: Dimensions { width, height },
            pixel_format: PixelFormat::Yuv420,
            bit_depth: BitDepth::Eight,
            frame_rate_numerator: DEFAULT_FRAME_RATE,
            frame_rate_denominator: 1,
            rate_control: RateControl::default(),
            gop_size: DEFAULT_GOP_SIZE,
            b_frames: DEFAULT_B_FRAMES,
            b_depth: DEFAULT_B_DEPTH,
            idr_interval: 0,
            closed_gop: false,
            slices: 1,
            tiles: None,
            async_depth: DEFAULT_ASYNC_DEPTH,
            issue_mode: IssueMode::default(),
            low_power: false,
            global_header: false,
            compression_level: None,
            max_frame_size: None,
            i_quant_factor: 1.0,
            i_quant_offset: 0.0,
            b_quant_factor: 1.2,
            b_quant_offset: 0.0,
            colour: ColourDescription::default(),
            sample_aspect_ratio: None,
            codec_options,
        }
    }

    /// Create a new H.264 encode configuration with default settings.
    pub fn h264(width: u32, height: u32) -> Self {
        Self::new(width, height, CodecOptions::H264(H264Options::default()))
    }

    /// Create a new H.265/HEVC encode configuration with default settings.
    pub fn h265(width: u32, height: u32) -> Self {
        Self::new(width, height, CodecOptions::H265(H265Options::default()))
    }

    /// Create a new AV1 encode configuration with default settings.
    pub fn av1(width: u32, height: u32) -> Self {
        let mut config = Self::new(width, height, CodecOptions::Av1(Av1Options::default()));
        config.rate_control.qmin = Some(1);
        config.rate_control.qmax = Some(255);
        config
    }

    /// Create a new MPEG-2 encode configuration with default settings.
    pub fn mpeg2(width: u32, height: u32) -> Self {
        let mut config = Self::new(width, height, CodecOptions::Mpeg2(Mpeg2Options::default()));
        config.gop_size = 60;
        config.b_frames = 1;
        config
    }

    /// Create a new VP8 encode configuration with default settings.
    pub fn vp8(width: u32, height: u32) -> Self {
        let mut config = Self::new(width, height, CodecOptions::Vp8(Vp8Options::default()));
        config.gop_size = 120;
        config.b_frames = 0;
        config
    }

    /// Create a new VP9 encode configuration with default settings.
    pub fn vp9(width: u32, height: u32) -> Self {
        let mut config = Self::new(width, height, CodecOptions::Vp9(Vp9Options::default()));
        config.gop_size = 250;
        config.b_frames = 0;
        config
    }

    pub fn codec(&self) -> Codec {
        self.codec_options.codec()
    }

    /// Set the pixel format (chroma subsampling).
    pub fn with_pixel_format(mut self, format: PixelFormat) -> Self {
        self.pixel_format = format;
        self
    }

    /// Set the bit depth.
    pub fn with_bit_depth(mut self, depth: BitDepth) -> Self {
        self.bit_depth = depth;
        self
    }

    /// Set the frame rate.
    pub fn with_frame_rate(mut self, numerator: u32, denominator: u32) -> Self {
        self.frame_rate_numerator = numerator;
        self.frame_rate_denominator = denominator;
        self
    }

    /// Replace the whole rate control request.
    pub fn with_rate_control(mut self, rate_control: RateControl) -> Self {
        self.rate_control = rate_control;
        self
    }

    /// Require a rate control mode.
    pub fn with_rate_control_mode(mut self, mode: RateControlMode) -> Self {
        self.rate_control.mode = Some(mode);
        self
    }

    /// Set the target bitrate.
    pub fn with_bitrate(mut self, bitrate: u64) -> Self {
        self.rate_control.bitrate = bitrate;
        self
    }

    /// Set the maximum bitrate.
    pub fn with_max_bitrate(mut self, bitrate: u64) -> Self {
        self.rate_control.max_bitrate = bitrate;
        self
    }

    /// Set the constant QP.
    pub fn with_qp(mut self, qp: i32) -> Self {
        self.rate_control.qp = Some(qp);
        self
    }

    /// Set the quality for the quality-driven RC modes.
    pub fn with_global_quality(mut self, quality: i32) -> Self {
        self.rate_control.global_quality = Some(quality);
        self
    }

    /// Set the GOP size in anchor pictures.
    pub fn with_gop_size(mut self, size: u32) -> Self {
        self.gop_size = size;
        self
    }

    /// Set the number of B-frames.
    pub fn with_b_frames(mut self, count: u32) -> Self {
        self.b_frames = count;
        self
    }

    /// Set the desired B pyramid depth.
    pub fn with_b_depth(mut self, depth: u32) -> Self {
        self.b_depth = depth;
        self
    }

    pub fn with_idr_interval(mut self, interval: u32) -> Self {
        self.idr_interval = interval;
        self
    }

    pub fn with_closed_gop(mut self, closed: bool) -> Self {
        self.closed_gop = closed;
        self
    }

    pub fn with_slices(mut self, slices: u32) -> Self {
        self.slices = slices;
        self
    }

    pub fn with_tiles(mut self, cols: u32, rows: u32) -> Self {
        self.tiles = Some((cols, rows));
        self
    }

    pub fn with_async_depth(mut self, depth: u32) -> Self {
        self.async_depth = depth;
        self
    }

    pub fn with_issue_mode(mut self, mode: IssueMode) -> Self {
        self.issue_mode = mode;
        self
    }

    pub fn with_low_power(mut self, low_power: bool) -> Self {
        self.low_power = low_power;
        self
    }

    pub fn with_global_header(mut self, global_header: bool) -> Self {
        self.global_header = global_header;
        self
    }

    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = Some(level);
        self
    }

    pub fn with_max_frame_size(mut self, bytes: u32) -> Self {
        self.max_frame_size = Some(bytes);
        self
    }

    pub fn with_colour(mut self, colour: ColourDescription) -> Self {
        self.colour = colour;
        self
    }

    pub fn with_sample_aspect_ratio(mut self, num: u32, den: u32) -> Self {
        self.sample_aspect_ratio = Some((num, den));
        self
    }

    /// Replace the codec options. The codec itself must stay the same.
    pub fn with_codec_options(mut self, options: CodecOptions) -> Self {
        self.codec_options = options;
        self
    }

    /// Reject configurations no session could run.
    pub fn validate(&self) -> Result<()> {
        let Dimensions { width, height } = self.dimensions;
        if width == 0 || height == 0 {
            return Err(EncodeError::InvalidConfig(format!(
                "invalid dimensions {width}x{height}"
            )));
        }
        if self.frame_rate_numerator == 0 || self.frame_rate_denominator == 0 {
            return Err(EncodeError::InvalidConfig(format!(
                "invalid frame rate {}/{}",
                self.frame_rate_numerator, self.frame_rate_denominator
            )));
        }
        if self.async_depth == 0 || self.async_depth > MAX_ASYNC_DEPTH {
            return Err(EncodeError::InvalidConfig(format!(
                "async depth must be in 1..={MAX_ASYNC_DEPTH}, got {}",
                self.async_depth
            )));
        }
        if let Some((cols, rows)) = self.tiles {
            if cols == 0 || rows == 0 {
                return Err(EncodeError::InvalidConfig(format!(
                    "invalid tile grid {cols}x{rows}"
                )));
            }
        }
        Ok(())
    }
}

/// A raw picture handed to the encoder.
#[derive(Debug, Clone, PartialEq)]
pub struct InputFrame {
    /// Device surface holding the picture.
    pub surface: SurfaceId,
    pub pts: i64,
    /// Code this picture as IDR.
    pub force_keyframe: bool,
    pub hdr: Option<HdrMetadata>,
}

impl InputFrame {
    pub fn new(surface: SurfaceId, pts: i64) -> Self {
        Self {
            surface,
            pts,
            force_keyframe: false,
            hdr: None,
        }
    }

    #[must_use]
    pub fn with_keyframe(mut self) -> Self {
        self.force_keyframe = true;
        self
    }

    #[must_use]
    pub fn with_hdr(mut self, hdr: HdrMetadata) -> Self {
        self.hdr = Some(hdr);
        self
    }
}

/// Encoded video packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPacket {
    /// Encoded bitstream data.
    pub data: Vec<u8>,
    /// Picture type.
    pub picture_type: PictureType,
    /// Whether this is a keyframe.
    pub is_key_frame: bool,
    /// Presentation timestamp.
    pub pts: i64,
    /// Decode timestamp.
    pub dts: i64,
}

/// Video encoder supporting multiple codecs.
///
/// The encoder is implemented as an enum to dispatch to codec-specific sessions.
#[allow(clippy::large_enum_variant)]
pub enum Encoder<D: EncodeDevice> {
    H264(EncodeSession<H264Codec, D>),
    H265(EncodeSession<H265Codec, D>),
    Av1(EncodeSession<Av1Codec, D>),
    Mpeg2(EncodeSession<Mpeg2Codec, D>),
    Vp8(EncodeSession<Vp8Codec, D>),
    Vp9(EncodeSession<Vp9Codec, D>),
}

impl<D: EncodeDevice> Encoder<D> {
    /// Create a new encoder for the codec named by the config.
    pub fn new(device: D, config: EncodeConfig) -> Result<Self> {
        config.validate()?;
        match config.codec() {
            Codec::H264 => Ok(Encoder::H264(EncodeSession::new(device, config)?)),
            Codec::H265 => Ok(Encoder::H265(EncodeSession::new(device, config)?)),
            Codec::Av1 => Ok(Encoder::Av1(EncodeSession::new(device, config)?)),
            Codec::Mpeg2 => Ok(Encoder::Mpeg2(EncodeSession::new(device, config)?)),
            Codec::Vp8 => Ok(Encoder::Vp8(EncodeSession::new(device, config)?)),
            Codec::Vp9 => Ok(Encoder::Vp9(EncodeSession::new(device, config)?)),
        }
    }

    pub fn codec(&self) -> Codec {
        match self {
            Encoder::H264(_) => Codec::H264,
            Encoder::H265(_) => Codec::H265,
            Encoder::Av1(_) => Codec::Av1,
            Encoder::Mpeg2(_) => Codec::Mpeg2,
            Encoder::Vp8(_) => Codec::Vp8,
            Encoder::Vp9(_) => Codec::Vp9,
        }
    }

    /// Queue a frame, or signal end of stream with `None`.
    pub fn send_frame(&mut self, frame: Option<InputFrame>) -> Result<()> {
        match self {
            Encoder::H264(session) => session.send_frame(frame),
            Encoder::H265(session) => session.send_frame(frame),
            Encoder::Av1(session) => session.send_frame(frame),
            Encoder::Mpeg2(session) => session.send_frame(frame),
            Encoder::Vp8(session) => session.send_frame(frame),
            Encoder::Vp9(session) => session.send_frame(frame),
        }
    }

    /// Next packet, or `None` when more input is needed or the stream is done.
    pub fn receive_packet(&mut self) -> Result<Option<EncodedPacket>> {
        match self {
            Encoder::H264(session) => session.receive_packet(),
            Encoder::H265(session) => session.receive_packet(),
            Encoder::Av1(session) => session.receive_packet(),
            Encoder::Mpeg2(session) => session.receive_packet(),
            Encoder::Vp8(session) => session.receive_packet(),
            Encoder::Vp9(session) => session.receive_packet(),
        }
    }

    /// Encode a frame and return every packet that became available.
    pub fn encode(&mut self, frame: InputFrame) -> Result<Vec<EncodedPacket>> {
        self.send_frame(Some(frame))?;
        self.drain()
    }

    /// Flush the encoder and get remaining packets.
    pub fn flush(&mut self) -> Result<Vec<EncodedPacket>> {
        self.send_frame(None)?;
        self.drain()
    }

    fn drain(&mut self) -> Result<Vec<EncodedPacket>> {
        let mut packets = Vec::new();
        while let Some(packet) = self.receive_packet()? {
            packets.push(packet);
        }
        Ok(packets)
    }

    /// Request that the next frame be an IDR frame.
    pub fn request_idr(&mut self) {
        match self {
            Encoder::H264(session) => session.request_idr(),
            Encoder::H265(session) => session.request_idr(),
            Encoder::Av1(session) => session.request_idr(),
            Encoder::Mpeg2(session) => session.request_idr(),
            Encoder::Vp8(session) => session.request_idr(),
            Encoder::Vp9(session) => session.request_idr(),
        }
    }

    /// Out-of-band sequence headers, present when `global_header` was set
    /// and the device takes packed sequence headers.
    pub fn extradata(&self) -> Option<&[u8]> {
        match self {
            Encoder::H264(session) => session.extradata(),
            Encoder::H265(session) => session.extradata(),
            Encoder::Av1(session) => session.extradata(),
            Encoder::Mpeg2(session) => session.extradata(),
            Encoder::Vp8(session) => session.extradata(),
            Encoder::Vp9(session) => session.extradata(),
        }
    }

    pub fn device(&self) -> &D {
        match self {
            Encoder::H264(session) => session.device(),
            Encoder::H265(session) => session.device(),
            Encoder::Av1(session) => session.device(),
            Encoder::Mpeg2(session) => session.device(),
            Encoder::Vp8(session) => session.device(),
            Encoder::Vp9(session) => session.device(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // PixelFormat tests.
    mod pixel_format_tests {
        use super::*;

        #[test]
        fn test_yuv420_frame_size() {
            let size = PixelFormat::Yuv420.frame_size(1920, 1080);
            assert_eq!(size, 1920 * 1080 * 3 / 2);
        }

        #[test]
        fn test_yuv444_frame_size() {
            let size = PixelFormat::Yuv444.frame_size(1920, 1080);
            assert_eq!(size, 1920 * 1080 * 3);
        }

        #[test]
        fn test_chroma_shift() {
            assert_eq!(PixelFormat::Yuv420.chroma_shift(), (1, 1));
            assert_eq!(PixelFormat::Yuv422.chroma_shift(), (1, 0));
            assert_eq!(PixelFormat::Yuv444.chroma_format_idc(), 3);
        }

        #[test]
        fn test_default() {
            assert_eq!(PixelFormat::default(), PixelFormat::Yuv420);
        }
    }

    mod bit_depth_tests {
        use super::*;

        #[test]
        fn test_bits() {
            assert_eq!(BitDepth::default().bits(), 8);
            assert_eq!(BitDepth::Ten.bits(), 10);
            assert_eq!(BitDepth::Twelve.bits(), 12);
        }
    }

    // EncodeConfig tests.
    mod encode_config_tests {
        use super::*;

        #[test]
        fn test_h264_defaults() {
            let config = EncodeConfig::h264(1920, 1080);

            assert_eq!(config.codec(), Codec::H264);
            assert_eq!(config.dimensions.width, 1920);
            assert_eq!(config.dimensions.height, 1080);
            assert_eq!(config.pixel_format, PixelFormat::Yuv420);
            assert_eq!(config.bit_depth, BitDepth::Eight);
            assert_eq!(config.rate_control, RateControl::default());
            assert_eq!(config.gop_size, 40);
            assert_eq!(config.b_frames, 2);
            assert_eq!(config.async_depth, 2);
            assert_eq!(config.issue_mode, IssueMode::MaximiseThroughput);
            assert_eq!(config.frame_rate_numerator, 30);
            assert_eq!(config.frame_rate_denominator, 1);
        }

        #[test]
        fn test_per_codec_defaults() {
            let av1 = EncodeConfig::av1(1280, 720);
            assert_eq!(av1.rate_control.qmin, Some(1));
            assert_eq!(av1.rate_control.qmax, Some(255));
            assert_eq!(EncodeConfig::mpeg2(720, 576).b_frames, 1);
            assert_eq!(EncodeConfig::vp8(640, 480).b_frames, 0);
            assert_eq!(EncodeConfig::vp9(640, 480).gop_size, 250);
            assert_eq!(EncodeConfig::h265(640, 480).codec(), Codec::H265);
        }

        #[test]
        fn test_builder_chaining() {
            let config = EncodeConfig::h264(1920, 1080)
                .with_rate_control_mode(RateControlMode::Vbr)
                .with_bitrate(6_000_000)
                .with_max_bitrate(10_000_000)
                .with_gop_size(120)
                .with_b_frames(3)
                .with_b_depth(2)
                .with_frame_rate(60, 1)
                .with_slices(4)
                .with_issue_mode(IssueMode::MinimiseLatency);

            assert_eq!(config.rate_control.mode, Some(RateControlMode::Vbr));
            assert_eq!(config.rate_control.bitrate, 6_000_000);
            assert_eq!(config.rate_control.max_bitrate, 10_000_000);
            assert_eq!(config.gop_size, 120);
            assert_eq!(config.b_frames, 3);
            assert_eq!(config.b_depth, 2);
            assert_eq!(config.frame_rate_numerator, 60);
            assert_eq!(config.slices, 4);
            assert_eq!(config.issue_mode, IssueMode::MinimiseLatency);
        }

        #[test]
        fn test_validate() {
            assert!(EncodeConfig::h264(1920, 1080).validate().is_ok());
            assert!(EncodeConfig::h264(0, 1080).validate().is_err());
            assert!(EncodeConfig::h264(64, 64).with_frame_rate(30, 0).validate().is_err());
            assert!(EncodeConfig::h264(64, 64).with_async_depth(0).validate().is_err());
            assert!(EncodeConfig::av1(64, 64).with_tiles(0, 1).validate().is_err());
        }
    }

    mod input_frame_tests {
        use super::*;

        #[test]
        fn test_builder() {
            let frame = InputFrame::new(SurfaceId(3), 42).with_keyframe();
            assert!(frame.force_keyframe);
            assert_eq!(frame.pts, 42);
            assert!(frame.hdr.is_none());
        }
    }

    #[test]
    fn test_colour_description_default_is_unspecified() {
        let colour = ColourDescription::default();
        assert!(!colour.is_specified());
        assert!(ColourDescription {
            primaries: 9,
            ..colour
        }
        .is_specified());
    }
}
