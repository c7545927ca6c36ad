//! The per-codec plugin interface driven by the encode session.
//!
//! A codec describes itself with a static [`CodecDescriptor`] and a profile
//! table, then fills parameter structures and writes packed headers when the
//! session asks for them. All session-wide state the codec may read lives in
//! [`SessionContext`]; per-picture state lives in the picture arena.

use std::fmt::Debug;

use bitflags::bitflags;

use super::device::{DeviceAttributes, Entrypoint, ExtraBuffer, Profile};
use super::gop::GopStructure;
use super::packed::{PackedHeader, PackedHeaderFlags, PackedHeaderType};
use super::ratecontrol::RateControlState;
use super::reorder::{PictureArena, PictureId};
use super::slice::{Slice, SliceLayout};
use super::{Codec, EncodeConfig, PixelFormat};
use crate::error::{EncodeError, Result};

bitflags! {
    /// Capabilities and constraints of a codec.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CodecFlags: u32 {
        /// Slices can be controlled and sized by the session.
        const SLICE_CONTROL = 1 << 0;
        /// Only constant-quality rate control is possible.
        const CONSTANT_QUALITY_ONLY = 1 << 1;
        /// Only intra pictures.
        const INTRA_ONLY = 1 << 2;
        const B_PICTURES = 1 << 3;
        /// B pictures may be used as references.
        const B_PICTURE_REFERENCES = 1 << 4;
        /// Key pictures need not be IDR (open GOP possible).
        const NON_IDR_KEY_PICTURES = 1 << 5;
        /// Packets carry no decode delay, DTS equals PTS.
        const TIMESTAMP_NO_DELAY = 1 << 6;
        /// Pictures coded ahead of display are hidden and shown later by a
        /// separate header carried in the picture's tail data.
        const HIDDEN_FRAMES = 1 << 7;
    }
}

/// Static description of a codec.
#[derive(Debug, Clone, Copy)]
pub struct CodecDescriptor {
    pub codec: Codec,
    pub flags: CodecFlags,
    /// Quality used when the RC mode wants one and none was given.
    pub default_quality: i32,
    pub sequence_header_type: PackedHeaderType,
    pub picture_header_type: PackedHeaderType,
    pub slice_header_type: PackedHeaderType,
}

/// One row of a codec's profile table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileEntry {
    /// Profile number as coded in the bitstream.
    pub codec_profile: u8,
    pub bit_depth: u8,
    pub pixel_format: PixelFormat,
    pub profile: Profile,
}

/// Result of [`CodecPlugin::init`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CodecInit {
    /// Bitstream profile the user asked for, if any.
    pub requested_profile: Option<u8>,
    /// Packed headers the codec would like to write.
    pub desired_packed_headers: PackedHeaderFlags,
    /// Quality level to use when the config leaves it unset.
    pub compression_level: Option<u32>,
}

/// Surface and slice block geometry chosen by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderCaps {
    pub surface_width: u32,
    pub surface_height: u32,
    pub slice_block_width: u32,
    pub slice_block_height: u32,
}

impl EncoderCaps {
    /// Surfaces aligned to `align`, slice blocks of the same size when the
    /// codec controls slices.
    pub fn aligned(config: &EncodeConfig, align: u32, slice_control: bool) -> Self {
        let block = if slice_control { align } else { 0 };
        Self {
            surface_width: config.dimensions.width.next_multiple_of(align),
            surface_height: config.dimensions.height.next_multiple_of(align),
            slice_block_width: block,
            slice_block_height: block,
        }
    }
}

/// Session-wide state visible to codecs.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub config: EncodeConfig,
    pub profile: ProfileEntry,
    pub entrypoint: Entrypoint,
    pub attributes: DeviceAttributes,
    pub vendor: String,
    pub surface_width: u32,
    pub surface_height: u32,
    pub rc: RateControlState,
    pub gop: GopStructure,
    pub slices: SliceLayout,
    /// Packed headers both wanted by the codec and supported by the device.
    pub packed_headers: PackedHeaderFlags,
    pub async_depth: u32,
}

impl SessionContext {
    pub fn low_power(&self) -> bool {
        self.entrypoint == Entrypoint::EncSliceLP
    }
}

/// A codec plugged into the generic encode pipeline.
pub trait CodecPlugin: Debug + Clone + Default {
    type SequenceParams: Debug + Clone + Default;
    type PictureParams: Debug + Clone + Default;
    type SliceParams: Debug + Clone + Default;
    /// Codec state carried by each picture.
    type PictureData: Debug + Default;

    const DESCRIPTOR: CodecDescriptor;

    fn profiles() -> &'static [ProfileEntry];

    /// Validate options before any device query.
    fn init(&mut self, config: &EncodeConfig) -> Result<CodecInit>;

    /// Surface alignment and slice block size. The default is 16x16 blocks.
    fn encoder_caps(&mut self, config: &EncodeConfig, _attrs: &DeviceAttributes) -> Result<EncoderCaps> {
        Ok(EncoderCaps::aligned(
            config,
            16,
            Self::DESCRIPTOR.flags.contains(CodecFlags::SLICE_CONTROL),
        ))
    }

    /// One-time derivation of codec state from the finished session setup.
    fn configure(&mut self, ctx: &SessionContext) -> Result<()>;

    /// Fill the sequence parameters and the template every picture's
    /// parameters start from.
    fn init_sequence_params(
        &mut self,
        ctx: &SessionContext,
        sequence: &mut Self::SequenceParams,
        picture: &mut Self::PictureParams,
    ) -> Result<()>;

    fn init_picture_params(
        &mut self,
        ctx: &SessionContext,
        pictures: &mut PictureArena<Self::PictureData>,
        id: PictureId,
        params: &mut Self::PictureParams,
    ) -> Result<()>;

    fn init_slice_params(
        &mut self,
        _ctx: &SessionContext,
        _pictures: &PictureArena<Self::PictureData>,
        _id: PictureId,
        _picture: &Self::PictureParams,
        _slice: &mut Slice<Self::SliceParams>,
    ) -> Result<()> {
        Ok(())
    }

    fn write_sequence_header(&mut self, _ctx: &SessionContext, _out: &mut PackedHeader) -> Result<()> {
        Err(EncodeError::Unsupported(format!(
            "{:?} has no packed sequence header",
            Self::DESCRIPTOR.codec
        )))
    }

    fn write_picture_header(
        &mut self,
        _ctx: &SessionContext,
        _pictures: &mut PictureArena<Self::PictureData>,
        _id: PictureId,
        _out: &mut PackedHeader,
    ) -> Result<()> {
        Err(EncodeError::Unsupported(format!(
            "{:?} has no packed picture header",
            Self::DESCRIPTOR.codec
        )))
    }

    fn write_slice_header(
        &mut self,
        _ctx: &SessionContext,
        _pictures: &PictureArena<Self::PictureData>,
        _id: PictureId,
        _slice: &Slice<Self::SliceParams>,
        _out: &mut PackedHeader,
    ) -> Result<()> {
        Err(EncodeError::Unsupported(format!(
            "{:?} has no packed slice header",
            Self::DESCRIPTOR.codec
        )))
    }

    /// Extra parameter buffer `index` for a picture, `None` past the last.
    fn write_extra_buffer(
        &mut self,
        _ctx: &SessionContext,
        _pictures: &PictureArena<Self::PictureData>,
        _id: PictureId,
        _index: usize,
    ) -> Result<Option<ExtraBuffer>> {
        Ok(None)
    }

    /// Extra packed header `index` for a picture, `None` past the last.
    fn write_extra_header(
        &mut self,
        _ctx: &SessionContext,
        _pictures: &mut PictureArena<Self::PictureData>,
        _id: PictureId,
        _index: usize,
        _out: &mut PackedHeader,
    ) -> Result<Option<PackedHeaderType>> {
        Ok(None)
    }
}

/// Pick the first profile table entry matching the stream format, the
/// requested bitstream profile and the device's profile list.
pub fn select_profile(
    table: &[ProfileEntry],
    requested: Option<u8>,
    pixel_format: PixelFormat,
    bit_depth: u8,
    available: &[Profile],
) -> Result<ProfileEntry> {
    let mut format_match = false;
    for entry in table {
        if requested.is_some_and(|p| p != entry.codec_profile) {
            continue;
        }
        if entry.pixel_format != pixel_format || entry.bit_depth != bit_depth {
            continue;
        }
        format_match = true;
        if available.contains(&entry.profile) {
            return Ok(*entry);
        }
    }
    Err(EncodeError::InvalidConfig(if format_match {
        "no usable encoding profile found on this device".to_string()
    } else {
        format!("no profile supports {bit_depth}-bit {pixel_format:?} input")
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &[ProfileEntry] = &[
        ProfileEntry {
            codec_profile: 1,
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
            bit_depth: 8,
            pixel_format: PixelFormat::Yuv420,
            profile: Profile::HevcMain,
        },
    ];

    #[test]
    fn test_select_by_depth() {
        let all = [Profile::HevcMain, Profile::HevcMain10];
        let entry = select_profile(TABLE, None, PixelFormat::Yuv420, 10, &all).unwrap();
        assert_eq!(entry.profile, Profile::HevcMain10);
    }

    #[test]
    fn test_requested_profile_wins() {
        let all = [Profile::HevcMain];
        let entry = select_profile(TABLE, Some(4), PixelFormat::Yuv420, 8, &all).unwrap();
        assert_eq!(entry.codec_profile, 4);
    }

    #[test]
    fn test_no_match() {
        let all = [Profile::HevcMain];
        assert!(select_profile(TABLE, None, PixelFormat::Yuv444, 8, &all).is_err());
        assert!(select_profile(TABLE, None, PixelFormat::Yuv420, 10, &all).is_err());
    }

    #[test]
    fn test_aligned_caps() {
        let config = EncodeConfig::h264(1918, 1080);
        let caps = EncoderCaps::aligned(&config, 16, true);
        assert_eq!((caps.surface_width, caps.surface_height), (1920, 1088));
        assert_eq!(caps.slice_block_width, 16);
        let caps = EncoderCaps::aligned(&config, 64, false);
        assert_eq!((caps.surface_width, caps.surface_height), (1920, 1088));
        assert_eq!(caps.slice_block_height, 0);
    }
}
