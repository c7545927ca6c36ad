//! AV1 codec plugin.
//!
//! Writes sequence header, frame header and HDR metadata OBUs; tile group
//! OBUs come from the device. Two reference slots alternate between anchor
//! pictures and B pictures are never stored. A picture coded ahead of its
//! display position is hidden, and a `show_existing_frame` header carried
//! as its tail data shows it once the pictures before it are out.

pub mod headers;
mod level;
mod params;
pub mod tiles;

use tracing::{debug, info, warn};

use self::headers::{
    ColorConfig, FrameHeader, FrameType, HdrCll, HdrMdcv, Metadata, SequenceHeader, TxMode,
    DEFAULT_LOOP_FILTER_REF_DELTAS, NUM_REF_FRAMES, PRIMARY_REF_NONE,
};
use self::level::LevelRequest;
pub use self::params::{Av1PictureParams, Av1SequenceParams, Av1TileGroupParams};
use self::tiles::{TileLayout, TileRequest};
use super::bitwriter::BitWriter;
use super::codec::{
    CodecDescriptor, CodecFlags, CodecInit, CodecPlugin, EncoderCaps, ProfileEntry, SessionContext,
};
use super::device::{Av1Features, DeviceAttributes, Profile};
use super::gop::PictureType;
use super::obu::{self, ObuType};
use super::packed::{PackedHeader, PackedHeaderFlags, PackedHeaderType};
use super::reorder::{Picture, PictureArena, PictureId};
use super::slice::Slice;
use super::{CodecOptions, ColourRange, EncodeConfig, HdrMetadata, PixelFormat, RateControlMode};
use crate::error::{EncodeError, Result};

const MAX_QUANT: i32 = 255;
const MAX_LEVEL_IDX: u8 = 31;

// Reference names used in the motion search order.
const LAST_FRAME: u8 = 1;
const GOLDEN_FRAME: u8 = 4;
const BWDREF_FRAME: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Av1Profile {
    /// 4:2:0 at 8 and 10 bits.
    Main,
    /// Adds 4:4:4.
    High,
}

impl Av1Profile {
    pub fn seq_profile(self) -> u8 {
        match self {
            Av1Profile::Main => 0,
            Av1Profile::High => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Av1Tier {
    #[default]
    Main,
    High,
}

/// AV1 specific options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Av1Options {
    pub profile: Option<Av1Profile>,
    pub tier: Av1Tier,
    /// `seq_level_idx`. Guessed when unset.
    pub level: Option<u8>,
    /// Tile groups per frame.
    pub tile_groups: u32,
    pub use_128x128_superblock: bool,
}

impl Default for Av1Options {
    fn default() -> Self {
        Self {
            profile: None,
            tier: Av1Tier::Main,
            level: None,
            tile_groups: 1,
            use_128x128_superblock: false,
        }
    }
}

/// Per-picture AV1 state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Av1Picture {
    /// Reference slot refreshed by this picture, if any.
    pub slot: Option<u8>,
    pub last_idr_frame: i64,
    pub order_hint: u8,
}

const PROFILES: &[ProfileEntry] = &[
    ProfileEntry {
        codec_profile: 0,
        bit_depth: 8,
        pixel_format: PixelFormat::Yuv420,
        profile: Profile::Av1Profile0,
    },
    ProfileEntry {
        codec_profile: 0,
        bit_depth: 10,
        pixel_format: PixelFormat::Yuv420,
        profile: Profile::Av1Profile0,
    },
    ProfileEntry {
        codec_profile: 1,
        bit_depth: 8,
        pixel_format: PixelFormat::Yuv444,
        profile: Profile::Av1Profile1,
    },
    ProfileEntry {
        codec_profile: 1,
        bit_depth: 10,
        pixel_format: PixelFormat::Yuv444,
        profile: Profile::Av1Profile1,
    },
];

fn log2(value: u32) -> u8 {
    (31 - value.max(1).leading_zeros()) as u8
}

fn scaled_q_idx(base: u8, factor: f32, offset: f32) -> u8 {
    if factor != 0.0 {
        ((factor.abs() * base as f32 + offset + 0.5) as i32).clamp(0, MAX_QUANT) as u8
    } else {
        base
    }
}

/// HDR metadata OBUs for `hdr`, mastering display first.
fn hdr_metadata(hdr: &HdrMetadata) -> Vec<Metadata> {
    let mut out = Vec::new();
    if let Some(mdm) = hdr.mastering_display {
        let chroma = |v: f64| (v * 65536.0).round().clamp(0.0, 65535.0) as u16;
        let mut mdcv = HdrMdcv::default();
        for (i, (x, y)) in mdm.primaries.into_iter().enumerate() {
            mdcv.primary_chromaticity_x[i] = chroma(x);
            mdcv.primary_chromaticity_y[i] = chroma(y);
        }
        mdcv.white_point_chromaticity_x = chroma(mdm.white_point.0);
        mdcv.white_point_chromaticity_y = chroma(mdm.white_point.1);
        mdcv.luminance_max = (mdm.max_luminance * 256.0).round().max(0.0) as u32;
        mdcv.luminance_min = (mdm.min_luminance * 16384.0).round().max(0.0) as u32;
        out.push(Metadata::HdrMdcv(mdcv));
    }
    if let Some(cll) = hdr.content_light_level {
        out.push(Metadata::HdrCll(HdrCll {
            max_cll: cll.max_content_light_level,
            max_fall: cll.max_pic_average_light_level,
        }));
    }
    out
}

/// AV1 codec state for one session.
#[derive(Debug, Clone, Default)]
pub struct Av1Codec {
    options: Av1Options,
    features: Av1Features,
    tiles: TileLayout,
    tile_groups: u32,
    tx_mode: TxMode,
    q_idx_idr: u8,
    q_idx_p: u8,
    q_idx_b: u8,

    sequence_header: SequenceHeader,
    sequence_obu: Vec<u8>,
    frame_header: FrameHeader,
    frame_obu: Vec<u8>,
    /// Order hint held in each reference slot.
    slot_hints: [u8; NUM_REF_FRAMES],
    metadata: Vec<Metadata>,
}

impl Av1Codec {
    pub fn sequence_header(&self) -> &SequenceHeader {
        &self.sequence_header
    }

    /// Header of the last picture set up.
    pub fn frame_header(&self) -> &FrameHeader {
        &self.frame_header
    }

    pub fn tiles(&self) -> &TileLayout {
        &self.tiles
    }

    /// Quantiser indices for IDR, P and B pictures.
    pub fn q_idx(&self) -> (u8, u8, u8) {
        (self.q_idx_idr, self.q_idx_p, self.q_idx_b)
    }

    fn obu_size_len(&self) -> usize {
        self.features.obu_size_bytes_minus1 as usize + 1
    }

    fn wrap_obu(&self, obu_type: ObuType, payload: BitWriter) -> Result<Vec<u8>> {
        let payload = payload.finish();
        let mut w = BitWriter::new();
        obu::write_obu(&mut w, obu_type, &payload, Some(self.obu_size_len()))?;
        Ok(w.finish())
    }

    fn slot_of(picture: &Picture<Av1Picture>) -> Result<u8> {
        picture.codec.slot.ok_or_else(|| {
            EncodeError::Invariant(format!(
                "reference picture {} holds no slot",
                picture.display_order
            ))
        })
    }

    fn reference<'a>(
        pictures: &'a PictureArena<Av1Picture>,
        picture: &Picture<Av1Picture>,
        list: usize,
    ) -> Result<&'a Picture<Av1Picture>> {
        let id = picture.nearest_ref(list).ok_or_else(|| {
            EncodeError::Invariant(format!(
                "{:?} picture {} has no L{} reference",
                picture.picture_type, picture.display_order, list
            ))
        })?;
        pictures.picture(id)
    }

    fn choose_level(&self, ctx: &SessionContext) -> (u8, Av1Tier) {
        if let Some(level) = self.options.level {
            return (level, self.options.tier);
        }
        let config = &ctx.config;
        let req = LevelRequest {
            tier: self.options.tier,
            bitrate: ctx.rc.bits_per_second as u64,
            width: config.dimensions.width,
            height: config.dimensions.height,
            frame_rate: (config.frame_rate_numerator, config.frame_rate_denominator),
            tiles: self.tiles.tiles(),
            tile_cols: self.tiles.cols,
        };
        match level::guess_level(&req) {
            Some(level) => {
                info!("Using level {}", level.name);
                (level.level_idx, self.options.tier)
            }
            None => {
                warn!("Stream will not conform to any normal level: using maximum parameters");
                (MAX_LEVEL_IDX, Av1Tier::High)
            }
        }
    }

    fn color_config(ctx: &SessionContext) -> ColorConfig {
        let colour = &ctx.config.colour;
        let depth = ctx.profile.bit_depth;
        let (shift_w, shift_h) = ctx.profile.pixel_format.chroma_shift();
        ColorConfig {
            high_bitdepth: depth > 8,
            twelve_bit: depth == 12,
            mono_chrome: false,
            color_description_present_flag: colour.is_specified(),
            color_primaries: colour.primaries,
            transfer_characteristics: colour.transfer,
            matrix_coefficients: colour.matrix,
            color_range: colour.range == ColourRange::Full,
            subsampling_x: shift_w == 1,
            subsampling_y: shift_h == 1,
            chroma_sample_position: match colour.chroma_location {
                Some(0) => 1, // vertical (left)
                Some(2) => 2, // co-located (top-left)
                _ => 0,
            },
            separate_uv_delta_q: false,
        }
    }
}

impl CodecPlugin for Av1Codec {
    type SequenceParams = Av1SequenceParams;
    type PictureParams = Av1PictureParams;
    type SliceParams = Av1TileGroupParams;
    type PictureData = Av1Picture;

    const DESCRIPTOR: CodecDescriptor = CodecDescriptor {
        codec: super::Codec::Av1,
        flags: CodecFlags::B_PICTURES
            .union(CodecFlags::TIMESTAMP_NO_DELAY)
            .union(CodecFlags::HIDDEN_FRAMES),
        default_quality: 25,
        sequence_header_type: PackedHeaderType::Sequence,
        picture_header_type: PackedHeaderType::Picture,
        slice_header_type: PackedHeaderType::Slice,
    };

    fn profiles() -> &'static [ProfileEntry] {
        PROFILES
    }

    fn init(&mut self, config: &EncodeConfig) -> Result<CodecInit> {
        let CodecOptions::Av1(options) = &config.codec_options else {
            return Err(EncodeError::InvalidConfig(
                "AV1 encoder needs AV1 options".to_string(),
            ));
        };
        if options.level.is_some_and(|level| level > MAX_LEVEL_IDX) {
            return Err(EncodeError::InvalidConfig(format!(
                "invalid level {:?}: seq_level_idx is at most {MAX_LEVEL_IDX}",
                options.level
            )));
        }
        if options.tile_groups == 0 {
            return Err(EncodeError::InvalidConfig(
                "at least one tile group is needed".to_string(),
            ));
        }
        for dim in [config.dimensions.width, config.dimensions.height] {
            if dim > 1 << 16 {
                return Err(EncodeError::InvalidConfig(format!(
                    "frame dimension {dim} exceeds 65536"
                )));
            }
        }
        self.options = options.clone();

        Ok(CodecInit {
            requested_profile: options.profile.map(Av1Profile::seq_profile),
            desired_packed_headers: PackedHeaderFlags::SEQUENCE
                | PackedHeaderFlags::PICTURE
                | PackedHeaderFlags::MISC,
            compression_level: None,
        })
    }

    fn encoder_caps(&mut self, config: &EncodeConfig, attrs: &DeviceAttributes) -> Result<EncoderCaps> {
        self.features = attrs.av1.ok_or_else(|| {
            EncodeError::Device("driver does not report AV1 encoding features".to_string())
        })?;
        debug!("AV1 features: {:?}", self.features);
        let sb_size = if self.options.use_128x128_superblock { 128 } else { 64 };
        Ok(EncoderCaps::aligned(config, sb_size, false))
    }

    fn configure(&mut self, ctx: &SessionContext) -> Result<()> {
        let config = &ctx.config;
        if ctx.rc.mode.uses_quality() {
            self.q_idx_p = ctx.rc.quality.clamp(0, MAX_QUANT) as u8;
            self.q_idx_idr = scaled_q_idx(self.q_idx_p, config.i_quant_factor, config.i_quant_offset);
            self.q_idx_b = scaled_q_idx(self.q_idx_p, config.b_quant_factor, config.b_quant_offset);
            debug!(
                "Using q_idx {} / {} / {} for IDR- / P- / B-frames",
                self.q_idx_idr, self.q_idx_p, self.q_idx_b
            );
        } else {
            self.q_idx_idr = 128;
            self.q_idx_p = 128;
            self.q_idx_b = 128;
        }

        let support = self.features.tx_mode_support;
        self.tx_mode = if support & (1 << TxMode::Select as u8) != 0 {
            TxMode::Select
        } else if support & (1 << TxMode::Largest as u8) != 0 {
            TxMode::Largest
        } else {
            return Err(EncodeError::Device(format!(
                "no usable transform mode in {support:#x}"
            )));
        };

        let (cols, rows) = config.tiles.unwrap_or((0, 0));
        self.tiles = TileLayout::search(&TileRequest {
            width: config.dimensions.width,
            height: config.dimensions.height,
            use_128x128_superblock: self.options.use_128x128_superblock,
            cols,
            rows,
            max_tile_num_minus1: self.features.max_tile_num_minus1,
        })?;

        self.tile_groups = self.options.tile_groups;
        if self.tile_groups > self.tiles.tiles() {
            warn!(
                "More tile groups ({}) than tiles ({}), using one group per tile",
                self.tile_groups,
                self.tiles.tiles()
            );
            self.tile_groups = self.tiles.tiles();
        }
        Ok(())
    }

    fn init_sequence_params(
        &mut self,
        ctx: &SessionContext,
        seq: &mut Av1SequenceParams,
        pic: &mut Av1PictureParams,
    ) -> Result<()> {
        let config = &ctx.config;
        let (width, height) = (config.dimensions.width, config.dimensions.height);
        let (level_idx, tier) = self.choose_level(ctx);
        let enable_cdef = ctx.rc.mode != RateControlMode::Cqp;

        let sh = SequenceHeader {
            seq_profile: ctx.profile.codec_profile,
            seq_level_idx: level_idx,
            seq_tier: tier == Av1Tier::High,
            frame_width_bits_minus_1: log2(width),
            frame_height_bits_minus_1: log2(height),
            max_frame_width_minus_1: width - 1,
            max_frame_height_minus_1: height - 1,
            use_128x128_superblock: self.options.use_128x128_superblock,
            enable_order_hint: true,
            order_hint_bits_minus_1: 7,
            enable_cdef,
            color_config: Self::color_config(ctx),
            ..Default::default()
        };
        let mut w = BitWriter::new();
        sh.write(&mut w)?;
        self.sequence_obu = self.wrap_obu(ObuType::SequenceHeader, w)?;

        *seq = Av1SequenceParams {
            seq_profile: sh.seq_profile,
            seq_level_idx: sh.seq_level_idx,
            seq_tier: sh.seq_tier,
            order_hint_bits_minus_1: sh.order_hint_bits_minus_1,
            intra_period: ctx.gop.gop_size,
            ip_period: ctx.gop.b_per_p + 1,
            bits_per_second: ctx.rc.bits_per_second,
            enable_order_hint: sh.enable_order_hint,
            enable_cdef: sh.enable_cdef,
            use_128x128_superblock: sh.use_128x128_superblock,
        };

        let clip_q = |q: u32| (q as i32).clamp(1, MAX_QUANT) as u8;
        *pic = Av1PictureParams {
            frame_width_minus_1: (width - 1) as u16,
            frame_height_minus_1: (height - 1) as u16,
            min_base_qindex: clip_q(ctx.rc.min_qp),
            max_base_qindex: clip_q(ctx.rc.max_qp),
            tx_mode: self.tx_mode as u8,
            tile_cols: self.tiles.cols as u8,
            tile_rows: self.tiles.rows as u8,
            width_in_sbs_minus_1: self.tiles.width_in_sbs.iter().map(|w| (w - 1) as u16).collect(),
            height_in_sbs_minus_1: self.tiles.height_in_sbs.iter().map(|h| (h - 1) as u16).collect(),
            tile_group_obu_hdr_info: true,
            ..Default::default()
        };

        self.sequence_header = sh;
        Ok(())
    }

    fn init_picture_params(
        &mut self,
        _ctx: &SessionContext,
        pictures: &mut PictureArena<Av1Picture>,
        id: PictureId,
        params: &mut Av1PictureParams,
    ) -> Result<()> {
        let picture = pictures.picture(id)?;
        let mut data = Av1Picture::default();
        let mut fh = FrameHeader {
            tile_size_bytes_minus1: self.features.tile_size_bytes_minus1,
            loop_filter_ref_deltas: DEFAULT_LOOP_FILTER_REF_DELTAS,
            tx_mode: self.tx_mode,
            ..Default::default()
        };
        let mut ref_frame_ctrl = [[0u8; 7]; 2];

        match picture.picture_type {
            PictureType::Idr => {
                fh.frame_type = FrameType::Key;
                fh.refresh_frame_flags = 0xff;
                fh.base_q_idx = self.q_idx_idr;
                data.slot = Some(0);
                data.last_idr_frame = picture.display_order;
                self.slot_hints = [0; NUM_REF_FRAMES];
            }
            PictureType::P => {
                let reference = Self::reference(pictures, picture, 0)?;
                let ref_slot = Self::slot_of(reference)?;
                let slot = u8::from(ref_slot == 0);
                data.slot = Some(slot);
                data.last_idr_frame = reference.codec.last_idr_frame;

                fh.frame_type = FrameType::Inter;
                fh.base_q_idx = self.q_idx_p;
                fh.refresh_frame_flags = 1 << slot;
                fh.ref_frame_idx = [ref_slot; 7];
                ref_frame_ctrl[0][0] = LAST_FRAME;

                let l0 = &picture.refs[0];
                if l0.len() > 1 {
                    let second = pictures.picture(l0[l0.len() - 2])?;
                    fh.ref_frame_idx[GOLDEN_FRAME as usize - 1] = Self::slot_of(second)?;
                    ref_frame_ctrl[0][1] = GOLDEN_FRAME;
                }
            }
            PictureType::B => {
                let past = Self::reference(pictures, picture, 0)?;
                let future = Self::reference(pictures, picture, 1)?;
                let (past_slot, future_slot) = (Self::slot_of(past)?, Self::slot_of(future)?);
                data.last_idr_frame = past.codec.last_idr_frame;

                fh.frame_type = FrameType::Inter;
                fh.base_q_idx = self.q_idx_b;
                fh.refresh_frame_flags = 0;
                fh.reference_select = true;
                fh.ref_frame_idx = [
                    past_slot,
                    past_slot,
                    past_slot,
                    future_slot,
                    future_slot,
                    future_slot,
                    future_slot,
                ];
                ref_frame_ctrl[0][0] = LAST_FRAME;
                ref_frame_ctrl[1][0] = BWDREF_FRAME;
            }
            PictureType::I => {
                return Err(EncodeError::Invariant(format!(
                    "non-IDR intra picture {} in an AV1 stream",
                    picture.display_order
                )));
            }
        }

        data.order_hint = (picture.display_order - data.last_idr_frame) as u8;
        fh.order_hint = data.order_hint;
        fh.show_frame = !picture.hidden;
        fh.showable_frame = fh.frame_type != FrameType::Key;
        if fh.frame_type == FrameType::Key && fh.show_frame {
            fh.error_resilient_mode = true;
        }
        fh.primary_ref_frame = if fh.frame_type.is_intra() || fh.error_resilient_mode {
            PRIMARY_REF_NONE
        } else {
            0
        };
        fh.ref_order_hint = self.slot_hints;

        self.metadata.clear();
        if picture.picture_type == PictureType::Idr {
            if let Some(hdr) = &picture.hdr {
                self.metadata = hdr_metadata(hdr);
            }
        }

        let mut reference_frames = [None; NUM_REF_FRAMES];
        for r in picture.all_refs() {
            let reference = pictures.picture(r)?;
            let slot = Self::slot_of(reference)? as usize;
            if reference_frames[slot].is_some() {
                return Err(EncodeError::Invariant(format!(
                    "two references of picture {} share slot {}",
                    picture.display_order, slot
                )));
            }
            reference_frames[slot] = reference.recon_surface;
        }

        let mut w = BitWriter::new();
        let offsets = fh.write(&mut w, &self.sequence_header, &self.tiles, &self.slot_hints)?;
        obu::trailing_bits(&mut w);
        self.frame_obu = self.wrap_obu(ObuType::FrameHeader, w)?;
        let header_bits = (1 + self.obu_size_len() as u32) * 8;

        params.reconstructed_frame = picture.recon_surface;
        params.coded_buf = picture.output_buffer;
        params.reference_frames = reference_frames;
        params.ref_frame_idx = fh.ref_frame_idx;
        params.primary_ref_frame = fh.primary_ref_frame;
        params.order_hint = fh.order_hint;
        params.refresh_frame_flags = fh.refresh_frame_flags;
        params.ref_frame_ctrl = ref_frame_ctrl;
        params.base_qindex = fh.base_q_idx;
        params.frame_type = fh.frame_type as u8;
        params.error_resilient_mode = fh.error_resilient_mode;
        params.disable_frame_recon = picture.picture_type == PictureType::B;
        params.reference_mode = if fh.reference_select { 2 } else { 0 };
        params.bit_offset_qindex = offsets.qindex + header_bits;
        params.bit_offset_loopfilter_params = offsets.loop_filter + header_bits;
        params.bit_offset_cdef_params = offsets.cdef + header_bits;
        params.size_in_bits_cdef_params = offsets.cdef_size;
        params.size_in_bits_frame_hdr_obu = self.frame_obu.len() as u32 * 8;
        params.byte_offset_frame_hdr_obu_size = if picture.picture_type == PictureType::Idr {
            self.sequence_obu.len() as u32 + 1
        } else {
            1
        };

        debug!(
            "Frame {} ({:?}): slot {:?}, refresh {:#04x}, order hint {}, show {}",
            picture.display_order,
            fh.frame_type,
            data.slot,
            fh.refresh_frame_flags,
            fh.order_hint,
            fh.show_frame
        );

        for slot in 0..NUM_REF_FRAMES {
            if fh.refresh_frame_flags & (1 << slot) != 0 {
                self.slot_hints[slot] = fh.order_hint;
            }
        }
        self.frame_header = fh;

        let picture = pictures.picture_mut(id)?;
        picture.codec = data;
        picture.nb_slices = self.tile_groups as usize;
        Ok(())
    }

    fn init_slice_params(
        &mut self,
        _ctx: &SessionContext,
        pictures: &PictureArena<Av1Picture>,
        id: PictureId,
        _picture: &Av1PictureParams,
        slice: &mut Slice<Av1TileGroupParams>,
    ) -> Result<()> {
        let groups = pictures.picture(id)?.nb_slices.max(1) as u32;
        let tiles = self.tiles.tiles();
        let per_group = tiles / groups;
        let index = slice.index as u32;
        let tg_end = if index + 1 == groups {
            tiles - 1
        } else {
            (index + 1) * per_group - 1
        };
        slice.params = Av1TileGroupParams {
            tg_start: (index * per_group) as u16,
            tg_end: tg_end as u16,
        };
        Ok(())
    }

    fn write_sequence_header(&mut self, _ctx: &SessionContext, out: &mut PackedHeader) -> Result<()> {
        out.append_bytes(&self.sequence_obu)
    }

    fn write_picture_header(
        &mut self,
        _ctx: &SessionContext,
        pictures: &mut PictureArena<Av1Picture>,
        id: PictureId,
        out: &mut PackedHeader,
    ) -> Result<()> {
        let picture = pictures.picture_mut(id)?;
        if picture.hidden {
            let slot = Self::slot_of(picture)?;
            let mut w = BitWriter::new();
            FrameHeader::show_existing(slot).write(
                &mut w,
                &self.sequence_header,
                &self.tiles,
                &self.slot_hints,
            )?;
            obu::trailing_bits(&mut w);
            picture.tail_data = self.wrap_obu(ObuType::FrameHeader, w)?;
        }
        out.append_bytes(&self.frame_obu)
    }

    fn write_extra_header(
        &mut self,
        _ctx: &SessionContext,
        _pictures: &mut PictureArena<Av1Picture>,
        _id: PictureId,
        index: usize,
        out: &mut PackedHeader,
    ) -> Result<Option<PackedHeaderType>> {
        let Some(metadata) = self.metadata.get(index) else {
            return Ok(None);
        };
        let mut w = BitWriter::new();
        metadata.write(&mut w)?;
        let obu = self.wrap_obu(ObuType::Metadata, w)?;
        out.append_bytes(&obu)?;
        Ok(Some(PackedHeaderType::RawData))
    }
}
