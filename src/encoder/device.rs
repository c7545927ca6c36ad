//! The hardware collaborator: what an encode session needs from a device.
//!
//! A device exposes profile/entrypoint capabilities, owns surfaces and coded
//! output buffers, and runs encode jobs described as an ordered list of
//! parameter buffers. Real backends wrap a driver; [`LoopbackDevice`] runs
//! entirely in memory.
//!
//! [`LoopbackDevice`]: super::loopback::LoopbackDevice

use bitflags::bitflags;

use super::codec::CodecPlugin;
use super::packed::{PackedHeaderFlags, PackedHeaderType};
use super::ratecontrol::GlobalParam;
use crate::error::Result;

/// Handle of a device surface (input picture or reconstructed frame).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u32);

/// Handle of a coded output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputBufferId(pub u32);

/// Device-level encode profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Profile {
    H264ConstrainedBaseline,
    H264Main,
    H264High,
    HevcMain,
    HevcMain10,
    HevcMain12,
    HevcMain422_10,
    HevcMain444,
    Av1Profile0,
    Av1Profile1,
    Mpeg2Simple,
    Mpeg2Main,
    Vp8Version0_3,
    Vp9Profile0,
    Vp9Profile1,
    Vp9Profile2,
    Vp9Profile3,
}

/// Encode entrypoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entrypoint {
    /// Full-featured encoder.
    EncSlice,
    /// Low-power fixed-function encoder.
    EncSliceLP,
}

bitflags! {
    /// Rate control modes a device can run.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RateControlModes: u32 {
        const CBR = 0x0000_0002;
        const VBR = 0x0000_0004;
        const CQP = 0x0000_0010;
        const ICQ = 0x0000_0040;
        const QVBR = 0x0000_0400;
        const AVBR = 0x0000_0800;
    }
}

bitflags! {
    /// How a device can partition a picture into slices.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SliceStructure: u32 {
        const POWER_OF_TWO_ROWS = 0x01;
        const ARBITRARY_MACROBLOCKS = 0x02;
        const EQUAL_ROWS = 0x04;
        const MAX_SLICE_SIZE = 0x08;
        const ARBITRARY_ROWS = 0x10;
        const EQUAL_MULTI_ROWS = 0x20;
    }
}

/// HEVC block size limits reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HevcBlockSizes {
    pub log2_max_coding_tree_block_size: u8,
    pub log2_min_luma_coding_block_size: u8,
}

/// AV1 features reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Av1Features {
    /// Fixed width of tile size fields, minus one.
    pub tile_size_bytes_minus1: u8,
    /// Fixed width of OBU size fields, minus one.
    pub obu_size_bytes_minus1: u8,
    pub max_tile_num_minus1: u16,
    /// Bit `n` set means tx_mode `n` is supported.
    pub tx_mode_support: u8,
}

/// Capabilities of one profile/entrypoint pair. `None` means the driver did
/// not report the attribute.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceAttributes {
    pub rate_control: Option<RateControlModes>,
    pub packed_headers: Option<PackedHeaderFlags>,
    /// Maximum reference frames in L0 and L1.
    pub max_refs: Option<(u32, u32)>,
    pub max_slices: Option<u32>,
    pub slice_structure: Option<SliceStructure>,
    pub tile_support: bool,
    /// Highest quality level accepted, levels start at 1.
    pub quality_range: Option<u32>,
    pub max_frame_size: bool,
    pub hevc_block_sizes: Option<HevcBlockSizes>,
    pub av1: Option<Av1Features>,
}

/// Extra per-picture buffers that are neither headers nor parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtraBuffer {
    /// VP8 quantisation indices per segment and deltas per plane.
    QuantMatrix {
        quantization_index: [u8; 4],
        quantization_index_delta: [i8; 5],
    },
}

/// One buffer of an encode job.
#[derive(Debug, Clone)]
pub enum ParamBuffer<C: CodecPlugin> {
    Sequence(C::SequenceParams),
    Misc(GlobalParam),
    Picture(C::PictureParams),
    Slice(C::SliceParams),
    PackedHeader {
        kind: PackedHeaderType,
        bit_len: usize,
        data: Vec<u8>,
    },
    Extra(ExtraBuffer),
}

/// Buffer type tag, used for logging and inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Sequence,
    Misc,
    Picture,
    Slice,
    PackedHeader(PackedHeaderType),
    Extra,
}

impl<C: CodecPlugin> ParamBuffer<C> {
    pub fn kind(&self) -> BufferKind {
        match self {
            ParamBuffer::Sequence(_) => BufferKind::Sequence,
            ParamBuffer::Misc(_) => BufferKind::Misc,
            ParamBuffer::Picture(_) => BufferKind::Picture,
            ParamBuffer::Slice(_) => BufferKind::Slice,
            ParamBuffer::PackedHeader { kind, .. } => BufferKind::PackedHeader(*kind),
            ParamBuffer::Extra(_) => BufferKind::Extra,
        }
    }
}

/// Everything needed to run one picture through the encoder.
#[derive(Debug)]
pub struct EncodeJob<C: CodecPlugin> {
    pub input: SurfaceId,
    pub recon: SurfaceId,
    pub output: OutputBufferId,
    pub buffers: Vec<ParamBuffer<C>>,
}

/// A device capable of hardware encoding.
pub trait EncodeDevice {
    /// Driver vendor string.
    fn vendor(&self) -> String;

    fn profiles(&self) -> Vec<Profile>;

    fn entrypoints(&self, profile: Profile) -> Vec<Entrypoint>;

    fn query_attributes(&self, profile: Profile, entrypoint: Entrypoint)
        -> Result<DeviceAttributes>;

    /// Allocate `count` surfaces of the given size.
    fn create_surfaces(&mut self, width: u32, height: u32, count: usize)
        -> Result<Vec<SurfaceId>>;

    fn create_output_buffer(&mut self, size: usize) -> Result<OutputBufferId>;

    fn destroy_output_buffer(&mut self, buffer: OutputBufferId);

    /// Begin, render and end one picture.
    fn submit<C: CodecPlugin>(&mut self, job: EncodeJob<C>) -> Result<()>;

    /// Wait for all work targeting `surface` to finish.
    fn sync(&mut self, surface: SurfaceId) -> Result<()>;

    /// Coded segments written into `buffer`.
    fn map_output(&mut self, buffer: OutputBufferId) -> Result<Vec<Vec<u8>>>;

    /// Whether jobs can be synced per output buffer, which allows deep
    /// pipelining.
    fn has_sync_buffer(&self) -> bool;
}
