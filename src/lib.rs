//! vaforge: a hardware video encode frontend.
//!
//! The crate drives an opaque encode device (see [`EncodeDevice`]) through a
//! generic session that owns the reorder window, reference bookkeeping,
//! rate-control staging and asynchronous submission. Codec plugins for
//! AV1, H.264, H.265, MPEG-2, VP8 and VP9 fill in parameter structures and
//! write the packed headers the device cannot produce itself.
//!
//! ```no_run
//! use vaforge::{EncodeConfig, Encoder, InputFrame, LoopbackDevice, SurfaceId};
//!
//! # fn main() -> vaforge::Result<()> {
//! let config = EncodeConfig::h264(1280, 720).with_b_frames(2);
//! let mut encoder = Encoder::new(LoopbackDevice::new(), config)?;
//! for i in 0..30 {
//!     for packet in encoder.encode(InputFrame::new(SurfaceId(i), i as i64))? {
//!         println!("{:?} pts={} dts={}", packet.picture_type, packet.pts, packet.dts);
//!     }
//! }
//! let _tail = encoder.flush()?;
//! # Ok(())
//! # }
//! ```

pub mod encoder;
pub mod error;

pub use encoder::device::{
    DeviceAttributes, EncodeDevice, EncodeJob, Entrypoint, OutputBufferId, ParamBuffer, Profile,
    SurfaceId,
};
pub use encoder::loopback::LoopbackDevice;
pub use encoder::{
    BitDepth, Codec, ColourDescription, ColourRange, EncodeConfig, EncodedPacket, Encoder,
    HdrMetadata, InputFrame, IssueMode, PictureType, PixelFormat, RateControl, RateControlMode,
};
pub use error::{EncodeError, Result};
