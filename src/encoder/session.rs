//! The generic encode session.
//!
//! A session owns the device, one codec plugin and all per-stream state:
//! the reorder window, the reconstructed-surface and output-buffer pools,
//! the DTS ring and the async queue. Frames go in with [`send_frame`],
//! packets come out of [`receive_packet`] in decode order.
//!
//! Setup runs in a fixed order: codec init, profile and entrypoint
//! selection, codec surface caps, rate control, GOP shape, slice layout,
//! packed headers, quality level, max frame size, pools, codec configure,
//! sequence parameters, extradata and finally the async queue.
//!
//! [`send_frame`]: EncodeSession::send_frame
//! [`receive_packet`]: EncodeSession::receive_packet

use std::collections::VecDeque;

use tracing::{debug, error, info, warn};

use super::codec::{select_profile, CodecFlags, CodecPlugin, SessionContext};
use super::device::{EncodeDevice, EncodeJob, Entrypoint, OutputBufferId, ParamBuffer};
use super::gop::{GopRequest, GopStructure, PictureType};
use super::packed::{PackedHeader, PackedHeaderFlags, PackedHeaderType};
use super::pool::{output_buffer_size, recon_surface_count, OutputBufferPool, SurfacePool};
use super::ratecontrol::{init_rate_control, GlobalParam, RateControlContext};
use super::reorder::{Pick, Picture, PictureId, ReorderWindow};
use super::slice::{SliceLayout, SliceRequest};
use super::timestamp::TimestampRing;
use super::{EncodeConfig, EncodedPacket, InputFrame, IssueMode, RateControlMode};
use crate::error::{EncodeError, Result};

/// A repeat-picture header waiting for the pictures displayed before it.
#[derive(Debug)]
struct PendingTail {
    display_order: i64,
    picture_type: PictureType,
    pts: i64,
    data: Vec<u8>,
}

fn packed_buffer<C: CodecPlugin>(kind: PackedHeaderType, header: PackedHeader) -> ParamBuffer<C> {
    ParamBuffer::PackedHeader {
        kind,
        bit_len: header.bit_len(),
        data: header.into_data(),
    }
}

/// Encode session for codec `C` on device `D`.
pub struct EncodeSession<C: CodecPlugin, D: EncodeDevice> {
    device: D,
    codec: C,
    ctx: SessionContext,
    sequence_params: C::SequenceParams,
    picture_template: C::PictureParams,
    global_params: Vec<GlobalParam>,
    max_frame_size_bits: Option<u32>,
    window: ReorderWindow<C::PictureData>,
    recon_pool: SurfacePool,
    output_pool: OutputBufferPool,
    timestamps: TimestampRing,
    /// Issued pictures awaiting output, `None` when issuing serially.
    fifo: Option<VecDeque<PictureId>>,
    issue_mode: IssueMode,
    encode_order: i64,
    force_idr_next: bool,
    extradata: Option<Vec<u8>>,
    /// Coded data of hidden pictures, prepended to the next packet.
    hidden_data: Vec<u8>,
    /// Repeat headers of hidden pictures, in display order.
    tails: VecDeque<PendingTail>,
}

impl<C: CodecPlugin, D: EncodeDevice> EncodeSession<C, D> {
    /// Set up a session. Fails if the device cannot run the configuration.
    pub fn new(mut device: D, config: EncodeConfig) -> Result<Self> {
        config.validate()?;
        let desc = C::DESCRIPTOR;
        if config.codec() != desc.codec {
            return Err(EncodeError::InvalidConfig(format!(
                "{:?} options given to a {:?} session",
                config.codec(),
                desc.codec
            )));
        }

        let mut codec = C::default();
        let init = codec.init(&config)?;

        let profile = select_profile(
            C::profiles(),
            init.requested_profile,
            config.pixel_format,
            config.bit_depth.bits(),
            &device.profiles(),
        )?;
        let entrypoint = if config.low_power {
            Entrypoint::EncSliceLP
        } else {
            Entrypoint::EncSlice
        };
        if !device.entrypoints(profile.profile).contains(&entrypoint) {
            return Err(EncodeError::InvalidConfig(format!(
                "no {:?} entrypoint available for {:?}",
                entrypoint, profile.profile
            )));
        }
        info!("Using {:?} with entrypoint {:?}", profile.profile, entrypoint);
        let attributes = device.query_attributes(profile.profile, entrypoint)?;

        let caps = codec.encoder_caps(&config, &attributes)?;
        debug!(
            "Input surface {}x{} -> encode surface {}x{}",
            config.dimensions.width, config.dimensions.height, caps.surface_width, caps.surface_height
        );

        let rc = init_rate_control(
            &config.rate_control,
            &RateControlContext {
                supported: attributes.rate_control,
                constant_quality_only: desc.flags.contains(CodecFlags::CONSTANT_QUALITY_ONLY),
                default_quality: desc.default_quality,
                gop_pictures: config.gop_size.saturating_mul(config.b_frames + 1),
            },
        )?;

        let gop = GopStructure::derive(GopRequest {
            p_per_i: config.gop_size,
            b_frames: config.b_frames,
            b_depth: config.b_depth,
            idr_interval: config.idr_interval,
            closed_gop: config.closed_gop,
            intra_only: desc.flags.contains(CodecFlags::INTRA_ONLY),
            b_pictures: desc.flags.contains(CodecFlags::B_PICTURES),
            b_picture_references: desc.flags.contains(CodecFlags::B_PICTURE_REFERENCES),
            non_idr_key_pictures: desc.flags.contains(CodecFlags::NON_IDR_KEY_PICTURES),
            max_refs: attributes.max_refs.unwrap_or((0, 0)),
        })?;

        let slices = SliceLayout::new(
            &SliceRequest {
                width: config.dimensions.width,
                height: config.dimensions.height,
                block_width: caps.slice_block_width,
                block_height: caps.slice_block_height,
                slice_control: desc.flags.contains(CodecFlags::SLICE_CONTROL),
                slices: config.slices,
                tiles: config.tiles,
            },
            &attributes,
        )?;

        let desired = init.desired_packed_headers;
        let packed_headers = match attributes.packed_headers {
            None => {
                if !desired.is_empty() {
                    warn!(
                        "Driver does not support any packed headers (wanted {:#x})",
                        desired.bits()
                    );
                }
                PackedHeaderFlags::empty()
            }
            Some(found) => {
                if !found.contains(desired) {
                    warn!(
                        "Driver does not support some wanted packed headers (wanted {:#x}, found {:#x})",
                        desired.bits(),
                        found.bits()
                    );
                }
                desired & found
            }
        };
        if desired.contains(PackedHeaderFlags::SEQUENCE)
            && !packed_headers.contains(PackedHeaderFlags::SEQUENCE)
            && config.global_header
        {
            warn!("Driver does not support packed sequence headers; no global header will be written");
        }

        let mut global_params = rc.global_params((
            config.frame_rate_numerator,
            config.frame_rate_denominator,
        ));
        if let Some(level) = config.compression_level.or(init.compression_level) {
            match attributes.quality_range {
                Some(range) if range > 0 => {
                    let level = if level > range {
                        warn!("Invalid quality level: valid range is 0-{range}, using {range}");
                        range
                    } else {
                        level
                    };
                    global_params.push(GlobalParam::QualityLevel(level));
                }
                _ => warn!("Quality attribute is not supported: will use default quality level"),
            }
        }

        let max_frame_size_bits = match config.max_frame_size {
            None | Some(0) => None,
            Some(_) if rc.mode == RateControlMode::Cqp => {
                return Err(EncodeError::InvalidConfig(
                    "max frame size is invalid in CQP rate control mode".to_string(),
                ));
            }
            Some(_) if !attributes.max_frame_size => {
                return Err(EncodeError::InvalidConfig(
                    "max frame size attribute is not supported".to_string(),
                ));
            }
            Some(bytes) => {
                info!("Set max frame size: {} bytes", bytes);
                Some(bytes.saturating_mul(8))
            }
        };

        let nb_recon = recon_surface_count(gop.b_per_p, gop.max_b_depth, config.async_depth);
        let recon_pool = SurfacePool::new(&mut device, caps.surface_width, caps.surface_height, nb_recon)?;
        let output_pool = OutputBufferPool::new(
            output_buffer_size(caps.surface_width, caps.surface_height),
            nb_recon,
        );

        let async_queue = match config.issue_mode {
            IssueMode::SerialiseEverything => false,
            mode if device.has_sync_buffer() => {
                debug!("Issue mode {:?} with async depth {}", mode, config.async_depth);
                true
            }
            mode => {
                warn!("Device cannot sync per output buffer; {:?} falls back to serial issue", mode);
                false
            }
        };
        let issue_mode = if async_queue {
            config.issue_mode
        } else {
            IssueMode::SerialiseEverything
        };

        let timestamps = TimestampRing::new(gop.output_delay, gop.decode_delay, config.async_depth);
        let ctx = SessionContext {
            vendor: device.vendor(),
            surface_width: caps.surface_width,
            surface_height: caps.surface_height,
            async_depth: config.async_depth,
            config,
            profile,
            entrypoint,
            attributes,
            rc,
            gop,
            slices,
            packed_headers,
        };
        codec.configure(&ctx)?;

        let mut sequence_params = C::SequenceParams::default();
        let mut picture_template = C::PictureParams::default();
        codec.init_sequence_params(&ctx, &mut sequence_params, &mut picture_template)?;

        let extradata = if ctx.config.global_header && packed_headers.contains(PackedHeaderFlags::SEQUENCE) {
            let mut header = PackedHeader::new();
            codec.write_sequence_header(&ctx, &mut header)?;
            debug!("Global header: {} bytes", header.data().len());
            Some(header.into_data())
        } else {
            None
        };

        let fifo = async_queue.then(|| VecDeque::with_capacity(ctx.async_depth as usize));

        Ok(Self {
            device,
            codec,
            ctx,
            sequence_params,
            picture_template,
            global_params,
            max_frame_size_bits,
            window: ReorderWindow::new(),
            recon_pool,
            output_pool,
            timestamps,
            fifo,
            issue_mode,
            encode_order: 0,
            force_idr_next: false,
            extradata,
            hidden_data: Vec::new(),
            tails: VecDeque::new(),
        })
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Issue mode in effect after falling back for devices without
    /// per-buffer sync.
    pub fn issue_mode(&self) -> IssueMode {
        self.issue_mode
    }

    pub fn extradata(&self) -> Option<&[u8]> {
        self.extradata.as_deref()
    }

    /// Make the next frame sent an IDR picture.
    pub fn request_idr(&mut self) {
        self.force_idr_next = true;
    }

    /// Queue a frame, or signal end of stream with `None`.
    pub fn send_frame(&mut self, frame: Option<InputFrame>) -> Result<()> {
        if self.window.end_of_stream() {
            return Err(EncodeError::Invariant(
                "frame sent after end of stream".to_string(),
            ));
        }
        let Some(frame) = frame else {
            debug!("End of stream after {} frames", self.window.input_order());
            self.window.set_end_of_stream();
            self.timestamps.finish(self.window.input_order());
            return Ok(());
        };

        let input_order = self.window.input_order();
        debug!("Input frame {} (pts {})", input_order, frame.pts);
        let mut picture = Picture::new(frame.surface, frame.pts);
        picture.force_idr =
            input_order == 0 || frame.force_keyframe || std::mem::take(&mut self.force_idr_next);
        picture.hdr = frame.hdr;
        self.timestamps.push(input_order, frame.pts);
        self.window.push(picture);
        Ok(())
    }

    /// Next packet in decode order. `None` means more input is needed, or
    /// that the stream is finished once end of stream has been sent.
    pub fn receive_packet(&mut self) -> Result<Option<EncodedPacket>> {
        loop {
            if let Some(packet) = self.take_ready_tail()? {
                return Ok(Some(packet));
            }
            let Some(id) = self.next_to_output()? else {
                return Ok(None);
            };
            if let Some(packet) = self.output(id)? {
                return Ok(Some(packet));
            }
        }
    }

    /// Issue what the issue mode allows and return the picture to output.
    fn next_to_output(&mut self) -> Result<Option<PictureId>> {
        if self.window.is_empty() {
            return Ok(None);
        }
        let gop = self.ctx.gop;
        let depth = self.ctx.async_depth as usize;

        let Some(fifo_len) = self.fifo.as_ref().map(VecDeque::len) else {
            let Pick::Ready(id) = self.window.pick_next(&gop)? else {
                return Ok(None);
            };
            let order = self.encode_order;
            self.encode_order += 1;
            self.issue(id, order)?;
            return Ok(Some(id));
        };

        if fifo_len < depth {
            if let Pick::Ready(id) = self.window.pick_next(&gop)? {
                let order = self.encode_order + fifo_len as i64;
                self.issue(id, order)?;
                if let Some(fifo) = self.fifo.as_mut() {
                    fifo.push_back(id);
                }
            }
        }

        let Some(fifo) = self.fifo.as_mut() else {
            return Ok(None);
        };
        if fifo.is_empty() {
            return Ok(None);
        }
        if self.issue_mode == IssueMode::MaximiseThroughput
            && fifo.len() < depth
            && !self.window.end_of_stream()
        {
            return Ok(None);
        }
        let Some(id) = fifo.pop_front() else {
            return Ok(None);
        };
        self.encode_order = self.window.pictures().picture(id)?.encode_order + 1;
        Ok(Some(id))
    }

    fn issue(&mut self, id: PictureId, encode_order: i64) -> Result<()> {
        let refs: Vec<PictureId> = {
            let picture = self.window.pictures_mut().picture_mut(id)?;
            if picture.encode_issued {
                return Err(EncodeError::Invariant(format!(
                    "picture {} issued twice",
                    picture.display_order
                )));
            }
            picture.encode_order = encode_order;
            debug!(
                "Issuing encode for pic {}/{} as type {:?}",
                picture.display_order, picture.encode_order, picture.picture_type
            );
            picture.all_refs().collect()
        };
        for r in refs {
            let reference = self.window.pictures().picture(r)?;
            if !reference.encode_issued {
                return Err(EncodeError::Invariant(format!(
                    "reference {} not issued before its user",
                    reference.display_order
                )));
            }
            debug!("Refers to {}/{}", reference.display_order, reference.encode_order);
        }

        let recon = self.recon_pool.acquire()?;
        let output = match self.output_pool.acquire(&mut self.device) {
            Ok(output) => output,
            Err(err) => {
                self.recon_pool.release(recon);
                return Err(err);
            }
        };
        debug!("Recon surface is {:#x}, output buffer is {:#x}", recon.0, output.0);
        {
            let picture = self.window.pictures_mut().picture_mut(id)?;
            picture.recon_surface = Some(recon);
            picture.output_buffer = Some(output);
        }

        match self.submit(id, output) {
            Ok(()) => {
                self.window.pictures_mut().picture_mut(id)?.encode_issued = true;
                Ok(())
            }
            Err(err) => {
                error!("Encode failed: {}", err);
                self.recon_pool.release(recon);
                self.output_pool.release(output);
                if let Some(picture) = self.window.pictures_mut().get_mut(id) {
                    picture.recon_surface = None;
                    picture.output_buffer = None;
                }
                Err(err)
            }
        }
    }

    /// Assemble every buffer for one picture and hand the job to the device.
    fn submit(&mut self, id: PictureId, output: OutputBufferId) -> Result<()> {
        let desc = C::DESCRIPTOR;
        let packed = self.ctx.packed_headers;
        let (is_idr, input, recon) = {
            let picture = self.window.pictures().picture(id)?;
            let recon = picture
                .recon_surface
                .ok_or_else(|| EncodeError::Invariant("issue without recon surface".to_string()))?;
            (picture.picture_type.is_idr(), picture.input_surface, recon)
        };
        let mut buffers: Vec<ParamBuffer<C>> = Vec::new();

        if is_idr {
            buffers.push(ParamBuffer::Sequence(self.sequence_params.clone()));
            buffers.extend(self.global_params.iter().copied().map(ParamBuffer::Misc));
        }

        let mut params = self.picture_template.clone();
        self.codec
            .init_picture_params(&self.ctx, self.window.pictures_mut(), id, &mut params)?;
        buffers.push(ParamBuffer::Picture(params.clone()));

        if let Some(bits) = self.max_frame_size_bits {
            buffers.push(ParamBuffer::Misc(GlobalParam::MaxFrameSize(bits)));
        }

        if is_idr && packed.contains(PackedHeaderFlags::SEQUENCE) {
            let mut header = PackedHeader::new();
            self.codec.write_sequence_header(&self.ctx, &mut header)?;
            buffers.push(packed_buffer(desc.sequence_header_type, header));
        }

        if packed.contains(PackedHeaderFlags::PICTURE) {
            let mut header = PackedHeader::new();
            self.codec
                .write_picture_header(&self.ctx, self.window.pictures_mut(), id, &mut header)?;
            buffers.push(packed_buffer(desc.picture_header_type, header));
        }

        for index in 0.. {
            match self
                .codec
                .write_extra_buffer(&self.ctx, self.window.pictures(), id, index)?
            {
                Some(extra) => buffers.push(ParamBuffer::Extra(extra)),
                None => break,
            }
        }

        if packed.contains(PackedHeaderFlags::MISC) {
            for index in 0.. {
                let mut header = PackedHeader::new();
                match self.codec.write_extra_header(
                    &self.ctx,
                    self.window.pictures_mut(),
                    id,
                    index,
                    &mut header,
                )? {
                    Some(kind) => buffers.push(packed_buffer(kind, header)),
                    None => break,
                }
            }
        }

        let nb_slices = {
            let picture = self.window.pictures_mut().picture_mut(id)?;
            if picture.nb_slices == 0 {
                picture.nb_slices = self.ctx.slices.nb_slices;
            }
            picture.nb_slices
        };
        let mut slices = self.ctx.slices.make_slices::<C::SliceParams>(nb_slices)?;
        for slice in &mut slices {
            self.codec
                .init_slice_params(&self.ctx, self.window.pictures(), id, &params, slice)?;
            if packed.contains(PackedHeaderFlags::SLICE) {
                let mut header = PackedHeader::new();
                self.codec
                    .write_slice_header(&self.ctx, self.window.pictures(), id, slice, &mut header)?;
                buffers.push(packed_buffer(desc.slice_header_type, header));
            }
            buffers.push(ParamBuffer::Slice(std::mem::take(&mut slice.params)));
        }

        self.device.submit(EncodeJob {
            input,
            recon,
            output,
            buffers,
        })
    }

    fn wait(&mut self, id: PictureId) -> Result<()> {
        let picture = self.window.pictures().picture(id)?;
        if !picture.encode_issued {
            return Err(EncodeError::Invariant(format!(
                "waiting on picture {} that was never issued",
                picture.display_order
            )));
        }
        if picture.encode_complete {
            return Ok(());
        }
        debug!(
            "Sync to pic {}/{} (input surface {:#x})",
            picture.display_order, picture.encode_order, picture.input_surface.0
        );
        let surface = picture.input_surface;
        self.device.sync(surface)?;
        self.window.pictures_mut().picture_mut(id)?.encode_complete = true;
        Ok(())
    }

    /// Collect the coded data of a picture. Hidden pictures produce no
    /// packet of their own.
    fn output(&mut self, id: PictureId) -> Result<Option<EncodedPacket>> {
        self.wait(id)?;
        let buffer = self
            .window
            .pictures_mut()
            .picture_mut(id)?
            .output_buffer
            .take()
            .ok_or_else(|| EncodeError::Invariant("picture has no output buffer".to_string()))?;
        let segments = self.device.map_output(buffer);
        self.output_pool.release(buffer);
        let segments = segments?;
        for segment in &segments {
            debug!("Output buffer: {} bytes", segment.len());
        }
        let mut data = segments.concat();

        let flags = C::DESCRIPTOR.flags;
        let picture = self.window.pictures_mut().picture_mut(id)?;
        if flags.contains(CodecFlags::HIDDEN_FRAMES) && picture.hidden {
            debug!(
                "Hold hidden pic {}/{} ({} bytes)",
                picture.display_order,
                picture.encode_order,
                data.len()
            );
            self.hidden_data.append(&mut data);
            if !picture.tail_data.is_empty() {
                let tail = PendingTail {
                    display_order: picture.display_order,
                    picture_type: picture.picture_type,
                    pts: picture.pts,
                    data: std::mem::take(&mut picture.tail_data),
                };
                let pos = self
                    .tails
                    .partition_point(|t| t.display_order < tail.display_order);
                self.tails.insert(pos, tail);
            }
            self.clear_old()?;
            return Ok(None);
        }

        if !self.hidden_data.is_empty() {
            let mut merged = std::mem::take(&mut self.hidden_data);
            merged.append(&mut data);
            data = merged;
        }
        let pts = picture.pts;
        let dts = if flags.contains(CodecFlags::TIMESTAMP_NO_DELAY) {
            pts
        } else {
            self.timestamps.dts(picture.encode_order, pts)
        };
        let packet = EncodedPacket {
            data,
            picture_type: picture.picture_type,
            is_key_frame: picture.picture_type.is_idr(),
            pts,
            dts,
        };
        debug!(
            "Output read for pic {}/{}: pts {} dts {}",
            picture.display_order, picture.encode_order, packet.pts, packet.dts
        );
        self.clear_old()?;
        Ok(Some(packet))
    }

    /// The first pending repeat header once every picture displayed before
    /// it has been output.
    fn take_ready_tail(&mut self) -> Result<Option<EncodedPacket>> {
        let Some(tail) = self.tails.front() else {
            return Ok(None);
        };
        for id in self.window.iter() {
            let picture = self.window.pictures().picture(id)?;
            if picture.display_order < tail.display_order && !picture.encode_complete {
                return Ok(None);
            }
        }
        let Some(tail) = self.tails.pop_front() else {
            return Ok(None);
        };
        debug!("Output repeat header for pic {}", tail.display_order);
        Ok(Some(EncodedPacket {
            data: tail.data,
            picture_type: tail.picture_type,
            is_key_frame: false,
            pts: tail.pts,
            dts: tail.pts,
        }))
    }

    fn clear_old(&mut self) -> Result<()> {
        for picture in self.window.clear_old()? {
            if let Some(recon) = picture.recon_surface {
                self.recon_pool.release(recon);
            }
            if let Some(buffer) = picture.output_buffer {
                self.output_pool.release(buffer);
            }
        }
        Ok(())
    }
}

impl<C: CodecPlugin, D: EncodeDevice> Drop for EncodeSession<C, D> {
    fn drop(&mut self) {
        let held: Vec<OutputBufferId> = self
            .window
            .iter()
            .filter_map(|id| self.window.pictures().get(id).and_then(|p| p.output_buffer))
            .collect();
        for buffer in held {
            self.output_pool.release(buffer);
        }
        self.output_pool.drain(&mut self.device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::codec::{CodecDescriptor, CodecInit, ProfileEntry};
    use crate::encoder::device::{BufferKind, Profile, SurfaceId};
    use crate::encoder::loopback::LoopbackDevice;
    use crate::encoder::reorder::PictureArena;
    use crate::encoder::{Codec, PixelFormat};

    const TEST_PROFILES: &[ProfileEntry] = &[ProfileEntry {
        codec_profile: 100,
        bit_depth: 8,
        pixel_format: PixelFormat::Yuv420,
        profile: Profile::H264High,
    }];

    /// Writes one-byte headers so submissions are easy to inspect.
    #[derive(Debug, Clone, Default)]
    struct MarkerCodec;

    impl CodecPlugin for MarkerCodec {
        type SequenceParams = u32;
        type PictureParams = i64;
        type SliceParams = usize;
        type PictureData = ();

        const DESCRIPTOR: CodecDescriptor = CodecDescriptor {
            codec: Codec::H264,
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
            TEST_PROFILES
        }

        fn init(&mut self, _config: &EncodeConfig) -> Result<CodecInit> {
            Ok(CodecInit {
                desired_packed_headers: PackedHeaderFlags::SEQUENCE
                    | PackedHeaderFlags::PICTURE
                    | PackedHeaderFlags::SLICE,
                ..CodecInit::default()
            })
        }

        fn configure(&mut self, _ctx: &SessionContext) -> Result<()> {
            Ok(())
        }

        fn init_sequence_params(
            &mut self,
            ctx: &SessionContext,
            sequence: &mut u32,
            _picture: &mut i64,
        ) -> Result<()> {
            *sequence = ctx.gop.gop_size;
            Ok(())
        }

        fn init_picture_params(
            &mut self,
            _ctx: &SessionContext,
            pictures: &mut PictureArena<()>,
            id: PictureId,
            params: &mut i64,
        ) -> Result<()> {
            *params = pictures.picture(id)?.display_order;
            Ok(())
        }

        fn init_slice_params(
            &mut self,
            _ctx: &SessionContext,
            _pictures: &PictureArena<()>,
            _id: PictureId,
            _picture: &i64,
            slice: &mut crate::encoder::slice::Slice<usize>,
        ) -> Result<()> {
            slice.params = slice.index;
            Ok(())
        }

        fn write_sequence_header(&mut self, _ctx: &SessionContext, out: &mut PackedHeader) -> Result<()> {
            out.append_bytes(&[0x5e])
        }

        fn write_picture_header(
            &mut self,
            _ctx: &SessionContext,
            pictures: &mut PictureArena<()>,
            id: PictureId,
            out: &mut PackedHeader,
        ) -> Result<()> {
            let order = pictures.picture(id)?.display_order as u8;
            out.append_bytes(&[0x90, order])
        }

        fn write_slice_header(
            &mut self,
            _ctx: &SessionContext,
            _pictures: &PictureArena<()>,
            _id: PictureId,
            slice: &crate::encoder::slice::Slice<usize>,
            out: &mut PackedHeader,
        ) -> Result<()> {
            out.append_bytes(&[0x51, slice.index as u8])
        }
    }

    /// Marks anchors coded ahead of display as hidden and queues a one-byte
    /// repeat header for them.
    #[derive(Debug, Clone, Default)]
    struct HiddenCodec;

    impl CodecPlugin for HiddenCodec {
        type SequenceParams = ();
        type PictureParams = ();
        type SliceParams = ();
        type PictureData = ();

        const DESCRIPTOR: CodecDescriptor = CodecDescriptor {
            codec: Codec::H264,
            flags: CodecFlags::B_PICTURES
                .union(CodecFlags::TIMESTAMP_NO_DELAY)
                .union(CodecFlags::HIDDEN_FRAMES),
            default_quality: 128,
            sequence_header_type: PackedHeaderType::Sequence,
            picture_header_type: PackedHeaderType::Picture,
            slice_header_type: PackedHeaderType::Slice,
        };

        fn profiles() -> &'static [ProfileEntry] {
            TEST_PROFILES
        }

        fn init(&mut self, _config: &EncodeConfig) -> Result<CodecInit> {
            Ok(CodecInit {
                desired_packed_headers: PackedHeaderFlags::PICTURE,
                ..CodecInit::default()
            })
        }

        fn configure(&mut self, _ctx: &SessionContext) -> Result<()> {
            Ok(())
        }

        fn init_sequence_params(&mut self, _ctx: &SessionContext, _s: &mut (), _p: &mut ()) -> Result<()> {
            Ok(())
        }

        fn init_picture_params(
            &mut self,
            _ctx: &SessionContext,
            _pictures: &mut PictureArena<()>,
            _id: PictureId,
            _params: &mut (),
        ) -> Result<()> {
            Ok(())
        }

        fn write_picture_header(
            &mut self,
            _ctx: &SessionContext,
            pictures: &mut PictureArena<()>,
            id: PictureId,
            out: &mut PackedHeader,
        ) -> Result<()> {
            let picture = pictures.picture_mut(id)?;
            if picture.hidden {
                picture.tail_data = vec![0xee, picture.display_order as u8];
            }
            out.append_bytes(&[0x90, picture.display_order as u8])
        }
    }

    fn config() -> EncodeConfig {
        EncodeConfig::h264(64, 64).with_qp(24)
    }

    fn run<C: CodecPlugin>(session: &mut EncodeSession<C, LoopbackDevice>, frames: u32) -> Vec<EncodedPacket> {
        let mut packets = Vec::new();
        for i in 0..frames {
            session
                .send_frame(Some(InputFrame::new(SurfaceId(i), i as i64 * 10)))
                .unwrap();
            while let Some(packet) = session.receive_packet().unwrap() {
                packets.push(packet);
            }
        }
        session.send_frame(None).unwrap();
        while let Some(packet) = session.receive_packet().unwrap() {
            packets.push(packet);
        }
        packets
    }

    fn payload_surface(packet: &EncodedPacket) -> u32 {
        let n = packet.data.len();
        u32::from_be_bytes([
            packet.data[n - 5],
            packet.data[n - 4],
            packet.data[n - 3],
            packet.data[n - 2],
        ])
    }

    #[test]
    fn test_serial_decode_order() {
        let cfg = config()
            .with_gop_size(4)
            .with_b_frames(2)
            .with_issue_mode(IssueMode::SerialiseEverything);
        let mut session: EncodeSession<MarkerCodec, _> =
            EncodeSession::new(LoopbackDevice::new(), cfg).unwrap();
        assert_eq!(session.issue_mode(), IssueMode::SerialiseEverything);
        let packets = run(&mut session, 10);

        let pts: Vec<i64> = packets.iter().map(|p| p.pts).collect();
        assert_eq!(pts, vec![0, 30, 10, 20, 60, 40, 50, 90, 70, 80]);
        let types: Vec<PictureType> = packets.iter().map(|p| p.picture_type).collect();
        assert_eq!(types[0], PictureType::Idr);
        assert_eq!(types[1], PictureType::P);
        assert_eq!(types[2], PictureType::B);
        assert!(packets[0].is_key_frame);
        assert!(!packets[1].is_key_frame);

        let mut last_dts = i64::MIN;
        for packet in &packets {
            assert!(packet.dts <= packet.pts);
            assert!(packet.dts > last_dts);
            last_dts = packet.dts;
        }
        assert_eq!(packets[0].dts, -10);
    }

    #[test]
    fn test_submission_layout() {
        let cfg = config().with_b_frames(0).with_slices(2);
        let mut session: EncodeSession<MarkerCodec, _> =
            EncodeSession::new(LoopbackDevice::new(), cfg).unwrap();
        let packets = run(&mut session, 2);
        assert_eq!(packets.len(), 2);

        let jobs = session.device().submissions();
        assert_eq!(jobs.len(), 2);
        let idr = &jobs[0];
        assert_eq!(idr.buffers[0], BufferKind::Sequence);
        assert!(matches!(idr.buffers[1], BufferKind::Misc));
        let picture_pos = idr.buffers.iter().position(|k| *k == BufferKind::Picture).unwrap();
        assert_eq!(
            idr.buffers[picture_pos + 1],
            BufferKind::PackedHeader(PackedHeaderType::Sequence)
        );
        assert_eq!(
            idr.buffers[picture_pos + 2],
            BufferKind::PackedHeader(PackedHeaderType::Picture)
        );
        assert_eq!(idr.slices, 2);
        assert_eq!(
            &idr.buffers[idr.buffers.len() - 4..],
            &[
                BufferKind::PackedHeader(PackedHeaderType::Slice),
                BufferKind::Slice,
                BufferKind::PackedHeader(PackedHeaderType::Slice),
                BufferKind::Slice,
            ]
        );

        let p = &jobs[1];
        assert!(!p.has_sequence());
        assert!(p.global_params.is_empty());
        assert_eq!(p.packed(PackedHeaderType::Picture).next(), Some(&[0x90, 1][..]));

        // Sequence header, picture header, two slice headers, then payload.
        assert_eq!(&packets[0].data[..5], &[0x5e, 0x90, 0x00, 0x51, 0x00]);
    }

    #[test]
    fn test_global_params_on_idr() {
        let cfg = config()
            .with_b_frames(0)
            .with_compression_level(9)
            .with_rate_control(Default::default())
            .with_bitrate(2_000_000)
            .with_max_bitrate(2_000_000)
            .with_max_frame_size(4096);
        let mut session: EncodeSession<MarkerCodec, _> =
            EncodeSession::new(LoopbackDevice::new(), cfg).unwrap();
        assert_eq!(session.context().rc.mode, RateControlMode::Cbr);
        run(&mut session, 2);

        let jobs = session.device().submissions();
        let idr = &jobs[0].global_params;
        assert!(matches!(idr[0], GlobalParam::RateControl(_)));
        assert!(matches!(idr[1], GlobalParam::Hrd(_)));
        assert!(matches!(idr[2], GlobalParam::FrameRate(_)));
        assert_eq!(idr[3], GlobalParam::QualityLevel(7));
        assert_eq!(idr[4], GlobalParam::MaxFrameSize(4096 * 8));
        assert_eq!(jobs[1].global_params, vec![GlobalParam::MaxFrameSize(4096 * 8)]);
    }

    #[test]
    fn test_max_frame_size_rejected_with_cqp() {
        let cfg = config().with_max_frame_size(1000);
        let result: Result<EncodeSession<MarkerCodec, _>> = EncodeSession::new(LoopbackDevice::new(), cfg);
        assert!(matches!(result, Err(EncodeError::InvalidConfig(_))));
    }

    #[test]
    fn test_throughput_mode_buffers_before_output() {
        let cfg = config().with_b_frames(0).with_async_depth(3);
        let mut session: EncodeSession<MarkerCodec, _> =
            EncodeSession::new(LoopbackDevice::new(), cfg).unwrap();
        assert_eq!(session.issue_mode(), IssueMode::MaximiseThroughput);

        for i in 0..2 {
            session
                .send_frame(Some(InputFrame::new(SurfaceId(i), i as i64)))
                .unwrap();
            assert!(session.receive_packet().unwrap().is_none());
        }
        assert_eq!(session.device().jobs_in_flight(), 2);
        session
            .send_frame(Some(InputFrame::new(SurfaceId(2), 2)))
            .unwrap();
        let packet = session.receive_packet().unwrap().unwrap();
        assert_eq!(packet.pts, 0);
        assert_eq!(payload_surface(&packet), 0);
        assert!(session.receive_packet().unwrap().is_none());

        session.send_frame(None).unwrap();
        let mut rest = Vec::new();
        while let Some(packet) = session.receive_packet().unwrap() {
            rest.push(packet.pts);
        }
        assert_eq!(rest, vec![1, 2]);
        assert_eq!(session.device().jobs_in_flight(), 0);
    }

    #[test]
    fn test_latency_mode_outputs_immediately() {
        let cfg = config()
            .with_b_frames(0)
            .with_async_depth(4)
            .with_issue_mode(IssueMode::MinimiseLatency);
        let mut session: EncodeSession<MarkerCodec, _> =
            EncodeSession::new(LoopbackDevice::new(), cfg).unwrap();
        session
            .send_frame(Some(InputFrame::new(SurfaceId(0), 0)))
            .unwrap();
        let packet = session.receive_packet().unwrap().unwrap();
        assert_eq!(packet.pts, 0);
    }

    #[test]
    fn test_falls_back_without_sync_buffer() {
        let device = LoopbackDevice::new().with_sync_buffer(false);
        let session: EncodeSession<MarkerCodec, _> = EncodeSession::new(device, config()).unwrap();
        assert_eq!(session.issue_mode(), IssueMode::SerialiseEverything);
    }

    #[test]
    fn test_forced_idr() {
        let cfg = config().with_b_frames(0).with_gop_size(100);
        let mut session: EncodeSession<MarkerCodec, _> =
            EncodeSession::new(LoopbackDevice::new(), cfg).unwrap();
        let mut types = Vec::new();
        for i in 0..6u32 {
            if i == 3 {
                session.request_idr();
            }
            session
                .send_frame(Some(InputFrame::new(SurfaceId(i), i as i64)))
                .unwrap();
            while let Some(packet) = session.receive_packet().unwrap() {
                types.push(packet.picture_type);
            }
        }
        session.send_frame(None).unwrap();
        while let Some(packet) = session.receive_packet().unwrap() {
            types.push(packet.picture_type);
        }
        assert_eq!(
            types,
            vec![
                PictureType::Idr,
                PictureType::P,
                PictureType::P,
                PictureType::Idr,
                PictureType::P,
                PictureType::P,
            ]
        );
        let sequences = session
            .device()
            .submissions()
            .iter()
            .filter(|s| s.has_sequence())
            .count();
        assert_eq!(sequences, 2);
    }

    #[test]
    fn test_extradata_with_global_header() {
        let cfg = config().with_global_header(true);
        let session: EncodeSession<MarkerCodec, _> = EncodeSession::new(LoopbackDevice::new(), cfg).unwrap();
        assert_eq!(session.extradata(), Some(&[0x5e][..]));

        let mut attrs = LoopbackDevice::full_attributes();
        attrs.packed_headers = Some(PackedHeaderFlags::SLICE);
        let device = LoopbackDevice::new().with_attributes(attrs);
        let session: EncodeSession<MarkerCodec, _> =
            EncodeSession::new(device, config().with_global_header(true)).unwrap();
        assert!(session.extradata().is_none());
        assert_eq!(session.context().packed_headers, PackedHeaderFlags::SLICE);
    }

    #[test]
    fn test_resources_are_recycled() {
        let cfg = config().with_gop_size(8).with_b_frames(2);
        let mut session: EncodeSession<MarkerCodec, _> =
            EncodeSession::new(LoopbackDevice::new(), cfg).unwrap();
        let packets = run(&mut session, 60);
        assert_eq!(packets.len(), 60);
        assert!(session.device().output_buffers_created() <= session.recon_pool.total());
        assert_eq!(session.output_pool.in_use(), 0);
        assert!(session.window.len() <= 1);
    }

    #[test]
    fn test_sync_failure_is_reported() {
        let cfg = config()
            .with_b_frames(0)
            .with_issue_mode(IssueMode::SerialiseEverything);
        let mut session: EncodeSession<MarkerCodec, _> =
            EncodeSession::new(LoopbackDevice::new(), cfg).unwrap();
        session.device_mut().fail_next_sync();
        session
            .send_frame(Some(InputFrame::new(SurfaceId(0), 0)))
            .unwrap();
        assert!(matches!(session.receive_packet(), Err(EncodeError::Device(_))));
    }

    #[test]
    fn test_submit_failure_releases_resources() {
        let cfg = config()
            .with_b_frames(0)
            .with_issue_mode(IssueMode::SerialiseEverything);
        let mut session: EncodeSession<MarkerCodec, _> =
            EncodeSession::new(LoopbackDevice::new(), cfg).unwrap();
        let free = session.recon_pool.available();
        session.device_mut().fail_next_submit();
        session
            .send_frame(Some(InputFrame::new(SurfaceId(0), 0)))
            .unwrap();
        assert!(session.receive_packet().is_err());
        assert_eq!(session.recon_pool.available(), free);
        assert_eq!(session.output_pool.in_use(), 0);
    }

    #[test]
    fn test_frame_after_end_of_stream() {
        let mut session: EncodeSession<MarkerCodec, _> =
            EncodeSession::new(LoopbackDevice::new(), config()).unwrap();
        session.send_frame(None).unwrap();
        assert!(session.receive_packet().unwrap().is_none());
        assert!(session
            .send_frame(Some(InputFrame::new(SurfaceId(0), 0)))
            .is_err());
    }

    #[test]
    fn test_wrong_codec_options() {
        let result: Result<EncodeSession<MarkerCodec, _>> =
            EncodeSession::new(LoopbackDevice::new(), EncodeConfig::vp9(64, 64));
        assert!(matches!(result, Err(EncodeError::InvalidConfig(_))));
    }

    #[test]
    fn test_low_power_needs_entrypoint() {
        let device = LoopbackDevice::new().with_entrypoints(vec![Entrypoint::EncSlice]);
        let result: Result<EncodeSession<MarkerCodec, _>> =
            EncodeSession::new(device, config().with_low_power(true));
        assert!(result.is_err());
    }

    #[test]
    fn test_hidden_pictures_merge_and_repeat() {
        let cfg = config()
            .with_gop_size(10)
            .with_b_frames(2)
            .with_issue_mode(IssueMode::SerialiseEverything);
        let mut session: EncodeSession<HiddenCodec, _> =
            EncodeSession::new(LoopbackDevice::new(), cfg).unwrap();
        let packets = run(&mut session, 4);

        // IDR, then B1 merged with hidden P3, B2, then the repeat of P3.
        assert_eq!(packets.len(), 4);
        assert_eq!(packets[0].pts, 0);
        assert_eq!(packets[1].pts, 10);
        assert_eq!(packets[1].picture_type, PictureType::B);
        assert_eq!(&packets[1].data[..2], &[0x90, 3]);
        assert_eq!(packets[2].pts, 20);
        assert_eq!(packets[3].data, vec![0xee, 3]);
        assert_eq!(packets[3].pts, 30);
        for packet in &packets {
            assert_eq!(packet.dts, packet.pts);
        }
    }
}
