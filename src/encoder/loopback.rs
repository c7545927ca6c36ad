//! In-memory encode device.
//!
//! [`LoopbackDevice`] advertises every profile and capability, records each
//! submitted job and "encodes" a picture by echoing its packed headers
//! followed by a small synthetic payload per slice. It backs the test suite
//! and the demo, and documents what a real backend has to provide.

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use super::codec::CodecPlugin;
use super::device::{
    Av1Features, BufferKind, DeviceAttributes, EncodeDevice, EncodeJob, Entrypoint, ExtraBuffer,
    HevcBlockSizes, OutputBufferId, ParamBuffer, Profile, RateControlModes, SliceStructure,
    SurfaceId,
};
use super::packed::{PackedHeaderFlags, PackedHeaderType};
use super::ratecontrol::GlobalParam;
use crate::error::{EncodeError, Result};

/// Surface ids handed out by the device start here so they never collide
/// with caller-chosen input surface ids in tests.
const FIRST_DEVICE_SURFACE: u32 = 0x1000;

const ALL_PROFILES: [Profile; 17] = [
    Profile::H264ConstrainedBaseline,
    Profile::H264Main,
    Profile::H264High,
    Profile::HevcMain,
    Profile::HevcMain10,
    Profile::HevcMain12,
    Profile::HevcMain422_10,
    Profile::HevcMain444,
    Profile::Av1Profile0,
    Profile::Av1Profile1,
    Profile::Mpeg2Simple,
    Profile::Mpeg2Main,
    Profile::Vp8Version0_3,
    Profile::Vp9Profile0,
    Profile::Vp9Profile1,
    Profile::Vp9Profile2,
    Profile::Vp9Profile3,
];

/// What the device saw for one submitted job.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub input: SurfaceId,
    pub recon: SurfaceId,
    pub output: OutputBufferId,
    /// Buffer kinds in submission order.
    pub buffers: Vec<BufferKind>,
    /// Packed headers in submission order.
    pub packed_headers: Vec<(PackedHeaderType, Vec<u8>)>,
    pub global_params: Vec<GlobalParam>,
    pub extra_buffers: Vec<ExtraBuffer>,
    pub slices: usize,
}

impl Submission {
    /// Whether a sequence parameter buffer was part of this job.
    pub fn has_sequence(&self) -> bool {
        self.buffers.contains(&BufferKind::Sequence)
    }

    pub fn packed(&self, kind: PackedHeaderType) -> impl Iterator<Item = &[u8]> + '_ {
        self.packed_headers
            .iter()
            .filter(move |(k, _)| *k == kind)
            .map(|(_, data)| data.as_slice())
    }
}

/// A device that runs entirely in memory.
#[derive(Debug)]
pub struct LoopbackDevice {
    vendor: String,
    profiles: Vec<Profile>,
    entrypoints: Vec<Entrypoint>,
    attributes: DeviceAttributes,
    sync_buffer: bool,
    next_surface: u32,
    next_buffer: u32,
    surfaces_created: usize,
    output_buffers_created: usize,
    buffers: HashMap<OutputBufferId, Option<Vec<Vec<u8>>>>,
    pending: HashSet<SurfaceId>,
    submissions: Vec<Submission>,
    fail_next_submit: bool,
    fail_next_sync: bool,
}

impl Default for LoopbackDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackDevice {
    /// A device supporting every profile, entrypoint and feature.
    pub fn new() -> Self {
        Self {
            vendor: "vaforge loopback".to_string(),
            profiles: ALL_PROFILES.to_vec(),
            entrypoints: vec![Entrypoint::EncSlice, Entrypoint::EncSliceLP],
            attributes: Self::full_attributes(),
            sync_buffer: true,
            next_surface: FIRST_DEVICE_SURFACE,
            next_buffer: 1,
            surfaces_created: 0,
            output_buffers_created: 0,
            buffers: HashMap::new(),
            pending: HashSet::new(),
            submissions: Vec::new(),
            fail_next_submit: false,
            fail_next_sync: false,
        }
    }

    /// Attributes reported by a default device.
    pub fn full_attributes() -> DeviceAttributes {
        DeviceAttributes {
            rate_control: Some(RateControlModes::all()),
            packed_headers: Some(PackedHeaderFlags::all()),
            max_refs: Some((2, 2)),
            max_slices: Some(64),
            slice_structure: Some(
                SliceStructure::ARBITRARY_ROWS | SliceStructure::ARBITRARY_MACROBLOCKS,
            ),
            tile_support: true,
            quality_range: Some(7),
            max_frame_size: true,
            hevc_block_sizes: Some(HevcBlockSizes {
                log2_max_coding_tree_block_size: 5,
                log2_min_luma_coding_block_size: 3,
            }),
            av1: Some(Av1Features {
                tile_size_bytes_minus1: 3,
                obu_size_bytes_minus1: 3,
                max_tile_num_minus1: 63,
                tx_mode_support: 0x04,
            }),
        }
    }

    #[must_use]
    pub fn with_attributes(mut self, attributes: DeviceAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    #[must_use]
    pub fn with_profiles(mut self, profiles: Vec<Profile>) -> Self {
        self.profiles = profiles;
        self
    }

    #[must_use]
    pub fn with_entrypoints(mut self, entrypoints: Vec<Entrypoint>) -> Self {
        self.entrypoints = entrypoints;
        self
    }

    #[must_use]
    pub fn with_vendor(mut self, vendor: &str) -> Self {
        self.vendor = vendor.to_string();
        self
    }

    /// Toggle per-buffer sync support, which enables the async queue.
    #[must_use]
    pub fn with_sync_buffer(mut self, sync_buffer: bool) -> Self {
        self.sync_buffer = sync_buffer;
        self
    }

    pub fn attributes_mut(&mut self) -> &mut DeviceAttributes {
        &mut self.attributes
    }

    /// Make the next submission fail.
    pub fn fail_next_submit(&mut self) {
        self.fail_next_submit = true;
    }

    /// Make the next sync fail.
    pub fn fail_next_sync(&mut self) {
        self.fail_next_sync = true;
    }

    pub fn submissions(&self) -> &[Submission] {
        &self.submissions
    }

    pub fn surfaces_created(&self) -> usize {
        self.surfaces_created
    }

    pub fn output_buffers_created(&self) -> usize {
        self.output_buffers_created
    }

    /// Output buffers not yet destroyed.
    pub fn output_buffers_live(&self) -> usize {
        self.buffers.len()
    }

    /// Jobs submitted but not yet synced.
    pub fn jobs_in_flight(&self) -> usize {
        self.pending.len()
    }
}

impl EncodeDevice for LoopbackDevice {
    fn vendor(&self) -> String {
        self.vendor.clone()
    }

    fn profiles(&self) -> Vec<Profile> {
        self.profiles.clone()
    }

    fn entrypoints(&self, profile: Profile) -> Vec<Entrypoint> {
        if self.profiles.contains(&profile) {
            self.entrypoints.clone()
        } else {
            Vec::new()
        }
    }

    fn query_attributes(&self, profile: Profile, entrypoint: Entrypoint) -> Result<DeviceAttributes> {
        if !self.profiles.contains(&profile) || !self.entrypoints.contains(&entrypoint) {
            return Err(EncodeError::Device(format!(
                "{profile:?}/{entrypoint:?} is not supported"
            )));
        }
        Ok(self.attributes.clone())
    }

    fn create_surfaces(&mut self, width: u32, height: u32, count: usize) -> Result<Vec<SurfaceId>> {
        let surfaces: Vec<SurfaceId> = (0..count)
            .map(|i| SurfaceId(self.next_surface + i as u32))
            .collect();
        self.next_surface += count as u32;
        self.surfaces_created += count;
        debug!("Loopback created {} surfaces of {}x{}", count, width, height);
        Ok(surfaces)
    }

    fn create_output_buffer(&mut self, size: usize) -> Result<OutputBufferId> {
        if size == 0 {
            return Err(EncodeError::Device("zero-sized output buffer".to_string()));
        }
        let id = OutputBufferId(self.next_buffer);
        self.next_buffer += 1;
        self.output_buffers_created += 1;
        self.buffers.insert(id, None);
        Ok(id)
    }

    fn destroy_output_buffer(&mut self, buffer: OutputBufferId) {
        self.buffers.remove(&buffer);
    }

    fn submit<C: CodecPlugin>(&mut self, job: EncodeJob<C>) -> Result<()> {
        if std::mem::take(&mut self.fail_next_submit) {
            return Err(EncodeError::Device("injected submit failure".to_string()));
        }
        let slot = self
            .buffers
            .get_mut(&job.output)
            .ok_or_else(|| EncodeError::Device(format!("unknown output buffer {:?}", job.output)))?;

        let mut submission = Submission {
            input: job.input,
            recon: job.recon,
            output: job.output,
            buffers: Vec::with_capacity(job.buffers.len()),
            packed_headers: Vec::new(),
            global_params: Vec::new(),
            extra_buffers: Vec::new(),
            slices: 0,
        };
        let mut headers = Vec::new();
        let mut payload = Vec::new();
        for buffer in job.buffers {
            submission.buffers.push(buffer.kind());
            trace!("Loopback buffer {:?}", buffer);
            match buffer {
                ParamBuffer::PackedHeader { kind, data, .. } => {
                    headers.extend_from_slice(&data);
                    submission.packed_headers.push((kind, data));
                }
                ParamBuffer::Slice(_) => {
                    payload.extend_from_slice(&job.input.0.to_be_bytes());
                    payload.push(submission.slices as u8);
                    submission.slices += 1;
                }
                ParamBuffer::Misc(param) => submission.global_params.push(param),
                ParamBuffer::Extra(extra) => submission.extra_buffers.push(extra),
                ParamBuffer::Sequence(_) | ParamBuffer::Picture(_) => {}
            }
        }
        if payload.is_empty() {
            payload.extend_from_slice(&job.input.0.to_be_bytes());
        }

        let mut segments = Vec::with_capacity(2);
        if !headers.is_empty() {
            segments.push(headers);
        }
        segments.push(payload);
        *slot = Some(segments);

        debug!(
            "Loopback job for surface {:#x}: {} buffers",
            job.input.0,
            submission.buffers.len()
        );
        self.pending.insert(job.input);
        self.submissions.push(submission);
        Ok(())
    }

    fn sync(&mut self, surface: SurfaceId) -> Result<()> {
        if std::mem::take(&mut self.fail_next_sync) {
            return Err(EncodeError::Device("injected sync failure".to_string()));
        }
        self.pending.remove(&surface);
        Ok(())
    }

    fn map_output(&mut self, buffer: OutputBufferId) -> Result<Vec<Vec<u8>>> {
        self.buffers
            .get_mut(&buffer)
            .ok_or_else(|| EncodeError::Device(format!("unknown output buffer {buffer:?}")))?
            .take()
            .ok_or_else(|| EncodeError::Device(format!("output buffer {buffer:?} holds no data")))
    }

    fn has_sync_buffer(&self) -> bool {
        self.sync_buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reports_everything() {
        let device = LoopbackDevice::new();
        assert_eq!(device.profiles().len(), 17);
        assert_eq!(device.entrypoints(Profile::H264High).len(), 2);
        let attrs = device
            .query_attributes(Profile::Av1Profile0, Entrypoint::EncSliceLP)
            .unwrap();
        assert_eq!(attrs.max_refs, Some((2, 2)));
        assert!(attrs.av1.is_some());
        assert!(device.has_sync_buffer());
    }

    #[test]
    fn test_restricted_profiles() {
        let device = LoopbackDevice::new()
            .with_profiles(vec![Profile::H264Main])
            .with_entrypoints(vec![Entrypoint::EncSliceLP]);
        assert!(device.entrypoints(Profile::HevcMain).is_empty());
        assert!(device
            .query_attributes(Profile::H264Main, Entrypoint::EncSlice)
            .is_err());
        assert!(device
            .query_attributes(Profile::H264Main, Entrypoint::EncSliceLP)
            .is_ok());
    }

    #[test]
    fn test_surfaces_are_distinct() {
        let mut device = LoopbackDevice::new();
        let a = device.create_surfaces(64, 64, 3).unwrap();
        let b = device.create_surfaces(64, 64, 2).unwrap();
        assert_eq!(a.len(), 3);
        assert!(b.iter().all(|s| !a.contains(s)));
        assert_eq!(device.surfaces_created(), 5);
    }

    #[test]
    fn test_output_buffer_lifecycle() {
        let mut device = LoopbackDevice::new();
        let buffer = device.create_output_buffer(1024).unwrap();
        assert_eq!(device.output_buffers_live(), 1);
        assert!(device.map_output(buffer).is_err());
        device.destroy_output_buffer(buffer);
        assert_eq!(device.output_buffers_live(), 0);
        assert_eq!(device.output_buffers_created(), 1);
        assert!(device.create_output_buffer(0).is_err());
    }

    #[test]
    fn test_injected_sync_failure() {
        let mut device = LoopbackDevice::new();
        device.fail_next_sync();
        assert!(device.sync(SurfaceId(1)).is_err());
        assert!(device.sync(SurfaceId(1)).is_ok());
    }
}
