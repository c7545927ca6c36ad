//! Reconstructed-surface and coded-buffer pools.

use std::collections::VecDeque;

use tracing::debug;

use super::device::{EncodeDevice, OutputBufferId, SurfaceId};
use crate::error::{EncodeError, Result};

/// Extra reconstructed surfaces beyond what reordering and pipelining need.
const RECON_MARGIN: usize = 4;

/// Number of reconstructed surfaces a session needs.
///
/// Two anchor periods of pictures can be alive at once, plus the B pyramid,
/// plus every picture queued in the async FIFO.
pub fn recon_surface_count(b_per_p: u32, max_b_depth: u32, async_depth: u32) -> usize {
    2 * (b_per_p as usize + 1) + max_b_depth as usize + async_depth as usize + RECON_MARGIN
}

/// Size of one coded buffer: an uncompressed frame plus header slack.
pub fn output_buffer_size(surface_width: u32, surface_height: u32) -> usize {
    3 * surface_width as usize * surface_height as usize + (1 << 16)
}

/// Fixed set of device surfaces handed out one at a time.
#[derive(Debug)]
pub struct SurfacePool {
    free: VecDeque<SurfaceId>,
    total: usize,
}

impl SurfacePool {
    pub fn new<D: EncodeDevice>(device: &mut D, width: u32, height: u32, count: usize) -> Result<Self> {
        let surfaces = device.create_surfaces(width, height, count)?;
        if surfaces.len() != count {
            return Err(EncodeError::Device(format!(
                "requested {} surfaces, device created {}",
                count,
                surfaces.len()
            )));
        }
        debug!("Created {} reconstructed surfaces ({}x{})", count, width, height);
        Ok(Self {
            free: surfaces.into(),
            total: count,
        })
    }

    pub fn acquire(&mut self) -> Result<SurfaceId> {
        self.free
            .pop_front()
            .ok_or(EncodeError::PoolExhausted("reconstructed surfaces"))
    }

    pub fn release(&mut self, surface: SurfaceId) {
        debug_assert!(!self.free.contains(&surface));
        self.free.push_back(surface);
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

/// Coded output buffers, created on demand and reused once released.
#[derive(Debug)]
pub struct OutputBufferPool {
    size: usize,
    free: Vec<OutputBufferId>,
    in_use: usize,
    limit: usize,
}

impl OutputBufferPool {
    /// A pool that never holds more than `limit` buffers at once.
    pub fn new(size: usize, limit: usize) -> Self {
        Self {
            size,
            free: Vec::new(),
            in_use: 0,
            limit,
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.size
    }

    pub fn acquire<D: EncodeDevice>(&mut self, device: &mut D) -> Result<OutputBufferId> {
        let buffer = match self.free.pop() {
            Some(buffer) => buffer,
            None => {
                if self.in_use >= self.limit {
                    return Err(EncodeError::PoolExhausted("output buffers"));
                }
                let buffer = device.create_output_buffer(self.size)?;
                debug!("Allocated output buffer {:#x}", buffer.0);
                buffer
            }
        };
        self.in_use += 1;
        Ok(buffer)
    }

    pub fn release(&mut self, buffer: OutputBufferId) {
        self.in_use = self.in_use.saturating_sub(1);
        self.free.push(buffer);
    }

    /// Destroy every idle buffer.
    pub fn drain<D: EncodeDevice>(&mut self, device: &mut D) {
        for buffer in self.free.drain(..) {
            device.destroy_output_buffer(buffer);
            debug!("Freed output buffer {:#x}", buffer.0);
        }
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }
}
