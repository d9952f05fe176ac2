// SPDX-License-Identifier: GPL-3.0-only

//! Shared GPU processor infrastructure
//!
//! Provides common functionality for the GPU compute processors:
//! - Dispatch size calculation
//! - Blocking staging buffer readback with scoped unmapping

use crate::gpu::wgpu;
use crate::resource::{Releasable, Scoped};

/// A staging buffer that is currently mapped for reading
///
/// Wrapped in [`Scoped`] so the buffer is unmapped exactly once, on every
/// exit path, after the caller is done with the mapped range.
pub struct MappedStaging<'a> {
    buffer: &'a wgpu::Buffer,
}

impl MappedStaging<'_> {
    /// Copy `out.len()` floats starting at `byte_offset` out of the mapping
    pub fn read_f32(&self, byte_offset: u64, out: &mut [f32]) {
        let end = byte_offset + std::mem::size_of_val(out) as u64;
        let view = self.buffer.slice(byte_offset..end).get_mapped_range();
        out.copy_from_slice(bytemuck::cast_slice(&view[..]));
    }
}

impl Releasable for MappedStaging<'_> {
    fn release(&mut self) {
        self.buffer.unmap();
    }
}

/// Map a MAP_READ buffer and block until the mapping completes
///
/// Polls the device until all submitted work is done, so the contents
/// reflect every previously submitted command buffer.
pub fn map_staging_blocking<'a>(
    device: &wgpu::Device,
    buffer: &'a wgpu::Buffer,
) -> Result<Scoped<MappedStaging<'a>>, String> {
    let slice = buffer.slice(..);
    let (sender, receiver) = futures::channel::oneshot::channel();

    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    // From here on every exit unmaps, including a mapping still pending
    let mapped = Scoped::new(MappedStaging { buffer });

    device
        .poll(wgpu::PollType::wait_indefinitely())
        .map_err(|e| format!("Failed to wait for GPU: {}", e))?;

    pollster::block_on(receiver)
        .map_err(|_| "Failed to receive buffer mapping".to_string())?
        .map_err(|e| format!("Failed to map buffer: {:?}", e))?;

    Ok(mapped)
}

/// Calculate compute shader dispatch size (workgroups needed)
///
/// Given a dimension and workgroup size, returns the number of workgroups
/// needed to cover the entire dimension.
#[inline]
pub fn compute_dispatch_size(dimension: u32, workgroup_size: u32) -> u32 {
    dimension.div_ceil(workgroup_size)
}
