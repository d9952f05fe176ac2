// SPDX-License-Identifier: GPL-3.0-only

//! GPU textures for decoded color frames
//!
//! The cache uploads a decoded buffer into a BGRA texture: lock the buffer,
//! copy its rows, unlock it. The resulting texture does not reference the
//! decoder buffer, so releasing the texture is the only cleanup it needs.

use super::{GpuTexture, PixelBuffer, TextureCache};
use crate::errors::{PipelineError, PipelineResult};
use crate::gpu::{self, DeviceHealth, wgpu};
use crate::resource::Releasable;
use tracing::{debug, info};

/// wgpu device that owns every texture created for color frames
pub struct WgpuTextureCache {
    device: wgpu::Device,
    queue: wgpu::Queue,
    health: DeviceHealth,
}

impl WgpuTextureCache {
    pub fn new() -> PipelineResult<Self> {
        let compute = pollster::block_on(gpu::create_compute_device("color_texture_cache"))
            .map_err(PipelineError::ResourceCreation)?;

        info!(adapter = %compute.info.adapter_name, "Color texture cache ready");

        Ok(Self {
            device: compute.device,
            queue: compute.queue,
            health: compute.health,
        })
    }
}

impl TextureCache for WgpuTextureCache {
    fn create_texture(&self, buffer: &mut dyn PixelBuffer) -> PipelineResult<Box<dyn GpuTexture>> {
        if !self.health.is_healthy() {
            return Err(PipelineError::ResourceCreation(
                "texture cache device lost".into(),
            ));
        }

        let (width, height) = (buffer.width() as u32, buffer.height() as u32);
        let bytes_per_row = buffer.bytes_per_row() as u32;
        if bytes_per_row < width * 4 {
            return Err(PipelineError::ResourceCreation(format!(
                "row stride {} too small for {} BGRX pixels",
                bytes_per_row, width
            )));
        }

        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("color_frame_texture"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Bgra8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });

        buffer.lock_base_address()?;
        let uploaded = match buffer.base_address() {
            Some(pixels) if pixels.len() >= (bytes_per_row * height) as usize => {
                self.queue.write_texture(
                    wgpu::TexelCopyTextureInfo {
                        texture: &texture,
                        mip_level: 0,
                        origin: wgpu::Origin3d::ZERO,
                        aspect: wgpu::TextureAspect::All,
                    },
                    pixels,
                    wgpu::TexelCopyBufferLayout {
                        offset: 0,
                        bytes_per_row: Some(bytes_per_row),
                        rows_per_image: Some(height),
                    },
                    size,
                );
                true
            }
            _ => false,
        };
        buffer.unlock_base_address();

        if !uploaded {
            texture.destroy();
            return Err(PipelineError::ResourceCreation(
                "decoded buffer is smaller than its geometry".into(),
            ));
        }

        Ok(Box::new(WgpuTexture { texture }))
    }

    fn flush(&self) {
        let _ = self.device.poll(wgpu::PollType::Poll);
    }
}

impl Releasable for WgpuTextureCache {
    fn release(&mut self) {
        debug!("Releasing color texture cache");
        let _ = self.device.poll(wgpu::PollType::wait_indefinitely());
    }
}

/// Texture holding one decoded color frame
pub struct WgpuTexture {
    texture: wgpu::Texture,
}

impl GpuTexture for WgpuTexture {
    fn release(&mut self) {
        self.texture.destroy();
    }

    fn wgpu_texture(&self) -> Option<&wgpu::Texture> {
        Some(&self.texture)
    }
}
