// SPDX-License-Identifier: GPL-3.0-only

//! Frames and the listener ownership protocol
//!
//! A [`Frame`] either owns a host buffer of `f32` pixels (IR and depth) or
//! wraps an image handed out by the hardware decoder (color). Processors
//! deliver frames to a [`FrameListener`], which either keeps the frame
//! ([`Handoff::Taken`]) or hands it straight back ([`Handoff::Declined`]).

use crate::constants::FLOAT_BYTES_PER_PIXEL;
use crate::errors::PipelineResult;
use crate::gpu::wgpu;
use crate::media::decoders::{GpuTexture, PixelBuffer, TextureCache};
use crate::resource::{Releasable, Scoped};
use tracing::debug;

/// Kind of frame delivered to a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// 1920x1080 BGRX color image
    Color = 1,
    /// 512x424 float infrared amplitude image
    Ir = 2,
    /// 512x424 float depth image in millimeters
    Depth = 4,
}

impl std::fmt::Display for FrameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameType::Color => write!(f, "Color"),
            FrameType::Ir => write!(f, "IR"),
            FrameType::Depth => write!(f, "Depth"),
        }
    }
}

/// Pixel format tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameFormat {
    #[default]
    Invalid,
    /// Undecoded bytes
    Raw,
    /// One f32 per pixel
    Float,
    /// 4 bytes per pixel, B G R X
    Bgrx,
    /// 4 bytes per pixel, R G B X
    Rgbx,
    /// 1 byte per pixel
    Gray,
}

/// Color sensor exposure metadata
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ExposureInfo {
    pub exposure: f32,
    pub gain: f32,
    pub gamma: f32,
}

/// How a frame's pixels are reachable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAccess {
    /// Processor-allocated host memory
    Host,
    /// GPU-resident texture created through the decoder's texture cache
    GpuTexture,
    /// Decoder buffer with its base address locked for CPU reads
    CpuLocked,
}

/// Decoded image exposed through a GPU texture
pub struct TextureView {
    texture: Box<dyn GpuTexture>,
    // Kept alive for as long as the texture references its surface
    buffer: Box<dyn PixelBuffer>,
}

impl Releasable for TextureView {
    fn release(&mut self) {
        self.texture.release();
    }
}

/// Decoded image with its base address locked for CPU access
pub struct LockedPixels {
    buffer: Box<dyn PixelBuffer>,
}

impl Releasable for LockedPixels {
    fn release(&mut self) {
        self.buffer.unlock_base_address();
    }
}

/// Decoder output wrapped by a color frame
///
/// Exactly one access mode is active. Dropping the image releases that
/// mode's resource and nothing else.
pub enum DecodedImage {
    Gpu(Scoped<TextureView>),
    Cpu(Scoped<LockedPixels>),
}

impl DecodedImage {
    /// Wrap a decoded buffer, preferring a GPU view when a cache is present
    ///
    /// Any failure on the GPU path falls back to locking the CPU base address.
    pub fn new(
        mut buffer: Box<dyn PixelBuffer>,
        texture_cache: Option<&dyn TextureCache>,
    ) -> PipelineResult<Self> {
        if let Some(cache) = texture_cache {
            match cache.create_texture(buffer.as_mut()) {
                Ok(texture) => {
                    return Ok(DecodedImage::Gpu(Scoped::new(TextureView { texture, buffer })));
                }
                Err(e) => {
                    debug!(error = %e, "Texture cache view failed, using CPU path");
                }
            }
        }

        buffer.lock_base_address()?;
        Ok(DecodedImage::Cpu(Scoped::new(LockedPixels { buffer })))
    }

    fn access(&self) -> FrameAccess {
        match self {
            DecodedImage::Gpu(_) => FrameAccess::GpuTexture,
            DecodedImage::Cpu(_) => FrameAccess::CpuLocked,
        }
    }

    fn buffer(&self) -> &dyn PixelBuffer {
        match self {
            DecodedImage::Gpu(view) => view.buffer.as_ref(),
            DecodedImage::Cpu(locked) => locked.buffer.as_ref(),
        }
    }
}

enum FrameStorage {
    Host(Vec<f32>),
    Decoded(DecodedImage),
}

/// Image buffer plus capture metadata
pub struct Frame {
    width: usize,
    height: usize,
    bytes_per_pixel: usize,
    /// Pixel format tag
    pub format: FrameFormat,
    /// Device timestamp of the source packet
    pub timestamp: u32,
    /// Sequence number of the source packet
    pub sequence: u32,
    /// Exposure, gain and gamma (color frames only)
    pub exposure: Option<ExposureInfo>,
    storage: FrameStorage,
}

impl Frame {
    /// Allocate a zeroed float frame (IR and depth)
    pub fn new_float(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            bytes_per_pixel: FLOAT_BYTES_PER_PIXEL,
            format: FrameFormat::Float,
            timestamp: 0,
            sequence: 0,
            exposure: None,
            storage: FrameStorage::Host(vec![0.0; width * height]),
        }
    }

    /// Wrap a decoded color image
    pub fn from_decoded(image: DecodedImage, bytes_per_pixel: usize, format: FrameFormat) -> Self {
        let buffer = image.buffer();
        let (width, height) = (buffer.width(), buffer.height());
        Self {
            width,
            height,
            bytes_per_pixel,
            format,
            timestamp: 0,
            sequence: 0,
            exposure: None,
            storage: FrameStorage::Decoded(image),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.bytes_per_pixel
    }

    /// Size of the pixel buffer in bytes (width x height x bytes per pixel)
    pub fn byte_len(&self) -> usize {
        self.width * self.height * self.bytes_per_pixel
    }

    pub fn access(&self) -> FrameAccess {
        match &self.storage {
            FrameStorage::Host(_) => FrameAccess::Host,
            FrameStorage::Decoded(image) => image.access(),
        }
    }

    /// Identity of the underlying buffer, stable for the frame's lifetime
    pub fn buffer_id(&self) -> usize {
        match &self.storage {
            FrameStorage::Host(data) => data.as_ptr() as usize,
            FrameStorage::Decoded(image) => image.buffer().id(),
        }
    }

    /// CPU-visible pixel bytes, if the frame has a CPU view
    pub fn data(&self) -> Option<&[u8]> {
        match &self.storage {
            FrameStorage::Host(data) => Some(bytemuck::cast_slice(data.as_slice())),
            FrameStorage::Decoded(DecodedImage::Cpu(locked)) => locked.buffer.base_address(),
            FrameStorage::Decoded(DecodedImage::Gpu(_)) => None,
        }
    }

    /// Float pixels of an IR or depth frame
    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.storage {
            FrameStorage::Host(data) => Some(data.as_slice()),
            FrameStorage::Decoded(_) => None,
        }
    }

    /// Mutable float pixels of an IR or depth frame
    pub fn as_f32_mut(&mut self) -> Option<&mut [f32]> {
        match &mut self.storage {
            FrameStorage::Host(data) => Some(data.as_mut_slice()),
            FrameStorage::Decoded(_) => None,
        }
    }

    /// GPU texture of a color frame decoded through the texture cache
    pub fn texture(&self) -> Option<&wgpu::Texture> {
        match &self.storage {
            FrameStorage::Decoded(DecodedImage::Gpu(view)) => view.texture.wgpu_texture(),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes_per_pixel", &self.bytes_per_pixel)
            .field("format", &self.format)
            .field("timestamp", &self.timestamp)
            .field("sequence", &self.sequence)
            .field("access", &self.access())
            .finish()
    }
}

/// Outcome of delivering a frame to a listener
#[derive(Debug)]
pub enum Handoff {
    /// The listener owns the frame now
    Taken,
    /// The listener kept nothing and returned the frame
    Declined(Frame),
}

impl Handoff {
    pub fn is_taken(&self) -> bool {
        matches!(self, Handoff::Taken)
    }
}

/// Receives completed frames from a processor
pub trait FrameListener: Send {
    /// Called once per completed frame, in packet order
    fn on_new_frame(&mut self, kind: FrameType, frame: Frame) -> Handoff;
}

impl<F> FrameListener for F
where
    F: FnMut(FrameType, Frame) -> Handoff + Send,
{
    fn on_new_frame(&mut self, kind: FrameType, frame: Frame) -> Handoff {
        self(kind, frame)
    }
}
