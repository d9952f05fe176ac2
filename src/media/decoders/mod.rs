// SPDX-License-Identifier: GPL-3.0-only

//! Hardware color decode service
//!
//! The color processor talks to the decoder through a small set of traits:
//!
//! - [`ColorAccelerator`] creates decode sessions and texture caches
//! - [`DecodeSession`] turns one compressed packet into a [`PixelBuffer`]
//! - [`TextureCache`] exposes a decoded buffer as a GPU texture
//!
//! [`GstColorAccelerator`] implements them on top of GStreamer (hardware
//! JPEG decoders when present), [`NullColorAccelerator`] is used when no
//! decoder can be brought up.

mod hardware;
mod session;
mod texture_cache;

pub use hardware::{detect_hw_decoders, has_prores_decoder, preferred_jpeg_decoder};
pub use session::{GstColorAccelerator, GstDecodeSession, GstPixelBuffer};
pub use texture_cache::{WgpuTexture, WgpuTextureCache};

use crate::constants::{COLOR_HEIGHT, COLOR_WIDTH};
use crate::errors::{PipelineError, PipelineResult};
use crate::frame::FrameFormat;
use crate::gpu::wgpu;
use crate::packet::ColorPacket;
use crate::resource::Releasable;
use bytes::Bytes;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Compression family of a color stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorCodec {
    /// Motion JPEG, what the sensor actually sends
    Jpeg,
    /// Apple ProRes 422, tried when JPEG decode fails
    ProRes422,
}

impl ColorCodec {
    /// Codec every session starts with
    pub const PRIMARY: ColorCodec = ColorCodec::Jpeg;
    /// Codec tried once when the primary fails
    pub const SECONDARY: ColorCodec = ColorCodec::ProRes422;

    /// GStreamer caps media type of the compressed stream
    pub fn caps_name(&self) -> &'static str {
        match self {
            ColorCodec::Jpeg => "image/jpeg",
            ColorCodec::ProRes422 => "video/x-prores",
        }
    }
}

impl std::fmt::Display for ColorCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColorCodec::Jpeg => write!(f, "JPEG"),
            ColorCodec::ProRes422 => write!(f, "ProRes 422"),
        }
    }
}

/// Stream description a decode session is configured with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatDescription {
    pub codec: ColorCodec,
    pub width: usize,
    pub height: usize,
    /// Pixel format the session must hand back
    pub output_format: FrameFormat,
}

impl FormatDescription {
    /// Full-resolution color stream decoded to BGRX
    pub fn color(codec: ColorCodec) -> Self {
        Self {
            codec,
            width: COLOR_WIDTH,
            height: COLOR_HEIGHT,
            output_format: FrameFormat::Bgrx,
        }
    }
}

/// Compressed input for one decode, sharing the packet's payload
#[derive(Debug, Clone)]
pub struct InputBuffer {
    pub data: Bytes,
    pub timestamp: u32,
}

impl InputBuffer {
    /// Wrap a packet without copying its payload
    pub fn wrap(packet: &ColorPacket) -> Self {
        Self {
            data: packet.buffer.clone(),
            timestamp: packet.timestamp,
        }
    }
}

/// A decoded image owned by the decoder
pub trait PixelBuffer: Send {
    fn width(&self) -> usize;
    fn height(&self) -> usize;
    fn bytes_per_row(&self) -> usize;

    /// Identity of the underlying decoder buffer
    fn id(&self) -> usize;

    /// Pin the pixels for CPU reads
    fn lock_base_address(&mut self) -> PipelineResult<()>;

    /// Pixel bytes while locked
    fn base_address(&self) -> Option<&[u8]>;

    /// Undo [`PixelBuffer::lock_base_address`]
    fn unlock_base_address(&mut self);
}

/// A GPU texture created from a decoded buffer
pub trait GpuTexture: Send {
    fn release(&mut self);

    fn wgpu_texture(&self) -> Option<&wgpu::Texture> {
        None
    }
}

/// Creates GPU textures from decoded buffers
pub trait TextureCache: Releasable + Send {
    fn create_texture(&self, buffer: &mut dyn PixelBuffer) -> PipelineResult<Box<dyn GpuTexture>>;

    /// Let the cache drop textures nobody references any more
    fn flush(&self);
}

/// One configured hardware decoder instance
pub trait DecodeSession: Releasable + Send {
    fn codec(&self) -> ColorCodec;

    fn format(&self) -> &FormatDescription;

    /// Decode one packet, blocking until the decoder hands back a frame
    fn decode(&mut self, input: &InputBuffer) -> PipelineResult<Box<dyn PixelBuffer>>;
}

/// Factory for decode sessions and texture caches
///
/// `create_session` reports [`PipelineError::DeviceUnavailable`] only when the
/// service cannot decode at all; any other error is treated as transient.
pub trait ColorAccelerator: Send {
    fn name(&self) -> &'static str;

    fn create_session(&self, format: &FormatDescription) -> PipelineResult<Box<dyn DecodeSession>>;

    fn create_texture_cache(&self) -> PipelineResult<Box<dyn TextureCache>>;
}

/// Color accelerator used when no decode service is available
#[derive(Debug, Default)]
pub struct NullColorAccelerator;

impl ColorAccelerator for NullColorAccelerator {
    fn name(&self) -> &'static str {
        "Null"
    }

    fn create_session(&self, _format: &FormatDescription) -> PipelineResult<Box<dyn DecodeSession>> {
        Err(PipelineError::DeviceUnavailable(
            "no color decode service".into(),
        ))
    }

    fn create_texture_cache(&self) -> PipelineResult<Box<dyn TextureCache>> {
        Err(PipelineError::ResourceCreation(
            "no texture cache without a decode service".into(),
        ))
    }
}

/// Single-result handoff from a decoder callback to the blocked caller
///
/// The callback thread calls [`DecodeSlot::fill`]; the decoding thread waits
/// in [`DecodeSlot::wait`]. The first result of a decode wins.
#[derive(Debug)]
pub struct DecodeSlot<T> {
    result: Mutex<Option<Result<T, String>>>,
    ready: Condvar,
}

impl<T> DecodeSlot<T> {
    pub fn new() -> Self {
        Self {
            result: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    /// Store a result and wake the waiter, unless one is already stored
    pub fn fill(&self, result: Result<T, String>) {
        if let Ok(mut slot) = self.result.lock()
            && slot.is_none()
        {
            *slot = Some(result);
            self.ready.notify_all();
        }
    }

    /// Forget any stale result before starting a new decode
    pub fn reset(&self) {
        if let Ok(mut slot) = self.result.lock() {
            *slot = None;
        }
    }

    /// Wait up to `timeout` for a result; `None` on timeout
    pub fn wait(&self, timeout: Duration) -> Option<Result<T, String>> {
        let slot = self.result.lock().ok()?;
        let (mut slot, _) = self
            .ready
            .wait_timeout_while(slot, timeout, |result| result.is_none())
            .ok()?;
        slot.take()
    }
}

impl<T> Default for DecodeSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}
