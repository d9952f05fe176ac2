// SPDX-License-Identifier: GPL-3.0-only

//! Color packet processor
//!
//! Decodes compressed color packets through a hardware decode session and
//! delivers one BGRX frame per packet. JPEG is tried first; when it fails
//! the session is rebuilt for ProRes 422 and the packet retried once.
//!
//! Codec selection is sticky on success. A call that ends without any
//! successful decode sends the next call back to JPEG.

use crate::config::ColorConfig;
use crate::constants::{COLOR_BYTES_PER_PIXEL, FAILURE_LOG_INTERVAL};
use crate::errors::{PipelineError, PipelineResult};
use crate::frame::{DecodedImage, Frame, FrameFormat, FrameListener, FrameType, Handoff};
use crate::media::decoders::{
    ColorAccelerator, ColorCodec, DecodeSession, FormatDescription, GstColorAccelerator,
    InputBuffer, NullColorAccelerator, PixelBuffer, TextureCache,
};
use crate::packet::ColorPacket;
use crate::resource::Scoped;
use crate::timing::PerfTimer;
use tracing::{debug, error, info, warn};

/// Which codec the next decode starts with
///
/// A call that decodes nothing resets this to `Primary`, even when
/// `Secondary` had succeeded before, so a failing fallback never stays pinned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecState {
    Primary,
    Secondary,
}

impl CodecState {
    pub fn codec(self) -> ColorCodec {
        match self {
            CodecState::Primary => ColorCodec::PRIMARY,
            CodecState::Secondary => ColorCodec::SECONDARY,
        }
    }
}

/// Decodes compressed color packets into color frames
pub struct ColorPacketProcessor {
    codec: CodecState,
    session: Option<Scoped<Box<dyn DecodeSession>>>,
    texture_cache: Option<Scoped<Box<dyn TextureCache>>>,
    unavailable: Option<String>,
    listener: Option<Box<dyn FrameListener>>,
    timer: PerfTimer,
    failures: u64,
    accelerator: Box<dyn ColorAccelerator>,
}

impl ColorPacketProcessor {
    /// Create a processor on top of GStreamer, or an unavailable one
    pub fn with_gstreamer(config: &ColorConfig) -> Self {
        let accelerator: Box<dyn ColorAccelerator> =
            match GstColorAccelerator::new(config.decode_timeout()) {
                Ok(gst) => Box::new(gst),
                Err(e) => {
                    error!(error = %e, "Color decode service unavailable");
                    Box::new(NullColorAccelerator)
                }
            };
        Self::new(accelerator, config)
    }

    /// Create a processor and eagerly set up a JPEG session
    ///
    /// A texture cache is created when `config` asks for one; failing to get
    /// one is not an error, frames are then CPU-addressable.
    pub fn new(accelerator: Box<dyn ColorAccelerator>, config: &ColorConfig) -> Self {
        let mut unavailable = None;
        let session = match accelerator.create_session(&FormatDescription::color(ColorCodec::PRIMARY)) {
            Ok(session) => Some(Scoped::new(session)),
            Err(e) if e.is_terminal() => {
                error!(accelerator = accelerator.name(), error = %e, "Color decoding unavailable");
                unavailable = Some(e.to_string());
                None
            }
            Err(e) => {
                warn!(error = %e, "Initial decode session failed, will retry on next packet");
                None
            }
        };

        let texture_cache = if config.prefer_texture_cache && unavailable.is_none() {
            match accelerator.create_texture_cache() {
                Ok(cache) => Some(Scoped::new(cache)),
                Err(e) => {
                    info!(error = %e, "No texture cache, color frames will be CPU-locked");
                    None
                }
            }
        } else {
            None
        };

        debug!(
            accelerator = accelerator.name(),
            texture_cache = texture_cache.is_some(),
            "Color packet processor created"
        );

        Self {
            codec: CodecState::Primary,
            session,
            texture_cache,
            unavailable,
            listener: None,
            timer: PerfTimer::new("color"),
            failures: 0,
            accelerator,
        }
    }

    /// Accelerator name, e.g. `"GStreamer"` or `"Null"`
    pub fn name(&self) -> &'static str {
        self.accelerator.name()
    }

    /// False when the decode service could not be brought up at all
    pub fn is_available(&self) -> bool {
        self.unavailable.is_none()
    }

    /// Codec the next `process` call starts with
    pub fn codec_state(&self) -> CodecState {
        self.codec
    }

    /// Codec of the live session, if any
    pub fn session_codec(&self) -> Option<ColorCodec> {
        self.session.as_ref().map(|session| session.codec())
    }

    pub fn has_texture_cache(&self) -> bool {
        self.texture_cache.is_some()
    }

    pub fn set_frame_listener<L: FrameListener + 'static>(&mut self, listener: L) {
        self.listener = Some(Box::new(listener));
    }

    pub fn clear_frame_listener(&mut self) {
        self.listener = None;
    }

    /// Decode one packet and deliver the color frame to the listener
    pub fn process(&mut self, packet: &ColorPacket) -> PipelineResult<()> {
        if let Some(reason) = &self.unavailable {
            return Err(PipelineError::DeviceUnavailable(reason.clone()));
        }
        if self.listener.is_none() {
            return Ok(());
        }

        self.timer.start();

        let input = InputBuffer::wrap(packet);
        let pixels = match self.decode_with_fallback(&input) {
            Ok(pixels) => pixels,
            Err(e) => {
                self.codec = CodecState::Primary;
                return Err(self.log_failure(e));
            }
        };

        let cache = self
            .texture_cache
            .as_ref()
            .map(|cache| -> &dyn TextureCache { &***cache });
        let image = match DecodedImage::new(pixels, cache) {
            Ok(image) => image,
            Err(e) => return Err(self.log_failure(e)),
        };

        let mut frame = Frame::from_decoded(image, COLOR_BYTES_PER_PIXEL, FrameFormat::Bgrx);
        frame.timestamp = packet.timestamp;
        frame.sequence = packet.sequence;
        frame.exposure = Some(packet.exposure_info());

        if let Some(listener) = self.listener.as_mut()
            && let Handoff::Declined(frame) = listener.on_new_frame(FrameType::Color, frame)
        {
            drop(frame);
        }

        if let Some(cache) = &self.texture_cache {
            cache.flush();
        }

        self.timer.stop();
        Ok(())
    }

    /// Decode with the current codec, falling back once from the primary
    fn decode_with_fallback(&mut self, input: &InputBuffer) -> PipelineResult<Box<dyn PixelBuffer>> {
        let first = self.codec;
        match self.decode_with(first.codec(), input) {
            Ok(pixels) => return Ok(pixels),
            Err(e) if first == CodecState::Primary => {
                debug!(codec = %first.codec(), error = %e, "Decode failed, trying fallback codec");
            }
            Err(e) => return Err(e),
        }

        self.codec = CodecState::Secondary;
        self.decode_with(CodecState::Secondary.codec(), input)
    }

    fn decode_with(&mut self, codec: ColorCodec, input: &InputBuffer) -> PipelineResult<Box<dyn PixelBuffer>> {
        let result = self.session_for(codec)?.decode(input);
        if result.is_err() {
            // A failed pipeline is not reused; the next attempt starts clean
            self.session = None;
        }
        result
    }

    /// The live session, rebuilt if it was set up for a different codec
    fn session_for(&mut self, codec: ColorCodec) -> PipelineResult<&mut Scoped<Box<dyn DecodeSession>>> {
        if self
            .session
            .as_ref()
            .is_some_and(|session| session.codec() != codec)
        {
            self.session = None;
        }

        if self.session.is_none() {
            let session = self
                .accelerator
                .create_session(&FormatDescription::color(codec))
                .map_err(|e| PipelineError::DecodeFailure {
                    codec,
                    reason: format!("session setup failed: {}", e),
                })?;
            info!(%codec, "Decode session configured");
            self.session = Some(Scoped::new(session));
        }

        self.session
            .as_mut()
            .ok_or_else(|| PipelineError::ResourceCreation("decode session missing".into()))
    }

    fn log_failure(&mut self, error: PipelineError) -> PipelineError {
        self.failures += 1;
        if self.failures % FAILURE_LOG_INTERVAL == 1 {
            warn!(error = %error, failures = self.failures, "Color packet dropped");
        }
        error
    }
}
