// SPDX-License-Identifier: GPL-3.0-only

//! GStreamer decode sessions for the color stream
//!
//! Each session is a small pipeline fed one compressed packet at a time:
//!
//! ```text
//! appsrc -> [jpegparse -> jpeg decoder | avdec_prores] -> videoconvert
//!        -> videoscale -> appsink (BGRx, 1920x1080)
//! ```
//!
//! The appsink callback runs on a streaming thread; it hands the decoded
//! sample to the blocked `decode` call through a [`DecodeSlot`].

use super::hardware::{PRORES_DECODER, has_prores_decoder, preferred_jpeg_decoder};
use super::texture_cache::WgpuTextureCache;
use super::{
    ColorAccelerator, ColorCodec, DecodeSession, DecodeSlot, FormatDescription, InputBuffer,
    PixelBuffer, TextureCache, detect_hw_decoders,
};
use crate::errors::{PipelineError, PipelineResult};
use crate::resource::Releasable;
use gstreamer::buffer::{MappedBuffer, Readable};
use gstreamer::prelude::*;
use gstreamer_app::{AppSink, AppSrc};
use gstreamer_video::{VideoFormat, VideoInfo};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Color accelerator backed by GStreamer decoders
#[derive(Debug)]
pub struct GstColorAccelerator {
    hw_decoders: Vec<&'static str>,
    prores_available: bool,
    timeout: Duration,
}

impl GstColorAccelerator {
    /// Initialize GStreamer and probe the available decoders
    pub fn new(timeout: Duration) -> PipelineResult<Self> {
        gstreamer::init().map_err(|e| {
            PipelineError::DeviceUnavailable(format!("GStreamer init failed: {}", e))
        })?;

        let hw_decoders = detect_hw_decoders();
        let jpeg_decoder = preferred_jpeg_decoder(&hw_decoders);
        if gstreamer::ElementFactory::find(jpeg_decoder).is_none() {
            return Err(PipelineError::DeviceUnavailable(format!(
                "no JPEG decoder available ({} not found)",
                jpeg_decoder
            )));
        }

        let prores_available = has_prores_decoder();
        info!(
            jpeg_decoder,
            prores_available,
            timeout_ms = timeout.as_millis() as u64,
            "GStreamer color accelerator ready"
        );

        Ok(Self {
            hw_decoders,
            prores_available,
            timeout,
        })
    }

    /// Hardware JPEG decoders found at startup
    pub fn hw_decoders(&self) -> &[&'static str] {
        &self.hw_decoders
    }

    fn decoder_for(&self, codec: ColorCodec) -> PipelineResult<&'static str> {
        match codec {
            ColorCodec::Jpeg => Ok(preferred_jpeg_decoder(&self.hw_decoders)),
            ColorCodec::ProRes422 if self.prores_available => Ok(PRORES_DECODER),
            ColorCodec::ProRes422 => Err(PipelineError::ResourceCreation(format!(
                "{} decoder element {} is not installed",
                codec, PRORES_DECODER
            ))),
        }
    }
}

impl ColorAccelerator for GstColorAccelerator {
    fn name(&self) -> &'static str {
        "GStreamer"
    }

    fn create_session(&self, format: &FormatDescription) -> PipelineResult<Box<dyn DecodeSession>> {
        let decoder = self.decoder_for(format.codec).inspect_err(|e| {
            warn!(codec = %format.codec, error = %e, "Cannot create decode session");
        })?;
        let session = GstDecodeSession::new(*format, decoder, self.timeout).inspect_err(|e| {
            warn!(codec = %format.codec, decoder, error = %e, "Decode session setup failed");
        })?;
        Ok(Box::new(session))
    }

    fn create_texture_cache(&self) -> PipelineResult<Box<dyn TextureCache>> {
        Ok(Box::new(WgpuTextureCache::new()?))
    }
}

fn make_element(factory: &str) -> PipelineResult<gstreamer::Element> {
    gstreamer::ElementFactory::make(factory)
        .build()
        .map_err(|e| PipelineError::ResourceCreation(format!("Failed to create {}: {}", factory, e)))
}

/// Reason a bus message fails the pending decode, if it does
///
/// Only errors count. Warnings are recoverable and the decoder may still
/// produce the frame, so they are logged and otherwise ignored.
fn bus_failure(message: &gstreamer::MessageRef) -> Option<String> {
    match message.view() {
        gstreamer::MessageView::Error(err) => Some(err.error().to_string()),
        gstreamer::MessageView::Warning(warning) => {
            warn!(error = %warning.error(), "Decoder warning");
            None
        }
        _ => None,
    }
}

/// Bring a pipeline to Playing, tearing it back down to Null on failure
fn start_pipeline(pipeline: &gstreamer::Pipeline) -> PipelineResult<()> {
    match pipeline.set_state(gstreamer::State::Playing) {
        Ok(_) => Ok(()),
        Err(e) => {
            error!(error = %e, "Failed to set decode pipeline to PLAYING");
            let _ = pipeline.set_state(gstreamer::State::Null);
            // Wait for Null so GStreamer releases streaming threads and buffers
            let _ = pipeline.state(gstreamer::ClockTime::from_seconds(2));
            Err(PipelineError::ResourceCreation(format!(
                "Failed to start decode pipeline: {}",
                e
            )))
        }
    }
}

/// One GStreamer decode pipeline for a single codec
pub struct GstDecodeSession {
    format: FormatDescription,
    decoder: &'static str,
    pipeline: gstreamer::Pipeline,
    appsrc: AppSrc,
    slot: Arc<DecodeSlot<gstreamer::Sample>>,
    timeout: Duration,
    format_checked: bool,
}

impl GstDecodeSession {
    /// Build the pipeline and bring it to Playing
    pub fn new(
        format: FormatDescription,
        decoder: &'static str,
        timeout: Duration,
    ) -> PipelineResult<Self> {
        debug!(codec = %format.codec, decoder, "Creating decode session");

        let pipeline = gstreamer::Pipeline::new();

        let appsrc = make_element("appsrc")?
            .downcast::<AppSrc>()
            .map_err(|_| PipelineError::ResourceCreation("Failed to downcast to AppSrc".into()))?;

        let mut input_caps = gstreamer::Caps::builder(format.codec.caps_name())
            .field("width", format.width as i32)
            .field("height", format.height as i32)
            .field("framerate", gstreamer::Fraction::new(30, 1));
        if format.codec == ColorCodec::ProRes422 {
            input_caps = input_caps.field("variant", "standard");
        }
        appsrc.set_caps(Some(&input_caps.build()));
        appsrc.set_format(gstreamer::Format::Time);
        appsrc.set_is_live(false);

        let mut stages = Vec::new();
        if format.codec == ColorCodec::Jpeg {
            stages.push(make_element("jpegparse")?);
        }
        stages.push(make_element(decoder)?);
        stages.push(make_element("videoconvert")?);
        stages.push(make_element("videoscale")?);

        let appsink = make_element("appsink")?
            .downcast::<AppSink>()
            .map_err(|_| PipelineError::ResourceCreation("Failed to downcast to AppSink".into()))?;
        let output_caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "BGRx")
            .field("width", format.width as i32)
            .field("height", format.height as i32)
            .build();
        appsink.set_caps(Some(&output_caps));
        appsink.set_property("sync", false);
        appsink.set_property("max-buffers", 1u32);
        appsink.set_property("enable-last-sample", false);

        let mut elements: Vec<&gstreamer::Element> = vec![appsrc.upcast_ref()];
        elements.extend(stages.iter());
        elements.push(appsink.upcast_ref());

        pipeline.add_many(elements.iter().copied()).map_err(|e| {
            PipelineError::ResourceCreation(format!("Failed to add elements: {}", e))
        })?;
        gstreamer::Element::link_many(elements.iter().copied()).map_err(|e| {
            PipelineError::ResourceCreation(format!("Failed to link elements: {}", e))
        })?;

        let slot = Arc::new(DecodeSlot::new());

        let sample_slot = Arc::clone(&slot);
        appsink.set_callbacks(
            gstreamer_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| match appsink.pull_sample() {
                    Ok(sample) => {
                        sample_slot.fill(Ok(sample));
                        Ok(gstreamer::FlowSuccess::Ok)
                    }
                    Err(e) => {
                        sample_slot.fill(Err(format!("Failed to pull sample: {}", e)));
                        Err(gstreamer::FlowError::Eos)
                    }
                })
                .build(),
        );

        // Decoder errors and dropped frames arrive on the bus, not the appsink
        let bus = pipeline
            .bus()
            .ok_or_else(|| PipelineError::ResourceCreation("Pipeline has no bus".into()))?;
        let error_slot = Arc::clone(&slot);
        bus.set_sync_handler(move |_, message| {
            if let Some(reason) = bus_failure(message) {
                error_slot.fill(Err(reason));
            }
            gstreamer::BusSyncReply::Drop
        });

        let session = Self {
            format,
            decoder,
            pipeline,
            appsrc,
            slot,
            timeout,
            format_checked: false,
        };

        start_pipeline(&session.pipeline)?;

        info!(codec = %format.codec, decoder, "Decode session ready");
        Ok(session)
    }

    fn failure(&self, reason: impl Into<String>) -> PipelineError {
        PipelineError::DecodeFailure {
            codec: self.format.codec,
            reason: reason.into(),
        }
    }
}

impl DecodeSession for GstDecodeSession {
    fn codec(&self) -> ColorCodec {
        self.format.codec
    }

    fn format(&self) -> &FormatDescription {
        &self.format
    }

    fn decode(&mut self, input: &InputBuffer) -> PipelineResult<Box<dyn PixelBuffer>> {
        self.slot.reset();

        let buffer = gstreamer::Buffer::from_slice(input.data.clone());
        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| self.failure(format!("Failed to push buffer: {:?}", e)))?;

        let sample = match self.slot.wait(self.timeout) {
            Some(Ok(sample)) => sample,
            Some(Err(reason)) => return Err(self.failure(reason)),
            None => {
                return Err(self.failure(format!(
                    "no frame within {} ms",
                    self.timeout.as_millis()
                )));
            }
        };

        let pixels = GstPixelBuffer::from_sample(&sample).map_err(|e| self.failure(e))?;

        if !self.format_checked {
            self.format_checked = true;
            if pixels.format() != VideoFormat::Bgrx {
                warn!(
                    codec = %self.format.codec,
                    decoder = self.decoder,
                    format = ?pixels.format(),
                    "Decoder output is not BGRx"
                );
            }
        }

        Ok(Box::new(pixels))
    }
}

impl Releasable for GstDecodeSession {
    fn release(&mut self) {
        debug!(codec = %self.format.codec, "Releasing decode session");
        let _ = self.appsrc.end_of_stream();
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            error!(?e, "Failed to set decode pipeline to Null");
        }
    }
}

/// A decoded GStreamer buffer
///
/// While locked the buffer is held as a readable mapping; unlocking turns
/// the mapping back into the plain buffer.
pub struct GstPixelBuffer {
    buffer: Option<gstreamer::Buffer>,
    mapped: Option<MappedBuffer<Readable>>,
    width: usize,
    height: usize,
    stride: usize,
    format: VideoFormat,
    id: usize,
}

impl GstPixelBuffer {
    pub fn from_sample(sample: &gstreamer::Sample) -> Result<Self, String> {
        let buffer = sample.buffer_owned().ok_or("No buffer in sample")?;
        let caps = sample.caps().ok_or("No caps in sample")?;
        let info =
            VideoInfo::from_caps(caps).map_err(|e| format!("Failed to get video info: {}", e))?;

        Ok(Self {
            id: buffer.as_ptr() as usize,
            buffer: Some(buffer),
            mapped: None,
            width: info.width() as usize,
            height: info.height() as usize,
            stride: info.stride()[0] as usize,
            format: info.format(),
        })
    }

    pub fn format(&self) -> VideoFormat {
        self.format
    }
}

impl PixelBuffer for GstPixelBuffer {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn bytes_per_row(&self) -> usize {
        self.stride
    }

    fn id(&self) -> usize {
        self.id
    }

    fn lock_base_address(&mut self) -> PipelineResult<()> {
        if self.mapped.is_some() {
            return Ok(());
        }
        let buffer = self
            .buffer
            .take()
            .ok_or_else(|| PipelineError::ResourceCreation("Decoded buffer missing".into()))?;
        match buffer.into_mapped_buffer_readable() {
            Ok(mapped) => {
                self.mapped = Some(mapped);
                Ok(())
            }
            Err(buffer) => {
                self.buffer = Some(buffer);
                Err(PipelineError::ResourceCreation(
                    "Failed to map decoded buffer".into(),
                ))
            }
        }
    }

    fn base_address(&self) -> Option<&[u8]> {
        self.mapped.as_ref().map(|mapped| mapped.as_slice())
    }

    fn unlock_base_address(&mut self) {
        if let Some(mapped) = self.mapped.take() {
            self.buffer = Some(mapped.into_buffer());
        }
    }
}
