// SPDX-License-Identifier: GPL-3.0-only

//! Shared fakes for the processor integration tests
//!
//! Every fake counts acquisitions and releases so tests can check that each
//! handle is released exactly once.

#![allow(dead_code)]

use kinect_pipeline::calibration::GeometryTables;
use kinect_pipeline::constants::{
    DEPTH_PACKET_SIZE, LUT_SIZE, P0_HEADER_WORDS, P0_TABLES_RESPONSE_SIZE, TABLE_SIZE,
};
use kinect_pipeline::media::decoders::{
    ColorAccelerator, ColorCodec, DecodeSession, FormatDescription, GpuTexture, InputBuffer,
    PixelBuffer, TextureCache,
};
use kinect_pipeline::processors::DepthAccelerator;
use kinect_pipeline::resource::Releasable;
use kinect_pipeline::{
    DepthConfig, DepthPacket, DepthPacketProcessor, DepthParameters, Frame, FrameType, Handoff,
    PipelineError, PipelineResult,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Paired acquire/release counter
#[derive(Debug, Clone, Default)]
pub struct Counter {
    acquired: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl Counter {
    pub fn acquire(&self) {
        self.acquired.fetch_add(1, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Currently held handles
    pub fn live(&self) -> usize {
        self.acquired() - self.released()
    }
}

/// Frames delivered to a recording listener
#[derive(Clone, Default)]
pub struct Deliveries(Arc<Mutex<Vec<(FrameType, u32, usize)>>>);

impl Deliveries {
    /// (kind, sequence, buffer id) per delivery, in order
    pub fn all(&self) -> Vec<(FrameType, u32, usize)> {
        self.0.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<FrameType> {
        self.all().into_iter().map(|(kind, _, _)| kind).collect()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    /// Listener that records every frame; taken frames are parked in `kept`
    pub fn listener(
        &self,
        taken: bool,
        kept: Arc<Mutex<Vec<Frame>>>,
    ) -> impl FnMut(FrameType, Frame) -> Handoff + Send + 'static {
        let log = Arc::clone(&self.0);
        move |kind, frame| {
            log.lock()
                .unwrap()
                .push((kind, frame.sequence, frame.buffer_id()));
            if taken {
                kept.lock().unwrap().push(frame);
                Handoff::Taken
            } else {
                Handoff::Declined(frame)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Depth
// ---------------------------------------------------------------------------

/// Handles a test keeps on a [`FakeDepthAccelerator`] it no longer owns
#[derive(Debug, Clone, Default)]
pub struct DepthHandles {
    pub device: Counter,
    /// Table uploads that reached the backend
    pub uploads: Arc<AtomicUsize>,
    /// While set, `process` fails as if a scratch buffer could not be created
    pub fail_process: Arc<AtomicBool>,
}

impl DepthHandles {
    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn set_fail_process(&self, fail: bool) {
        self.fail_process.store(fail, Ordering::SeqCst);
    }
}

/// Depth backend that writes `raw[0] + 1` into IR and `raw[0] + 2` into depth
pub struct FakeDepthAccelerator {
    handles: DepthHandles,
}

impl FakeDepthAccelerator {
    pub fn new(handles: DepthHandles) -> Self {
        handles.device.acquire();
        Self { handles }
    }
}

impl Releasable for FakeDepthAccelerator {
    fn release(&mut self) {
        self.handles.device.release();
    }
}

impl DepthAccelerator for FakeDepthAccelerator {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn upload_p0_tables(&mut self, phase_offsets: &[Vec<f32>; 3]) -> PipelineResult<()> {
        assert!(phase_offsets.iter().all(|table| table.len() == TABLE_SIZE));
        self.handles.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn upload_xz_tables(&mut self, tables: &GeometryTables) -> PipelineResult<()> {
        assert_eq!(tables.x.len(), TABLE_SIZE);
        self.handles.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn upload_lookup_table(&mut self, lut: &[f32]) -> PipelineResult<()> {
        assert_eq!(lut.len(), LUT_SIZE);
        self.handles.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn process(
        &mut self,
        raw: &[u8],
        _config: &DepthConfig,
        _params: &DepthParameters,
        ir: &mut [f32],
        depth: &mut [f32],
    ) -> PipelineResult<()> {
        if self.handles.fail_process.load(Ordering::SeqCst) {
            return Err(PipelineError::ResourceCreation("scratch buffer".into()));
        }
        ir.fill(raw[0] as f32 + 1.0);
        depth.fill(raw[0] as f32 + 2.0);
        Ok(())
    }
}

/// A P0 command response of the right size with all-zero tables
pub fn p0_response() -> Vec<u8> {
    let mut buffer = vec![0u8; P0_TABLES_RESPONSE_SIZE];
    // Header words are ignored by the parser but carry data on real devices
    buffer[..P0_HEADER_WORDS * 4].fill(0xab);
    buffer
}

/// Processor backed by a [`FakeDepthAccelerator`]
pub fn fake_depth_processor(device: &Counter) -> DepthPacketProcessor {
    fake_depth_processor_with(&DepthHandles {
        device: device.clone(),
        ..DepthHandles::default()
    })
}

/// Processor backed by a [`FakeDepthAccelerator`] sharing `handles`
pub fn fake_depth_processor_with(handles: &DepthHandles) -> DepthPacketProcessor {
    let handles = handles.clone();
    DepthPacketProcessor::with_accelerator(move || {
        Ok(Box::new(FakeDepthAccelerator::new(handles)) as Box<dyn DepthAccelerator>)
    })
}

/// Load all three calibration tables
pub fn calibrate(processor: &mut DepthPacketProcessor) {
    processor
        .load_p0_tables_from_command_response(&p0_response())
        .unwrap();
    let x = vec![0.5f32; TABLE_SIZE];
    let z = vec![1.5f32; TABLE_SIZE];
    processor.load_xz_tables(&x, &z).unwrap();
    let lut: Vec<i16> = (0..LUT_SIZE as i16).collect();
    processor.load_lookup_table(&lut).unwrap();
}

/// Full-size depth packet whose first byte is `marker`
pub fn depth_packet(sequence: u32, marker: u8) -> DepthPacket {
    let mut buffer = vec![0u8; DEPTH_PACKET_SIZE];
    buffer[0] = marker;
    DepthPacket::new(sequence, sequence * 10, buffer)
}

// ---------------------------------------------------------------------------
// Color
// ---------------------------------------------------------------------------

/// Payload markers understood by the fake decoder
pub const DECODES_AS_JPEG: u8 = 0x01;
pub const DECODES_AS_PRORES: u8 = 0x02;
pub const DECODES_AS_NOTHING: u8 = 0x00;

/// Counters shared by every fake color resource
#[derive(Debug, Clone, Default)]
pub struct ColorCounters {
    pub sessions: Counter,
    pub buffers: Counter,
    pub locks: Counter,
    pub textures: Counter,
    pub caches: Counter,
    /// Codec of every decode attempt, in order
    pub attempts: Arc<Mutex<Vec<ColorCodec>>>,
    /// While set, locking a decoded buffer's base address fails
    pub fail_lock: Arc<AtomicBool>,
}

impl ColorCounters {
    pub fn attempts(&self) -> Vec<ColorCodec> {
        self.attempts.lock().unwrap().clone()
    }

    /// True when nothing is held any more
    pub fn all_released(&self) -> bool {
        [
            &self.sessions,
            &self.buffers,
            &self.locks,
            &self.textures,
            &self.caches,
        ]
        .iter()
        .all(|counter| counter.live() == 0)
    }
}

/// Decode service whose sessions decode by payload marker
pub struct FakeColorAccelerator {
    pub counters: ColorCounters,
    pub with_texture_cache: bool,
    /// Setup of sessions for this codec fails
    pub broken_codec: Option<ColorCodec>,
}

impl FakeColorAccelerator {
    pub fn new(counters: &ColorCounters) -> Self {
        Self {
            counters: counters.clone(),
            with_texture_cache: false,
            broken_codec: None,
        }
    }
}

impl ColorAccelerator for FakeColorAccelerator {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn create_session(&self, format: &FormatDescription) -> PipelineResult<Box<dyn DecodeSession>> {
        if self.broken_codec == Some(format.codec) {
            return Err(PipelineError::ResourceCreation("decoder busy".into()));
        }
        self.counters.sessions.acquire();
        Ok(Box::new(FakeSession {
            format: *format,
            counters: self.counters.clone(),
        }))
    }

    fn create_texture_cache(&self) -> PipelineResult<Box<dyn TextureCache>> {
        if !self.with_texture_cache {
            return Err(PipelineError::ResourceCreation("no texture cache".into()));
        }
        self.counters.caches.acquire();
        Ok(Box::new(FakeTextureCache {
            counters: self.counters.clone(),
        }))
    }
}

pub struct FakeSession {
    format: FormatDescription,
    counters: ColorCounters,
}

impl Releasable for FakeSession {
    fn release(&mut self) {
        self.counters.sessions.release();
    }
}

impl DecodeSession for FakeSession {
    fn codec(&self) -> ColorCodec {
        self.format.codec
    }

    fn format(&self) -> &FormatDescription {
        &self.format
    }

    fn decode(&mut self, input: &InputBuffer) -> PipelineResult<Box<dyn PixelBuffer>> {
        let codec = self.format.codec;
        self.counters.attempts.lock().unwrap().push(codec);

        let decodes = match input.data.first().copied() {
            Some(DECODES_AS_JPEG) => codec == ColorCodec::Jpeg,
            Some(DECODES_AS_PRORES) => codec == ColorCodec::ProRes422,
            _ => false,
        };
        if !decodes {
            return Err(PipelineError::DecodeFailure {
                codec,
                reason: "bad bitstream".into(),
            });
        }

        Ok(Box::new(FakePixelBuffer::new(
            self.format.width,
            self.format.height,
            &self.counters,
        )))
    }
}

/// Small BGRX buffer; dimensions come from the session format
pub struct FakePixelBuffer {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
    locked: bool,
    counters: ColorCounters,
}

impl FakePixelBuffer {
    pub fn new(width: usize, height: usize, counters: &ColorCounters) -> Self {
        counters.buffers.acquire();
        Self {
            width,
            height,
            pixels: vec![0x80; width * height * 4],
            locked: false,
            counters: counters.clone(),
        }
    }
}

impl Drop for FakePixelBuffer {
    fn drop(&mut self) {
        assert!(!self.locked, "pixel buffer dropped while locked");
        self.counters.buffers.release();
    }
}

impl PixelBuffer for FakePixelBuffer {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn bytes_per_row(&self) -> usize {
        self.width * 4
    }

    fn id(&self) -> usize {
        self.pixels.as_ptr() as usize
    }

    fn lock_base_address(&mut self) -> PipelineResult<()> {
        assert!(!self.locked, "pixel buffer locked twice");
        if self.counters.fail_lock.load(Ordering::SeqCst) {
            return Err(PipelineError::ResourceCreation("surface lock failed".into()));
        }
        self.locked = true;
        self.counters.locks.acquire();
        Ok(())
    }

    fn base_address(&self) -> Option<&[u8]> {
        self.locked.then_some(self.pixels.as_slice())
    }

    fn unlock_base_address(&mut self) {
        if self.locked {
            self.locked = false;
            self.counters.locks.release();
        }
    }
}

pub struct FakeTextureCache {
    counters: ColorCounters,
}

impl Releasable for FakeTextureCache {
    fn release(&mut self) {
        self.counters.caches.release();
    }
}

impl TextureCache for FakeTextureCache {
    fn create_texture(&self, buffer: &mut dyn PixelBuffer) -> PipelineResult<Box<dyn GpuTexture>> {
        buffer.lock_base_address()?;
        let copied = buffer.base_address().is_some();
        buffer.unlock_base_address();
        if !copied {
            return Err(PipelineError::ResourceCreation("lock failed".into()));
        }
        self.counters.textures.acquire();
        Ok(Box::new(FakeTexture {
            counters: self.counters.clone(),
        }))
    }

    fn flush(&self) {}
}

pub struct FakeTexture {
    counters: ColorCounters,
}

impl GpuTexture for FakeTexture {
    fn release(&mut self) {
        self.counters.textures.release();
    }
}
