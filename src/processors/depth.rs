// SPDX-License-Identifier: GPL-3.0-only

//! Depth packet processor
//!
//! Turns raw time-of-flight packets plus the device calibration into one IR
//! frame and one depth frame per packet. The numeric work runs on a
//! [`DepthAccelerator`]; this module owns readiness, calibration and frame
//! ownership.
//!
//! State machine:
//!
//! ```text
//! Uninitialized -> DeviceInit -> CalibrationPending -> Ready
//!                      |                                  |
//!                      +---------> Unavailable <----------+ (device lost)
//! ```

use crate::calibration::{CalibrationStore, GeometryTables, P0Tables, widen_lookup_table};
use crate::config::{DepthConfig, DepthParameters};
use crate::constants::{DEPTH_HEIGHT, DEPTH_PACKET_SIZE, DEPTH_WIDTH, FAILURE_LOG_INTERVAL};
use crate::errors::{PipelineError, PipelineResult};
use crate::frame::{Frame, FrameListener, FrameType, Handoff};
use crate::packet::DepthPacket;
use crate::resource::{Releasable, Scoped};
use crate::shaders::WgpuDepthAccelerator;
use crate::timing::PerfTimer;
use tracing::{debug, error, info, warn};

/// Backend that runs the four depth decode stages
///
/// Implementations own their device resources; [`Releasable::release`]
/// tears them down synchronously.
pub trait DepthAccelerator: Releasable + Send {
    /// Short backend name for logs and the CLI
    fn name(&self) -> &'static str;

    /// False once the backend has reported a fatal error
    fn is_healthy(&self) -> bool;

    /// Upload the three P0 phase-offset tables (radians, row-flipped)
    fn upload_p0_tables(&mut self, phase_offsets: &[Vec<f32>; 3]) -> PipelineResult<()>;

    /// Upload the X/Z geometry tables
    fn upload_xz_tables(&mut self, tables: &GeometryTables) -> PipelineResult<()>;

    /// Upload the widened 11-bit lookup table
    fn upload_lookup_table(&mut self, lut: &[f32]) -> PipelineResult<()>;

    /// Decode one raw packet into `ir` and `depth` (both `TABLE_SIZE` long)
    fn process(
        &mut self,
        raw: &[u8],
        config: &DepthConfig,
        params: &DepthParameters,
        ir: &mut [f32],
        depth: &mut [f32],
    ) -> PipelineResult<()>;
}

/// Stand-in used when no accelerator could be created
#[derive(Debug)]
pub struct NullDepthAccelerator {
    reason: String,
}

impl NullDepthAccelerator {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn unavailable(&self) -> PipelineError {
        PipelineError::DeviceUnavailable(self.reason.clone())
    }
}

impl Releasable for NullDepthAccelerator {
    fn release(&mut self) {}
}

impl DepthAccelerator for NullDepthAccelerator {
    fn name(&self) -> &'static str {
        "Null"
    }

    fn is_healthy(&self) -> bool {
        false
    }

    fn upload_p0_tables(&mut self, _phase_offsets: &[Vec<f32>; 3]) -> PipelineResult<()> {
        Err(self.unavailable())
    }

    fn upload_xz_tables(&mut self, _tables: &GeometryTables) -> PipelineResult<()> {
        Err(self.unavailable())
    }

    fn upload_lookup_table(&mut self, _lut: &[f32]) -> PipelineResult<()> {
        Err(self.unavailable())
    }

    fn process(
        &mut self,
        _raw: &[u8],
        _config: &DepthConfig,
        _params: &DepthParameters,
        _ir: &mut [f32],
        _depth: &mut [f32],
    ) -> PipelineResult<()> {
        Err(self.unavailable())
    }
}

/// Lifecycle of a depth processor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthState {
    Uninitialized,
    DeviceInit,
    CalibrationPending,
    Ready,
    /// Terminal: the accelerator could not be created or was lost
    Unavailable,
}

/// Decodes raw depth packets into IR and depth frames
pub struct DepthPacketProcessor {
    state: DepthState,
    accelerator: Scoped<Box<dyn DepthAccelerator>>,
    unavailable_reason: Option<String>,
    calibration: CalibrationStore,
    config: DepthConfig,
    params: DepthParameters,
    listener: Option<Box<dyn FrameListener>>,
    ir_frame: Option<Frame>,
    depth_frame: Option<Frame>,
    timer: PerfTimer,
    failures: u64,
}

impl DepthPacketProcessor {
    /// Create a processor backed by the GPU
    pub fn new() -> Self {
        Self::with_accelerator(|| {
            WgpuDepthAccelerator::new().map(|gpu| Box::new(gpu) as Box<dyn DepthAccelerator>)
        })
    }

    /// Create a processor whose accelerator comes from `init`
    ///
    /// A failing `init` leaves the processor permanently [`DepthState::Unavailable`].
    pub fn with_accelerator<F>(init: F) -> Self
    where
        F: FnOnce() -> PipelineResult<Box<dyn DepthAccelerator>>,
    {
        let mut state = DepthState::Uninitialized;
        debug!(?state, "Creating depth packet processor");

        state = DepthState::DeviceInit;
        let mut unavailable_reason = None;
        let accelerator = match init() {
            Ok(accelerator) => {
                info!(accelerator = accelerator.name(), "Depth accelerator ready");
                state = DepthState::CalibrationPending;
                accelerator
            }
            Err(e) => {
                error!(error = %e, ?state, "Depth accelerator unavailable");
                state = DepthState::Unavailable;
                let reason = e.to_string();
                unavailable_reason = Some(reason.clone());
                Box::new(NullDepthAccelerator::new(reason)) as Box<dyn DepthAccelerator>
            }
        };

        Self {
            state,
            accelerator: Scoped::new(accelerator),
            unavailable_reason,
            calibration: CalibrationStore::new(),
            config: DepthConfig::default(),
            params: DepthParameters::default(),
            listener: None,
            ir_frame: Some(Frame::new_float(DEPTH_WIDTH, DEPTH_HEIGHT)),
            depth_frame: Some(Frame::new_float(DEPTH_WIDTH, DEPTH_HEIGHT)),
            timer: PerfTimer::new("depth"),
            failures: 0,
        }
    }

    /// Accelerator name, e.g. `"wgpu"` or `"Null"`
    pub fn name(&self) -> &'static str {
        self.accelerator.name()
    }

    pub fn state(&self) -> DepthState {
        self.state
    }

    /// Set filter switches and the depth range
    pub fn set_configuration(&mut self, config: DepthConfig) {
        debug!(?config, "Depth configuration updated");
        self.config = config;
    }

    pub fn configuration(&self) -> &DepthConfig {
        &self.config
    }

    /// Replace the decode tuning constants
    pub fn set_parameters(&mut self, params: DepthParameters) {
        self.params = params;
    }

    pub fn calibration(&self) -> &CalibrationStore {
        &self.calibration
    }

    /// Load the P0 tables from the device's command response
    pub fn load_p0_tables_from_command_response(&mut self, buffer: &[u8]) -> PipelineResult<()> {
        let tables = P0Tables::from_command_response(buffer)?;
        self.ensure_available()?;
        self.accelerator.upload_p0_tables(&tables.phase_offsets())?;
        self.calibration.set_p0_tables(tables);
        self.refresh_state();
        Ok(())
    }

    /// Load the per-pixel X and Z geometry tables
    pub fn load_xz_tables(&mut self, x: &[f32], z: &[f32]) -> PipelineResult<()> {
        let tables = GeometryTables::new(x, z)?;
        self.ensure_available()?;
        self.accelerator.upload_xz_tables(&tables)?;
        self.calibration.set_geometry(tables);
        self.refresh_state();
        Ok(())
    }

    /// Load the 11-bit raw sample lookup table
    pub fn load_lookup_table(&mut self, lut: &[i16]) -> PipelineResult<()> {
        let widened = widen_lookup_table(lut)?;
        self.ensure_available()?;
        self.accelerator.upload_lookup_table(&widened)?;
        self.calibration.set_lookup_table(widened);
        self.refresh_state();
        Ok(())
    }

    /// True iff the device is up, every table is loaded and the backend is healthy
    pub fn is_ready(&self) -> bool {
        self.state == DepthState::Ready && self.accelerator.is_healthy()
    }

    pub fn set_frame_listener<L: FrameListener + 'static>(&mut self, listener: L) {
        self.listener = Some(Box::new(listener));
    }

    pub fn clear_frame_listener(&mut self) {
        self.listener = None;
    }

    /// Drop the current output buffers and allocate fresh ones
    pub fn allocate_new_frames(&mut self) {
        self.ir_frame = Some(Frame::new_float(DEPTH_WIDTH, DEPTH_HEIGHT));
        self.depth_frame = Some(Frame::new_float(DEPTH_WIDTH, DEPTH_HEIGHT));
    }

    /// Decode one packet and deliver IR, then depth, to the listener
    ///
    /// Not ready: returns an error, emits nothing and leaves the frame
    /// buffers alone. No listener: does nothing.
    pub fn process(&mut self, packet: &DepthPacket) -> PipelineResult<()> {
        self.check_health();
        match self.state {
            DepthState::Ready => {}
            DepthState::Unavailable => return Err(self.unavailable()),
            _ => return Err(PipelineError::NotReady),
        }

        if self.listener.is_none() {
            return Ok(());
        }

        if packet.buffer.len() < DEPTH_PACKET_SIZE {
            return Err(self.log_failure(PipelineError::InvalidPacket {
                expected: DEPTH_PACKET_SIZE,
                actual: packet.buffer.len(),
            }));
        }

        self.timer.start();

        let mut ir = self
            .ir_frame
            .take()
            .unwrap_or_else(|| Frame::new_float(DEPTH_WIDTH, DEPTH_HEIGHT));
        let mut depth = self
            .depth_frame
            .take()
            .unwrap_or_else(|| Frame::new_float(DEPTH_WIDTH, DEPTH_HEIGHT));

        if let Err(e) = self.run_stages(&packet.buffer[..DEPTH_PACKET_SIZE], &mut ir, &mut depth) {
            self.ir_frame = Some(ir);
            self.depth_frame = Some(depth);
            self.check_health();
            return Err(self.log_failure(e));
        }

        for frame in [&mut ir, &mut depth] {
            frame.timestamp = packet.timestamp;
            frame.sequence = packet.sequence;
        }

        self.ir_frame = self.deliver(FrameType::Ir, ir);
        self.depth_frame = self.deliver(FrameType::Depth, depth);

        self.timer.stop();
        Ok(())
    }

    fn run_stages(&mut self, raw: &[u8], ir: &mut Frame, depth: &mut Frame) -> PipelineResult<()> {
        let ir_pixels = ir
            .as_f32_mut()
            .ok_or_else(|| PipelineError::ResourceCreation("IR frame has no host buffer".into()))?;
        let depth_pixels = depth
            .as_f32_mut()
            .ok_or_else(|| PipelineError::ResourceCreation("Depth frame has no host buffer".into()))?;

        self.accelerator
            .process(raw, &self.config, &self.params, ir_pixels, depth_pixels)
    }

    /// Hand a frame to the listener; returns the buffer to reuse, if any
    fn deliver(&mut self, kind: FrameType, frame: Frame) -> Option<Frame> {
        let listener = self.listener.as_mut()?;
        match listener.on_new_frame(kind, frame) {
            Handoff::Taken => Some(Frame::new_float(DEPTH_WIDTH, DEPTH_HEIGHT)),
            Handoff::Declined(frame) => Some(frame),
        }
    }

    fn ensure_available(&self) -> PipelineResult<()> {
        if self.state == DepthState::Unavailable {
            return Err(self.unavailable());
        }
        Ok(())
    }

    fn refresh_state(&mut self) {
        if self.state == DepthState::Unavailable {
            return;
        }
        let next = if self.calibration.is_complete() {
            DepthState::Ready
        } else {
            DepthState::CalibrationPending
        };
        if next != self.state {
            debug!(from = ?self.state, to = ?next, "Depth processor state change");
            self.state = next;
        }
    }

    fn check_health(&mut self) {
        if self.state != DepthState::Unavailable && !self.accelerator.is_healthy() {
            error!(
                accelerator = self.accelerator.name(),
                "Depth accelerator reported a fatal error"
            );
            self.state = DepthState::Unavailable;
            self.unavailable_reason = Some(format!("{} device lost", self.accelerator.name()));
        }
    }

    fn unavailable(&self) -> PipelineError {
        PipelineError::DeviceUnavailable(
            self.unavailable_reason
                .clone()
                .unwrap_or_else(|| "depth accelerator unavailable".into()),
        )
    }

    fn log_failure(&mut self, error: PipelineError) -> PipelineError {
        self.failures += 1;
        if self.failures % FAILURE_LOG_INTERVAL == 1 {
            warn!(error = %error, failures = self.failures, "Depth packet dropped");
        }
        error
    }
}

impl Default for DepthPacketProcessor {
    fn default() -> Self {
        Self::new()
    }
}
