// SPDX-License-Identifier: GPL-3.0-only

//! Kinect v2 packet processing
//!
//! Turns the raw packets a Kinect v2 sensor sends over USB into frames:
//! each depth packet becomes an IR frame and a depth frame, each color
//! packet becomes one decoded BGRX frame.
//!
//! # Architecture
//!
//! - [`processors`]: the depth and color packet processors
//! - [`shaders`]: wgpu compute stages of the depth decode
//! - [`media`]: GStreamer color decode sessions and GPU texture caches
//! - [`calibration`]: per-device tables the depth decode needs
//! - [`frame`]: frames, their ownership handoff and listeners
//! - [`config`]: processor configuration and depth tuning constants
//!
//! # Example
//!
//! ```ignore
//! let mut depth = DepthPacketProcessor::new();
//! depth.load_p0_tables_from_command_response(&p0_response)?;
//! depth.load_xz_tables(&x, &z)?;
//! depth.load_lookup_table(&lut)?;
//! depth.set_frame_listener(|kind, frame| {
//!     println!("{kind} frame #{}", frame.sequence);
//!     Handoff::Taken
//! });
//! depth.process(&packet)?;
//! ```

pub mod calibration;
pub mod config;
pub mod constants;
pub mod errors;
pub mod frame;
pub mod gpu;
pub mod media;
pub mod packet;
pub mod processors;
pub mod resource;
pub mod shaders;
pub mod timing;

// Re-export commonly used types
pub use config::{ColorConfig, Config, DepthConfig, DepthParameters};
pub use errors::{CalibrationError, PipelineError, PipelineResult};
pub use frame::{ExposureInfo, Frame, FrameAccess, FrameFormat, FrameListener, FrameType, Handoff};
pub use packet::{ColorPacket, DepthPacket};
pub use processors::{ColorPacketProcessor, DepthPacketProcessor, DepthState};

/// Version string baked in at build time
pub const VERSION: &str = env!("GIT_VERSION");
