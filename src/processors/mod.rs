// SPDX-License-Identifier: GPL-3.0-only

//! Packet processors
//!
//! [`DepthPacketProcessor`] and [`ColorPacketProcessor`] own their
//! accelerator, their calibration or session state and their output frames,
//! and push completed frames to a [`FrameListener`](crate::frame::FrameListener).

pub mod color;
pub mod depth;

pub use color::{CodecState, ColorPacketProcessor};
pub use depth::{DepthAccelerator, DepthPacketProcessor, DepthState, NullDepthAccelerator};
