// SPDX-License-Identifier: GPL-3.0-only

//! Raw packets delivered by the transport
//!
//! Payloads are [`Bytes`], so wrapping them for the accelerator is a
//! reference-count bump rather than a copy. Processors borrow packets for
//! the duration of one `process` call only.

use crate::frame::ExposureInfo;
use bytes::Bytes;

/// One assembled raw depth packet (ten 11-bit sub-images)
#[derive(Debug, Clone)]
pub struct DepthPacket {
    pub sequence: u32,
    pub timestamp: u32,
    pub buffer: Bytes,
}

impl DepthPacket {
    pub fn new(sequence: u32, timestamp: u32, buffer: impl Into<Bytes>) -> Self {
        Self {
            sequence,
            timestamp,
            buffer: buffer.into(),
        }
    }
}

/// One compressed color packet
#[derive(Debug, Clone)]
pub struct ColorPacket {
    pub sequence: u32,
    pub timestamp: u32,
    pub exposure: f32,
    pub gain: f32,
    pub gamma: f32,
    pub buffer: Bytes,
}

impl ColorPacket {
    pub fn new(sequence: u32, timestamp: u32, buffer: impl Into<Bytes>) -> Self {
        Self {
            sequence,
            timestamp,
            exposure: 0.0,
            gain: 0.0,
            gamma: 0.0,
            buffer: buffer.into(),
        }
    }

    /// Attach sensor exposure metadata
    pub fn with_exposure(mut self, exposure: f32, gain: f32, gamma: f32) -> Self {
        self.exposure = exposure;
        self.gain = gain;
        self.gamma = gamma;
        self
    }

    pub fn exposure_info(&self) -> ExposureInfo {
        ExposureInfo {
            exposure: self.exposure,
            gain: self.gain,
            gamma: self.gamma,
        }
    }
}
