// SPDX-License-Identifier: GPL-3.0-only

//! Sensor geometry and table sizes - single source of truth
//!
//! All image dimensions, calibration table sizes and device response
//! layouts used by the depth and color pipelines live here.

use std::time::Duration;

/// Depth/IR image width in pixels
pub const DEPTH_WIDTH: usize = 512;
/// Depth/IR image height in pixels
pub const DEPTH_HEIGHT: usize = 424;

/// Number of entries in each per-pixel calibration table
pub const TABLE_SIZE: usize = DEPTH_WIDTH * DEPTH_HEIGHT;

/// Number of entries in the 11-bit raw sample lookup table
pub const LUT_SIZE: usize = 2048;

/// Size of one 11-bit packed sub-image in a raw depth packet
pub const DEPTH_SUBPACKET_SIZE: usize = TABLE_SIZE * 11 / 8;

/// Sub-images carried by one raw depth packet (9 phase images + 1 spare)
pub const DEPTH_SUBPACKETS: usize = 10;

/// Size of a raw depth packet as assembled by the transport
pub const DEPTH_PACKET_SIZE: usize = DEPTH_SUBPACKET_SIZE * DEPTH_SUBPACKETS;

/// Header words in the P0 tables command response
pub const P0_HEADER_WORDS: usize = 8;

/// Exact byte length of the P0 tables command response
///
/// Layout: 8 x u32 header, then three times: u16 pad, 512x424 u16 table, u16 pad.
pub const P0_TABLES_RESPONSE_SIZE: usize = P0_HEADER_WORDS * 4 + 3 * (2 + TABLE_SIZE * 2 + 2);

/// Bytes per pixel of IR and depth frames (one f32)
pub const FLOAT_BYTES_PER_PIXEL: usize = 4;

/// Color image width in pixels
pub const COLOR_WIDTH: usize = 1920;
/// Color image height in pixels
pub const COLOR_HEIGHT: usize = 1080;
/// Bytes per pixel of decoded color frames (BGRX)
pub const COLOR_BYTES_PER_PIXEL: usize = 4;

/// Maximum time to wait for the hardware decoder to hand back a frame
pub const DEFAULT_DECODE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Number of frames between performance log lines
pub const PERF_LOG_INTERVAL: u32 = 100;

/// Only every Nth per-packet failure is logged
pub const FAILURE_LOG_INTERVAL: u64 = 30;
