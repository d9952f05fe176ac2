// SPDX-License-Identifier: GPL-3.0-only

//! Processor configuration
//!
//! [`Config`] is the user-facing surface (filter switches, depth range,
//! texture cache preference). [`DepthParameters`] holds the tuning constants
//! of the depth decode that are passed to the compute stages as uniforms.

use crate::constants::DEFAULT_DECODE_TIMEOUT;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Errors loading a configuration file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Depth processor behavior switches
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepthConfig {
    /// Minimum valid depth in meters; closer pixels are zeroed
    pub min_depth: f32,
    /// Maximum valid depth in meters; farther pixels are zeroed
    pub max_depth: f32,
    /// Smooth raw correlation values before phase-to-depth conversion
    pub enable_bilateral_filter: bool,
    /// Suppress flying pixels on depth discontinuities
    pub enable_edge_aware_filter: bool,
}

impl Default for DepthConfig {
    fn default() -> Self {
        Self {
            min_depth: 0.5,
            max_depth: 4.5,
            enable_bilateral_filter: true,
            enable_edge_aware_filter: true,
        }
    }
}

/// Color processor settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorConfig {
    /// Try to expose decoded frames as GPU textures
    pub prefer_texture_cache: bool,
    /// How long one decode may block before the packet is dropped
    pub decode_timeout_ms: u64,
}

impl ColorConfig {
    pub fn decode_timeout(&self) -> Duration {
        Duration::from_millis(self.decode_timeout_ms)
    }
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            prefer_texture_cache: true,
            decode_timeout_ms: DEFAULT_DECODE_TIMEOUT.as_millis() as u64,
        }
    }
}

/// Complete processor configuration
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub depth: DepthConfig,
    pub color: ColorConfig,
}

impl Config {
    /// Load a JSON configuration file; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Tuning constants of the time-of-flight decode
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepthParameters {
    pub ab_multiplier: f32,
    pub ab_multiplier_per_frq: [f32; 3],
    pub ab_output_multiplier: f32,

    pub phase_in_rad: [f32; 3],

    pub joint_bilateral_ab_threshold: f32,
    pub joint_bilateral_max_edge: f32,
    pub joint_bilateral_exp: f32,
    pub gaussian_kernel: [f32; 3],

    pub phase_offset: f32,
    pub unambiguous_dist: f32,
    pub individual_ab_threshold: f32,
    pub ab_threshold: f32,
    pub ab_confidence_slope: f32,
    pub ab_confidence_offset: f32,
    pub min_dealias_confidence: f32,
    pub max_dealias_confidence: f32,

    pub edge_ab_avg_min_value: f32,
    pub edge_ab_std_dev_threshold: f32,
    pub edge_close_delta_threshold: f32,
    pub edge_far_delta_threshold: f32,
    pub edge_max_delta_threshold: f32,
    pub edge_avg_delta_threshold: f32,
}

impl Default for DepthParameters {
    fn default() -> Self {
        Self {
            ab_multiplier: 0.666_666_7,
            ab_multiplier_per_frq: [1.322_581, 1.0, 1.612_903],
            ab_output_multiplier: 16.0,

            phase_in_rad: [0.0, 2.094_395, 4.188_79],

            joint_bilateral_ab_threshold: 3.0,
            joint_bilateral_max_edge: 2.5,
            joint_bilateral_exp: 5.0,
            gaussian_kernel: [0.106_997_3, 0.786_005_3, 0.106_997_3],

            phase_offset: 0.0,
            unambiguous_dist: 2083.333,
            individual_ab_threshold: 3.0,
            ab_threshold: 10.0,
            ab_confidence_slope: -0.533_057_8,
            ab_confidence_offset: 0.769_489_4,
            min_dealias_confidence: 0.349_065_9,
            max_dealias_confidence: 0.610_865_3,

            edge_ab_avg_min_value: 50.0,
            edge_ab_std_dev_threshold: 0.05,
            edge_close_delta_threshold: 50.0,
            edge_far_delta_threshold: 30.0,
            edge_max_delta_threshold: 100.0,
            edge_avg_delta_threshold: 0.0,
        }
    }
}
