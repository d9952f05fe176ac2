// SPDX-License-Identifier: GPL-3.0-only

//! GPU time-of-flight depth decode
//!
//! Four compute stages turn one raw depth packet into IR and depth images:
//!
//! 1. `decode`: unpack the 11-bit phase samples and correlate them into
//!    per-frequency (a, b) components and the IR amplitude
//! 2. `bilateral` (optional): joint bilateral filter on (a, b)
//! 3. `phase_to_depth`: phase unwrapping and geometry
//! 4. `edge_aware` (optional): flying pixel suppression
//!
//! Every stage shares the uniform block declared in `params.wgsl`.

mod processor;

pub use processor::WgpuDepthAccelerator;

/// Uniform block and helpers prepended to every stage
const PARAMS_SHADER: &str = include_str!("params.wgsl");

/// Stage 1 shader body
pub const DECODE_SHADER: &str = include_str!("decode.wgsl");
/// Stage 2 shader body
pub const BILATERAL_SHADER: &str = include_str!("bilateral.wgsl");
/// Stage 3 shader body
pub const PHASE_TO_DEPTH_SHADER: &str = include_str!("phase_to_depth.wgsl");
/// Stage 4 shader body
pub const EDGE_AWARE_SHADER: &str = include_str!("edge_aware.wgsl");

/// Complete WGSL source for one stage
pub fn stage_source(body: &str) -> String {
    format!("{}\n{}", PARAMS_SHADER, body)
}
