// SPDX-License-Identifier: GPL-3.0-only
//! GPU compute shaders and the infrastructure shared by their processors
//!
//! The depth decode runs as four WGSL compute stages driven by
//! [`WgpuDepthAccelerator`].

pub mod depth;
mod gpu_processor;

pub use depth::WgpuDepthAccelerator;
pub use gpu_processor::{MappedStaging, compute_dispatch_size, map_staging_blocking};
