// SPDX-License-Identifier: MPL-2.0

//! Media processing utilities
//!
//! # Modules
//!
//! - [`decoders`]: Hardware decoder detection, decode sessions and the
//!   texture cache used by the color pipeline

pub mod decoders;

pub use decoders::{ColorCodec, GstColorAccelerator, NullColorAccelerator, detect_hw_decoders};
