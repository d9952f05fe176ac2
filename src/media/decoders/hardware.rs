// SPDX-License-Identifier: MPL-2.0

//! Hardware decoder detection for color streams

use tracing::{debug, info};

/// Software JPEG decoder used when no hardware decoder is present
pub const SOFTWARE_JPEG_DECODER: &str = "jpegdec";

/// ProRes decoder element (gst-libav)
pub const PRORES_DECODER: &str = "avdec_prores";

/// Detect available hardware decoders for JPEG
///
/// Returns list of TRUE hardware decoders (VA-API, NVDEC, V4L2).
/// Does NOT include software decoders like jpegdec.
///
/// GStreamer must be initialized before calling this.
pub fn detect_hw_decoders() -> Vec<&'static str> {
    debug!("Detecting available hardware decoders");
    let mut available = Vec::new();

    let hw_candidates = [
        ("vaapijpegdec", "VA-API JPEG decoder"), // Intel/AMD VA-API hardware
        ("nvjpegdec", "NVIDIA JPEG decoder"),    // NVIDIA NVDEC hardware
        ("v4l2jpegdec", "V4L2 JPEG decoder"),    // Hardware V4L2
    ];

    for (decoder, desc) in hw_candidates {
        // Try to create the element to see if it exists
        if gstreamer::ElementFactory::make(decoder).build().is_ok() {
            info!(decoder, "{} available", desc);
            available.push(decoder);
        } else {
            debug!(decoder, "{} not available", desc);
        }
    }

    if available.is_empty() {
        info!("No hardware JPEG decoders available, will use software decoder");
    } else {
        info!(count = available.len(), "Found hardware JPEG decoder(s)");
    }

    available
}

/// First hardware decoder, or the software fallback
pub fn preferred_jpeg_decoder(hw_decoders: &[&'static str]) -> &'static str {
    hw_decoders
        .first()
        .copied()
        .unwrap_or(SOFTWARE_JPEG_DECODER)
}

/// Whether the ProRes decoder element is installed
pub fn has_prores_decoder() -> bool {
    gstreamer::ElementFactory::find(PRORES_DECODER).is_some()
}
