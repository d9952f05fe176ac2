// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for offline packet decoding
//!
//! This module provides command-line functionality for:
//! - Showing the accelerators and color decoders in use
//! - Decoding captured depth packets with captured calibration tables
//! - Decoding captured color packets

use kinect_pipeline::config::Config;
use kinect_pipeline::gpu;
use kinect_pipeline::media::decoders::{
    detect_hw_decoders, has_prores_decoder, preferred_jpeg_decoder,
};
use kinect_pipeline::{
    ColorPacket, ColorPacketProcessor, DepthPacket, DepthPacketProcessor, Frame, FrameType,
    Handoff,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Calibration inputs of the depth command
pub struct CalibrationFiles {
    pub p0: PathBuf,
    pub x_table: PathBuf,
    pub z_table: PathBuf,
    pub lut: PathBuf,
}

/// What the CLI keeps of a delivered frame
struct FrameSummary {
    kind: FrameType,
    sequence: u32,
    description: String,
}

/// Load the configuration file, or the defaults when none is given
pub fn load_config(path: Option<&Path>) -> Result<Config, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(Config::load(path)?),
        None => Ok(Config::default()),
    }
}

/// Show the accelerators the processors pick and the decoders they can use
pub fn show_info(config: &Config) -> CliResult {
    println!("kinect-pipeline {}", kinect_pipeline::VERSION);
    println!();

    let depth = DepthPacketProcessor::new();
    println!("Depth accelerator: {} ({:?})", depth.name(), depth.state());
    let color = ColorPacketProcessor::with_gstreamer(&config.color);
    println!(
        "Color accelerator: {} (texture cache: {})",
        color.name(),
        if color.has_texture_cache() { "yes" } else { "no" }
    );
    println!();

    match pollster::block_on(gpu::create_compute_device("info")) {
        Ok(compute) => {
            println!("GPU adapter: {}", compute.info.adapter_name);
            println!("GPU backend: {:?}", compute.info.backend);
        }
        Err(e) => println!("GPU adapter: unavailable ({})", e),
    }

    match gstreamer::init() {
        Ok(()) => {
            let hw_decoders = detect_hw_decoders();
            println!("JPEG decoder: {}", preferred_jpeg_decoder(&hw_decoders));
            if hw_decoders.is_empty() {
                println!("Hardware JPEG decoders: none");
            } else {
                println!("Hardware JPEG decoders: {}", hw_decoders.join(", "));
            }
            println!(
                "ProRes decoder: {}",
                if has_prores_decoder() { "available" } else { "missing" }
            );
        }
        Err(e) => println!("GStreamer: unavailable ({})", e),
    }

    Ok(())
}

/// Decode depth packets and print per-frame statistics
pub fn decode_depth(config: &Config, files: &CalibrationFiles, packets: &[PathBuf]) -> CliResult {
    let mut processor = DepthPacketProcessor::new();
    println!("Depth accelerator: {}", processor.name());
    processor.set_configuration(config.depth);

    processor.load_p0_tables_from_command_response(&std::fs::read(&files.p0)?)?;
    processor.load_xz_tables(&read_f32_le(&files.x_table)?, &read_f32_le(&files.z_table)?)?;
    processor.load_lookup_table(&read_i16_le(&files.lut)?)?;

    let summaries = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&summaries);
    processor.set_frame_listener(move |kind: FrameType, frame: Frame| {
        let description = float_stats(&frame);
        if let Ok(mut sink) = sink.lock() {
            sink.push(FrameSummary {
                kind,
                sequence: frame.sequence,
                description,
            });
        }
        Handoff::Declined(frame)
    });

    let start = Instant::now();
    for (index, path) in packets.iter().enumerate() {
        let packet = DepthPacket::new(index as u32, index as u32, std::fs::read(path)?);
        if let Err(e) = processor.process(&packet) {
            println!("[{}] {}: {}", index, path.display(), e);
        }
    }

    print_summaries(&summaries);
    println!("Processed {} packet(s) in {:.1?}", packets.len(), start.elapsed());
    Ok(())
}

/// Decode color packets and print what was delivered
pub fn decode_color(config: &Config, packets: &[PathBuf]) -> CliResult {
    let mut processor = ColorPacketProcessor::with_gstreamer(&config.color);
    if !processor.is_available() {
        return Err("color decoding is unavailable on this system".into());
    }
    println!(
        "Color accelerator: {} (texture cache: {})",
        processor.name(),
        if processor.has_texture_cache() { "yes" } else { "no" }
    );

    let summaries = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&summaries);
    processor.set_frame_listener(move |kind: FrameType, frame: Frame| {
        let description = format!(
            "{}x{} {:?} via {:?}",
            frame.width(),
            frame.height(),
            frame.format,
            frame.access()
        );
        if let Ok(mut sink) = sink.lock() {
            sink.push(FrameSummary {
                kind,
                sequence: frame.sequence,
                description,
            });
        }
        Handoff::Taken
    });

    let start = Instant::now();
    for (index, path) in packets.iter().enumerate() {
        let packet = ColorPacket::new(index as u32, index as u32, std::fs::read(path)?);
        if let Err(e) = processor.process(&packet) {
            println!("[{}] {}: {}", index, path.display(), e);
        }
    }

    print_summaries(&summaries);
    println!("Processed {} packet(s) in {:.1?}", packets.len(), start.elapsed());
    Ok(())
}

fn print_summaries(summaries: &Mutex<Vec<FrameSummary>>) {
    if let Ok(summaries) = summaries.lock() {
        for summary in summaries.iter() {
            println!(
                "  #{} {}: {}",
                summary.sequence, summary.kind, summary.description
            );
        }
    }
}

/// Valid-pixel count and range of a float frame
fn float_stats(frame: &Frame) -> String {
    let Some(values) = frame.as_f32() else {
        return "no host data".to_string();
    };

    let valid: Vec<f32> = values.iter().copied().filter(|v| *v > 0.0).collect();
    if valid.is_empty() {
        return format!("0/{} valid", values.len());
    }

    let min = valid.iter().copied().fold(f32::INFINITY, f32::min);
    let max = valid.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mean = valid.iter().sum::<f32>() / valid.len() as f32;
    format!(
        "{}/{} valid, min {:.1}, max {:.1}, mean {:.1}",
        valid.len(),
        values.len(),
        min,
        max,
        mean
    )
}

fn read_f32_le(path: &Path) -> Result<Vec<f32>, Box<dyn std::error::Error>> {
    let bytes = std::fs::read(path)?;
    if bytes.len() % 4 != 0 {
        return Err(format!("{}: length is not a multiple of 4", path.display()).into());
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

fn read_i16_le(path: &Path) -> Result<Vec<i16>, Box<dyn std::error::Error>> {
    let bytes = std::fs::read(path)?;
    if bytes.len() % 2 != 0 {
        return Err(format!("{}: length is not a multiple of 2", path.display()).into());
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect())
}
