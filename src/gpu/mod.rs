// SPDX-License-Identifier: GPL-3.0-only

//! GPU initialization utilities for compute pipelines.
//!
//! This module provides helpers for creating wgpu devices for compute
//! operations, plus a health flag that flips when the device is lost.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info};

/// Re-export of the compute wgpu crate
pub use wgpu_compute as wgpu;

/// Information about the created GPU device
#[derive(Debug, Clone)]
pub struct GpuDeviceInfo {
    /// Name of the GPU adapter
    pub adapter_name: String,
    /// Backend being used (Vulkan, Metal, DX12, etc.)
    pub backend: wgpu::Backend,
}

/// Cleared when the device reports a fatal error
#[derive(Debug, Clone)]
pub struct DeviceHealth(Arc<AtomicBool>);

impl DeviceHealth {
    fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_healthy(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn mark_lost(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A wgpu device and queue dedicated to compute work
pub struct ComputeDevice {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub info: GpuDeviceInfo,
    pub health: DeviceHealth,
}

/// Create a wgpu device and queue for compute work.
///
/// # Arguments
///
/// * `label` - A label for the device (for debugging)
pub async fn create_compute_device(label: &str) -> Result<ComputeDevice, String> {
    info!(label = label, "Creating GPU device for compute");

    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::PRIMARY,
        ..Default::default()
    });

    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await
        .map_err(|e| format!("Failed to find suitable GPU adapter: {}", e))?;

    let adapter_info = adapter.get_info();

    info!(
        adapter = %adapter_info.name,
        backend = ?adapter_info.backend,
        "GPU adapter selected for compute"
    );

    let (device, queue) = adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: Some(label),
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::Performance,
            ..Default::default()
        })
        .await
        .map_err(|e| format!("Failed to create GPU device: {}", e))?;

    let health = DeviceHealth::new();
    let lost = health.clone();
    let device_label = label.to_string();
    device.set_device_lost_callback(move |reason, message| {
        error!(device = %device_label, ?reason, %message, "GPU device lost");
        lost.mark_lost();
    });

    debug!(label, "Compute device ready");

    Ok(ComputeDevice {
        device,
        queue,
        info: GpuDeviceInfo {
            adapter_name: adapter_info.name,
            backend: adapter_info.backend,
        },
        health,
    })
}
