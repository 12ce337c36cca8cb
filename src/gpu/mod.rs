// SPDX-License-Identifier: GPL-3.0-only

//! GPU initialization utilities for compute pipelines.

use std::sync::Arc;
use tracing::{debug, info};

/// Standalone wgpu used for compute work
pub use wgpu_compute as wgpu;

/// Information about the created GPU device
#[derive(Debug)]
pub struct GpuDeviceInfo {
    /// Name of the GPU adapter
    pub adapter_name: String,
    /// Backend being used
    pub backend: wgpu::Backend,
    /// Largest storage buffer binding the device accepts, in bytes
    pub max_storage_buffer_binding_size: u32,
}

/// Create a wgpu device and queue for compute work.
///
/// # Arguments
///
/// * `label` - A label for the device (for debugging)
///
/// # Returns
///
/// A tuple of (Device, Queue, GpuDeviceInfo) or an error message
pub async fn create_compute_device(
    label: &str,
) -> Result<(Arc<wgpu::Device>, Arc<wgpu::Queue>, GpuDeviceInfo), String> {
    info!(label = label, "Creating GPU device for compute");

    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::VULKAN,
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
    let adapter_limits = adapter.limits();

    info!(
        adapter = %adapter_info.name,
        backend = ?adapter_info.backend,
        "GPU adapter selected for compute"
    );

    let (device, queue) = adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: Some(label),
            required_features: wgpu::Features::empty(),
            required_limits: adapter_limits.clone(),
            memory_hints: wgpu::MemoryHints::Performance,
            ..Default::default()
        })
        .await
        .map_err(|e| format!("Failed to create GPU device: {}", e))?;

    debug!(
        max_storage_buffer_binding_size = adapter_limits.max_storage_buffer_binding_size,
        "GPU device created"
    );

    let info = GpuDeviceInfo {
        adapter_name: adapter_info.name.clone(),
        backend: adapter_info.backend,
        max_storage_buffer_binding_size: adapter_limits.max_storage_buffer_binding_size,
    };

    Ok((Arc::new(device), Arc::new(queue), info))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_compute_device() {
        // Requires a GPU, skipped when none is available
        match create_compute_device("test_device").await {
            Ok((device, queue, info)) => {
                assert!(!info.adapter_name.is_empty());
                assert!(info.max_storage_buffer_binding_size > 0);
                drop(queue);
                drop(device);
            }
            Err(e) => {
                println!("Skipping test (no GPU): {}", e);
            }
        }
    }
}
