// SPDX-License-Identifier: GPL-3.0-only

//! GPU fisheye correction
//!
//! Runs the same mapping as the CPU kernel in a compute shader:
//!
//! 1. Upload the luminance plane as a packed `u32` storage buffer
//! 2. Remap in the compute shader, writing packed GRAY8 or RGBA words
//! 3. Read back through a staging buffer

use super::{ColorFormat, CorrectionKernel, check_buffers};
use crate::constants::correction::{MAX_WORKGROUPS_PER_DIMENSION, WORKGROUP_SIZE};
use crate::errors::CorrectionError;
use crate::gpu::{self, wgpu};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

const CORRECTION_SHADER: &str = include_str!("../shaders/correction/fisheye_correct.wgsl");

/// Uniform data for the correction shader
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct CorrectionParams {
    width: u32,
    height: u32,
    format: u32,
    word_count: u32,
    focal_length: f32,
    _padding: [u32; 3],
}

/// Buffers sized for one frame size and color format
struct FrameResources {
    width: u32,
    height: u32,
    color_format: ColorFormat,
    input_size: u64,
    output_size: u64,
    input_buffer: wgpu::Buffer,
    output_buffer: wgpu::Buffer,
    staging_buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

/// wgpu compute fisheye correction kernel
pub struct GpuFisheyeCorrector {
    focal_length: f32,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    max_binding_size: u64,
    /// Also serializes GPU submissions
    resources: Mutex<Option<FrameResources>>,
}

impl GpuFisheyeCorrector {
    /// Create the kernel on a new compute device
    pub fn new(focal_length: f32) -> Result<Self, CorrectionError> {
        info!("Initializing GPU fisheye correction");

        let (device, queue, gpu_info) =
            pollster::block_on(gpu::create_compute_device("fisheye_correction"))
                .map_err(CorrectionError::Gpu)?;

        info!(
            name = %gpu_info.adapter_name,
            backend = ?gpu_info.backend,
            "GPU device created for fisheye correction"
        );

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("fisheye_correct_shader"),
            source: wgpu::ShaderSource::Wgsl(CORRECTION_SHADER.into()),
        });

        let storage_entry = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("fisheye_correct_bind_group_layout"),
            entries: &[
                // Raw luminance
                storage_entry(0, true),
                // Corrected output
                storage_entry(1, false),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("fisheye_correct_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("fisheye_correct_pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("fisheye_correct_uniform"),
            size: std::mem::size_of::<CorrectionParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(Self {
            focal_length,
            device,
            queue,
            pipeline,
            bind_group_layout,
            uniform_buffer,
            max_binding_size: gpu_info.max_storage_buffer_binding_size as u64,
            resources: Mutex::new(None),
        })
    }

    fn create_resources(
        &self,
        width: u32,
        height: u32,
        color_format: ColorFormat,
        input_size: u64,
        output_size: u64,
    ) -> FrameResources {
        debug!(width, height, %color_format, "Allocating fisheye correction buffers");

        let input_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("fisheye_raw_buffer"),
            size: input_size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let output_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("fisheye_corrected_buffer"),
            size: output_size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("fisheye_staging_buffer"),
            size: output_size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("fisheye_correct_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: input_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: output_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
            ],
        });

        FrameResources {
            width,
            height,
            color_format,
            input_size,
            output_size,
            input_buffer,
            output_buffer,
            staging_buffer,
            bind_group,
        }
    }

    fn read_back(&self, staging: &wgpu::Buffer, out: &mut [u8]) -> Result<(), CorrectionError> {
        let slice = staging.slice(..);
        let (sender, receiver) = futures::channel::oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });

        wait_for_device(&self.device)?;

        pollster::block_on(receiver)
            .map_err(|_| CorrectionError::Gpu("Failed to receive buffer mapping".to_string()))?
            .map_err(|e| CorrectionError::Gpu(format!("Failed to map buffer: {:?}", e)))?;

        let data = slice.get_mapped_range();
        out.copy_from_slice(&data[..out.len()]);
        drop(data);
        staging.unmap();
        Ok(())
    }
}

/// Block until all submitted work has finished, surfacing device loss
fn wait_for_device(device: &wgpu::Device) -> Result<(), CorrectionError> {
    device
        .poll(wgpu::PollType::wait_indefinitely())
        .map(|_| ())
        .map_err(|e| CorrectionError::Gpu(format!("Failed to poll device: {}", e)))
}

/// Round a byte count up to whole `u32` words
fn word_aligned(len: usize) -> u64 {
    (len as u64).div_ceil(4) * 4
}

/// Workgroup grid covering `word_count` invocations
fn dispatch_size(word_count: u32) -> (u32, u32) {
    let groups = word_count.div_ceil(WORKGROUP_SIZE).max(1);
    let x = groups.min(MAX_WORKGROUPS_PER_DIMENSION);
    (x, groups.div_ceil(x))
}

impl CorrectionKernel for GpuFisheyeCorrector {
    fn name(&self) -> &'static str {
        "fisheye-gpu"
    }

    fn correct(
        &self,
        width: u32,
        height: u32,
        raw: &[u8],
        color_format: ColorFormat,
        out: &mut [u8],
    ) -> Result<(), CorrectionError> {
        check_buffers(width, height, raw, color_format, out)?;
        if out.is_empty() {
            return Ok(());
        }

        let luma_len = width as usize * height as usize;
        let input_size = word_aligned(luma_len);
        let output_size = word_aligned(out.len());
        if input_size.max(output_size) > self.max_binding_size {
            return Err(CorrectionError::InvalidDimensions { width, height });
        }
        let word_count = u32::try_from(output_size / 4)
            .map_err(|_| CorrectionError::InvalidDimensions { width, height })?;

        let mut guard = self.resources.lock().unwrap_or_else(PoisonError::into_inner);
        let stale = guard.as_ref().is_none_or(|r| {
            r.width != width || r.height != height || r.color_format != color_format
        });
        if stale {
            *guard = Some(self.create_resources(width, height, color_format, input_size, output_size));
        }
        let Some(resources) = guard.as_ref() else {
            return Err(CorrectionError::Gpu("correction buffers missing".to_string()));
        };

        // write_buffer needs whole words
        if luma_len as u64 == resources.input_size {
            self.queue
                .write_buffer(&resources.input_buffer, 0, &raw[..luma_len]);
        } else {
            let mut padded = raw[..luma_len].to_vec();
            padded.resize(resources.input_size as usize, 0);
            self.queue.write_buffer(&resources.input_buffer, 0, &padded);
        }

        let params = CorrectionParams {
            width,
            height,
            format: match color_format {
                ColorFormat::Gray8 => 0,
                ColorFormat::GrayRgba8888 => 1,
            },
            word_count,
            focal_length: self.focal_length,
            _padding: [0; 3],
        };
        self.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&params));

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("fisheye_correct_encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("fisheye_correct_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, Some(&resources.bind_group), &[]);
            let (groups_x, groups_y) = dispatch_size(word_count);
            pass.dispatch_workgroups(groups_x, groups_y, 1);
        }
        encoder.copy_buffer_to_buffer(
            &resources.output_buffer,
            0,
            &resources.staging_buffer,
            0,
            resources.output_size,
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        self.read_back(&resources.staging_buffer, out)
    }
}
