// SPDX-License-Identifier: GPL-3.0-only

//! Fisheye correction kernels
//!
//! A kernel maps a raw dual-fisheye frame to a corrected frame of the same
//! dimensions. Both hemispheres are corrected independently around their own
//! centre using the equidistant lens model `r' = f * atan(r / f)`.
//!
//! - [`FisheyeCorrector`]: CPU implementation with a cached remap table
//! - [`GpuFisheyeCorrector`]: wgpu compute implementation
//! - [`Passthrough`]: copies luminance unchanged

pub mod fisheye;
pub mod gpu;

pub use crate::backends::camera::ColorFormat;
pub use fisheye::{FisheyeCorrector, RemapTable};
pub use gpu::GpuFisheyeCorrector;

use crate::config::{CorrectionConfig, KernelBackend};
use crate::errors::{CorrectionError, ReaderResult};
use std::sync::Arc;
use tracing::{info, warn};

/// Geometric correction of one raw frame
///
/// Implementations must be deterministic and must not modify `raw`.
pub trait CorrectionKernel: Send + Sync {
    /// Kernel name for logging
    fn name(&self) -> &'static str;

    /// Correct `raw` into `out`.
    ///
    /// `raw` starts with `width * height` luminance bytes. `out` is exactly
    /// `color_format.buffer_len(width, height)` bytes; for
    /// [`ColorFormat::GrayRgba8888`] every pixel is written as `[v, v, v, 255]`.
    fn correct(
        &self,
        width: u32,
        height: u32,
        raw: &[u8],
        color_format: ColorFormat,
        out: &mut [u8],
    ) -> Result<(), CorrectionError>;
}

/// Check the buffer contract shared by all kernels
pub(crate) fn check_buffers(
    width: u32,
    height: u32,
    raw: &[u8],
    color_format: ColorFormat,
    out: &[u8],
) -> Result<(), CorrectionError> {
    let luma_len = width as usize * height as usize;
    if raw.len() < luma_len {
        return Err(CorrectionError::RawTooShort {
            expected: luma_len,
            actual: raw.len(),
        });
    }
    let expected = color_format.buffer_len(width, height);
    if out.len() != expected {
        return Err(CorrectionError::OutputSizeMismatch {
            expected,
            actual: out.len(),
        });
    }
    Ok(())
}

/// Write one luminance value into `out` at pixel `index`
#[inline]
pub(crate) fn write_pixel(out: &mut [u8], index: usize, value: u8, color_format: ColorFormat) {
    match color_format {
        ColorFormat::Gray8 => out[index] = value,
        ColorFormat::GrayRgba8888 => {
            let base = index * 4;
            out[base..base + 4].copy_from_slice(&[value, value, value, 255]);
        }
    }
}

/// Kernel that copies the luminance plane unchanged
///
/// For sources that already deliver rectilinear frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl CorrectionKernel for Passthrough {
    fn name(&self) -> &'static str {
        "passthrough"
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
        let luma_len = width as usize * height as usize;
        match color_format {
            ColorFormat::Gray8 => out.copy_from_slice(&raw[..luma_len]),
            ColorFormat::GrayRgba8888 => {
                for (index, &value) in raw[..luma_len].iter().enumerate() {
                    write_pixel(out, index, value, color_format);
                }
            }
        }
        Ok(())
    }
}

/// Create the kernel selected by the configuration.
///
/// `Auto` tries the GPU kernel first and falls back to the CPU kernel.
pub fn create_kernel(config: &CorrectionConfig) -> ReaderResult<Arc<dyn CorrectionKernel>> {
    match config.backend {
        KernelBackend::Cpu => Ok(Arc::new(FisheyeCorrector::new(config.focal_length))),
        KernelBackend::Gpu => Ok(Arc::new(GpuFisheyeCorrector::new(config.focal_length)?)),
        KernelBackend::Auto => match GpuFisheyeCorrector::new(config.focal_length) {
            Ok(kernel) => {
                info!("Using GPU fisheye correction");
                Ok(Arc::new(kernel))
            }
            Err(e) => {
                warn!(error = %e, "GPU correction unavailable, using CPU kernel");
                Ok(Arc::new(FisheyeCorrector::new(config.focal_length)))
            }
        },
    }
}
