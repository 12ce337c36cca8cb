// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for frame sources and frames

use crate::constants::capture::{PREVIEW_FPS, PREVIEW_HEIGHT, PREVIEW_WIDTH};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Pixel layout of a corrected frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ColorFormat {
    /// One luminance byte per pixel
    #[default]
    Gray8,
    /// Four bytes per pixel `[v, v, v, 255]`
    GrayRgba8888,
}

impl ColorFormat {
    /// Bytes used by one pixel
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            ColorFormat::Gray8 => 1,
            ColorFormat::GrayRgba8888 => 4,
        }
    }

    /// Size of a corrected buffer for a frame of the given dimensions
    pub fn buffer_len(self, width: u32, height: u32) -> usize {
        width as usize * height as usize * self.bytes_per_pixel()
    }
}

impl std::fmt::Display for ColorFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColorFormat::Gray8 => write!(f, "GRAY8"),
            ColorFormat::GrayRgba8888 => write!(f, "GRAY_RGBA8888"),
        }
    }
}

/// Sensor shooting mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ShootingMode {
    /// Both hemispheres side by side, no stitching
    #[default]
    DualFisheyeNonStitched,
    /// Camera-side stitched equirectangular output
    Equirectangular,
}

/// Frame rate range in frames per second
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FpsRange {
    pub min: u32,
    pub max: u32,
}

impl FpsRange {
    /// A range pinned to a single rate
    pub const fn fixed(fps: u32) -> Self {
        Self { min: fps, max: fps }
    }
}

impl Default for FpsRange {
    fn default() -> Self {
        Self::fixed(PREVIEW_FPS)
    }
}

impl std::fmt::Display for FpsRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

/// Configuration applied to a frame source when a capture session opens it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub shooting_mode: ShootingMode,
    pub preview_width: u32,
    pub preview_height: u32,
    pub fps_range: FpsRange,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            shooting_mode: ShootingMode::DualFisheyeNonStitched,
            preview_width: PREVIEW_WIDTH,
            preview_height: PREVIEW_HEIGHT,
            fps_range: FpsRange::default(),
        }
    }
}

impl SourceConfig {
    /// Reject configurations the correction and scan stages cannot work with
    pub fn validate(&self) -> BackendResult<()> {
        if self.shooting_mode != ShootingMode::DualFisheyeNonStitched {
            return Err(BackendError::ConfigurationRejected(format!(
                "shooting mode {:?} is not dual-fisheye",
                self.shooting_mode
            )));
        }
        if self.preview_width < 2 || self.preview_height == 0 {
            return Err(BackendError::ConfigurationRejected(format!(
                "preview size {}x{} is too small",
                self.preview_width, self.preview_height
            )));
        }
        if self.fps_range.min == 0 || self.fps_range.min > self.fps_range.max {
            return Err(BackendError::ConfigurationRejected(format!(
                "invalid fps range {}",
                self.fps_range
            )));
        }
        Ok(())
    }
}

/// A raw frame as delivered by a frame source.
///
/// `data` starts with `width * height` luminance bytes. Sources may append
/// chroma planes; they are ignored. The width and height are the negotiated
/// size and can differ from the requested preview size.
#[derive(Debug, Clone, Copy)]
pub struct RawFrame<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
}

/// An owned luminance frame, used by sources that hold their frames in memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl OwnedFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> BackendResult<Self> {
        let expected = width as usize * height as usize;
        if data.len() < expected {
            return Err(BackendError::InvalidFrame(format!(
                "{}x{} frame needs {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    pub fn as_raw(&self) -> RawFrame<'_> {
        RawFrame {
            data: &self.data,
            width: self.width,
            height: self.height,
        }
    }
}

/// A corrected frame handed to a frame listener.
///
/// The buffer is borrowed for the duration of one listener call only.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub color_format: ColorFormat,
}

impl Frame<'_> {
    /// Luminance of the pixel at `(x, y)`
    #[inline]
    pub fn luma(&self, x: u32, y: u32) -> u8 {
        let index = (y as usize * self.width as usize + x as usize)
            * self.color_format.bytes_per_pixel();
        self.data[index]
    }

    /// Copy the frame into an owned image, e.g. to save a snapshot.
    ///
    /// Returns `None` if the buffer does not match the frame size.
    pub fn to_image(&self) -> Option<image::DynamicImage> {
        match self.color_format {
            ColorFormat::Gray8 => {
                image::GrayImage::from_raw(self.width, self.height, self.data.to_vec())
                    .map(image::DynamicImage::ImageLuma8)
            }
            ColorFormat::GrayRgba8888 => {
                image::RgbaImage::from_raw(self.width, self.height, self.data.to_vec())
                    .map(image::DynamicImage::ImageRgba8)
            }
        }
    }
}

/// Callback invoked by a frame source for every delivered frame
pub type FrameCallback = Arc<dyn Fn(RawFrame<'_>) + Send + Sync>;

/// Result type for frame source operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Error types for frame source operations
#[derive(Debug, Clone)]
pub enum BackendError {
    /// Backend is not available on this system
    NotAvailable(String),
    /// The camera device could not be acquired
    OpenFailed(String),
    /// The device rejected the requested configuration
    ConfigurationRejected(String),
    /// The source was used before `configure` or after `release`
    NotConfigured,
    /// Streaming state change failed
    StreamError(String),
    /// A delivered frame is malformed
    InvalidFrame(String),
    /// General I/O error
    IoError(String),
    /// Other errors
    Other(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::NotAvailable(msg) => write!(f, "Backend not available: {}", msg),
            BackendError::OpenFailed(msg) => write!(f, "Failed to open device: {}", msg),
            BackendError::ConfigurationRejected(msg) => {
                write!(f, "Configuration rejected: {}", msg)
            }
            BackendError::NotConfigured => write!(f, "Source is not configured"),
            BackendError::StreamError(msg) => write!(f, "Stream error: {}", msg),
            BackendError::InvalidFrame(msg) => write!(f, "Invalid frame: {}", msg),
            BackendError::IoError(msg) => write!(f, "I/O error: {}", msg),
            BackendError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::IoError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_len_per_format() {
        assert_eq!(ColorFormat::Gray8.buffer_len(3840, 1920), 3840 * 1920);
        assert_eq!(ColorFormat::GrayRgba8888.buffer_len(3840, 1920), 3840 * 1920 * 4);
        assert_eq!(ColorFormat::Gray8.buffer_len(0, 1920), 0);
    }

    #[test]
    fn test_default_source_config() {
        let config = SourceConfig::default();
        assert_eq!(config.shooting_mode, ShootingMode::DualFisheyeNonStitched);
        assert_eq!((config.preview_width, config.preview_height), (3840, 1920));
        assert_eq!(config.fps_range, FpsRange { min: 8, max: 8 });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_stitched_mode() {
        let config = SourceConfig {
            shooting_mode: ShootingMode::Equirectangular,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(BackendError::ConfigurationRejected(_))
        ));
    }

    #[test]
    fn test_validate_rejects_inverted_fps_range() {
        let config = SourceConfig {
            fps_range: FpsRange { min: 10, max: 5 },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_owned_frame_too_short() {
        assert!(OwnedFrame::new(vec![0; 3], 2, 2).is_err());
        assert!(OwnedFrame::new(vec![0; 4], 2, 2).is_ok());
    }

    #[test]
    fn test_frame_luma_reads_first_channel() {
        let data = [1, 1, 1, 255, 2, 2, 2, 255, 3, 3, 3, 255, 4, 4, 4, 255];
        let frame = Frame {
            data: &data,
            width: 2,
            height: 2,
            color_format: ColorFormat::GrayRgba8888,
        };
        assert_eq!(frame.luma(1, 0), 2);
        assert_eq!(frame.luma(1, 1), 4);
    }

    #[test]
    fn test_frame_to_image() {
        let data = vec![7u8; 6];
        let frame = Frame {
            data: &data,
            width: 3,
            height: 2,
            color_format: ColorFormat::Gray8,
        };
        let image = frame.to_image().expect("valid gray frame");
        assert_eq!((image.width(), image.height()), (3, 2));

        let short = Frame {
            data: &data[..5],
            ..frame
        };
        assert!(short.to_image().is_none());
    }
}
