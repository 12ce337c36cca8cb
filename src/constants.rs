// SPDX-License-Identifier: GPL-3.0-only

//! Crate-wide constants

use std::time::Duration;

/// Dual-fisheye capture defaults
pub mod capture {
    /// Preview width: two 1920 px hemispheres side by side
    pub const PREVIEW_WIDTH: u32 = 3840;

    /// Preview height
    pub const PREVIEW_HEIGHT: u32 = 1920;

    /// Fixed preview frame rate (frames per second)
    pub const PREVIEW_FPS: u32 = 8;
}

/// Fisheye correction parameters
pub mod correction {
    /// Focal length in pixels of the equidistant lens model
    pub const DEFAULT_FOCAL_LENGTH: f32 = 600.0;

    /// Invocations per workgroup in the compute shader
    pub const WORKGROUP_SIZE: u32 = 256;

    /// Maximum workgroups per dispatch dimension
    pub const MAX_WORKGROUPS_PER_DIMENSION: u32 = 65_535;
}

/// GStreamer pipeline constants
pub mod pipeline {
    /// Appsink queue length. One buffer keeps only the newest frame while the
    /// previous one is still being processed.
    pub const MAX_BUFFERS: u32 = 1;

    /// Name of the appsink element inside the launch description
    pub const APPSINK_NAME: &str = "sink";

    /// Output pixel format for appsink (luminance only)
    pub const OUTPUT_FORMAT: &str = "GRAY8";

    /// Get number of threads for videoconvert based on available CPU threads
    pub fn videoconvert_threads() -> u32 {
        std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(4)
    }
}

/// Timing constants
pub mod timing {
    use super::Duration;

    /// Frame counter modulo for periodic logging
    pub const FRAME_LOG_INTERVAL: u64 = 30;

    /// How long a paused delivery thread sleeps before re-checking the stop signal
    pub const GATE_POLL_INTERVAL: Duration = Duration::from_millis(50);

    /// Pipeline state change timeout on stop
    pub const STOP_TIMEOUT_SECS: u64 = 2;

    /// Pipeline state change timeout on open
    pub const START_TIMEOUT_SECS: u64 = 5;
}

/// Supported file formats for the replay source
pub mod file_formats {
    /// Supported image file extensions
    pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp"];

    /// Check if a file extension is a supported image format
    pub fn is_image_extension(ext: &str) -> bool {
        IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_is_two_square_hemispheres() {
        assert_eq!(capture::PREVIEW_WIDTH, capture::PREVIEW_HEIGHT * 2);
    }

    #[test]
    fn test_videoconvert_threads_nonzero() {
        assert!(pipeline::videoconvert_threads() >= 1);
    }
}
