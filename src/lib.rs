// SPDX-License-Identifier: GPL-3.0-only

//! Fisheye QR Reader - QR scanning on dual-fisheye 360° cameras
//!
//! Captures non-stitched dual-fisheye preview frames, remaps each lens image
//! towards a rectilinear view and decodes QR codes in both lens regions,
//! stopping capture on the first successful decode.
//!
//! # Architecture
//!
//! - [`backends`]: Frame sources (GStreamer, file replay, manual injection)
//! - [`correction`]: Fisheye correction kernels (CPU and wgpu compute)
//! - [`pipelines`]: Capture session and two-region scan dispatcher
//! - [`config`]: Serializable reader configuration
//! - [`gpu`]: Compute device creation
//!
//! # Example
//!
//! ```ignore
//! fisheye_qr_reader::logging::init();
//! let source = GstFrameSource::v4l2("/dev/video0")?;
//! let dispatcher = ScanDispatcher::new(source)?;
//! dispatcher.set_result_listener(Some(Arc::new(|direction, text: Option<&str>| {
//!     if let Some(text) = text {
//!         println!("{direction}: {text}");
//!     }
//! })))?;
//! dispatcher.start()?;
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod correction;
pub mod errors;
pub mod gpu;
pub mod logging;
pub mod pipelines;

// Re-export commonly used types
pub use backends::camera::{
    ColorFormat, Frame, FrameSource, GstFrameSource, ManualFrameSource, ReplayFrameSource,
    SourceConfig,
};
pub use config::ReaderConfig;
pub use correction::{CorrectionKernel, FisheyeCorrector, GpuFisheyeCorrector, Passthrough};
pub use errors::{ReaderError, ReaderResult};
pub use pipelines::capture::{CaptureSession, FrameListener};
pub use pipelines::scan::{
    CameraDirection, ScanDispatcher, ScanListener, ScanResult, SessionState,
};
