// SPDX-License-Identifier: GPL-3.0-only

//! Frame source abstraction
//!
//! A frame source drives the dual-fisheye sensor and pushes raw frames to a
//! single callback from a single delivery context.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │   CaptureSession    │  ← Correction, listener dispatch
//! └──────────┬──────────┘
//!            │ FrameCallback
//!            ▼
//! ┌─────────────────────┐
//! │  FrameSource Trait  │  ← Common interface
//! └──────────┬──────────┘
//!            │
//!     ┌──────┼──────────┐
//!     ▼      ▼          ▼
//! GStreamer Replay    Manual
//! ```
//!
//! # Busy policy
//!
//! No source queues frames behind a slow callback:
//! - [`GstFrameSource`] keeps only the newest frame in its appsink
//! - [`ReplayFrameSource`] skips timer ticks missed during a slow callback
//! - [`ManualFrameSource`] blocks the injecting thread until the previous
//!   delivery has returned

pub mod frame_loop;
pub mod gst_source;
pub mod manual;
pub mod replay;
pub mod types;

pub use frame_loop::{CaptureLoopController, DeliveryGate, LoopAction};
pub use gst_source::GstFrameSource;
pub use manual::{FrameInjector, ManualFrameSource};
pub use replay::{ReplayFrameSource, load_luma_frame};
pub use types::*;

/// A camera that delivers raw frames
///
/// Sources are driven by a capture session which serializes all calls.
/// The frame callback runs on the source's delivery context and must never
/// be invoked concurrently with itself.
pub trait FrameSource: Send {
    /// Human-readable name for logging
    fn name(&self) -> &str;

    // ===== Lifecycle =====

    /// Acquire the device and apply the capture configuration
    ///
    /// Called once, before any other lifecycle method.
    ///
    /// # Returns
    /// * `Ok(())` - The device is open and configured
    /// * `Err(BackendError)` - The device is unusable
    fn configure(&mut self, config: &SourceConfig) -> BackendResult<()>;

    /// Install or remove the per-frame callback
    fn set_frame_callback(&mut self, callback: Option<FrameCallback>);

    // ===== Streaming =====

    /// Begin delivering frames
    fn start(&mut self) -> BackendResult<()>;

    /// Halt frame delivery
    ///
    /// Must not wait for a callback that is currently running.
    fn stop(&mut self) -> BackendResult<()>;

    /// Release the device. No frames are delivered afterwards.
    ///
    /// May be called from inside the frame callback.
    fn release(&mut self) -> BackendResult<()>;
}
