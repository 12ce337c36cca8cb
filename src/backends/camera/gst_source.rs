// SPDX-License-Identifier: GPL-3.0-only

//! GStreamer frame source
//!
//! Builds `<source> ! videoconvert ! GRAY8 caps ! appsink` and forwards the
//! luminance plane of every sample to the frame callback from the appsink
//! streaming thread.

use super::FrameSource;
use super::types::*;
use crate::constants::{pipeline, timing};
use gstreamer::prelude::*;
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Frame source backed by a GStreamer pipeline
pub struct GstFrameSource {
    /// Launch description of the upstream source element(s)
    source_description: String,
    pipeline: Option<gstreamer::Pipeline>,
    appsink: Option<AppSink>,
    /// Samples arriving while this is false are dropped
    streaming: Arc<AtomicBool>,
    callback: Arc<Mutex<Option<FrameCallback>>>,
    /// Streaming thread currently running the frame callback
    delivering: Arc<Mutex<Option<ThreadId>>>,
    frame_counter: Arc<AtomicU64>,
}

impl GstFrameSource {
    /// Create a source from a launch description of the camera element,
    /// e.g. `"v4l2src device=/dev/video0"`
    pub fn open(source_description: impl Into<String>) -> BackendResult<Self> {
        debug!("Initializing GStreamer");
        gstreamer::init().map_err(|e| BackendError::NotAvailable(e.to_string()))?;

        let source_description = source_description.into();
        if source_description.trim().is_empty() {
            return Err(BackendError::OpenFailed(
                "empty source description".to_string(),
            ));
        }

        Ok(Self {
            source_description,
            pipeline: None,
            appsink: None,
            streaming: Arc::new(AtomicBool::new(false)),
            callback: Arc::new(Mutex::new(None)),
            delivering: Arc::new(Mutex::new(None)),
            frame_counter: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Source reading a V4L2 device node
    pub fn v4l2(device: &str) -> BackendResult<Self> {
        Self::open(format!("v4l2src device={}", device))
    }

    /// Live synthetic source, for testing without a camera
    pub fn test_pattern() -> BackendResult<Self> {
        Self::open("videotestsrc is-live=true pattern=ball")
    }

    /// Full launch description for the given configuration
    pub fn launch_description(&self, config: &SourceConfig) -> String {
        format!(
            "{} ! videoconvert n-threads={} ! video/x-raw,format={},width=(int){},height=(int){},framerate=(fraction){}/1 ! appsink name={}",
            self.source_description,
            pipeline::videoconvert_threads(),
            pipeline::OUTPUT_FORMAT,
            config.preview_width,
            config.preview_height,
            config.fps_range.max,
            pipeline::APPSINK_NAME,
        )
    }

    fn build_callbacks(&self) -> gstreamer_app::AppSinkCallbacks {
        let streaming = Arc::clone(&self.streaming);
        let callback = Arc::clone(&self.callback);
        let delivering = Arc::clone(&self.delivering);
        let frame_counter = Arc::clone(&self.frame_counter);

        gstreamer_app::AppSinkCallbacks::builder()
            .new_sample(move |appsink| {
                let sample = appsink
                    .pull_sample()
                    .map_err(|_| gstreamer::FlowError::Eos)?;

                if !streaming.load(Ordering::SeqCst) {
                    return Ok(gstreamer::FlowSuccess::Ok);
                }

                let frame_start = Instant::now();
                let frame_num = frame_counter.fetch_add(1, Ordering::Relaxed);

                let buffer = sample.buffer().ok_or_else(|| {
                    error!(frame = frame_num, "No buffer in sample");
                    gstreamer::FlowError::Error
                })?;
                if buffer.flags().contains(gstreamer::BufferFlags::CORRUPTED) {
                    debug!(frame = frame_num, "Buffer marked as corrupted, skipping frame");
                    return Ok(gstreamer::FlowSuccess::Ok);
                }
                let caps = sample.caps().ok_or_else(|| {
                    error!(frame = frame_num, "No caps in sample");
                    gstreamer::FlowError::Error
                })?;
                let video_info = VideoInfo::from_caps(caps).map_err(|e| {
                    error!(frame = frame_num, error = ?e, "Failed to get video info");
                    gstreamer::FlowError::Error
                })?;
                let map = buffer.map_readable().map_err(|e| {
                    error!(frame = frame_num, error = ?e, "Failed to map buffer");
                    gstreamer::FlowError::Error
                })?;

                let width = video_info.width();
                let height = video_info.height();
                let stride = video_info.stride()[0].max(0) as usize;

                let packed;
                let data = match luma_plane(map.as_slice(), width, height, stride) {
                    LumaPlane::Contiguous(data) => data,
                    LumaPlane::Strided => {
                        packed = pack_rows(map.as_slice(), width, height, stride);
                        packed.as_slice()
                    }
                    LumaPlane::Truncated => {
                        warn!(frame = frame_num, width, height, stride, "Truncated buffer, skipping frame");
                        return Ok(gstreamer::FlowSuccess::Ok);
                    }
                };

                let current = callback
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                if let Some(current) = current {
                    *delivering.lock().unwrap_or_else(PoisonError::into_inner) =
                        Some(thread::current().id());
                    current(RawFrame {
                        data,
                        width,
                        height,
                    });
                    *delivering.lock().unwrap_or_else(PoisonError::into_inner) = None;
                }

                if frame_num % timing::FRAME_LOG_INTERVAL == 0 {
                    debug!(
                        frame = frame_num,
                        width,
                        height,
                        stride,
                        total_us = frame_start.elapsed().as_micros(),
                        "Frame performance"
                    );
                }

                Ok(gstreamer::FlowSuccess::Ok)
            })
            .build()
    }

    fn on_streaming_thread(&self) -> bool {
        *self.delivering.lock().unwrap_or_else(PoisonError::into_inner)
            == Some(thread::current().id())
    }
}

impl FrameSource for GstFrameSource {
    fn name(&self) -> &str {
        &self.source_description
    }

    fn configure(&mut self, config: &SourceConfig) -> BackendResult<()> {
        config.validate()?;

        let description = self.launch_description(config);
        info!(pipeline = %description, "Creating capture pipeline");

        let pipeline = gstreamer::parse::launch(&description)
            .map_err(|e| BackendError::ConfigurationRejected(e.to_string()))?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| {
                BackendError::ConfigurationRejected("launch result is not a pipeline".to_string())
            })?;

        let appsink = pipeline
            .by_name(pipeline::APPSINK_NAME)
            .ok_or_else(|| BackendError::OpenFailed("Failed to get appsink".to_string()))?
            .dynamic_cast::<AppSink>()
            .map_err(|_| BackendError::OpenFailed("Failed to cast appsink".to_string()))?;

        appsink.set_property("sync", false);
        appsink.set_property("max-buffers", pipeline::MAX_BUFFERS);
        appsink.set_property("drop", true);
        appsink.set_property("enable-last-sample", false);
        appsink.set_callbacks(self.build_callbacks());

        // READY opens the device
        pipeline
            .set_state(gstreamer::State::Ready)
            .map_err(|e| BackendError::OpenFailed(format!("Failed to open camera: {}", e)))?;
        let (result, state, _) = pipeline.state(gstreamer::ClockTime::from_seconds(
            timing::START_TIMEOUT_SECS,
        ));
        if result.is_err() {
            let _ = pipeline.set_state(gstreamer::State::Null);
            return Err(BackendError::OpenFailed(format!(
                "Pipeline did not reach READY (state {:?})",
                state
            )));
        }

        debug!(width = config.preview_width, height = config.preview_height, fps = %config.fps_range, "Capture pipeline configured");
        self.pipeline = Some(pipeline);
        self.appsink = Some(appsink);
        Ok(())
    }

    fn set_frame_callback(&mut self, callback: Option<FrameCallback>) {
        *self.callback.lock().unwrap_or_else(PoisonError::into_inner) = callback;
    }

    fn start(&mut self) -> BackendResult<()> {
        let pipeline = self.pipeline.as_ref().ok_or(BackendError::NotConfigured)?;

        self.streaming.store(true, Ordering::SeqCst);
        if let Err(e) = pipeline.set_state(gstreamer::State::Playing) {
            self.streaming.store(false, Ordering::SeqCst);
            return Err(BackendError::StreamError(format!(
                "Failed to start pipeline: {}",
                e
            )));
        }
        info!(source = %self.source_description, "Capture pipeline playing");
        Ok(())
    }

    fn stop(&mut self) -> BackendResult<()> {
        self.streaming.store(false, Ordering::SeqCst);

        if let Some(pipeline) = &self.pipeline {
            // Asynchronous so a callback on the streaming thread can stop its own source
            let streaming = Arc::clone(&self.streaming);
            pipeline.call_async(move |pipeline| {
                pause_unless_restarted(&streaming, |state| {
                    if let Err(e) = pipeline.set_state(state) {
                        warn!(error = %e, ?state, "Failed to change capture pipeline state");
                    }
                });
            });
            debug!("Capture pipeline pause requested");
        }
        Ok(())
    }

    fn release(&mut self) -> BackendResult<()> {
        self.streaming.store(false, Ordering::SeqCst);
        self.set_frame_callback(None);

        let Some(pipeline) = self.pipeline.take() else {
            return Ok(());
        };
        if let Some(appsink) = self.appsink.take() {
            appsink.set_callbacks(gstreamer_app::AppSinkCallbacks::builder().build());
        }

        if self.on_streaming_thread() {
            debug!("Release requested from streaming thread, deferring pipeline teardown");
            pipeline.call_async(|pipeline| {
                if let Err(e) = pipeline.set_state(gstreamer::State::Null) {
                    warn!(error = %e, "Failed to release capture pipeline");
                }
            });
            return Ok(());
        }

        pipeline
            .set_state(gstreamer::State::Null)
            .map_err(|e| BackendError::Other(format!("Failed to stop pipeline: {}", e)))?;
        let (result, state, _) = pipeline.state(gstreamer::ClockTime::from_seconds(
            timing::STOP_TIMEOUT_SECS,
        ));
        match result {
            Ok(_) => info!(state = ?state, "Capture pipeline released"),
            Err(e) => debug!(error = ?e, state = ?state, "Pipeline state change had issues"),
        }
        Ok(())
    }
}

impl Drop for GstFrameSource {
    fn drop(&mut self) {
        if self.pipeline.is_some() {
            if let Err(e) = self.release() {
                warn!(error = %e, "Failed to release capture pipeline on drop");
            }
        }
    }
}

/// Apply a deferred pause, undoing it if `start` ran while it was pending.
///
/// `start` sets the streaming flag before moving to PLAYING, so a flag seen
/// after the pause means a PLAYING request may have been overtaken.
fn pause_unless_restarted(streaming: &AtomicBool, mut set_state: impl FnMut(gstreamer::State)) {
    if streaming.load(Ordering::SeqCst) {
        debug!("Restarted before deferred pause, skipping");
        return;
    }
    set_state(gstreamer::State::Paused);
    if streaming.load(Ordering::SeqCst) {
        debug!("Restarted during deferred pause, resuming");
        set_state(gstreamer::State::Playing);
    }
}

enum LumaPlane<'a> {
    Contiguous(&'a [u8]),
    Strided,
    Truncated,
}

fn luma_plane(data: &[u8], width: u32, height: u32, stride: usize) -> LumaPlane<'_> {
    let width = width as usize;
    let height = height as usize;
    let stride = stride.max(width);
    let required = if height == 0 {
        0
    } else {
        stride * (height - 1) + width
    };

    if data.len() < required {
        LumaPlane::Truncated
    } else if stride == width {
        LumaPlane::Contiguous(&data[..width * height])
    } else {
        LumaPlane::Strided
    }
}

/// Copy `height` rows of `width` bytes out of a buffer with row padding
fn pack_rows(data: &[u8], width: u32, height: u32, stride: usize) -> Vec<u8> {
    let width = width as usize;
    let mut packed = Vec::with_capacity(width * height as usize);
    for row in data.chunks(stride).take(height as usize) {
        packed.extend_from_slice(&row[..width]);
    }
    packed
}
