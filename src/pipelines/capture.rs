// SPDX-License-Identifier: GPL-3.0-only

//! Corrected capture session
//!
//! Owns one frame source and turns every raw frame into a corrected frame
//! for a single listener. The listener and the streaming flag share one
//! lock; the frame source sits behind its own lock so that a slow source
//! state change never blocks delivery of a frame already in flight.

use crate::backends::camera::{
    ColorFormat, Frame, FrameCallback, FrameSource, RawFrame, SourceConfig,
};
use crate::constants::timing;
use crate::correction::CorrectionKernel;
use crate::errors::{ReaderError, ReaderResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Receives corrected frames
///
/// The frame buffer is only valid for the duration of the call.
pub trait FrameListener: Send + Sync {
    fn on_frame(&self, frame: &Frame<'_>);
}

impl<F> FrameListener for F
where
    F: Fn(&Frame<'_>) + Send + Sync,
{
    fn on_frame(&self, frame: &Frame<'_>) {
        self(frame)
    }
}

#[derive(Default)]
struct DeliveryState {
    started: bool,
    released: bool,
    listener: Option<Arc<dyn FrameListener>>,
    /// Thread currently running the listener
    delivering: Option<ThreadId>,
}

struct CaptureShared {
    state: Mutex<DeliveryState>,
    /// Signalled when an in-flight delivery finishes
    idle: Condvar,
    source: Mutex<Option<Box<dyn FrameSource>>>,
    kernel: Arc<dyn CorrectionKernel>,
    color_format: ColorFormat,
    frames_delivered: AtomicU64,
}

/// Clears the in-flight marker when a delivery ends, even on early return
struct DeliveryGuard<'a> {
    shared: &'a CaptureShared,
}

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.shared.lock_state();
        if state.delivering == Some(thread::current().id()) {
            state.delivering = None;
        }
        self.shared.idle.notify_all();
    }
}

impl CaptureShared {
    fn lock_state(&self) -> MutexGuard<'_, DeliveryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_source(&self) -> MutexGuard<'_, Option<Box<dyn FrameSource>>> {
        self.source.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_raw_frame(&self, raw: RawFrame<'_>) {
        let listener = {
            let mut state = self.lock_state();
            if !state.started || state.released {
                return;
            }
            let Some(listener) = state.listener.clone() else {
                trace!("No frame listener, skipping correction");
                return;
            };
            state.delivering = Some(thread::current().id());
            listener
        };
        let _delivery = DeliveryGuard { shared: self };

        let frame_start = Instant::now();
        let mut corrected = vec![0u8; self.color_format.buffer_len(raw.width, raw.height)];
        if let Err(e) = self.kernel.correct(
            raw.width,
            raw.height,
            raw.data,
            self.color_format,
            &mut corrected,
        ) {
            warn!(error = %e, width = raw.width, height = raw.height, "Correction failed, dropping frame");
            return;
        }
        let correction_time = frame_start.elapsed();

        listener.on_frame(&Frame {
            data: &corrected,
            width: raw.width,
            height: raw.height,
            color_format: self.color_format,
        });

        let frame_num = self.frames_delivered.fetch_add(1, Ordering::Relaxed);
        if frame_num % timing::FRAME_LOG_INTERVAL == 0 {
            debug!(
                frame = frame_num,
                width = raw.width,
                height = raw.height,
                kernel = self.kernel.name(),
                correction_us = correction_time.as_micros(),
                total_us = frame_start.elapsed().as_micros(),
                "Frame performance"
            );
        }
    }
}

impl Drop for CaptureShared {
    fn drop(&mut self) {
        let source = self
            .source
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut source) = source {
            debug!("Capture session dropped without release, releasing source");
            teardown(source.as_mut());
        }
    }
}

/// Stop and release a source, logging failures
fn teardown(source: &mut dyn FrameSource) {
    source.set_frame_callback(None);
    if let Err(e) = source.stop() {
        warn!(source = source.name(), error = %e, "Failed to stop frame source");
    }
    if let Err(e) = source.release() {
        warn!(source = source.name(), error = %e, "Failed to release frame source");
    }
}

/// Capture session producing corrected frames
///
/// A cheap handle; clones refer to the same session. All methods may be
/// called from any thread, including from inside the frame listener.
#[derive(Clone)]
pub struct CaptureSession {
    shared: Arc<CaptureShared>,
}

impl CaptureSession {
    /// Open a capture session with the default dual-fisheye configuration
    pub fn new(
        source: impl FrameSource + 'static,
        kernel: Arc<dyn CorrectionKernel>,
        color_format: ColorFormat,
    ) -> ReaderResult<Self> {
        Self::with_config(
            Box::new(source),
            kernel,
            color_format,
            &SourceConfig::default(),
        )
    }

    /// Open a capture session with an explicit source configuration
    ///
    /// # Returns
    /// * `Err(ReaderError::Construction)` - The source could not be opened or
    ///   rejected the configuration
    pub fn with_config(
        mut source: Box<dyn FrameSource>,
        kernel: Arc<dyn CorrectionKernel>,
        color_format: ColorFormat,
        config: &SourceConfig,
    ) -> ReaderResult<Self> {
        info!(
            source = source.name(),
            kernel = kernel.name(),
            %color_format,
            width = config.preview_width,
            height = config.preview_height,
            fps = %config.fps_range,
            "Opening capture session"
        );

        config.validate().map_err(ReaderError::Construction)?;
        source.configure(config).map_err(ReaderError::Construction)?;

        let shared = Arc::new(CaptureShared {
            state: Mutex::new(DeliveryState::default()),
            idle: Condvar::new(),
            source: Mutex::new(None),
            kernel,
            color_format,
            frames_delivered: AtomicU64::new(0),
        });

        let weak = Arc::downgrade(&shared);
        let callback: FrameCallback = Arc::new(move |raw: RawFrame<'_>| {
            if let Some(shared) = weak.upgrade() {
                shared.on_raw_frame(raw);
            }
        });
        source.set_frame_callback(Some(callback));
        *shared.lock_source() = Some(source);

        Ok(Self { shared })
    }

    /// Begin frame delivery
    ///
    /// # Returns
    /// * `Err(ReaderError::IllegalState)` - The session was released
    /// * `Err(ReaderError::Source)` - The source failed to start streaming
    pub fn start(&self) -> ReaderResult<()> {
        let mut source = self.shared.lock_source();
        let Some(source) = source.as_mut() else {
            return Err(ReaderError::IllegalState("capture session released"));
        };

        {
            let mut state = self.shared.lock_state();
            if state.released {
                return Err(ReaderError::IllegalState("capture session released"));
            }
            state.started = true;
        }

        if let Err(e) = source.start() {
            self.shared.lock_state().started = false;
            return Err(ReaderError::Source(e));
        }

        info!(source = source.name(), "Capture started");
        Ok(())
    }

    /// Halt frame delivery. Idempotent; safe in any state.
    ///
    /// Frames not yet handed to the listener are dropped. A delivery already
    /// in progress completes.
    pub fn stop(&self) {
        {
            let mut state = self.shared.lock_state();
            if !state.started {
                return;
            }
            state.started = false;
        }

        if let Some(source) = self.shared.lock_source().as_mut() {
            if let Err(e) = source.stop() {
                warn!(source = source.name(), error = %e, "Failed to stop frame source");
            }
        }
        info!("Capture stopped");
    }

    /// Stop delivery, detach the listener and release the source.
    ///
    /// Terminal and idempotent. Waits for a delivery in progress on another
    /// thread to finish; called from inside the listener it returns without
    /// waiting. Teardown failures are logged, never returned.
    pub fn release(&self) {
        {
            let mut state = self.shared.lock_state();
            if state.released {
                debug!("Capture session already released");
                return;
            }
            state.released = true;
            state.started = false;
            state.listener = None;

            let current = thread::current().id();
            while state.delivering.is_some_and(|id| id != current) {
                state = self
                    .shared
                    .idle
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }

        let source = self.shared.lock_source().take();
        if let Some(mut source) = source {
            teardown(source.as_mut());
        }
        info!("Capture session released");
    }

    /// Replace the frame listener. `None` disables correction entirely.
    ///
    /// A delivery in progress keeps the listener it started with.
    pub fn set_listener(&self, listener: Option<Arc<dyn FrameListener>>) {
        let mut state = self.shared.lock_state();
        if state.released {
            debug!("Ignoring listener change on released capture session");
            return;
        }
        state.listener = listener;
    }

    pub fn is_started(&self) -> bool {
        self.shared.lock_state().started
    }

    pub fn is_released(&self) -> bool {
        self.shared.lock_state().released
    }

    pub fn color_format(&self) -> ColorFormat {
        self.shared.color_format
    }

    /// Frames corrected and handed to a listener so far
    pub fn frames_delivered(&self) -> u64 {
        self.shared.frames_delivered.load(Ordering::Relaxed)
    }
}
