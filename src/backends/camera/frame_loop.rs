// SPDX-License-Identifier: GPL-3.0-only
//! Thread lifecycle management for frame delivery loops
//!
//! Every threaded frame source owns exactly one delivery thread for its
//! whole lifetime. Streaming is paused and resumed with a [`DeliveryGate`]
//! rather than by spawning new threads, so at most one thread ever invokes
//! the frame callback of a source.

use super::types::{BackendError, BackendResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Action returned by the loop callback to control loop behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Continue running the loop
    Continue,
    /// Stop the loop gracefully
    Stop,
}

/// Controller for a delivery loop running in a dedicated named thread
///
/// # Example
///
/// ```ignore
/// let controller = CaptureLoopController::start("replay-delivery", move || {
///     if !gate.wait_open(GATE_POLL_INTERVAL) {
///         return LoopAction::Continue;
///     }
///     deliver_next_frame();
///     LoopAction::Continue
/// })?;
///
/// // Later, stop the loop
/// controller.stop();
/// ```
pub struct CaptureLoopController {
    /// Thread handle for joining
    thread_handle: Option<JoinHandle<()>>,
    /// Signal to stop the loop
    stop_signal: Arc<AtomicBool>,
    /// Name for logging
    name: String,
}

impl CaptureLoopController {
    /// Start a new loop in a separate thread
    ///
    /// The provided closure is called repeatedly until it returns `LoopAction::Stop`
    /// or the controller's `stop()` method is called.
    ///
    /// # Arguments
    ///
    /// * `name` - Thread name, also used in logging
    /// * `loop_fn` - A closure that performs one iteration of the loop
    pub fn start<F>(name: &str, mut loop_fn: F) -> BackendResult<Self>
    where
        F: FnMut() -> LoopAction + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop_signal);
        let thread_name = name.to_string();

        info!(name = %name, "Starting delivery loop");

        let thread_handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                debug!(name = %thread_name, "Delivery loop thread started");

                while !thread_stop.load(Ordering::SeqCst) {
                    if loop_fn() == LoopAction::Stop {
                        debug!(name = %thread_name, "Loop requested stop");
                        break;
                    }
                }

                info!(name = %thread_name, "Delivery loop thread exiting");
            })
            .map_err(|e| BackendError::Other(format!("failed to spawn {}: {}", name, e)))?;

        Ok(Self {
            thread_handle: Some(thread_handle),
            stop_signal,
            name: name.to_string(),
        })
    }

    /// Check if the loop is still running
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Id of the delivery thread, if it has not been joined yet
    pub fn thread_id(&self) -> Option<ThreadId> {
        self.thread_handle.as_ref().map(|h| h.thread().id())
    }

    /// Signal the loop to stop (non-blocking)
    pub fn request_stop(&self) {
        debug!(name = %self.name, "Requesting delivery loop stop");
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Stop the loop and wait for the thread to finish.
    ///
    /// When called from the delivery thread itself (a frame callback that
    /// tears its source down) the thread is detached instead of joined; it
    /// exits once the current iteration returns.
    pub fn stop(&mut self) {
        self.request_stop();

        if self.thread_id() == Some(thread::current().id()) {
            debug!(name = %self.name, "Stop requested from delivery thread, detaching");
            self.thread_handle = None;
            return;
        }

        self.join();
    }

    /// Wait for the thread to finish without sending stop signal
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            debug!(name = %self.name, "Waiting for delivery loop thread to finish");
            if let Err(e) = handle.join() {
                warn!(name = %self.name, "Delivery loop thread panicked: {:?}", e);
            } else {
                debug!(name = %self.name, "Delivery loop thread finished");
            }
        }
    }
}

impl Drop for CaptureLoopController {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            debug!(name = %self.name, "CaptureLoopController dropped, stopping loop");
            self.stop();
        }
    }
}

/// Open/closed switch that pauses a delivery loop without ending its thread
#[derive(Debug, Default)]
pub struct DeliveryGate {
    open: Mutex<bool>,
    changed: Condvar,
}

impl DeliveryGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.changed.notify_all();
    }

    pub fn close(&self) {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner) = false;
        self.changed.notify_all();
    }

    pub fn is_open(&self) -> bool {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until the gate opens or `timeout` elapses. Returns whether the
    /// gate is open.
    pub fn wait_open(&self, timeout: Duration) -> bool {
        let guard = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |open| !*open)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}
