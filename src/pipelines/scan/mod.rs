// SPDX-License-Identifier: GPL-3.0-only

//! Two-region QR scan dispatcher
//!
//! Wraps one [`CaptureSession`] delivering GRAY8 frames. For every frame the
//! back region (right half) is decoded first, then the front region (left
//! half). Every attempt re-reads the capturing flag and the result listener
//! under the dispatcher lock, so:
//!
//! - the first successful decode stops the session before its result is
//!   reported, and the front attempt of that same frame is skipped
//! - a listener swap affects whole region attempts only; one attempt reports
//!   to the listener it read, never to a mixture
//!
//! # Lifecycle
//!
//! | state \ op | start | stop | release | set listener |
//! |---|---|---|---|---|
//! | Created | Started | no-op | Released | ok |
//! | Started | no-op | Stopped | Released | ok |
//! | Stopped | Started | no-op | Released | ok |
//! | Released | illegal | illegal | no-op | illegal |
//!
//! A successful decode moves Started to Stopped.

pub mod decoder;
pub mod types;

pub use decoder::{RegionDecoder, RqrrDecoder};
pub use types::{CameraDirection, DecodeError, Region, ScanResult};

use crate::backends::camera::{ColorFormat, Frame, FrameSource, SourceConfig};
use crate::config::ReaderConfig;
use crate::correction::{self, CorrectionKernel, FisheyeCorrector};
use crate::errors::{ReaderError, ReaderResult};
use crate::pipelines::capture::{CaptureSession, FrameListener};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

/// Receives region decode outcomes
///
/// `text` is `Some` for a successful decode and `None` for a miss.
pub trait ScanListener: Send + Sync {
    fn on_result(&self, direction: CameraDirection, text: Option<&str>);
}

impl<F> ScanListener for F
where
    F: Fn(CameraDirection, Option<&str>) + Send + Sync,
{
    fn on_result(&self, direction: CameraDirection, text: Option<&str>) {
        self(direction, text)
    }
}

/// Listener forwarding results into a tokio channel
#[derive(Debug, Clone)]
pub struct ChannelListener {
    sender: mpsc::UnboundedSender<ScanResult>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ScanResult>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ScanListener for ChannelListener {
    fn on_result(&self, direction: CameraDirection, text: Option<&str>) {
        if self
            .sender
            .send(ScanResult::new(direction, text.map(str::to_owned)))
            .is_err()
        {
            trace!(%direction, "Result receiver dropped");
        }
    }
}

/// Dispatcher lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Started,
    Stopped,
    Released,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Start,
    Stop,
    Release,
    SetListener,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    /// Move to the given state
    Enter(SessionState),
    /// Nothing to do
    Stay,
}

impl SessionState {
    fn on(self, command: Command) -> ReaderResult<Transition> {
        use SessionState::*;

        match (self, command) {
            (Released, Command::Release) => Ok(Transition::Stay),
            (Released, _) => Err(ReaderError::IllegalState("scan dispatcher released")),
            (Created | Stopped, Command::Start) => Ok(Transition::Enter(Started)),
            (Started, Command::Start) => Ok(Transition::Stay),
            (Started, Command::Stop) => Ok(Transition::Enter(Stopped)),
            (Created | Stopped, Command::Stop) => Ok(Transition::Stay),
            (_, Command::Release) => Ok(Transition::Enter(Released)),
            (_, Command::SetListener) => Ok(Transition::Stay),
        }
    }
}

struct DispatchState {
    phase: SessionState,
    /// Bumped on every start so a late success cannot stop a newer run
    generation: u64,
    listener: Option<Arc<dyn ScanListener>>,
}

struct DispatchShared {
    state: Mutex<DispatchState>,
    /// Serializes start, stop and release
    control: Mutex<()>,
    capture: CaptureSession,
    decoder: Arc<dyn RegionDecoder>,
}

impl DispatchShared {
    fn lock_state(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_control(&self) -> MutexGuard<'_, ()> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Listener and run generation if capturing
    fn snapshot(&self) -> Option<(Arc<dyn ScanListener>, u64)> {
        let state = self.lock_state();
        if state.phase != SessionState::Started {
            return None;
        }
        state
            .listener
            .clone()
            .map(|listener| (listener, state.generation))
    }

    fn dispatch(&self, frame: &Frame<'_>) {
        for direction in CameraDirection::SCAN_ORDER {
            let Some((listener, generation)) = self.snapshot() else {
                trace!(%direction, "Not capturing, skipping region");
                continue;
            };

            let region = direction.region(frame.width, frame.height);
            match self.decoder.decode(frame, region) {
                Ok(text) => {
                    info!(%direction, "Code found, stopping capture");
                    self.stop_after_success(generation);
                    listener.on_result(direction, Some(&text));
                }
                Err(e) => {
                    trace!(%direction, error = %e, "No code in region");
                    listener.on_result(direction, None);
                }
            }
        }
    }

    fn stop_after_success(&self, generation: u64) {
        {
            let mut state = self.lock_state();
            if state.phase != SessionState::Started || state.generation != generation {
                return;
            }
            state.phase = SessionState::Stopped;
        }
        self.capture.stop();
    }
}

/// Scans both lenses of a dual-fisheye camera for a QR code
///
/// A cheap handle; clones refer to the same dispatcher. All methods may be
/// called from any thread, including from inside the result listener.
#[derive(Clone)]
pub struct ScanDispatcher {
    shared: Arc<DispatchShared>,
}

impl ScanDispatcher {
    /// Open a dispatcher with the CPU correction kernel and the rqrr decoder
    pub fn new(source: impl FrameSource + 'static) -> ReaderResult<Self> {
        Self::builder(source)
            .kernel(Arc::new(FisheyeCorrector::default()))
            .build()
    }

    pub fn builder(source: impl FrameSource + 'static) -> ScanDispatcherBuilder {
        ScanDispatcherBuilder::new(Box::new(source))
    }

    /// Begin capturing. No-op when already capturing.
    pub fn start(&self) -> ReaderResult<()> {
        let _control = self.shared.lock_control();

        let previous = {
            let mut state = self.shared.lock_state();
            let previous = state.phase;
            match previous.on(Command::Start)? {
                Transition::Stay => return Ok(()),
                Transition::Enter(next) => {
                    state.phase = next;
                    state.generation += 1;
                }
            }
            previous
        };

        if let Err(e) = self.shared.capture.start() {
            let mut state = self.shared.lock_state();
            if state.phase == SessionState::Started {
                state.phase = previous;
            }
            return Err(e);
        }

        info!("Scanning started");
        Ok(())
    }

    /// Stop capturing. No-op unless capturing.
    pub fn stop(&self) -> ReaderResult<()> {
        let _control = self.shared.lock_control();

        {
            let mut state = self.shared.lock_state();
            match state.phase.on(Command::Stop)? {
                Transition::Stay => return Ok(()),
                Transition::Enter(next) => state.phase = next,
            }
        }

        self.shared.capture.stop();
        info!("Scanning stopped");
        Ok(())
    }

    /// Release the camera. Terminal and idempotent.
    ///
    /// Waits for a dispatch running on another thread to finish. That
    /// dispatch may still call back into the dispatcher; it then sees the
    /// released state.
    pub fn release(&self) -> ReaderResult<()> {
        let control = self.shared.lock_control();

        {
            let mut state = self.shared.lock_state();
            match state.phase.on(Command::Release)? {
                Transition::Stay => {
                    debug!("Scan dispatcher already released");
                    return Ok(());
                }
                Transition::Enter(next) => {
                    state.phase = next;
                    state.listener = None;
                }
            }
        }
        drop(control);

        self.shared.capture.release();
        info!("Scan dispatcher released");
        Ok(())
    }

    /// Whether frames are currently being scanned
    pub fn is_capturing(&self) -> bool {
        self.shared.lock_state().phase == SessionState::Started
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock_state().phase
    }

    /// Replace the result listener. `None` suspends reporting; frames are
    /// still captured but regions are not decoded.
    pub fn set_result_listener(&self, listener: Option<Arc<dyn ScanListener>>) -> ReaderResult<()> {
        let mut state = self.shared.lock_state();
        state.phase.on(Command::SetListener)?;
        state.listener = listener;
        Ok(())
    }

    /// Install a [`ChannelListener`] and return its receiving end
    pub fn subscribe(&self) -> ReaderResult<mpsc::UnboundedReceiver<ScanResult>> {
        let (listener, receiver) = ChannelListener::new();
        self.set_result_listener(Some(Arc::new(listener)))?;
        Ok(receiver)
    }

    /// Frames delivered to the dispatcher so far
    pub fn frames_scanned(&self) -> u64 {
        self.shared.capture.frames_delivered()
    }
}

/// Builder for [`ScanDispatcher`]
pub struct ScanDispatcherBuilder {
    source: Box<dyn FrameSource>,
    kernel: Option<Arc<dyn CorrectionKernel>>,
    decoder: Option<Arc<dyn RegionDecoder>>,
    config: ReaderConfig,
}

impl ScanDispatcherBuilder {
    fn new(source: Box<dyn FrameSource>) -> Self {
        Self {
            source,
            kernel: None,
            decoder: None,
            config: ReaderConfig::default(),
        }
    }

    /// Use this configuration. Its correction settings apply unless a
    /// kernel is set explicitly.
    pub fn config(mut self, config: ReaderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn source_config(mut self, source_config: SourceConfig) -> Self {
        self.config.capture = source_config;
        self
    }

    pub fn kernel(mut self, kernel: Arc<dyn CorrectionKernel>) -> Self {
        self.kernel = Some(kernel);
        self
    }

    pub fn decoder(mut self, decoder: Arc<dyn RegionDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn build(self) -> ReaderResult<ScanDispatcher> {
        self.config.validate()?;

        let kernel = match self.kernel {
            Some(kernel) => kernel,
            None => correction::create_kernel(&self.config.correction)?,
        };
        let decoder: Arc<dyn RegionDecoder> = match self.decoder {
            Some(decoder) => decoder,
            None => Arc::new(match self.config.scan.max_decode_dimension {
                Some(max) => RqrrDecoder::with_max_dimension(max),
                None => RqrrDecoder::new(),
            }),
        };

        let capture = CaptureSession::with_config(
            self.source,
            kernel,
            ColorFormat::Gray8,
            &self.config.capture,
        )?;

        let shared = Arc::new(DispatchShared {
            state: Mutex::new(DispatchState {
                phase: SessionState::Created,
                generation: 0,
                listener: None,
            }),
            control: Mutex::new(()),
            capture,
            decoder,
        });

        let weak = Arc::downgrade(&shared);
        let frame_listener: Arc<dyn FrameListener> = Arc::new(move |frame: &Frame<'_>| {
            if let Some(shared) = weak.upgrade() {
                shared.dispatch(frame);
            }
        });
        shared.capture.set_listener(Some(frame_listener));

        debug!("Scan dispatcher created");
        Ok(ScanDispatcher { shared })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use SessionState::*;

        let cases = [
            (Created, Command::Start, Some(Transition::Enter(Started))),
            (Created, Command::Stop, Some(Transition::Stay)),
            (Created, Command::Release, Some(Transition::Enter(Released))),
            (Started, Command::Start, Some(Transition::Stay)),
            (Started, Command::Stop, Some(Transition::Enter(Stopped))),
            (Started, Command::Release, Some(Transition::Enter(Released))),
            (Stopped, Command::Start, Some(Transition::Enter(Started))),
            (Stopped, Command::Stop, Some(Transition::Stay)),
            (Stopped, Command::SetListener, Some(Transition::Stay)),
            (Released, Command::Release, Some(Transition::Stay)),
            (Released, Command::Start, None),
            (Released, Command::Stop, None),
            (Released, Command::SetListener, None),
        ];

        for (state, command, expected) in cases {
            assert_eq!(
                state.on(command).ok(),
                expected,
                "{:?} on {:?}",
                command,
                state
            );
        }
    }

    #[tokio::test]
    async fn test_channel_listener_forwards_results() {
        let (listener, mut receiver) = ChannelListener::new();
        listener.on_result(CameraDirection::Back, None);
        listener.on_result(CameraDirection::Front, Some("code"));

        assert_eq!(
            receiver.recv().await,
            Some(ScanResult::new(CameraDirection::Back, None))
        );
        assert_eq!(
            receiver.recv().await,
            Some(ScanResult::new(CameraDirection::Front, Some("code".into())))
        );
    }
}
