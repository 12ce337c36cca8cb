// SPDX-License-Identifier: GPL-3.0-only

//! Manually driven frame source
//!
//! Frames are pushed through a [`FrameInjector`] and delivered synchronously
//! on the injecting thread. Embedders with their own camera driver use this
//! to feed the reader; tests use it for deterministic delivery.

use super::FrameSource;
use super::types::*;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

#[derive(Default)]
struct ManualState {
    config: Option<SourceConfig>,
    callback: Option<FrameCallback>,
    streaming: bool,
    released: bool,
}

#[derive(Default)]
struct ManualShared {
    state: Mutex<ManualState>,
    /// Held for the duration of one delivery so injections never overlap
    delivery: Mutex<()>,
}

impl ManualShared {
    fn state(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Frame source whose frames come from a [`FrameInjector`]
pub struct ManualFrameSource {
    shared: Arc<ManualShared>,
}

/// Producer side of a [`ManualFrameSource`]
#[derive(Clone)]
pub struct FrameInjector {
    shared: Arc<ManualShared>,
}

impl ManualFrameSource {
    pub fn new() -> (Self, FrameInjector) {
        let shared = Arc::new(ManualShared::default());
        (
            Self {
                shared: Arc::clone(&shared),
            },
            FrameInjector { shared },
        )
    }
}

impl FrameInjector {
    /// Deliver one raw frame.
    ///
    /// Blocks while another injection is being delivered. Returns `false`
    /// if the frame was dropped because the source is not streaming or has
    /// no callback.
    pub fn deliver(&self, data: &[u8], width: u32, height: u32) -> bool {
        let _delivery = self
            .shared
            .delivery
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let callback = {
            let state = self.shared.state();
            if !state.streaming || state.released {
                return false;
            }
            match &state.callback {
                Some(callback) => Arc::clone(callback),
                None => return false,
            }
        };

        callback(RawFrame {
            data,
            width,
            height,
        });
        true
    }

    /// Deliver an owned frame
    pub fn deliver_frame(&self, frame: &OwnedFrame) -> bool {
        self.deliver(&frame.data, frame.width, frame.height)
    }

    /// Configuration applied by the capture session, if any
    pub fn config(&self) -> Option<SourceConfig> {
        self.shared.state().config.clone()
    }

    pub fn is_streaming(&self) -> bool {
        self.shared.state().streaming
    }

    pub fn is_released(&self) -> bool {
        self.shared.state().released
    }
}

impl FrameSource for ManualFrameSource {
    fn name(&self) -> &str {
        "manual"
    }

    fn configure(&mut self, config: &SourceConfig) -> BackendResult<()> {
        config.validate()?;
        let mut state = self.shared.state();
        if state.released {
            return Err(BackendError::NotConfigured);
        }
        state.config = Some(config.clone());
        Ok(())
    }

    fn set_frame_callback(&mut self, callback: Option<FrameCallback>) {
        self.shared.state().callback = callback;
    }

    fn start(&mut self) -> BackendResult<()> {
        let mut state = self.shared.state();
        if state.released || state.config.is_none() {
            return Err(BackendError::NotConfigured);
        }
        state.streaming = true;
        debug!("Manual source streaming");
        Ok(())
    }

    fn stop(&mut self) -> BackendResult<()> {
        self.shared.state().streaming = false;
        Ok(())
    }

    fn release(&mut self) -> BackendResult<()> {
        let mut state = self.shared.state();
        state.streaming = false;
        state.released = true;
        state.callback = None;
        debug!("Manual source released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_drops_frames_until_started() {
        let (mut source, injector) = ManualFrameSource::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        source.configure(&SourceConfig::default()).unwrap();
        source.set_frame_callback(Some(Arc::new(move |_: RawFrame<'_>| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        })));

        assert!(!injector.deliver(&[0; 4], 2, 2));
        source.start().unwrap();
        assert!(injector.deliver(&[0; 4], 2, 2));
        source.stop().unwrap();
        assert!(!injector.deliver(&[0; 4], 2, 2));

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_start_requires_configure() {
        let (mut source, _injector) = ManualFrameSource::new();
        assert!(source.start().is_err());
    }

    #[test]
    fn test_release_is_terminal() {
        let (mut source, injector) = ManualFrameSource::new();
        source.configure(&SourceConfig::default()).unwrap();
        source.release().unwrap();

        assert!(injector.is_released());
        assert!(source.start().is_err());
        assert!(source.release().is_ok());
    }
}
