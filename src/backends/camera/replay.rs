// SPDX-License-Identifier: GPL-3.0-only

//! Replay frame source
//!
//! Plays a fixed set of luminance frames in a loop at the configured frame
//! rate, for running the reader against recorded captures.

use super::FrameSource;
use super::frame_loop::{CaptureLoopController, DeliveryGate, LoopAction};
use super::types::*;
use crate::constants::{file_formats, timing};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

/// Load an image file as a luminance frame
pub fn load_luma_frame(path: &Path) -> BackendResult<OwnedFrame> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    if !file_formats::is_image_extension(extension) {
        return Err(BackendError::Other(format!(
            "Unsupported file format: {}",
            extension
        )));
    }

    info!(path = %path.display(), "Loading replay frame");
    let img = image::open(path).map_err(|e| {
        BackendError::IoError(format!("Failed to load image '{}': {}", path.display(), e))
    })?;

    let luma = img.to_luma8();
    let (width, height) = luma.dimensions();
    OwnedFrame::new(luma.into_raw(), width, height)
}

/// Delivery counters of a replay source, readable after the source has
/// been handed to a capture session
#[derive(Debug, Clone, Default)]
pub struct ReplayStats {
    delivered: Arc<AtomicU64>,
    dropped_ticks: Arc<AtomicU64>,
}

impl ReplayStats {
    /// Frames handed to the callback
    pub fn frames_delivered(&self) -> u64 {
        self.delivered.load(Ordering::SeqCst)
    }

    /// Ticks skipped because the previous callback was still running
    pub fn dropped_ticks(&self) -> u64 {
        self.dropped_ticks.load(Ordering::SeqCst)
    }
}

/// Frame source replaying in-memory frames on a dedicated thread
pub struct ReplayFrameSource {
    frames: Arc<Vec<OwnedFrame>>,
    gate: Arc<DeliveryGate>,
    callback: Arc<Mutex<Option<FrameCallback>>>,
    controller: Option<CaptureLoopController>,
    stats: ReplayStats,
    released: bool,
}

impl ReplayFrameSource {
    pub fn new(frames: Vec<OwnedFrame>) -> BackendResult<Self> {
        if frames.is_empty() {
            return Err(BackendError::OpenFailed(
                "replay source needs at least one frame".to_string(),
            ));
        }
        Ok(Self {
            frames: Arc::new(frames),
            gate: Arc::new(DeliveryGate::new()),
            callback: Arc::new(Mutex::new(None)),
            controller: None,
            stats: ReplayStats::default(),
            released: false,
        })
    }

    /// Load every image in `paths` as a replay frame
    pub fn from_paths<P: AsRef<Path>>(paths: &[P]) -> BackendResult<Self> {
        let frames = paths
            .iter()
            .map(|p| load_luma_frame(p.as_ref()))
            .collect::<BackendResult<Vec<_>>>()?;
        Self::new(frames)
    }

    pub fn stats(&self) -> ReplayStats {
        self.stats.clone()
    }
}

/// Tick schedule that skips ticks missed while a delivery was running
#[derive(Debug)]
struct TickSchedule {
    interval: Duration,
    next: Option<Instant>,
}

impl TickSchedule {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: None,
        }
    }

    fn reset(&mut self) {
        self.next = None;
    }

    /// Time left until the next tick, starting the schedule if needed
    fn remaining(&mut self, now: Instant) -> Duration {
        let next = *self.next.get_or_insert(now);
        next.saturating_duration_since(now)
    }

    /// Advance past a delivery that finished at `finished`.
    /// Returns the number of ticks skipped.
    fn advance(&mut self, finished: Instant) -> u64 {
        let Some(tick) = self.next else {
            return 0;
        };
        let mut next = tick + self.interval;
        let mut missed = 0;
        if finished > next {
            let behind = (finished - next).as_nanos() / self.interval.as_nanos().max(1) + 1;
            missed = u64::try_from(behind).unwrap_or(u64::MAX);
            next = u32::try_from(missed)
                .ok()
                .and_then(|steps| self.interval.checked_mul(steps))
                .and_then(|skipped| next.checked_add(skipped))
                .unwrap_or(finished + self.interval);
        }
        self.next = Some(next);
        missed
    }
}

impl FrameSource for ReplayFrameSource {
    fn name(&self) -> &str {
        "replay"
    }

    fn configure(&mut self, config: &SourceConfig) -> BackendResult<()> {
        config.validate()?;
        if self.released {
            return Err(BackendError::NotConfigured);
        }
        if self.controller.is_some() {
            return Err(BackendError::Other("replay source already configured".to_string()));
        }

        let mut schedule = TickSchedule::new(Duration::from_secs(1) / config.fps_range.max);
        let frames = Arc::clone(&self.frames);
        let gate = Arc::clone(&self.gate);
        let callback = Arc::clone(&self.callback);
        let stats = self.stats.clone();
        let mut index = 0usize;

        debug!(frames = frames.len(), fps = config.fps_range.max, "Configuring replay source");

        let controller = CaptureLoopController::start("replay-delivery", move || {
            if !gate.wait_open(timing::GATE_POLL_INTERVAL) {
                schedule.reset();
                return LoopAction::Continue;
            }

            let remaining = schedule.remaining(Instant::now());
            if !remaining.is_zero() {
                thread::sleep(remaining.min(timing::GATE_POLL_INTERVAL));
                return LoopAction::Continue;
            }

            let frame = &frames[index % frames.len()];
            index = index.wrapping_add(1);

            let current = callback
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(current) = current {
                current(frame.as_raw());
                stats.delivered.fetch_add(1, Ordering::SeqCst);
            }

            let missed = schedule.advance(Instant::now());
            if missed > 0 {
                trace!(missed, "Skipped replay ticks behind a slow callback");
                stats.dropped_ticks.fetch_add(missed, Ordering::SeqCst);
            }
            LoopAction::Continue
        })?;

        self.controller = Some(controller);
        Ok(())
    }

    fn set_frame_callback(&mut self, callback: Option<FrameCallback>) {
        *self.callback.lock().unwrap_or_else(PoisonError::into_inner) = callback;
    }

    fn start(&mut self) -> BackendResult<()> {
        if self.controller.is_none() {
            return Err(BackendError::NotConfigured);
        }
        self.gate.open();
        debug!("Replay source started");
        Ok(())
    }

    fn stop(&mut self) -> BackendResult<()> {
        self.gate.close();
        debug!("Replay source stopped");
        Ok(())
    }

    fn release(&mut self) -> BackendResult<()> {
        self.released = true;
        self.gate.close();
        self.set_frame_callback(None);
        if let Some(mut controller) = self.controller.take() {
            controller.stop();
        }
        info!(
            delivered = self.stats.frames_delivered(),
            dropped_ticks = self.stats.dropped_ticks(),
            "Replay source released"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn frame(value: u8) -> OwnedFrame {
        OwnedFrame::new(vec![value; 4], 2, 2).unwrap()
    }

    #[test]
    fn test_empty_frame_list_rejected() {
        assert!(ReplayFrameSource::new(Vec::new()).is_err());
    }

    #[test]
    fn test_unsupported_extension_rejected() {
        assert!(load_luma_frame(Path::new("capture.raw")).is_err());
    }

    #[test]
    fn test_schedule_skips_missed_ticks() {
        let interval = Duration::from_millis(100);
        let mut schedule = TickSchedule::new(interval);
        let start = Instant::now();

        assert!(schedule.remaining(start).is_zero());
        // Delivery took 250ms: ticks at +100 and +200 are gone
        assert_eq!(schedule.advance(start + Duration::from_millis(250)), 2);
        assert_eq!(
            schedule.remaining(start + Duration::from_millis(250)),
            Duration::from_millis(50)
        );
        // A fast delivery skips nothing
        assert_eq!(schedule.advance(start + Duration::from_millis(310)), 0);
    }

    #[test]
    fn test_schedule_survives_more_missed_ticks_than_u32() {
        let interval = Duration::from_nanos(1);
        let mut schedule = TickSchedule::new(interval);
        let start = Instant::now();
        schedule.remaining(start);

        let finished = start + Duration::from_secs(10);
        let missed = schedule.advance(finished);
        assert!(missed > u32::MAX as u64);
        // Next tick lies after the slow delivery, not in the past
        assert_eq!(schedule.remaining(finished), interval);
    }

    #[test]
    fn test_delivers_frames_in_order_while_started() {
        let mut source = ReplayFrameSource::new(vec![frame(1), frame(2)]).unwrap();
        let config = SourceConfig {
            fps_range: FpsRange::fixed(100),
            ..Default::default()
        };
        source.configure(&config).unwrap();

        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        source.set_frame_callback(Some(Arc::new(move |raw: RawFrame<'_>| {
            let _ = tx.lock().unwrap().send(raw.data[0]);
        })));

        source.start().unwrap();
        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        source.release().unwrap();

        assert_eq!((first, second), (1, 2));
    }

    #[test]
    fn test_start_before_configure_fails() {
        let mut source = ReplayFrameSource::new(vec![frame(0)]).unwrap();
        assert!(matches!(source.start(), Err(BackendError::NotConfigured)));
    }
}
