// SPDX-License-Identifier: GPL-3.0-only

//! Shared helpers for integration tests

#![allow(dead_code)]

use fisheye_qr_reader::backends::camera::Frame;
use fisheye_qr_reader::pipelines::scan::{
    CameraDirection, DecodeError, Region, RegionDecoder, ScanListener,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Route tracing output through the test harness
pub fn init_logging() {
    fisheye_qr_reader::logging::init_for_tests();
}

/// Paint a QR code for `text` into a white luma frame at (`left`, `top`)
///
/// Modules are 4 pixels wide with a 4 module quiet zone.
pub fn paint_qr(text: &str, width: u32, height: u32, left: u32, top: u32) -> Vec<u8> {
    let code = qrcode::QrCode::new(text.as_bytes()).unwrap();
    let modules = code.width() as u32;
    let colors = code.to_colors();
    let scale = 4;
    let quiet = 4;
    let mut luma = vec![255u8; (width * height) as usize];
    for my in 0..modules {
        for mx in 0..modules {
            if colors[(my * modules + mx) as usize] != qrcode::Color::Dark {
                continue;
            }
            for dy in 0..scale {
                for dx in 0..scale {
                    let x = left + (quiet + mx) * scale + dx;
                    let y = top + (quiet + my) * scale + dy;
                    luma[(y * width + x) as usize] = 0;
                }
            }
        }
    }
    luma
}

/// Decoder answering from a script, one entry per call
///
/// Calls past the end of the script miss.
#[derive(Default)]
pub struct ScriptedDecoder {
    script: Mutex<VecDeque<Option<&'static str>>>,
    calls: Mutex<Vec<(CameraDirection, Region)>>,
}

impl ScriptedDecoder {
    pub fn new(script: impl IntoIterator<Item = Option<&'static str>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Directions decoded so far, derived from the requested regions
    pub fn directions(&self) -> Vec<CameraDirection> {
        self.calls.lock().unwrap().iter().map(|(d, _)| *d).collect()
    }

    pub fn regions(&self) -> Vec<Region> {
        self.calls.lock().unwrap().iter().map(|(_, r)| *r).collect()
    }
}

impl RegionDecoder for ScriptedDecoder {
    fn decode(&self, frame: &Frame<'_>, region: Region) -> Result<String, DecodeError> {
        let direction = if region.left == 0 {
            CameraDirection::Front
        } else {
            CameraDirection::Back
        };
        assert!(region.fits(frame.width, frame.height));
        self.calls.lock().unwrap().push((direction, region));

        match self.script.lock().unwrap().pop_front().flatten() {
            Some(text) => Ok(text.to_string()),
            None => Err(DecodeError::NotFound),
        }
    }
}

/// Listener recording every callback it receives
#[derive(Default)]
pub struct RecordingListener {
    results: Mutex<Vec<(CameraDirection, Option<String>)>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn results(&self) -> Vec<(CameraDirection, Option<String>)> {
        self.results.lock().unwrap().clone()
    }
}

impl ScanListener for RecordingListener {
    fn on_result(&self, direction: CameraDirection, text: Option<&str>) {
        self.results
            .lock()
            .unwrap()
            .push((direction, text.map(str::to_string)));
    }
}

/// Decoder whose first call blocks until [`GatedDecoder::open`]
///
/// Every call misses. The first call signals `entered` before blocking.
pub struct GatedDecoder {
    blocked: AtomicBool,
    entered: Mutex<mpsc::Sender<()>>,
    gate: Mutex<mpsc::Receiver<()>>,
    opener: Mutex<mpsc::Sender<()>>,
}

impl GatedDecoder {
    /// Decoder plus the receiver signalled when the first decode is in flight
    pub fn new() -> (Arc<Self>, mpsc::Receiver<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (gate_tx, gate_rx) = mpsc::channel();
        let decoder = Arc::new(Self {
            blocked: AtomicBool::new(false),
            entered: Mutex::new(entered_tx),
            gate: Mutex::new(gate_rx),
            opener: Mutex::new(gate_tx),
        });
        (decoder, entered_rx)
    }

    /// Let the blocked decode finish
    pub fn open(&self) {
        let _ = self.opener.lock().unwrap().send(());
    }
}

impl RegionDecoder for GatedDecoder {
    fn decode(&self, _frame: &Frame<'_>, _region: Region) -> Result<String, DecodeError> {
        if !self.blocked.swap(true, Ordering::SeqCst) {
            self.entered.lock().unwrap().send(()).unwrap();
            self.gate
                .lock()
                .unwrap()
                .recv_timeout(Duration::from_secs(5))
                .unwrap();
        }
        Err(DecodeError::NotFound)
    }
}
