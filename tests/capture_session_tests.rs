// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the corrected capture session

use fisheye_qr_reader::backends::camera::{
    ColorFormat, Frame, FpsRange, ManualFrameSource, OwnedFrame, ReplayFrameSource, SourceConfig,
};
use fisheye_qr_reader::pipelines::capture::CaptureSession;
use fisheye_qr_reader::{FisheyeCorrector, Passthrough, ReaderError};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[test]
fn test_applies_source_config_on_open() {
    let (source, injector) = ManualFrameSource::new();
    let config = SourceConfig {
        preview_width: 640,
        preview_height: 320,
        fps_range: FpsRange::fixed(15),
        ..SourceConfig::default()
    };
    let _session = CaptureSession::with_config(
        Box::new(source),
        Arc::new(Passthrough),
        ColorFormat::Gray8,
        &config,
    )
    .unwrap();

    assert_eq!(injector.config(), Some(config));
    assert!(!injector.is_streaming());
}

#[test]
fn test_invalid_source_config_is_construction_error() {
    let (source, _injector) = ManualFrameSource::new();
    let config = SourceConfig {
        preview_width: 0,
        ..SourceConfig::default()
    };
    let result = CaptureSession::with_config(
        Box::new(source),
        Arc::new(Passthrough),
        ColorFormat::Gray8,
        &config,
    );
    assert!(matches!(result, Err(ReaderError::Construction(_))));
}

#[test]
fn test_corrected_frame_keeps_hemisphere_centres() {
    let (source, injector) = ManualFrameSource::new();
    let session =
        CaptureSession::new(source, Arc::new(FisheyeCorrector::default()), ColorFormat::Gray8)
            .unwrap();
    let captured = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&captured);
    session.set_listener(Some(Arc::new(move |frame: &Frame<'_>| {
        *sink.lock().unwrap() = frame.data.to_vec();
    })));
    session.start().unwrap();

    let (width, height) = (16u32, 8u32);
    let raw: Vec<u8> = (0..width * height).map(|i| (i % 251) as u8).collect();
    assert!(injector.deliver(&raw, width, height));

    let corrected = captured.lock().unwrap().clone();
    assert_eq!(corrected.len(), raw.len());
    for (cx, cy) in [(4u32, 4u32), (12, 4)] {
        let index = (cy * width + cx) as usize;
        assert_eq!(corrected[index], raw[index]);
    }
}

#[test]
fn test_rgba_frames_are_opaque_gray() {
    let (source, injector) = ManualFrameSource::new();
    let session =
        CaptureSession::new(source, Arc::new(Passthrough), ColorFormat::GrayRgba8888).unwrap();
    let captured = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&captured);
    session.set_listener(Some(Arc::new(move |frame: &Frame<'_>| {
        *sink.lock().unwrap() = frame.data.to_vec();
    })));
    session.start().unwrap();

    assert!(injector.deliver(&[10, 20], 2, 1));
    assert_eq!(
        *captured.lock().unwrap(),
        vec![10, 10, 10, 255, 20, 20, 20, 255]
    );
}

#[test]
fn test_frame_converts_to_image() {
    let (source, injector) = ManualFrameSource::new();
    let session = CaptureSession::new(source, Arc::new(Passthrough), ColorFormat::Gray8).unwrap();
    let dims = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&dims);
    session.set_listener(Some(Arc::new(move |frame: &Frame<'_>| {
        let image = frame.to_image().unwrap();
        *sink.lock().unwrap() = Some((image.width(), image.height()));
    })));
    session.start().unwrap();

    assert!(injector.deliver(&[0; 12], 4, 3));
    assert_eq!(*dims.lock().unwrap(), Some((4, 3)));
}

#[test]
fn test_release_waits_for_delivery_on_other_thread() {
    let (source, injector) = ManualFrameSource::new();
    let session = CaptureSession::new(source, Arc::new(Passthrough), ColorFormat::Gray8).unwrap();
    let (entered_tx, entered_rx) = mpsc::channel();
    let finished = Arc::new(Mutex::new(false));
    let finished_flag = Arc::clone(&finished);
    session.set_listener(Some(Arc::new(move |_: &Frame<'_>| {
        entered_tx.send(()).unwrap();
        thread::sleep(Duration::from_millis(100));
        *finished_flag.lock().unwrap() = true;
    })));
    session.start().unwrap();

    let producer = thread::spawn(move || injector.deliver(&[0; 4], 2, 2));
    entered_rx.recv().unwrap();
    session.release();

    assert!(*finished.lock().unwrap());
    assert!(producer.join().unwrap());
    assert!(session.is_released());
}

#[test]
fn test_replay_source_delivers_until_stopped() {
    let frame = OwnedFrame::new(vec![128; 16], 4, 4).unwrap();
    let source = ReplayFrameSource::new(vec![frame]).unwrap();
    let stats = source.stats();
    let config = SourceConfig {
        fps_range: FpsRange::fixed(100),
        ..SourceConfig::default()
    };
    let session = CaptureSession::with_config(
        Box::new(source),
        Arc::new(Passthrough),
        ColorFormat::Gray8,
        &config,
    )
    .unwrap();
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    session.set_listener(Some(Arc::new(move |frame: &Frame<'_>| {
        let _ = tx.lock().unwrap().send(frame.data.to_vec());
    })));
    session.start().unwrap();

    for _ in 0..3 {
        let data = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(data, vec![128; 16]);
    }

    session.stop();
    session.release();
    assert!(stats.frames_delivered() >= 3);
    assert!(session.frames_delivered() >= 3);
}
