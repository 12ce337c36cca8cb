// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for region scanning

use serde::{Deserialize, Serialize};

/// Which lens a scan region belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CameraDirection {
    /// Rear lens, imaged on the right half of the frame
    Back,
    /// Front lens, imaged on the left half of the frame
    Front,
}

impl CameraDirection {
    /// Order in which regions are scanned for every frame
    pub const SCAN_ORDER: [CameraDirection; 2] = [CameraDirection::Back, CameraDirection::Front];

    /// Region of a `width` x `height` frame imaged by this lens
    pub fn region(self, width: u32, height: u32) -> Region {
        let half = width / 2;
        match self {
            CameraDirection::Back => Region::new(half, 0, half, height),
            CameraDirection::Front => Region::new(0, 0, half, height),
        }
    }
}

impl std::fmt::Display for CameraDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraDirection::Back => write!(f, "back"),
            CameraDirection::Front => write!(f, "front"),
        }
    }
}

/// Rectangle inside a frame, in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub const fn new(left: u32, top: u32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Whether the region lies entirely inside a `width` x `height` frame
    pub fn fits(&self, width: u32, height: u32) -> bool {
        self.left as u64 + self.width as u64 <= width as u64
            && self.top as u64 + self.height as u64 <= height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Outcome of one region decode, as reported to the result listener
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    pub direction: CameraDirection,
    /// Decoded text, or `None` when the region held no readable code
    pub text: Option<String>,
}

impl ScanResult {
    pub fn new(direction: CameraDirection, text: Option<String>) -> Self {
        Self { direction, text }
    }

    pub fn is_found(&self) -> bool {
        self.text.is_some()
    }
}

/// Why a region did not decode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// No code located in the region
    NotFound,
    /// A code was located but its content is malformed
    Format(String),
    /// A code was located but error correction failed
    Checksum,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::NotFound => write!(f, "No code found"),
            DecodeError::Format(msg) => write!(f, "Malformed code: {}", msg),
            DecodeError::Checksum => write!(f, "Error correction failed"),
        }
    }
}

impl std::error::Error for DecodeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regions_for_preview_size() {
        assert_eq!(
            CameraDirection::Back.region(3840, 1920),
            Region::new(1920, 0, 1920, 1920)
        );
        assert_eq!(
            CameraDirection::Front.region(3840, 1920),
            Region::new(0, 0, 1920, 1920)
        );
    }

    #[test]
    fn test_regions_for_odd_width_use_floor_division() {
        let back = CameraDirection::Back.region(7, 3);
        let front = CameraDirection::Front.region(7, 3);
        assert_eq!(back, Region::new(3, 0, 3, 3));
        assert_eq!(front, Region::new(0, 0, 3, 3));
        assert!(back.fits(7, 3) && front.fits(7, 3));
    }

    #[test]
    fn test_scan_order_is_back_then_front() {
        assert_eq!(
            CameraDirection::SCAN_ORDER,
            [CameraDirection::Back, CameraDirection::Front]
        );
    }

    #[test]
    fn test_region_fits() {
        assert!(Region::new(0, 0, 4, 4).fits(4, 4));
        assert!(!Region::new(1, 0, 4, 4).fits(4, 4));
        assert!(!Region::new(0, 0, u32::MAX, 1).fits(4, 4));
    }

    #[test]
    fn test_scan_result_serializes() {
        let result = ScanResult::new(CameraDirection::Front, Some("hello".to_string()));
        let json = serde_json::to_string(&result).unwrap();
        assert_eq!(json, r#"{"direction":"Front","text":"hello"}"#);
    }
}
