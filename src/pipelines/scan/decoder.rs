// SPDX-License-Identifier: GPL-3.0-only

//! Region decoders
//!
//! This module implements QR decoding of one frame region using the rqrr
//! crate. The region is cropped out of the frame luminance and optionally
//! downscaled before detection.

use super::types::{DecodeError, Region};
use crate::backends::camera::Frame;
use std::time::Instant;
use tracing::{debug, trace};

/// Decodes a code inside one region of a corrected frame
pub trait RegionDecoder: Send + Sync {
    /// Decode the region. Must only read pixels inside `region`.
    fn decode(&self, frame: &Frame<'_>, region: Region) -> Result<String, DecodeError>;
}

/// QR decoder backed by rqrr
#[derive(Debug, Clone, Default)]
pub struct RqrrDecoder {
    /// Regions larger than this are downscaled before detection
    max_dimension: Option<u32>,
}

impl RqrrDecoder {
    /// Decoder working at full resolution
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder downscaling regions whose longer side exceeds `max_dimension`
    pub fn with_max_dimension(max_dimension: u32) -> Self {
        Self {
            max_dimension: Some(max_dimension.max(1)),
        }
    }

    /// Processing size and the source pixels per processed pixel
    fn processing_size(&self, region: Region) -> (u32, u32, f32) {
        match self.max_dimension {
            Some(max) if region.width > max || region.height > max => {
                let scale = (region.width as f32 / max as f32).max(region.height as f32 / max as f32);
                let width = ((region.width as f32 / scale) as u32).max(1);
                let height = ((region.height as f32 / scale) as u32).max(1);
                (width, height, scale)
            }
            _ => (region.width, region.height, 1.0),
        }
    }
}

impl RegionDecoder for RqrrDecoder {
    fn decode(&self, frame: &Frame<'_>, region: Region) -> Result<String, DecodeError> {
        if region.is_empty() || !region.fits(frame.width, frame.height) {
            return Err(DecodeError::NotFound);
        }

        let start = Instant::now();
        let (width, height, scale) = self.processing_size(region);
        let last_x = region.width - 1;
        let last_y = region.height - 1;

        let mut prepared =
            rqrr::PreparedImage::prepare_from_greyscale(width as usize, height as usize, |x, y| {
                let sx = ((x as f32 * scale) as u32).min(last_x);
                let sy = ((y as f32 * scale) as u32).min(last_y);
                frame.luma(region.left + sx, region.top + sy)
            });

        let grids = prepared.detect_grids();
        trace!(
            grids = grids.len(),
            width,
            height,
            scale,
            detection_ms = start.elapsed().as_millis(),
            "QR detection complete"
        );

        let mut last_error = DecodeError::NotFound;
        for grid in grids {
            match grid.decode() {
                Ok((meta, content)) => {
                    debug!(
                        version = meta.version.0,
                        total_ms = start.elapsed().as_millis(),
                        "Decoded QR code"
                    );
                    return Ok(content);
                }
                Err(e) => {
                    debug!(error = %e, "Failed to decode QR grid");
                    last_error = match e {
                        rqrr::DeQRError::DataEcc | rqrr::DeQRError::FormatEcc => {
                            DecodeError::Checksum
                        }
                        other => DecodeError::Format(other.to_string()),
                    };
                }
            }
        }

        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::ColorFormat;

    /// Paint a QR code for `text` into a white luma buffer
    fn paint_qr(text: &str, frame_width: u32, frame_height: u32, left: u32, top: u32) -> Vec<u8> {
        let code = qrcode::QrCode::new(text.as_bytes()).unwrap();
        let modules = code.width() as u32;
        let colors = code.to_colors();
        let scale = 4;
        let quiet = 4;
        let mut luma = vec![255u8; (frame_width * frame_height) as usize];
        for my in 0..modules {
            for mx in 0..modules {
                if colors[(my * modules + mx) as usize] != qrcode::Color::Dark {
                    continue;
                }
                for dy in 0..scale {
                    for dx in 0..scale {
                        let x = left + (quiet + mx) * scale + dx;
                        let y = top + (quiet + my) * scale + dy;
                        luma[(y * frame_width + x) as usize] = 0;
                    }
                }
            }
        }
        luma
    }

    fn gray(data: &[u8], width: u32, height: u32) -> Frame<'_> {
        Frame {
            data,
            width,
            height,
            color_format: ColorFormat::Gray8,
        }
    }

    #[test]
    fn test_decodes_code_inside_region() {
        let luma = paint_qr("hello", 400, 200, 220, 20);
        let frame = gray(&luma, 400, 200);
        let decoder = RqrrDecoder::new();

        assert_eq!(
            decoder.decode(&frame, Region::new(200, 0, 200, 200)),
            Ok("hello".to_string())
        );
        assert_eq!(
            decoder.decode(&frame, Region::new(0, 0, 200, 200)),
            Err(DecodeError::NotFound)
        );
    }

    #[test]
    fn test_decodes_rgba_frames() {
        let luma = paint_qr("rgba", 200, 200, 20, 20);
        let rgba: Vec<u8> = luma.iter().flat_map(|&v| [v, v, v, 255]).collect();
        let frame = Frame {
            data: &rgba,
            width: 200,
            height: 200,
            color_format: ColorFormat::GrayRgba8888,
        };
        assert_eq!(
            RqrrDecoder::new().decode(&frame, Region::new(0, 0, 200, 200)),
            Ok("rgba".to_string())
        );
    }

    #[test]
    fn test_blank_region_not_found() {
        let luma = vec![255u8; 64 * 64];
        let frame = gray(&luma, 64, 64);
        assert_eq!(
            RqrrDecoder::new().decode(&frame, Region::new(0, 0, 64, 64)),
            Err(DecodeError::NotFound)
        );
    }

    #[test]
    fn test_out_of_bounds_region_not_found() {
        let luma = vec![255u8; 16];
        let frame = gray(&luma, 4, 4);
        assert_eq!(
            RqrrDecoder::new().decode(&frame, Region::new(2, 0, 4, 4)),
            Err(DecodeError::NotFound)
        );
    }

    #[test]
    fn test_processing_size_downscales_long_side() {
        let decoder = RqrrDecoder::with_max_dimension(480);
        let (w, h, scale) = decoder.processing_size(Region::new(0, 0, 1920, 960));
        assert_eq!((w, h), (480, 240));
        assert_eq!(scale, 4.0);

        let (w, h, scale) = decoder.processing_size(Region::new(0, 0, 200, 100));
        assert_eq!((w, h, scale), (200, 100, 1.0));
    }
}
