// SPDX-License-Identifier: GPL-3.0-only

//! CPU fisheye correction

use super::{ColorFormat, CorrectionKernel, check_buffers, write_pixel};
use crate::constants::correction::DEFAULT_FOCAL_LENGTH;
use crate::errors::CorrectionError;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::debug;

/// Source pixel index for every output pixel of a given frame size
#[derive(Debug)]
pub struct RemapTable {
    width: u32,
    height: u32,
    source_index: Vec<u32>,
}

impl RemapTable {
    /// Build the table for a `width` x `height` dual-fisheye frame.
    ///
    /// Each half of the frame is one hemisphere with its centre at
    /// `(half / 2 [+ half], height / 2)`. An output pixel at distance `r`
    /// from its centre samples the source at distance `f * atan(r / f)`
    /// along the same ray, truncated toward zero and clamped to the
    /// hemisphere and the frame.
    pub fn build(width: u32, height: u32, focal_length: f32) -> Result<Self, CorrectionError> {
        let pixel_count = width as u64 * height as u64;
        if pixel_count > u32::MAX as u64 {
            return Err(CorrectionError::InvalidDimensions { width, height });
        }

        let w = width as i32;
        let h = height as i32;
        let half = w / 2;
        let offset_y = h / 2;
        let mut source_index = Vec::with_capacity(pixel_count as usize);

        for y in 0..h {
            for x in 0..w {
                let offset_x = half / 2 + if x < half { 0 } else { half };
                let x1 = (x - offset_x) as f32;
                let y1 = (y - offset_y) as f32;
                let r1 = x1.hypot(y1);
                let alpha = if r1 == 0.0 {
                    1.0
                } else {
                    focal_length * (r1 / focal_length).atan() / r1
                };

                let new_x = ((alpha * x1) as i32).clamp(-half / 2, half / 2) + offset_x;
                let new_y = ((alpha * y1) as i32).clamp(-offset_y, offset_y) + offset_y;
                let new_x = new_x.clamp(0, w - 1);
                let new_y = new_y.clamp(0, h - 1);

                source_index.push((new_y * w + new_x) as u32);
            }
        }

        Ok(Self {
            width,
            height,
            source_index,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Source pixel index sampled by output pixel `(x, y)`
    pub fn source_of(&self, x: u32, y: u32) -> usize {
        self.source_index[(y * self.width + x) as usize] as usize
    }

    fn matches(&self, width: u32, height: u32) -> bool {
        self.width == width && self.height == height
    }
}

/// CPU fisheye correction kernel
///
/// The remap table is rebuilt only when the frame size changes.
pub struct FisheyeCorrector {
    focal_length: f32,
    table: Mutex<Option<Arc<RemapTable>>>,
}

impl FisheyeCorrector {
    pub fn new(focal_length: f32) -> Self {
        Self {
            focal_length,
            table: Mutex::new(None),
        }
    }

    pub fn focal_length(&self) -> f32 {
        self.focal_length
    }

    fn table_for(&self, width: u32, height: u32) -> Result<Arc<RemapTable>, CorrectionError> {
        let mut cached = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(table) = cached.as_ref().filter(|t| t.matches(width, height)) {
            return Ok(Arc::clone(table));
        }

        let start = Instant::now();
        let table = Arc::new(RemapTable::build(width, height, self.focal_length)?);
        debug!(
            width,
            height,
            elapsed_ms = start.elapsed().as_millis(),
            "Built fisheye remap table"
        );
        *cached = Some(Arc::clone(&table));
        Ok(table)
    }
}

impl Default for FisheyeCorrector {
    fn default() -> Self {
        Self::new(DEFAULT_FOCAL_LENGTH)
    }
}

impl CorrectionKernel for FisheyeCorrector {
    fn name(&self) -> &'static str {
        "fisheye-cpu"
    }

    fn correct(
        &self,
        width: u32,
        height: u32,
        raw: &[u8],
        color_format: ColorFormat,
        out: &mut [u8],
    ) -> Result<(), CorrectionError> {
        check_buffers(width, height, raw, color_format, out)?;
        let table = self.table_for(width, height)?;

        match color_format {
            ColorFormat::Gray8 => {
                for (dst, &src) in out.iter_mut().zip(&table.source_index) {
                    *dst = raw[src as usize];
                }
            }
            ColorFormat::GrayRgba8888 => {
                for (index, &src) in table.source_index.iter().enumerate() {
                    write_pixel(out, index, raw[src as usize], color_format);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> Vec<u8> {
        (0..width * height).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_hemisphere_centres_map_to_themselves() {
        let table = RemapTable::build(64, 32, 600.0).unwrap();
        // Left centre (16, 16), right centre (48, 16)
        assert_eq!(table.source_of(16, 16), 16 * 64 + 16);
        assert_eq!(table.source_of(48, 16), 16 * 64 + 48);
    }

    #[test]
    fn test_rays_keep_their_row_through_centre() {
        let table = RemapTable::build(3840, 1920, 600.0).unwrap();
        for x in [0, 100, 959, 961, 1900] {
            let src = table.source_of(x, 960);
            assert_eq!(src / 3840, 960, "pixel ({}, 960) left its row", x);
        }
    }

    #[test]
    fn test_samples_move_toward_centre() {
        let table = RemapTable::build(3840, 1920, 600.0).unwrap();
        let src_x = table.source_of(0, 960) % 3840;
        assert!(src_x > 0 && src_x < 960, "edge sampled column {}", src_x);
    }

    #[test]
    fn test_all_indices_in_bounds_for_odd_sizes() {
        for (w, h) in [(1, 1), (3, 3), (7, 5), (101, 51)] {
            let table = RemapTable::build(w, h, 600.0).unwrap();
            assert!(table.source_index.iter().all(|&i| (i as usize) < (w * h) as usize));
        }
    }

    #[test]
    fn test_correct_is_deterministic_and_leaves_raw_untouched() {
        let (w, h) = (128, 64);
        let raw = gradient(w, h);
        let original = raw.clone();
        let kernel = FisheyeCorrector::default();

        let mut first = vec![0u8; ColorFormat::Gray8.buffer_len(w, h)];
        let mut second = vec![0u8; ColorFormat::Gray8.buffer_len(w, h)];
        kernel.correct(w, h, &raw, ColorFormat::Gray8, &mut first).unwrap();
        kernel.correct(w, h, &raw, ColorFormat::Gray8, &mut second).unwrap();

        assert_eq!(first, second);
        assert_eq!(raw, original);
    }

    #[test]
    fn test_rgba_output_matches_gray_output() {
        let (w, h) = (40, 20);
        let raw = gradient(w, h);
        let kernel = FisheyeCorrector::default();

        let mut gray = vec![0u8; ColorFormat::Gray8.buffer_len(w, h)];
        let mut rgba = vec![0u8; ColorFormat::GrayRgba8888.buffer_len(w, h)];
        kernel.correct(w, h, &raw, ColorFormat::Gray8, &mut gray).unwrap();
        kernel
            .correct(w, h, &raw, ColorFormat::GrayRgba8888, &mut rgba)
            .unwrap();

        for (value, pixel) in gray.iter().zip(rgba.chunks_exact(4)) {
            assert_eq!(pixel, [*value, *value, *value, 255]);
        }
    }

    #[test]
    fn test_table_rebuilt_on_size_change() {
        let kernel = FisheyeCorrector::default();
        let mut out = vec![0u8; 8];
        kernel
            .correct(4, 2, &[0; 8], ColorFormat::Gray8, &mut out)
            .unwrap();
        let mut out = vec![0u8; 18];
        kernel
            .correct(6, 3, &[0; 18], ColorFormat::Gray8, &mut out)
            .unwrap();

        let cached = kernel.table.lock().unwrap();
        assert_eq!(cached.as_ref().map(|t| (t.width(), t.height())), Some((6, 3)));
    }
}
