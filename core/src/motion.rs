//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Fast motion gate: downscale, blur, diff, threshold, connected components.
//! Runs on every captured frame regardless of what downstream stages decide.

use fast_image_resize as fr;
use image::{GrayImage, Luma};
use imageproc::contours::find_contours;
use rayon::prelude::*;

use crate::config::ConfigSnapshot;
use crate::frame::FrameRef;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionRegion {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    pub confidence: f32,
}

/// Non-authoritative classification of `motion_percent`, surfaced for
/// telemetry only — the scheduler's gating decision in [`crate::scheduler`]
/// uses the raw float, never this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionLevel {
    None,
    Minimal,
    Low,
    Medium,
    High,
}

impl MotionLevel {
    pub fn classify(motion_percent: f64) -> Self {
        if motion_percent <= 0.0 {
            MotionLevel::None
        } else if motion_percent < 1.0 {
            MotionLevel::Minimal
        } else if motion_percent < 5.0 {
            MotionLevel::Low
        } else if motion_percent < 15.0 {
            MotionLevel::Medium
        } else {
            MotionLevel::High
        }
    }
}

#[derive(Debug, Clone)]
pub struct FrameDelta {
    pub seq: u64,
    pub motion_percent: f64,
    pub motion_level: MotionLevel,
    pub regions: Vec<MotionRegion>,
    pub motion_area_px: u32,
}

pub struct MotionAnalyzer {
    prev_gray: Option<GrayImage>,
    downscale_w: u32,
    downscale_h: u32,
    luminance_delta: u8,
    min_region_area_px: u32,
}

impl MotionAnalyzer {
    pub fn new(cfg: &ConfigSnapshot) -> Self {
        MotionAnalyzer {
            prev_gray: None,
            downscale_w: cfg.downscale_w,
            downscale_h: cfg.downscale_h,
            luminance_delta: cfg.luminance_delta,
            min_region_area_px: cfg.min_region_area_px,
        }
    }

    fn downscale_gray(&self, frame: &FrameRef) -> GrayImage {
        let src = frame.pixels.as_image_buffer();
        let mut dst = GrayImage::new(self.downscale_w, self.downscale_h);
        let src_dyn = image::DynamicImage::ImageRgb8(src.to_image());
        let src_view = fr::images::Image::from_vec_u8(
            frame.width(),
            frame.height(),
            src_dyn.to_rgb8().into_raw(),
            fr::PixelType::U8x3,
        )
        .expect("source buffer matches declared dimensions");
        let mut dst_view =
            fr::images::Image::new(self.downscale_w, self.downscale_h, fr::PixelType::U8x3);
        let mut resizer = fr::Resizer::new();
        resizer
            .resize(&src_view, &mut dst_view, None)
            .expect("resize parameters are always well-formed here");

        let resized_rgb = dst_view.buffer();
        for (i, chunk) in resized_rgb.chunks_exact(3).enumerate() {
            let x = (i as u32) % self.downscale_w;
            let y = (i as u32) / self.downscale_w;
            let lum = (0.299 * chunk[0] as f32
                + 0.587 * chunk[1] as f32
                + 0.114 * chunk[2] as f32) as u8;
            dst.put_pixel(x, y, Luma([lum]));
        }

        let blurred = libblur::gaussian_blur(&dst, 5, 0.0, libblur::EdgeMode::Clamp)
            .unwrap_or(dst);
        blurred
    }

    /// Computes the delta between `frame` and the previous call's frame. The
    /// first call always reports 100% motion with no regions, per the
    /// scheduler's first-frame boundary behavior.
    pub fn analyze(&mut self, frame: &FrameRef) -> FrameDelta {
        let gray = self.downscale_gray(frame);

        let Some(prev) = self.prev_gray.take() else {
            let total_pixels = self.downscale_w * self.downscale_h;
            self.prev_gray = Some(gray);
            return FrameDelta {
                seq: frame.seq,
                motion_percent: 100.0,
                motion_level: MotionLevel::High,
                regions: Vec::new(),
                // Consistent with the claimed 100% motion: the whole
                // downscaled frame, not zero.
                motion_area_px: total_pixels,
            };
        };

        let threshold = self.luminance_delta;
        let w = self.downscale_w;
        let h = self.downscale_h;
        let diffs: Vec<u8> = prev
            .as_raw()
            .par_iter()
            .zip(gray.as_raw().par_iter())
            .map(|(a, b)| if a.abs_diff(*b) >= threshold { 255 } else { 0 })
            .collect();
        let mask = GrayImage::from_raw(w, h, diffs.clone())
            .expect("diffs has exactly w*h elements");

        let motion_pixels = diffs.iter().filter(|&&v| v == 255).count();
        let total_pixels = (w * h) as usize;
        let motion_percent = (motion_pixels as f64 / total_pixels as f64) * 100.0;

        let contours = find_contours::<u32>(&mask);
        let scale_x = frame.width() as f32 / w as f32;
        let scale_y = frame.height() as f32 / h as f32;
        let mut regions = Vec::new();
        for c in &contours {
            let (min_x, max_x) = c
                .points
                .iter()
                .map(|p| p.x)
                .fold((u32::MAX, 0u32), |(mn, mx), v| (mn.min(v), mx.max(v)));
            let (min_y, max_y) = c
                .points
                .iter()
                .map(|p| p.y)
                .fold((u32::MAX, 0u32), |(mn, mx), v| (mn.min(v), mx.max(v)));
            let area = (max_x - min_x + 1) * (max_y - min_y + 1);
            if area < self.min_region_area_px {
                continue;
            }
            regions.push(MotionRegion {
                x: (min_x as f32 * scale_x) as u32,
                y: (min_y as f32 * scale_y) as u32,
                w: ((max_x - min_x + 1) as f32 * scale_x) as u32,
                h: ((max_y - min_y + 1) as f32 * scale_y) as u32,
                confidence: (area as f32 / total_pixels as f32).min(1.0),
            });
        }

        self.prev_gray = Some(gray);

        FrameDelta {
            seq: frame.seq,
            motion_percent,
            motion_level: MotionLevel::classify(motion_percent),
            motion_area_px: motion_pixels as u32,
            regions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelBuffer;
    use image::{ImageBuffer, Rgb};

    fn solid_frame(seq: u64, shade: u8) -> FrameRef {
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(64, 48, Rgb([shade; 3]));
        FrameRef::new(seq, PixelBuffer::from_image(img))
    }

    #[test]
    fn first_frame_reports_full_motion_and_no_regions() {
        let cfg = ConfigSnapshot::default_validated();
        let mut analyzer = MotionAnalyzer::new(&cfg);
        let delta = analyzer.analyze(&solid_frame(1, 10));
        assert_eq!(delta.motion_percent, 100.0);
        assert!(delta.regions.is_empty());
    }

    #[test]
    fn identical_frames_report_near_zero_motion() {
        let cfg = ConfigSnapshot::default_validated();
        let mut analyzer = MotionAnalyzer::new(&cfg);
        analyzer.analyze(&solid_frame(1, 10));
        let delta = analyzer.analyze(&solid_frame(2, 10));
        assert_eq!(delta.motion_percent, 0.0);
        assert_eq!(delta.motion_level, MotionLevel::None);
    }

    #[test]
    fn motion_level_bands_match_classification_table() {
        assert_eq!(MotionLevel::classify(0.0), MotionLevel::None);
        assert_eq!(MotionLevel::classify(0.5), MotionLevel::Minimal);
        assert_eq!(MotionLevel::classify(3.0), MotionLevel::Low);
        assert_eq!(MotionLevel::classify(10.0), MotionLevel::Medium);
        assert_eq!(MotionLevel::classify(50.0), MotionLevel::High);
    }
}
