//! Per-request image preprocessing ahead of tag detection.
//!
//! A pure selector over a handful of transforms that trade recall against
//! latency. Mode 0 is the fast path; the heavier modes help under uneven
//! lighting or motion blur.

use image::{GrayImage, RgbImage};
use imageproc::contrast::{adaptive_threshold, equalize_histogram, otsu_level, threshold, ThresholdType};
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::morphology::close;
use serde::Deserialize;

/// Preprocessing selector, numbered the way clients send it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PreprocessMode {
    /// Grayscale conversion only.
    #[default]
    Gray,
    /// Locally adaptive binarization.
    Adaptive,
    /// Global threshold, then morphological closing to heal broken borders.
    ThresholdRefine,
    /// Histogram equalization, edge map and threshold combined.
    EqualizeEdges,
}

impl PreprocessMode {
    /// Wire encoding is a small integer; unknown values fall back to 0.
    pub fn from_wire(mode: i64) -> Self {
        match mode {
            1 => Self::Adaptive,
            2 => Self::ThresholdRefine,
            3 => Self::EqualizeEdges,
            _ => Self::Gray,
        }
    }
}

/// Tuning knobs forwarded from the request, all optional.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct PreprocessParams {
    /// Neighborhood radius for adaptive binarization.
    pub block_radius: u32,
    /// Global threshold level; 0 selects Otsu.
    pub threshold: u8,
    /// Canny hysteresis thresholds.
    pub canny_low: f32,
    pub canny_high: f32,
}

impl Default for PreprocessParams {
    fn default() -> Self {
        Self {
            block_radius: 10,
            threshold: 0,
            canny_low: 50.0,
            canny_high: 100.0,
        }
    }
}

/// Apply the selected transform and hand back a grayscale frame for the
/// detector.
pub fn preprocess(frame: &RgbImage, mode: PreprocessMode, params: &PreprocessParams) -> GrayImage {
    let gray = image::imageops::grayscale(frame);
    match mode {
        PreprocessMode::Gray => gray,
        PreprocessMode::Adaptive => adaptive_threshold(&gray, params.block_radius.max(1)),
        PreprocessMode::ThresholdRefine => {
            let level = if params.threshold == 0 {
                otsu_level(&gray)
            } else {
                params.threshold
            };
            let binary = threshold(&gray, level, ThresholdType::Binary);
            close(&binary, Norm::LInf, 1)
        }
        PreprocessMode::EqualizeEdges => {
            let equalized = equalize_histogram(&gray);
            let edges = canny(&equalized, params.canny_low, params.canny_high);
            let level = if params.threshold == 0 {
                otsu_level(&equalized)
            } else {
                params.threshold
            };
            let binary = threshold(&equalized, level, ThresholdType::Binary);
            overlay_edges(&binary, &edges)
        }
    }
}

/// Stamp detected edges as black onto the binarized frame so thin tag
/// borders survive the global threshold.
fn overlay_edges(binary: &GrayImage, edges: &GrayImage) -> GrayImage {
    let mut out = binary.clone();
    for (x, y, p) in edges.enumerate_pixels() {
        if p.0[0] > 0 {
            out.put_pixel(x, y, image::Luma([0]));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_mapping_covers_all_modes() {
        assert_eq!(PreprocessMode::from_wire(0), PreprocessMode::Gray);
        assert_eq!(PreprocessMode::from_wire(1), PreprocessMode::Adaptive);
        assert_eq!(PreprocessMode::from_wire(2), PreprocessMode::ThresholdRefine);
        assert_eq!(PreprocessMode::from_wire(3), PreprocessMode::EqualizeEdges);
        assert_eq!(PreprocessMode::from_wire(42), PreprocessMode::Gray);
    }

    #[test]
    fn gray_mode_preserves_dimensions() {
        let frame = RgbImage::from_pixel(64, 48, image::Rgb([10, 200, 30]));
        let out = preprocess(&frame, PreprocessMode::Gray, &PreprocessParams::default());
        assert_eq!(out.dimensions(), (64, 48));
    }

    #[test]
    fn every_mode_produces_a_full_size_frame() {
        let mut frame = RgbImage::from_pixel(80, 60, image::Rgb([220, 220, 220]));
        for y in 20..40 {
            for x in 25..55 {
                frame.put_pixel(x, y, image::Rgb([10, 10, 10]));
            }
        }
        let params = PreprocessParams::default();
        for mode in [
            PreprocessMode::Gray,
            PreprocessMode::Adaptive,
            PreprocessMode::ThresholdRefine,
            PreprocessMode::EqualizeEdges,
        ] {
            let out = preprocess(&frame, mode, &params);
            assert_eq!(out.dimensions(), (80, 60));
        }
    }
}
