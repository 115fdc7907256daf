//! Quad candidate extraction and code decoding.
//!
//! The detector binarizes the preprocessed frame, labels dark connected
//! components, treats each plausible component as a candidate quad, rectifies
//! it through a homography and reads the payload bits against an Otsu
//! threshold computed from the rectified samples.

use image::GrayImage;
use imageproc::contrast::{otsu_level, threshold, ThresholdType};
use imageproc::region_labelling::{connected_components, Connectivity};
use log::trace;
use nalgebra::Point2;

use crate::dictionary::Matcher;
use crate::homography::{homography_from_4pt, Homography};

/// One decoded tag.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TagDetection {
    pub id: u32,
    pub hamming: u8,
    /// Corners in image pixels `(x, y)`, corner 0 at the tag's canonical
    /// top-left after undoing the matched rotation.
    pub corners: [Point2<f64>; 4],
    /// Mean of the four corners.
    pub center: Point2<f64>,
}

#[derive(Clone, Copy, Debug)]
pub struct DetectorConfig {
    /// Smallest component (in pixels) considered a candidate.
    pub min_area: u32,
    /// Largest component as a fraction of the frame.
    pub max_area_frac: f64,
    /// Decoding error budget in bits.
    pub max_hamming: u8,
    /// Required fraction of black cells on the tag border.
    pub min_border_score: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_area: 64,
            max_area_frac: 0.5,
            max_hamming: 1,
            min_border_score: 0.75,
        }
    }
}

pub struct TagDetector {
    matcher: Matcher,
    config: DetectorConfig,
}

/// Rectified sampling-space side length in pixels.
const RECT_SIDE: f64 = 48.0;

impl TagDetector {
    pub fn new(matcher: Matcher, config: DetectorConfig) -> Self {
        Self { matcher, config }
    }

    /// Detect and decode every tag in a grayscale frame.
    pub fn detect(&self, gray: &GrayImage) -> Vec<TagDetection> {
        let (w, h) = gray.dimensions();
        if w < 8 || h < 8 {
            return Vec::new();
        }

        // Dark pixels become foreground for component labelling.
        let level = otsu_level(gray);
        let binary = threshold(gray, level, ThresholdType::BinaryInverted);
        let labels = connected_components(&binary, Connectivity::Four, image::Luma([0u8]));

        let max_area = ((w * h) as f64 * self.config.max_area_frac) as u32;
        let mut out = Vec::new();

        for quad in candidate_quads(&labels, self.config.min_area, max_area) {
            if let Some(det) = self.decode_quad(gray, &quad) {
                trace!("tag {} decoded, hamming {}", det.id, det.hamming);
                out.push(det);
            }
        }

        out
    }

    fn decode_quad(&self, gray: &GrayImage, corners: &[Point2<f64>; 4]) -> Option<TagDetection> {
        let rect = [
            Point2::new(0.0, 0.0),
            Point2::new(RECT_SIDE, 0.0),
            Point2::new(RECT_SIDE, RECT_SIDE),
            Point2::new(0.0, RECT_SIDE),
        ];
        let h = homography_from_4pt(&rect, corners)?;

        let bits = self.matcher.dictionary().marker_size;
        let cells = bits + 2;
        let step = RECT_SIDE / cells as f64;

        let mut samples = Vec::with_capacity(cells * cells);
        for cy in 0..cells {
            for cx in 0..cells {
                let p = Point2::new((cx as f64 + 0.5) * step, (cy as f64 + 0.5) * step);
                samples.push(sample_warped(gray, &h, p)?);
            }
        }

        // Denser grid for the threshold estimate, as cell centers alone
        // under-sample the intensity distribution on small tags.
        let thr_grid = cells * 3;
        let thr_step = RECT_SIDE / thr_grid as f64;
        let mut thr_samples = Vec::with_capacity(thr_grid * thr_grid);
        for ty in 0..thr_grid {
            for tx in 0..thr_grid {
                let p = Point2::new((tx as f64 + 0.5) * thr_step, (ty as f64 + 0.5) * thr_step);
                if let Some(v) = sample_warped(gray, &h, p) {
                    thr_samples.push(v);
                }
            }
        }

        let (code, border_score) = decode_samples(&samples, &thr_samples, cells, bits)?;
        if border_score < self.config.min_border_score {
            return None;
        }

        let m = self.matcher.match_code(code)?;
        if m.hamming > self.config.max_hamming {
            return None;
        }

        // Undo the matched rotation so corner 0 is the canonical top-left.
        let mut canonical = *corners;
        canonical.rotate_left(usize::from(m.rotation));

        let center = Point2::new(
            canonical.iter().map(|p| p.x).sum::<f64>() / 4.0,
            canonical.iter().map(|p| p.y).sum::<f64>() / 4.0,
        );

        Some(TagDetection {
            id: m.id,
            hamming: m.hamming,
            corners: canonical,
            center,
        })
    }
}

/// Extreme points of each component along the two diagonals give the quad
/// corners of a roughly convex dark blob, ordered TL, TR, BR, BL.
fn candidate_quads(
    labels: &image::ImageBuffer<image::Luma<u32>, Vec<u32>>,
    min_area: u32,
    max_area: u32,
) -> Vec<[Point2<f64>; 4]> {
    #[derive(Clone, Copy)]
    struct Extremes {
        area: u32,
        tl: (i64, u32, u32),
        tr: (i64, u32, u32),
        br: (i64, u32, u32),
        bl: (i64, u32, u32),
    }

    let mut stats: Vec<Option<Extremes>> = Vec::new();

    for (x, y, label) in labels.enumerate_pixels() {
        let l = label.0[0] as usize;
        if l == 0 {
            continue;
        }
        if stats.len() <= l {
            stats.resize(l + 1, None);
        }

        let sum = i64::from(x) + i64::from(y);
        let diff = i64::from(x) - i64::from(y);

        let e = stats[l].get_or_insert(Extremes {
            area: 0,
            tl: (i64::MAX, x, y),
            tr: (i64::MIN, x, y),
            br: (i64::MIN, x, y),
            bl: (i64::MAX, x, y),
        });
        e.area += 1;
        if sum < e.tl.0 {
            e.tl = (sum, x, y);
        }
        if diff > e.tr.0 {
            e.tr = (diff, x, y);
        }
        if sum > e.br.0 {
            e.br = (sum, x, y);
        }
        if diff < e.bl.0 {
            e.bl = (diff, x, y);
        }
    }

    let mut quads = Vec::new();
    for e in stats.into_iter().flatten() {
        if e.area < min_area || e.area > max_area {
            continue;
        }
        let corners = [
            Point2::new(f64::from(e.tl.1), f64::from(e.tl.2)),
            Point2::new(f64::from(e.tr.1), f64::from(e.tr.2)),
            Point2::new(f64::from(e.br.1), f64::from(e.br.2)),
            Point2::new(f64::from(e.bl.1), f64::from(e.bl.2)),
        ];
        if quad_is_plausible(&corners) {
            quads.push(corners);
        }
    }
    quads
}

fn quad_is_plausible(corners: &[Point2<f64>; 4]) -> bool {
    let mut min_side = f64::MAX;
    let mut max_side: f64 = 0.0;
    for k in 0..4 {
        let a = corners[k];
        let b = corners[(k + 1) % 4];
        let side = ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt();
        min_side = min_side.min(side);
        max_side = max_side.max(side);
    }
    min_side >= 6.0 && max_side / min_side <= 3.0
}

fn sample_warped(gray: &GrayImage, h: &Homography, p: Point2<f64>) -> Option<u8> {
    let q = h.apply(p);
    let ix = q.x.floor() as i64;
    let iy = q.y.floor() as i64;
    if ix < 1 || iy < 1 || ix + 1 >= i64::from(gray.width()) || iy + 1 >= i64::from(gray.height()) {
        return None;
    }

    let mut sum = 0u32;
    for dy in -1..=1i64 {
        for dx in -1..=1i64 {
            sum += u32::from(gray.get_pixel((ix + dx) as u32, (iy + dy) as u32).0[0]);
        }
    }
    Some((sum / 9) as u8)
}

/// Read bits against an Otsu threshold over the rectified samples. Returns
/// the row-major payload and the fraction of border cells that read black.
fn decode_samples(samples: &[u8], thr_samples: &[u8], cells: usize, bits: usize) -> Option<(u64, f32)> {
    if samples.len() != cells * cells {
        return None;
    }
    let thr = otsu_threshold_from_samples(if thr_samples.is_empty() {
        samples
    } else {
        thr_samples
    });

    let mut code = 0u64;
    let mut border_ok = 0u32;
    let mut border_total = 0u32;

    for cy in 0..cells {
        for cx in 0..cells {
            let is_black = samples[cy * cells + cx] <= thr;
            let is_border = cx == 0 || cy == 0 || cx + 1 == cells || cy + 1 == cells;
            if is_border {
                border_total += 1;
                if is_black {
                    border_ok += 1;
                }
            } else if is_black {
                code |= 1 << ((cy - 1) * bits + (cx - 1));
            }
        }
    }

    Some((code, border_ok as f32 / border_total.max(1) as f32))
}

fn otsu_threshold_from_samples(samples: &[u8]) -> u8 {
    if samples.is_empty() {
        return 127;
    }

    let mut min_v = 255u8;
    let mut max_v = 0u8;
    for &v in samples {
        min_v = min_v.min(v);
        max_v = max_v.max(v);
    }
    if min_v == max_v {
        return min_v;
    }

    let mut hist = [0u32; 256];
    for &v in samples {
        hist[v as usize] += 1;
    }

    let total = samples.len() as f64;
    let mut sum_total = 0f64;
    for (i, &h) in hist.iter().enumerate() {
        sum_total += (i as f64) * f64::from(h);
    }

    let mut sum_b = 0f64;
    let mut w_b = 0f64;
    let mut best_var = -1f64;
    let mut best_t = 127u8;

    for (t, &h) in hist.iter().enumerate() {
        w_b += f64::from(h);
        if w_b < 1.0 {
            continue;
        }
        let w_f = total - w_b;
        if w_f < 1.0 {
            break;
        }

        sum_b += (t as f64) * f64::from(h);
        let m_b = sum_b / w_b;
        let m_f = (sum_total - sum_b) / w_f;
        let var_between = w_b * w_f * (m_b - m_f) * (m_b - m_f);
        if var_between > best_var {
            best_var = var_between;
            best_t = t as u8;
        }
    }

    best_t
}
