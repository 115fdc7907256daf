//! Color-based region segmentation via seeded flood fill.
//!
//! The kernel finds the pixel closest to the active color target, grows a
//! region from it with a per-channel tolerance, and reduces the matched
//! region to a centroid, a width and a best-fit slope. The geometric
//! conversion from pixel coordinates to distance/bearing lives in
//! `astrolabe-core`; this crate only produces the pixel-space measurements.

mod fill;
mod filter;

use astrolabe_core::{Bearing, ColorTarget, Geometry};
use image::RgbImage;

pub use fill::flood_fill;
pub use filter::bilateral_filter;

/// Pixel-space measurement of a matched color region.
///
/// `width == -1` encodes "not found"; it is a sentinel, not an error.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Region {
    /// Centroid as `(row, col)`.
    pub center: (f64, f64),
    /// `right - left` over matched columns, or -1 when nothing matched.
    pub width: i32,
    /// Least-squares slope `d(col)/d(row)` of the matched pixels.
    pub slope: f64,
}

impl Region {
    pub const NOT_FOUND: Region = Region {
        center: (-1.0, -1.0),
        width: -1,
        slope: 0.0,
    };

    #[inline]
    pub fn found(&self) -> bool {
        self.width >= 0
    }
}

/// Vision kernel bound to one camera's projection geometry.
pub struct Locater {
    geometry: Geometry,
}

impl Locater {
    pub fn new(geometry: Geometry) -> Self {
        Self { geometry }
    }

    #[inline]
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Locate the target color and return an annotated copy of the image.
    ///
    /// `blur`/`difference` override the target's stored values when `Some`.
    pub fn locate(
        &self,
        image: &RgbImage,
        target: &ColorTarget,
        blur: Option<i32>,
        difference: Option<i32>,
    ) -> (RgbImage, Region) {
        let blur = blur.unwrap_or(target.blur);
        let difference = difference.unwrap_or(target.difference);

        let Some(seed) = seed_pixel(image, target, difference) else {
            return (image.clone(), Region::NOT_FOUND);
        };

        let source = if blur > 0 {
            bilateral_filter(image, blur)
        } else {
            image.clone()
        };

        let mask = flood_fill(&source, seed, difference);
        let region = fill::measure(&mask, image.width(), image.height());
        let annotated = annotate(image, &mask, &region);
        (annotated, region)
    }

    /// Same as [`Self::locate`] without annotation, for the hot path.
    pub fn locate_stripped(
        &self,
        image: &RgbImage,
        target: &ColorTarget,
        blur: Option<i32>,
        difference: Option<i32>,
    ) -> Region {
        let blur = blur.unwrap_or(target.blur);
        let difference = difference.unwrap_or(target.difference);

        let Some(seed) = seed_pixel(image, target, difference) else {
            return Region::NOT_FOUND;
        };

        let source = if blur > 0 {
            bilateral_filter(image, blur)
        } else {
            image.clone()
        };

        let mask = flood_fill(&source, seed, difference);
        fill::measure(&mask, image.width(), image.height())
    }

    /// Ground-plane range and bearings of a region centroid.
    pub fn loc_from_center(&self, center: (f64, f64)) -> Bearing {
        self.geometry.loc_from_center(center.0, center.1)
    }
}

/// Pixel of minimum mean absolute channel deviation from the target color,
/// or `None` when every pixel deviates by more than `2 * difference`.
fn seed_pixel(image: &RgbImage, target: &ColorTarget, difference: i32) -> Option<(u32, u32)> {
    let cutoff = 2.0 * difference as f64;
    let mut best: Option<((u32, u32), f64)> = None;

    for (x, y, pixel) in image.enumerate_pixels() {
        let dev = (f64::from(pixel[0]) - f64::from(target.red)).abs()
            + (f64::from(pixel[1]) - f64::from(target.green)).abs()
            + (f64::from(pixel[2]) - f64::from(target.blue)).abs();
        let dev = dev / 3.0;
        match best {
            Some((_, d)) if d <= dev => {}
            _ => best = Some(((y, x), dev)),
        }
    }

    match best {
        Some((seed, dev)) if dev <= cutoff => Some(seed),
        _ => None,
    }
}

const MATCH_GAIN: f64 = 1.334;
const MISS_GAIN: f64 = 0.334;

/// Blend the mask back onto the image and draw the crosshair and the
/// left/right width markers. Drawing is best-effort: anything that falls
/// outside the image is silently clipped.
fn annotate(image: &RgbImage, mask: &[bool], region: &Region) -> RgbImage {
    let (w, h) = (image.width(), image.height());
    let mut out = RgbImage::new(w, h);

    for (x, y, pixel) in image.enumerate_pixels() {
        let gain = if mask[(y * w + x) as usize] {
            MATCH_GAIN
        } else {
            MISS_GAIN
        };
        let scaled = pixel.0.map(|c| (f64::from(c) * gain).min(255.0) as u8);
        out.put_pixel(x, y, image::Rgb(scaled));
    }

    if !region.found() {
        return out;
    }

    let center_row = region.center.0.round() as i64;
    let center_col = region.center.1.round() as i64;
    let red = image::Rgb([255, 0, 0]);
    let green = image::Rgb([0, 255, 0]);

    // Crosshair at the centroid.
    for d in -5..=5 {
        put_clipped(&mut out, center_row + d, center_col, red);
        put_clipped(&mut out, center_row, center_col + d, red);
    }

    // Vertical ticks at the matched extremes.
    if let Some((left, right)) = fill::extent(mask, w) {
        for d in -5..=5 {
            put_clipped(&mut out, center_row + d, i64::from(left), green);
            put_clipped(&mut out, center_row + d, i64::from(right), green);
        }
    }

    out
}

#[inline]
fn put_clipped(image: &mut RgbImage, row: i64, col: i64, pixel: image::Rgb<u8>) {
    if row >= 0 && col >= 0 && (row as u32) < image.height() && (col as u32) < image.width() {
        image.put_pixel(col as u32, row as u32, pixel);
    }
}
