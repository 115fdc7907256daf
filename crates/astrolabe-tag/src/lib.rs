//! Fiducial tag pipeline: preprocessing, tag16h5 detection, pose recovery
//! and conversion into the shared distance/bearing vocabulary.
//!
//! The detector is self-contained: the dictionary is embedded and no
//! external tag library is linked. Accuracy targets cooperative targets
//! (flat, well-printed tags) rather than adversarial imagery.

mod adapter;
mod detect;
mod dictionary;
mod homography;
mod pose;
mod preprocess;

pub use adapter::{report, TagCamera, TagReport};
pub use detect::{DetectorConfig, TagDetection, TagDetector};
pub use dictionary::{Dictionary, Match, Matcher, TAG16H5};
pub use homography::{homography_from_4pt, Homography};
pub use pose::{estimate_pose, TagPose};
pub use preprocess::{preprocess, PreprocessMode, PreprocessParams};

/// Detector wired for tag16h5 with the default error budget.
pub fn default_detector() -> TagDetector {
    TagDetector::new(Matcher::new(TAG16H5, 1), DetectorConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn full_pipeline_on_a_synthetic_frame() {
        // Render a tag into an RGB frame, run preprocessing mode 0 and the
        // detector end to end.
        let mut frame = RgbImage::from_pixel(200, 160, image::Rgb([255, 255, 255]));
        let cells = 6u32;
        let cell_px = 12u32;
        let (x0, y0) = (40u32, 30u32);
        let code = TAG16H5.codes[4];
        for cy in 0..cells {
            for cx in 0..cells {
                let is_border = cx == 0 || cy == 0 || cx + 1 == cells || cy + 1 == cells;
                let is_black = is_border || (code >> ((cy - 1) * 4 + (cx - 1))) & 1 == 1;
                if !is_black {
                    continue;
                }
                for yy in 0..cell_px {
                    for xx in 0..cell_px {
                        frame.put_pixel(
                            x0 + cx * cell_px + xx,
                            y0 + cy * cell_px + yy,
                            image::Rgb([0, 0, 0]),
                        );
                    }
                }
            }
        }

        let gray = preprocess(&frame, PreprocessMode::Gray, &PreprocessParams::default());
        let dets = default_detector().detect(&gray);
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].id, 4);
    }
}
