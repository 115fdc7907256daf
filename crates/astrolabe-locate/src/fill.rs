//! Seeded flood fill and region measurement.

use image::RgbImage;

use crate::Region;

/// Grow a region from `seed` (`(row, col)`), including every 4-connected
/// pixel whose channels all lie within `tolerance` of the seed pixel.
///
/// Returns a row-major mask the size of the image.
pub fn flood_fill(image: &RgbImage, seed: (u32, u32), tolerance: i32) -> Vec<bool> {
    let (w, h) = (image.width(), image.height());
    let mut mask = vec![false; (w * h) as usize];
    let (seed_row, seed_col) = seed;
    if seed_row >= h || seed_col >= w {
        return mask;
    }

    let reference = image.get_pixel(seed_col, seed_row).0;
    let tolerance = tolerance.max(0);

    let within = |pixel: &[u8; 3]| {
        (0..3).all(|c| (i32::from(pixel[c]) - i32::from(reference[c])).abs() <= tolerance)
    };

    let mut stack = vec![(seed_row, seed_col)];
    mask[(seed_row * w + seed_col) as usize] = true;

    while let Some((row, col)) = stack.pop() {
        let neighbors = [
            (row.wrapping_sub(1), col),
            (row + 1, col),
            (row, col.wrapping_sub(1)),
            (row, col + 1),
        ];
        for (nr, nc) in neighbors {
            if nr >= h || nc >= w {
                continue;
            }
            let idx = (nr * w + nc) as usize;
            if mask[idx] {
                continue;
            }
            if within(&image.get_pixel(nc, nr).0) {
                mask[idx] = true;
                stack.push((nr, nc));
            }
        }
    }

    mask
}

/// Leftmost and rightmost matched columns, if any pixel matched.
pub fn extent(mask: &[bool], width: u32) -> Option<(u32, u32)> {
    let mut left = u32::MAX;
    let mut right = 0;
    let mut any = false;
    for (i, &m) in mask.iter().enumerate() {
        if m {
            let col = i as u32 % width;
            left = left.min(col);
            right = right.max(col);
            any = true;
        }
    }
    any.then_some((left, right))
}

/// Reduce a mask to centroid, width and best-fit slope.
pub fn measure(mask: &[bool], width: u32, _height: u32) -> Region {
    let Some((left, right)) = extent(mask, width) else {
        return Region::NOT_FOUND;
    };

    let mut count = 0.0_f64;
    let mut sum_row = 0.0_f64;
    let mut sum_col = 0.0_f64;
    for (i, &m) in mask.iter().enumerate() {
        if m {
            sum_row += (i as u32 / width) as f64;
            sum_col += (i as u32 % width) as f64;
            count += 1.0;
        }
    }

    let mean_row = sum_row / count;
    let mean_col = sum_col / count;

    // Least-squares fit of column on row; a vertical stripe has slope 0.
    let mut cov = 0.0_f64;
    let mut var_row = 0.0_f64;
    for (i, &m) in mask.iter().enumerate() {
        if m {
            let row = (i as u32 / width) as f64 - mean_row;
            let col = (i as u32 % width) as f64 - mean_col;
            cov += row * col;
            var_row += row * row;
        }
    }
    let slope = if var_row > f64::EPSILON {
        cov / var_row
    } else {
        0.0
    };

    Region {
        center: (mean_row, mean_col),
        width: (right - left) as i32,
        slope,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_stays_within_tolerance() {
        let mut img = RgbImage::from_pixel(8, 8, image::Rgb([0, 0, 0]));
        for x in 2..6 {
            for y in 2..6 {
                img.put_pixel(x, y, image::Rgb([200, 200, 200]));
            }
        }
        let mask = flood_fill(&img, (3, 3), 20);
        assert_eq!(mask.iter().filter(|&&m| m).count(), 16);
        assert!(!mask[0]);
    }

    #[test]
    fn fill_does_not_cross_a_gap() {
        let mut img = RgbImage::from_pixel(9, 3, image::Rgb([0, 0, 0]));
        for x in 0..4 {
            img.put_pixel(x, 1, image::Rgb([255, 255, 255]));
        }
        // col 4 stays black; cols 5..9 white again.
        for x in 5..9 {
            img.put_pixel(x, 1, image::Rgb([255, 255, 255]));
        }
        let mask = flood_fill(&img, (1, 0), 10);
        assert!(mask[(9 + 3) as usize]); // (row 1, col 3)
        assert!(!mask[(9 + 5) as usize]); // disconnected half
    }

    #[test]
    fn measure_centroid_and_width() {
        let mut mask = vec![false; 10 * 10];
        for col in 2..=6 {
            mask[4 * 10 + col] = true;
        }
        let region = measure(&mask, 10, 10);
        assert_eq!(region.width, 4);
        assert_eq!(region.center, (4.0, 4.0));
        assert_eq!(region.slope, 0.0);
    }

    #[test]
    fn measure_empty_mask_is_sentinel() {
        let mask = vec![false; 16];
        assert_eq!(measure(&mask, 4, 4), Region::NOT_FOUND);
    }
}
