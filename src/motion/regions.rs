use image::{imageops, GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use imageproc::morphology::dilate;

use super::MotionConfig;
use crate::zone::polygon_area;

/// Result of counting moving regions in one foreground map.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MotionMeasurement {
    /// Regions that count as motion. Zero when the frame was suppressed as noise.
    pub regions: usize,
    /// Outer contours at least `min_contour_area` large, before noise suppression.
    pub raw_regions: usize,
    /// True when `raw_regions` exceeded `max_regions`.
    pub suppressed: bool,
}

impl MotionMeasurement {
    pub fn has_motion(&self) -> bool {
        self.regions > 0
    }
}

/// Binarize, dilate and count sufficiently large outer contours.
pub fn count_motion_regions(foreground: &GrayImage, config: &MotionConfig) -> MotionMeasurement {
    let binary = binarize(foreground, config.binary_threshold);
    let dilated = dilate(&binary, Norm::LInf, 1);
    // Blobs touching column 0 are traced as holes unless something background surrounds them.
    let padded = pad_with_background(&dilated);

    let raw_regions = find_contours::<i32>(&padded)
        .iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .filter(|c| {
            polygon_area(c.points.iter().map(|p| (p.x as i64, p.y as i64)))
                >= config.min_contour_area
        })
        .count();

    if raw_regions > config.max_regions {
        return MotionMeasurement {
            regions: 0,
            raw_regions,
            suppressed: true,
        };
    }
    MotionMeasurement {
        regions: raw_regions,
        raw_regions,
        suppressed: false,
    }
}

fn pad_with_background(image: &GrayImage) -> GrayImage {
    let mut padded = GrayImage::new(image.width() + 2, image.height() + 2);
    imageops::replace(&mut padded, image, 1, 1);
    padded
}

fn binarize(image: &GrayImage, threshold: u8) -> GrayImage {
    let mut out = GrayImage::new(image.width(), image.height());
    for (dst, src) in out.pixels_mut().zip(image.pixels()) {
        if src[0] > threshold {
            *dst = Luma([255]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(image: &mut GrayImage, x0: u32, y0: u32, size: u32, value: u8) {
        for y in y0..y0 + size {
            for x in x0..x0 + size {
                image.put_pixel(x, y, Luma([value]));
            }
        }
    }

    #[test]
    fn blank_map_has_no_motion() {
        let m = count_motion_regions(&GrayImage::new(64, 64), &MotionConfig::default());
        assert_eq!(m, MotionMeasurement::default());
        assert!(!m.has_motion());
    }

    #[test]
    fn one_large_blob_is_one_region() {
        let mut fg = GrayImage::new(100, 100);
        fill(&mut fg, 20, 20, 40, 200);

        let m = count_motion_regions(&fg, &MotionConfig::default());
        assert_eq!(m.regions, 1);
        assert!(m.has_motion());
    }

    #[test]
    fn faint_and_small_changes_are_ignored() {
        let mut fg = GrayImage::new(100, 100);
        fill(&mut fg, 10, 10, 40, 20); // below threshold
        fill(&mut fg, 70, 70, 8, 255); // too small

        let m = count_motion_regions(&fg, &MotionConfig::default());
        assert_eq!(m.raw_regions, 0);
    }

    #[test]
    fn blobs_touching_the_frame_border_are_counted() {
        let config = MotionConfig::default();

        let mut corner = GrayImage::new(100, 100);
        fill(&mut corner, 0, 0, 40, 255);
        assert_eq!(count_motion_regions(&corner, &config).regions, 1);

        let mut left_edge = GrayImage::new(100, 100);
        fill(&mut left_edge, 0, 30, 40, 255);
        assert_eq!(count_motion_regions(&left_edge, &config).regions, 1);

        let mut bottom_right = GrayImage::new(100, 100);
        fill(&mut bottom_right, 60, 60, 40, 255);
        assert_eq!(count_motion_regions(&bottom_right, &config).regions, 1);

        let whole_frame = GrayImage::from_pixel(100, 100, Luma([255]));
        assert_eq!(count_motion_regions(&whole_frame, &config).regions, 1);
    }

    #[test]
    fn blob_with_a_hole_is_still_one_region() {
        let mut fg = GrayImage::new(100, 100);
        fill(&mut fg, 10, 10, 60, 255);
        fill(&mut fg, 30, 30, 20, 0);

        assert_eq!(count_motion_regions(&fg, &MotionConfig::default()).regions, 1);
    }

    #[test]
    fn too_many_regions_are_suppressed() {
        let mut fg = GrayImage::new(300, 200);
        for row in 0..3 {
            for col in 0..4 {
                fill(&mut fg, 10 + col * 70, 10 + row * 60, 30, 255);
            }
        }

        let m = count_motion_regions(&fg, &MotionConfig::default());
        assert_eq!(m.raw_regions, 12);
        assert_eq!(m.regions, 0);
        assert!(m.suppressed);
    }
}
