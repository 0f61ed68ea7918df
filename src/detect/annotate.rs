use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use super::result::Detection;

const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const BOX_THICKNESS: u32 = 2;
const LABEL_SCALE: f32 = 16.0;

/// Draws detection boxes, and labels when a font is loaded.
#[derive(Default)]
pub struct Annotator {
    font: Option<FontVec>,
}

impl Annotator {
    /// Boxes only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a TrueType/OpenType font for labels.
    pub fn with_font_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            std::fs::read(path).with_context(|| format!("failed to read font {}", path.display()))?;
        let font = FontVec::try_from_vec(bytes)
            .map_err(|e| anyhow!("invalid font {}: {}", path.display(), e))?;
        Ok(Self { font: Some(font) })
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Draw each detection with its label onto `image`.
    pub fn annotate(&self, image: &mut RgbImage, detections: &[Detection], labels: &[String]) {
        for (detection, label) in detections.iter().zip(labels) {
            let Some(rect) = clamp_to_image(detection, image.width(), image.height()) else {
                continue;
            };
            draw_box(image, rect);
            if let Some(font) = &self.font {
                let y = (rect.top() - LABEL_SCALE as i32).max(0);
                draw_text_mut(
                    image,
                    BOX_COLOR,
                    rect.left(),
                    y,
                    PxScale::from(LABEL_SCALE),
                    font,
                    label,
                );
            }
        }
    }
}

fn clamp_to_image(detection: &Detection, width: u32, height: u32) -> Option<Rect> {
    if width == 0 || height == 0 {
        return None;
    }
    let b = detection.bbox;
    let left = b.left.max(0.0).floor() as i64;
    let top = b.top.max(0.0).floor() as i64;
    let right = (b.right().min(width as f32 - 1.0)).floor() as i64;
    let bottom = (b.bottom().min(height as f32 - 1.0)).floor() as i64;
    if right < left || bottom < top {
        return None;
    }
    Some(
        Rect::at(left as i32, top as i32)
            .of_size((right - left + 1) as u32, (bottom - top + 1) as u32),
    )
}

fn draw_box(image: &mut RgbImage, rect: Rect) {
    draw_hollow_rect_mut(image, rect, BOX_COLOR);
    for inset in 1..BOX_THICKNESS {
        if rect.width() <= 2 * inset || rect.height() <= 2 * inset {
            break;
        }
        let inner = Rect::at(rect.left() + inset as i32, rect.top() + inset as i32)
            .of_size(rect.width() - 2 * inset, rect.height() - 2 * inset);
        draw_hollow_rect_mut(image, inner, BOX_COLOR);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::BoundingBox;

    fn detection(left: f32, top: f32, width: f32, height: f32) -> Detection {
        Detection {
            bbox: BoundingBox::new(left, top, width, height),
            confidence: 0.9,
            class_id: 0,
        }
    }

    #[test]
    fn draws_two_pixel_red_outline() {
        let mut image = RgbImage::new(40, 40);
        Annotator::new().annotate(
            &mut image,
            &[detection(10.0, 10.0, 20.0, 20.0)],
            &["person".to_string()],
        );

        assert_eq!(image.get_pixel(10, 10), &BOX_COLOR);
        assert_eq!(image.get_pixel(11, 15), &BOX_COLOR);
        assert_eq!(image.get_pixel(20, 20), &Rgb([0, 0, 0]));
        assert_eq!(image.get_pixel(5, 5), &Rgb([0, 0, 0]));
    }

    #[test]
    fn boxes_outside_image_are_clamped_or_skipped() {
        let mut image = RgbImage::new(20, 20);
        Annotator::new().annotate(
            &mut image,
            &[
                detection(-5.0, -5.0, 10.0, 10.0),
                detection(50.0, 50.0, 10.0, 10.0),
            ],
            &["a".to_string(), "b".to_string()],
        );
        assert_eq!(image.get_pixel(0, 0), &BOX_COLOR);
    }

    fn fixture_font() -> String {
        format!("{}/tests/fixtures/DejaVuSansMono.ttf", env!("CARGO_MANIFEST_DIR"))
    }

    fn label_pixels(image: &RgbImage) -> usize {
        // Rows above the box, where only label text can land.
        (0..30)
            .flat_map(|y| (0..image.width()).map(move |x| (x, y)))
            .filter(|&(x, y)| image.get_pixel(x, y)[0] > 0)
            .count()
    }

    #[test]
    fn labels_are_drawn_above_the_box_with_a_font() {
        let annotator = Annotator::with_font_file(fixture_font()).unwrap();
        assert!(annotator.has_font());

        let mut image = RgbImage::new(120, 80);
        annotator.annotate(
            &mut image,
            &[detection(10.0, 30.0, 60.0, 40.0)],
            &["person".to_string()],
        );
        assert!(label_pixels(&image) > 10);
        assert!(image.pixels().all(|p| p[1] == 0 && p[2] == 0));

        let mut plain = RgbImage::new(120, 80);
        Annotator::new().annotate(
            &mut plain,
            &[detection(10.0, 30.0, 60.0, 40.0)],
            &["person".to_string()],
        );
        assert_eq!(label_pixels(&plain), 0);
    }

    #[test]
    fn missing_font_file_is_an_error() {
        assert!(Annotator::with_font_file("/nonexistent/font.ttf").is_err());
    }
}
