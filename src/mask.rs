//! Region masking: keep pixels inside the configured zones, zero the rest.

use image::{GrayImage, Luma, Rgb};
use imageproc::drawing::draw_polygon_mut;
use imageproc::point::Point as PixelPoint;

use crate::frame::Frame;
use crate::zone::{polygon_area, MappedZones, Point};

const PASS: Luma<u8> = Luma([255]);

/// Build a single-channel mask: 255 inside any zone, 0 elsewhere.
pub fn build_mask(width: u32, height: u32, zones: &MappedZones) -> GrayImage {
    let mut mask = GrayImage::new(width, height);
    if width == 0 || height == 0 {
        return mask;
    }
    for polygon in zones.polygons() {
        if let Some(vertices) = drawable_polygon(polygon) {
            draw_polygon_mut(&mut mask, &vertices, PASS);
        }
    }
    mask
}

/// Restrict `frame` to its zones.
///
/// With no zones configured the frame passes through unchanged (the same pixel buffer). The
/// output always has the input's dimensions.
pub fn apply_zone_mask(frame: &Frame, zones: &MappedZones) -> Frame {
    if zones.is_empty() || frame.is_empty() {
        return frame.clone();
    }
    let (width, height) = frame.dimensions();
    let mask = build_mask(width, height, zones);

    let mut pixels = frame.pixels().clone();
    for (x, y, pixel) in pixels.enumerate_pixels_mut() {
        if mask.get_pixel(x, y)[0] == 0 {
            *pixel = Rgb([0, 0, 0]);
        }
    }
    frame.with_pixels(pixels)
}

/// Normalize a zone polygon for filling.
///
/// Consecutive duplicates and a closing point equal to the first are dropped. Polygons with
/// fewer than three vertices or no area fill nothing.
fn drawable_polygon(polygon: &[Point]) -> Option<Vec<PixelPoint<i32>>> {
    let mut vertices: Vec<PixelPoint<i32>> = Vec::with_capacity(polygon.len());
    for p in polygon {
        let next = PixelPoint::new(p.x, p.y);
        if vertices.last() != Some(&next) {
            vertices.push(next);
        }
    }
    while vertices.len() > 1 && vertices.first() == vertices.last() {
        vertices.pop();
    }
    if vertices.len() < 3 {
        return None;
    }
    let area = polygon_area(vertices.iter().map(|p| (p.x as i64, p.y as i64)));
    if area == 0.0 {
        return None;
    }
    Some(vertices)
}
