//! Operator-drawn zones and viewport-to-frame coordinate mapping.
//!
//! Zones arrive in the coordinate space of the operator UI's viewport. Before masking they are
//! mapped into capture-frame space with a pure per-axis linear scale rounding down.
//! Every configured zone is mapped and applied; the mask is their union.

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};

/// A point in viewport or frame units.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "PointRepr")]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl From<(i32, i32)> for Point {
    fn from((x, y): (i32, i32)) -> Self {
        Self { x, y }
    }
}

/// Points are accepted as `{"x":..,"y":..}` or as `[x, y]`.
#[derive(Deserialize)]
#[serde(untagged)]
enum PointRepr {
    Object {
        #[serde(alias = "X")]
        x: i32,
        #[serde(alias = "Y")]
        y: i32,
    },
    Pair([i32; 2]),
}

impl From<PointRepr> for Point {
    fn from(repr: PointRepr) -> Self {
        match repr {
            PointRepr::Object { x, y } => Point { x, y },
            PointRepr::Pair([x, y]) => Point { x, y },
        }
    }
}

/// Ordered polygon vertices.
pub type Polygon = Vec<Point>;

/// Size of the operator UI viewport the zones were drawn in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SizeRepr")]
pub struct ViewportSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SizeRepr {
    Object {
        #[serde(alias = "X", alias = "w")]
        width: u32,
        #[serde(alias = "Y", alias = "h")]
        height: u32,
    },
    Pair([u32; 2]),
}

impl From<SizeRepr> for ViewportSize {
    fn from(repr: SizeRepr) -> Self {
        match repr {
            SizeRepr::Object { width, height } => ViewportSize { width, height },
            SizeRepr::Pair([width, height]) => ViewportSize { width, height },
        }
    }
}

/// Zone update message. Replaces the previous configuration wholesale.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneConfig {
    #[serde(rename = "viewportSize", alias = "viewport_size", alias = "ViewSize")]
    pub viewport_size: ViewportSize,
    #[serde(default, alias = "DetectPoint")]
    pub zones: Vec<Polygon>,
}

impl ZoneConfig {
    pub fn new(viewport_width: u32, viewport_height: u32, zones: Vec<Polygon>) -> Self {
        Self {
            viewport_size: ViewportSize {
                width: viewport_width,
                height: viewport_height,
            },
            zones,
        }
    }

    /// Parse a JSON zone update message.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| anyhow!("invalid zone config: {}", e))
    }

    /// A configuration is usable once its viewport has a non-zero size.
    pub fn validate(&self) -> Result<()> {
        if self.viewport_size.width == 0 || self.viewport_size.height == 0 {
            bail!(
                "zone viewport must be non-zero (got {}x{})",
                self.viewport_size.width,
                self.viewport_size.height
            );
        }
        Ok(())
    }

    /// Map every zone into a `frame_width`x`frame_height` frame.
    pub fn map_to_frame(&self, frame_width: u32, frame_height: u32) -> Result<MappedZones> {
        self.validate()?;
        let polygons = self
            .zones
            .iter()
            .map(|zone| {
                zone.iter()
                    .map(|p| self.map_point(*p, frame_width, frame_height))
                    .collect()
            })
            .collect();
        Ok(MappedZones {
            frame_width,
            frame_height,
            polygons,
        })
    }

    /// `⌊x·W/w⌋` per axis. Points off the viewport stay off the frame; the mask clips them.
    fn map_point(&self, point: Point, frame_width: u32, frame_height: u32) -> Point {
        Point {
            x: scale_floor(point.x, frame_width, self.viewport_size.width),
            y: scale_floor(point.y, frame_height, self.viewport_size.height),
        }
    }
}

fn scale_floor(value: i32, to: u32, from: u32) -> i32 {
    let scaled = (value as i64 * to as i64).div_euclid(from as i64);
    scaled.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

/// Zones mapped into capture-frame coordinates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MappedZones {
    frame_width: u32,
    frame_height: u32,
    polygons: Vec<Polygon>,
}

impl MappedZones {
    /// No zones at all: masking passes frames through untouched.
    pub fn pass_through(frame_width: u32, frame_height: u32) -> Self {
        Self {
            frame_width,
            frame_height,
            polygons: Vec::new(),
        }
    }

    pub fn polygons(&self) -> &[Polygon] {
        &self.polygons
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    pub fn frame_size(&self) -> (u32, u32) {
        (self.frame_width, self.frame_height)
    }
}

/// Absolute polygon area by the shoelace formula.
pub(crate) fn polygon_area<I>(vertices: I) -> f64
where
    I: IntoIterator<Item = (i64, i64)>,
{
    let points: Vec<(i64, i64)> = vertices.into_iter().collect();
    if points.len() < 3 {
        return 0.0;
    }
    let twice: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| a.0 * b.1 - b.0 * a.1)
        .sum();
    (twice as f64 / 2.0).abs()
}

// ----------------------------------------------------------------------------
// ZoneStore: the single live zone configuration
// ----------------------------------------------------------------------------

/// Holds the live zone configuration, already mapped to the publish resolution.
///
/// Updates replace the value wholesale (last write wins). Readers take an `Arc` snapshot, so a
/// frame is always masked with one consistent configuration.
pub struct ZoneStore {
    frame_width: u32,
    frame_height: u32,
    current: Mutex<Option<Arc<MappedZones>>>,
}

impl ZoneStore {
    pub fn new(frame_width: u32, frame_height: u32) -> Self {
        Self {
            frame_width,
            frame_height,
            current: Mutex::new(None),
        }
    }

    /// Validate, map and install a new configuration.
    ///
    /// An invalid configuration leaves the previous one in place.
    pub fn update(&self, config: &ZoneConfig) -> Result<Arc<MappedZones>> {
        let mapped = Arc::new(config.map_to_frame(self.frame_width, self.frame_height)?);
        let mut guard = self
            .current
            .lock()
            .map_err(|_| anyhow!("zone store lock poisoned"))?;
        *guard = Some(mapped.clone());
        Ok(mapped)
    }

    /// Current configuration, if one has been installed.
    pub fn snapshot(&self) -> Result<Option<Arc<MappedZones>>> {
        let guard = self
            .current
            .lock()
            .map_err(|_| anyhow!("zone store lock poisoned"))?;
        Ok(guard.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(x0: i32, y0: i32, x1: i32, y1: i32) -> Polygon {
        vec![
            Point::new(x0, y0),
            Point::new(x1, y0),
            Point::new(x1, y1),
            Point::new(x0, y1),
        ]
    }

    #[test]
    fn maps_ui_quadrant_into_publish_resolution() {
        let cfg = ZoneConfig::new(1280, 720, vec![rect(0, 0, 640, 360)]);
        let mapped = cfg.map_to_frame(854, 480).unwrap();

        assert_eq!(
            mapped.polygons()[0],
            vec![
                Point::new(0, 0),
                Point::new(427, 0),
                Point::new(427, 240),
                Point::new(0, 240)
            ]
        );
        assert_eq!(mapped.frame_size(), (854, 480));
    }

    #[test]
    fn mapping_rounds_down_per_axis() {
        let cfg = ZoneConfig::new(3, 7, vec![vec![Point::new(1, 1), Point::new(2, 6)]]);
        let mapped = cfg.map_to_frame(10, 10).unwrap();
        // 1*10/3 = 3.33, 1*10/7 = 1.43, 2*10/3 = 6.67, 6*10/7 = 8.57
        assert_eq!(
            mapped.polygons()[0],
            vec![Point::new(3, 1), Point::new(6, 8)]
        );
    }

    #[test]
    fn negative_points_round_down() {
        let cfg = ZoneConfig::new(3, 7, vec![vec![Point::new(-1, -1), Point::new(-3, 0)]]);
        let mapped = cfg.map_to_frame(10, 10).unwrap();
        // -10/3 = -3.33, -10/7 = -1.43, -30/3 = -10
        assert_eq!(
            mapped.polygons()[0],
            vec![Point::new(-4, -2), Point::new(-10, 0)]
        );
    }

    #[test]
    fn mapping_is_monotonic_per_axis() {
        let points: Vec<Point> = (0..=1280).step_by(7).map(|x| Point::new(x, x / 2)).collect();
        let cfg = ZoneConfig::new(1280, 720, vec![points]);
        let mapped = cfg.map_to_frame(854, 480).unwrap();

        for pair in mapped.polygons()[0].windows(2) {
            assert!(pair[0].x <= pair[1].x);
            assert!(pair[0].y <= pair[1].y);
        }
        let last = mapped.polygons()[0].last().copied().unwrap();
        assert!(last.x <= 854 && last.y <= 480);
    }

    #[test]
    fn every_zone_is_mapped() {
        let cfg = ZoneConfig::new(100, 100, vec![rect(0, 0, 10, 10), rect(50, 50, 100, 100)]);
        let mapped = cfg.map_to_frame(200, 50).unwrap();

        assert_eq!(mapped.polygons().len(), 2);
        assert_eq!(mapped.polygons()[1][2], Point::new(200, 50));
    }

    #[test]
    fn zero_viewport_is_rejected() {
        let cfg = ZoneConfig::new(0, 720, vec![rect(0, 0, 1, 1)]);
        let err = cfg.map_to_frame(854, 480).unwrap_err();
        assert!(format!("{err}").contains("non-zero"));
    }

    #[test]
    fn parses_object_and_pair_points() {
        let cfg = ZoneConfig::from_json(
            r#"{
                "viewportSize": {"width": 1280, "height": 720},
                "zones": [[{"x": 0, "y": 0}, [640, 0], {"X": 640, "Y": 360}]]
            }"#,
        )
        .unwrap();

        assert_eq!(cfg.viewport_size.width, 1280);
        assert_eq!(
            cfg.zones[0],
            vec![Point::new(0, 0), Point::new(640, 0), Point::new(640, 360)]
        );
    }

    #[test]
    fn parses_pair_viewport_without_zones() {
        let cfg = ZoneConfig::from_json(r#"{"viewport_size": [640, 480]}"#).unwrap();
        assert_eq!(cfg.viewport_size, ViewportSize { width: 640, height: 480 });
        assert!(cfg.zones.is_empty());
    }

    #[test]
    fn polygon_area_handles_degenerate_input() {
        assert_eq!(polygon_area([(0, 0), (4, 0), (4, 3), (0, 3)]), 12.0);
        assert_eq!(polygon_area([(0, 0), (5, 0), (9, 0)]), 0.0);
        assert_eq!(polygon_area([(1, 1), (2, 2)]), 0.0);
    }

    #[test]
    fn store_keeps_last_valid_config() {
        let store = ZoneStore::new(854, 480);
        assert!(store.snapshot().unwrap().is_none());

        store
            .update(&ZoneConfig::new(1280, 720, vec![rect(0, 0, 640, 360)]))
            .unwrap();
        assert!(store
            .update(&ZoneConfig::new(0, 0, vec![rect(0, 0, 1, 1)]))
            .is_err());

        let current = store.snapshot().unwrap().unwrap();
        assert_eq!(current.polygons()[0][2], Point::new(427, 240));

        store.update(&ZoneConfig::new(1280, 720, vec![])).unwrap();
        assert!(store.snapshot().unwrap().unwrap().is_empty());
    }
}
