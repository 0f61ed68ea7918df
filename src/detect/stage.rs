use anyhow::{bail, Context, Result};

use super::annotate::Annotator;
use super::backend::ObjectDetector;
use super::decode::decode_candidates;
use super::nms::non_max_suppression;
use super::result::DetectionOutcome;
use crate::frame::Frame;
use crate::labels::LabelSet;

#[derive(Clone, Debug, PartialEq)]
pub struct DetectionConfig {
    /// Minimum class score, strictly exceeded, for a candidate to survive decoding.
    pub confidence_threshold: f32,
    /// Boxes overlapping a kept box by more than this IoU are suppressed.
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl DetectionConfig {
    pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.45;
    pub const DEFAULT_IOU_THRESHOLD: f32 = 0.5;
    pub const DEFAULT_MAX_DETECTIONS: usize = 100;

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            bail!(
                "confidence threshold must be in [0, 1], got {}",
                self.confidence_threshold
            );
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            bail!("IoU threshold must be in [0, 1], got {}", self.iou_threshold);
        }
        if self.max_detections == 0 {
            bail!("max detections must be non-zero");
        }
        Ok(())
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: Self::DEFAULT_CONFIDENCE_THRESHOLD,
            iou_threshold: Self::DEFAULT_IOU_THRESHOLD,
            max_detections: Self::DEFAULT_MAX_DETECTIONS,
        }
    }
}

/// Forward, decode, suppress, label and annotate.
pub struct DetectionStage {
    detector: Box<dyn ObjectDetector>,
    labels: LabelSet,
    annotator: Annotator,
    config: DetectionConfig,
}

impl DetectionStage {
    pub fn new(
        detector: Box<dyn ObjectDetector>,
        labels: LabelSet,
        annotator: Annotator,
        config: DetectionConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            detector,
            labels,
            annotator,
            config,
        })
    }

    pub fn detector_name(&self) -> &'static str {
        self.detector.name()
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    pub fn warm_up(&mut self) -> Result<()> {
        self.detector
            .warm_up()
            .with_context(|| format!("detector '{}' warm-up failed", self.detector.name()))
    }

    /// Classify one frame.
    ///
    /// With nothing above the confidence threshold, the input frame comes back unchanged with
    /// no labels.
    pub fn run(&mut self, frame: &Frame) -> Result<DetectionOutcome> {
        let outputs = self
            .detector
            .forward(frame)
            .with_context(|| format!("detector '{}' failed", self.detector.name()))?;

        let candidates = decode_candidates(
            &outputs,
            frame.width(),
            frame.height(),
            self.config.confidence_threshold,
        );
        if candidates.is_empty() {
            return Ok(DetectionOutcome {
                frame: frame.clone(),
                labels: Vec::new(),
                detections: Vec::new(),
            });
        }

        let detections = non_max_suppression(
            candidates,
            self.config.iou_threshold,
            self.config.max_detections,
        );
        let labels: Vec<String> = detections
            .iter()
            .map(|d| self.labels.name(d.class_id))
            .collect();

        let mut pixels = frame.pixels().clone();
        self.annotator.annotate(&mut pixels, &detections, &labels);
        log::debug!(
            "frame {}: {} detections [{}]",
            frame.sequence(),
            detections.len(),
            labels.join(",")
        );

        Ok(DetectionOutcome {
            frame: frame.with_pixels(pixels),
            labels,
            detections,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use ndarray::{array, Array2};

    struct FixedDetector(Vec<Array2<f32>>);

    impl ObjectDetector for FixedDetector {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn forward(&mut self, _frame: &Frame) -> Result<Vec<Array2<f32>>> {
            Ok(self.0.clone())
        }
    }

    fn stage(rows: Array2<f32>) -> DetectionStage {
        DetectionStage::new(
            Box::new(FixedDetector(vec![rows])),
            LabelSet::from_names(["person", "car"]),
            Annotator::new(),
            DetectionConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn no_candidates_returns_original_frame() {
        let frame = Frame::new(RgbImage::new(64, 48), 1);
        let mut stage = stage(array![[0.5, 0.5, 0.2, 0.2, 0.9, 0.1, 0.2]]);

        let outcome = stage.run(&frame).unwrap();
        assert!(outcome.is_empty());
        assert!(outcome.detections.is_empty());
        assert!(outcome.frame.shares_pixels_with(&frame));
    }

    #[test]
    fn overlapping_candidates_collapse_to_one_label() {
        let frame = Frame::new(RgbImage::new(100, 100), 2);
        let mut stage = stage(array![
            [0.5, 0.5, 0.4, 0.4, 1.0, 0.6, 0.0],
            [0.5, 0.5, 0.4, 0.4, 1.0, 0.0, 0.9],
            [0.1, 0.1, 0.1, 0.1, 1.0, 0.0, 0.0],
        ]);

        let outcome = stage.run(&frame).unwrap();
        assert_eq!(outcome.labels, vec!["car".to_string()]);
        assert_eq!(outcome.detections.len(), 1);
        assert!(!outcome.frame.shares_pixels_with(&frame));
        assert_eq!(outcome.frame.sequence(), 2);
    }

    #[test]
    fn unknown_class_ids_get_placeholder_labels() {
        let frame = Frame::new(RgbImage::new(100, 100), 0);
        let mut stage = stage(array![[0.5, 0.5, 0.2, 0.2, 1.0, 0.0, 0.0, 0.0, 0.8]]);
        assert_eq!(stage.run(&frame).unwrap().labels, vec!["class_3".to_string()]);
    }

    #[test]
    fn invalid_thresholds_are_rejected() {
        let result = DetectionStage::new(
            Box::new(FixedDetector(Vec::new())),
            LabelSet::default(),
            Annotator::new(),
            DetectionConfig {
                confidence_threshold: 1.5,
                ..DetectionConfig::default()
            },
        );
        assert!(result.is_err());
    }
}
