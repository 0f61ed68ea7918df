use crate::frame::Frame;

/// Axis-aligned box in frame pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.top + self.height
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection over union. Zero when either box is empty.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let w = (self.right().min(other.right()) - self.left.max(other.left)).max(0.0);
        let h = (self.bottom().min(other.bottom()) - self.top.max(other.top)).max(0.0);
        let inter = w * h;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// One detection candidate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub class_id: usize,
}

/// Result of running the detection stage on a frame.
#[derive(Clone, Debug)]
pub struct DetectionOutcome {
    /// Annotated frame, or the input frame when nothing was kept.
    pub frame: Frame,
    /// Class names of the kept detections, in confidence order. Duplicates allowed.
    pub labels: Vec<String>,
    pub detections: Vec<Detection>,
}

impl DetectionOutcome {
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
