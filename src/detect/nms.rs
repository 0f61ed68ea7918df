use super::result::Detection;

/// Class-agnostic greedy non-maximum suppression.
///
/// Candidates are visited by descending confidence (stable for equal scores). A candidate is
/// kept unless its IoU with an already kept box exceeds `iou_threshold`. At most
/// `max_detections` boxes are returned.
pub fn non_max_suppression(
    mut candidates: Vec<Detection>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::with_capacity(candidates.len().min(max_detections));
    for candidate in candidates {
        if kept.len() >= max_detections {
            break;
        }
        let overlaps = kept
            .iter()
            .any(|k| k.bbox.iou(&candidate.bbox) > iou_threshold);
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}
