use ndarray::Array2;

use super::result::{BoundingBox, Detection};

/// First column holding a class score.
const CLASS_SCORES_OFFSET: usize = 5;

/// Turn raw network rows into frame-space candidates.
///
/// Each row picks its best class (first one on ties). Rows whose best score is not strictly
/// above `confidence` are dropped, as are rows too short to carry a class score.
pub fn decode_candidates(
    outputs: &[Array2<f32>],
    frame_width: u32,
    frame_height: u32,
    confidence: f32,
) -> Vec<Detection> {
    let fw = frame_width as f32;
    let fh = frame_height as f32;
    let mut candidates = Vec::new();

    for output in outputs {
        if output.ncols() <= CLASS_SCORES_OFFSET {
            if output.nrows() > 0 {
                log::warn!(
                    "skipping detector output with {} columns (need at least {})",
                    output.ncols(),
                    CLASS_SCORES_OFFSET + 1
                );
            }
            continue;
        }
        for row in output.rows() {
            let mut best: Option<(usize, f32)> = None;
            for (class_id, &score) in row.iter().skip(CLASS_SCORES_OFFSET).enumerate() {
                if best.map_or(true, |(_, s)| score > s) {
                    best = Some((class_id, score));
                }
            }
            let Some((class_id, score)) = best else {
                continue;
            };
            if !(score > confidence) {
                continue;
            }

            let cx = row[0] * fw;
            let cy = row[1] * fh;
            let width = row[2] * fw;
            let height = row[3] * fh;
            candidates.push(Detection {
                bbox: BoundingBox::new(cx - width / 2.0, cy - height / 2.0, width, height),
                confidence: score,
                class_id,
            });
        }
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn converts_center_box_to_frame_pixels() {
        let out = array![[0.5, 0.5, 0.25, 0.5, 0.9, 0.1, 0.8, 0.3]];
        let found = decode_candidates(&[out], 800, 400, 0.45);

        assert_eq!(found.len(), 1);
        let d = found[0];
        assert_eq!(d.class_id, 1);
        assert!((d.confidence - 0.8).abs() < 1e-6);
        assert_eq!(d.bbox, BoundingBox::new(300.0, 100.0, 200.0, 200.0));
    }

    #[test]
    fn threshold_is_strict_and_caller_supplied() {
        let out = array![
            [0.5, 0.5, 0.1, 0.1, 1.0, 0.30],
            [0.5, 0.5, 0.1, 0.1, 1.0, 0.45],
            [0.5, 0.5, 0.1, 0.1, 1.0, 0.46],
        ];
        assert_eq!(decode_candidates(&[out.clone()], 100, 100, 0.45).len(), 1);
        assert_eq!(decode_candidates(&[out], 100, 100, 0.2).len(), 3);
    }

    #[test]
    fn ties_pick_first_class() {
        let out = array![[0.5, 0.5, 0.1, 0.1, 1.0, 0.7, 0.7]];
        assert_eq!(decode_candidates(&[out], 10, 10, 0.5)[0].class_id, 0);
    }

    #[test]
    fn rows_are_collected_across_outputs_and_short_rows_skipped() {
        let short = array![[0.5, 0.5, 0.1, 0.1, 0.9]];
        let a = array![[0.2, 0.2, 0.1, 0.1, 1.0, 0.9]];
        let b = array![[0.8, 0.8, 0.1, 0.1, 1.0, 0.0, 0.6]];

        let found = decode_candidates(&[short, a, b], 100, 100, 0.5);
        assert_eq!(found.len(), 2);
        assert_eq!(found[1].class_id, 1);
    }
}
