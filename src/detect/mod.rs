mod annotate;
mod backend;
mod backends;
mod decode;
mod nms;
mod result;
mod stage;

pub use annotate::Annotator;
pub use backend::ObjectDetector;
pub use backends::{NullDetector, StubDetector};
pub use decode::decode_candidates;
pub use nms::non_max_suppression;
pub use result::{BoundingBox, Detection, DetectionOutcome};
pub use stage::{DetectionConfig, DetectionStage};

#[cfg(feature = "backend-tract")]
pub use backends::tract::{TractDetector, DEFAULT_INPUT_SIZE};
