pub mod null;
pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use null::NullDetector;
pub use stub::StubDetector;

#[cfg(feature = "backend-tract")]
pub use tract::TractDetector;
