//! attend-core — Face detection, recognition and framing checks.
//!
//! Uses SCRFD for face detection and ArcFace for face recognition,
//! both running via ONNX Runtime for CPU inference. The framing
//! classifier and image-quality probes are plain geometry and need
//! no model.

pub mod alignment;
pub mod detector;
pub mod framing;
pub mod pipeline;
pub mod quality;
pub mod recognizer;
pub mod types;

pub use detector::{DetectorError, FaceDetector};
pub use framing::{classify, FaceStatus, FramingProfile, Guidance, OverlayColor};
pub use pipeline::{EncodedFace, FaceEncoder, FaceLocator, OnnxPipeline, PipelineError};
pub use recognizer::{FaceRecognizer, RecognizerError};
pub use types::{BoundingBox, CosineMatcher, Embedding, FaceRecord, MatchResult, Matcher};

use std::path::PathBuf;

/// File name of the SCRFD detection model inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// File name of the ArcFace recognition model inside the model directory.
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

/// System-wide model directory used when `ATTEND_MODEL_DIR` is unset.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("/usr/share/attend/models")
}
