//! Detection + encoding pipeline.
//!
//! [`FaceLocator`] and [`FaceEncoder`] are the seams the capture session and
//! the recognition engine depend on; [`OnnxPipeline`] is the production
//! implementation backed by SCRFD and ArcFace.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Embedding};
use image::GrayImage;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Finds faces in a frame, best candidate first.
pub trait FaceLocator: Send {
    fn locate(&mut self, image: &GrayImage) -> Result<Vec<BoundingBox>, DetectorError>;
}

impl FaceLocator for FaceDetector {
    fn locate(&mut self, image: &GrayImage) -> Result<Vec<BoundingBox>, DetectorError> {
        self.detect(image)
    }
}

/// A located face together with its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedFace {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// Locates faces and computes their embeddings.
pub trait FaceEncoder: FaceLocator {
    fn embed(&mut self, image: &GrayImage, face: &BoundingBox) -> Result<Embedding, RecognizerError>;

    /// Locate every face and embed each one, in locator order.
    fn encode(&mut self, image: &GrayImage) -> Result<Vec<EncodedFace>, PipelineError> {
        let faces = self.locate(image)?;
        faces
            .into_iter()
            .map(|bbox| {
                let embedding = self.embed(image, &bbox)?;
                Ok(EncodedFace { bbox, embedding })
            })
            .collect()
    }
}

/// SCRFD detection followed by ArcFace encoding.
pub struct OnnxPipeline {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxPipeline {
    pub fn load(detector_path: &Path, recognizer_path: &Path) -> Result<Self, PipelineError> {
        let detector = FaceDetector::load(detector_path)?;
        let recognizer = FaceRecognizer::load(recognizer_path)?;
        Ok(Self { detector, recognizer })
    }
}

impl FaceLocator for OnnxPipeline {
    fn locate(&mut self, image: &GrayImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let faces = self.detector.detect(image)?;
        tracing::debug!(count = faces.len(), "faces detected");
        Ok(faces)
    }
}

impl FaceEncoder for OnnxPipeline {
    fn embed(&mut self, image: &GrayImage, face: &BoundingBox) -> Result<Embedding, RecognizerError> {
        self.recognizer.extract(image, face)
    }
}
