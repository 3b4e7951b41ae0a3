//! Identification and enrollment against the encoding database.
//!
//! Runs on the engine thread. Outcomes the user should see (no face, too
//! dark, unknown person, ...) come back as verdicts; only infrastructure
//! failures (database, inference) are errors.

use crate::config::Thresholds;
use crate::engine::EngineError;
use crate::store::EncodingStore;
use crate::verdict::{EnrollmentResponse, FrameSize, IdentificationVerdict, VerdictStatus};
use attend_core::quality;
use attend_core::{BoundingBox, CosineMatcher, FaceEncoder, Matcher};
use attend_hw::photo;
use chrono::{Local, NaiveDateTime, Timelike};
use image::{imageops, imageops::FilterType, GrayImage};
use std::path::Path;
use std::time::Instant;

/// Longest side of the frame handed to the detector during identification.
const DETECTION_MAX_SIDE: u32 = 640;

pub struct Recognition<E> {
    encoder: E,
    thresholds: Thresholds,
    matcher: CosineMatcher,
    clock: fn() -> NaiveDateTime,
}

impl<E: FaceEncoder> Recognition<E> {
    pub fn new(encoder: E, thresholds: Thresholds) -> Self {
        Self {
            encoder,
            thresholds,
            matcher: CosineMatcher,
            clock: || Local::now().naive_local(),
        }
    }

    #[cfg(test)]
    fn with_clock(mut self, clock: fn() -> NaiveDateTime) -> Self {
        self.clock = clock;
        self
    }

    /// Identify the person in `image_path`.
    pub fn process_image(
        &mut self,
        image_path: &Path,
        db_path: &Path,
        liveness_threshold: f64,
    ) -> Result<IdentificationVerdict, EngineError> {
        if !image_path.exists() {
            tracing::error!(path = %image_path.display(), "image file not found");
            return Ok(IdentificationVerdict::error("Image file not found"));
        }
        if !db_path.exists() {
            tracing::error!(path = %db_path.display(), "face data file not found");
            return Ok(IdentificationVerdict::error("Face data file not found"));
        }
        let image = match photo::load_upright(image_path) {
            Ok(img) => img.to_luma8(),
            Err(e) => {
                tracing::error!(path = %image_path.display(), error = %e, "failed to load image");
                return Ok(IdentificationVerdict::error("Failed to load image"));
            }
        };

        let started = Instant::now();
        let mut verdict = IdentificationVerdict::error("");
        self.identify(&image, db_path, liveness_threshold, &mut verdict)?;
        verdict.processing_time = started.elapsed().as_secs_f64();

        tracing::info!(
            status = ?verdict.status,
            message = %verdict.message,
            id = ?verdict.id,
            distance = verdict.recognition_threshold,
            "identification finished"
        );
        Ok(verdict)
    }

    /// Fill `verdict` step by step; the first failing step sets its message.
    fn identify(
        &mut self,
        image: &GrayImage,
        db_path: &Path,
        liveness_threshold: f64,
        verdict: &mut IdentificationVerdict,
    ) -> Result<(), EngineError> {
        let t = Instant::now();
        verdict.light_threshold = quality::brightness(image);
        verdict.brightness_time = t.elapsed().as_secs_f64();
        if verdict.light_threshold < self.thresholds.min_brightness {
            verdict.message = "Please increase the light".into();
            return Ok(());
        }

        let t = Instant::now();
        let gallery = EncodingStore::open(db_path)?.all()?;
        verdict.loading_time = t.elapsed().as_secs_f64();
        tracing::debug!(count = gallery.len(), "encodings loaded");
        if gallery.is_empty() {
            tracing::error!("no known faces in the system");
            verdict.message = "No known faces in the system".into();
            return Ok(());
        }

        let (small, scale) = detection_frame(image);
        verdict.resized_frame_size = FrameSize {
            width: small.width(),
            height: small.height(),
        };

        let t = Instant::now();
        let faces = self.encoder.locate(&small).map_err(attend_core::PipelineError::from)?;
        verdict.detection_time = t.elapsed().as_secs_f64();
        if faces.is_empty() {
            tracing::error!("no face detected in the image");
            verdict.message = "No face detected in the image".into();
            return Ok(());
        }

        let t = Instant::now();
        let embeddings = faces
            .iter()
            .map(|face| self.encoder.embed(&small, face))
            .collect::<Result<Vec<_>, _>>()
            .map_err(attend_core::PipelineError::from)?;
        verdict.encoding_time = t.elapsed().as_secs_f64();

        for (face, embedding) in faces.iter().zip(&embeddings) {
            let t = Instant::now();
            let full = scale_box(face, scale);
            verdict.liveness_variance = quality::upper_face_region(&full, image.width(), image.height())
                .map(|region| quality::laplacian_variance(image, region))
                .unwrap_or(0.0);
            verdict.liveness_time = t.elapsed().as_secs_f64();

            if verdict.liveness_variance < liveness_threshold {
                tracing::error!(variance = verdict.liveness_variance, threshold = liveness_threshold, "fake face detected");
                verdict.status = VerdictStatus::Error;
                verdict.message = "Fake Face Detected!".into();
                break;
            }

            let t = Instant::now();
            let best = self
                .matcher
                .closest(embedding, &gallery, self.thresholds.match_distance);
            verdict.comparison_time = t.elapsed().as_secs_f64();

            verdict.recognition_threshold = best.distance.unwrap_or(1.0);

            match (best.matched, best.user_id, best.name) {
                (true, Some(id), Some(name)) => {
                    let now = (self.clock)();
                    verdict.status = VerdictStatus::Success;
                    verdict.attendance_time = Some(now.format("%H:%M:%S").to_string());
                    verdict.message = greeting(&name, now.hour());
                    verdict.id = Some(id);
                }
                _ => {
                    verdict.status = VerdictStatus::Error;
                    verdict.message = "Face recognition failed".into();
                }
            }
        }
        Ok(())
    }

    /// Enroll `user_id` unless it is already present.
    pub fn id_check(&mut self, db_path: &Path, user_id: i64, photo_path: &Path) -> Result<EnrollmentResponse, EngineError> {
        if EncodingStore::open(db_path)?.contains(user_id)? {
            return Ok(EnrollmentResponse::new(format!("User ID {user_id} already exists.")));
        }
        self.update_face_encodings(photo_path, db_path, user_id)
    }

    /// Add a new user, or refresh an existing user's encoding when the new
    /// photo is close enough to the stored one.
    pub fn update_face_encodings(
        &mut self,
        photo_path: &Path,
        db_path: &Path,
        user_id: i64,
    ) -> Result<EnrollmentResponse, EngineError> {
        if photo::ensure_non_empty(photo_path).is_err() {
            return Ok(EnrollmentResponse::new(format!(
                "File not found or empty: {}",
                photo_path.display()
            )));
        }

        let image = photo::load_upright(photo_path)?.to_luma8();
        let Some(new_face) = self.encoder.encode(&image)?.into_iter().next() else {
            return Ok(EnrollmentResponse::new("No faces found in the image."));
        };
        let name = photo_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let store = EncodingStore::open(db_path)?;
        let message = if let Some(existing) = store.get(user_id)? {
            let distance = existing.embedding.distance(&new_face.embedding);
            tracing::debug!(user_id, distance, "compared with stored encoding");
            if distance <= self.thresholds.update_distance {
                store.update(user_id, &name, &new_face.embedding)?;
                format!("Updated face for user ID {user_id}.")
            } else {
                format!("The new photo does not match the face for user ID {user_id}.")
            }
        } else {
            let gallery = store.all()?;
            let best = self
                .matcher
                .closest(&new_face.embedding, &gallery, self.thresholds.duplicate_distance);
            match best.user_id {
                Some(other) if best.matched => {
                    tracing::warn!(user_id, other, distance = ?best.distance, "face already enrolled");
                    format!("The face is already enrolled under another ID: {other}.")
                }
                _ => {
                    store.insert(user_id, &name, &new_face.embedding)?;
                    format!("Added new user with ID {user_id}.")
                }
            }
        };

        Ok(EnrollmentResponse::new(message))
    }
}

fn greeting(name: &str, hour: u32) -> String {
    if hour < 12 {
        format!("Good Morning {name}")
    } else {
        format!("Good Evening {name}")
    }
}

/// Downscale so the longest side fits the detector input. Returns the frame
/// and the factor applied.
fn detection_frame(image: &GrayImage) -> (GrayImage, f32) {
    let longest = image.width().max(image.height());
    if longest <= DETECTION_MAX_SIDE {
        return (image.clone(), 1.0);
    }
    let scale = DETECTION_MAX_SIDE as f32 / longest as f32;
    let w = ((image.width() as f32 * scale).round() as u32).max(1);
    let h = ((image.height() as f32 * scale).round() as u32).max(1);
    (imageops::resize(image, w, h, FilterType::Triangle), scale)
}

/// Map a box found on the detection frame back to the full image.
fn scale_box(face: &BoundingBox, scale: f32) -> BoundingBox {
    BoundingBox {
        x: face.x / scale,
        y: face.y / scale,
        width: face.width / scale,
        height: face.height / scale,
        confidence: face.confidence,
        landmarks: face.landmarks.map(|l| l.map(|(x, y)| (x / scale, y / scale))),
    }
}
