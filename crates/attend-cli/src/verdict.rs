//! JSON results returned by the recognition engine and their text rendering.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

/// Outcome of one identification call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentificationVerdict {
    pub status: VerdictStatus,
    pub message: String,
    /// "HH:MM:SS" local time of a successful match.
    pub attendance_time: Option<String>,
    /// Mean gray level of the photo.
    pub light_threshold: f32,
    /// Distance of the best match; 1.0 when nothing was compared.
    pub recognition_threshold: f32,
    pub liveness_variance: f64,
    pub id: Option<i64>,
    pub processing_time: f64,
    pub brightness_time: f64,
    pub loading_time: f64,
    pub detection_time: f64,
    pub encoding_time: f64,
    pub liveness_time: f64,
    pub comparison_time: f64,
    pub resized_frame_size: FrameSize,
}

impl IdentificationVerdict {
    /// Error verdict with zeroed measurements.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: VerdictStatus::Error,
            message: message.into(),
            attendance_time: None,
            light_threshold: 0.0,
            recognition_threshold: 1.0,
            liveness_variance: 0.0,
            id: None,
            processing_time: 0.0,
            brightness_time: 0.0,
            loading_time: 0.0,
            detection_time: 0.0,
            encoding_time: 0.0,
            liveness_time: 0.0,
            comparison_time: 0.0,
            resized_frame_size: FrameSize::default(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == VerdictStatus::Success
    }

    /// Lines shown to the user after an attendance attempt.
    pub fn render(&self) -> String {
        match (self.status, self.id) {
            (VerdictStatus::Success, Some(id)) => format!(
                "{}\nID: {id}\nTime: {}",
                self.message,
                self.attendance_time.as_deref().unwrap_or("")
            ),
            _ => format!("{}\nID: Not Available", self.message),
        }
    }
}

/// Outcome of an enrollment call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentResponse {
    pub message: String,
}

impl EnrollmentResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
