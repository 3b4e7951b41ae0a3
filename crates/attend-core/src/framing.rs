//! Face framing classifier.
//!
//! Maps a detected face box and the frame rectangle to one of three states
//! using screen-relative thresholds. The check order is fixed: distance
//! first, then centering. A face that is both too small and off-centre is
//! reported as [`FaceStatus::TooFar`].

use crate::types::BoundingBox;
use serde::{Deserialize, Serialize};

const TOO_FAR_TEXT: &str =
    "Your face is too far\nPlease move closer to the camera for better accuracy.";
const NOT_CENTERED_TEXT: &str = "Your Face is not centered";
const VALID_TEXT: &str = "Your face is well-positioned";

/// Classification of a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FaceStatus {
    TooFar,
    NotCentered,
    Valid,
}

/// Threshold set for one calling context.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FramingProfile {
    /// Face height (or width) at or below this fraction of the frame height
    /// (or width) counts as too far.
    pub min_screen_fraction: f32,
    /// Allowed deviation of the face centre from the frame centre, as a
    /// fraction of frame width (x axis) and height (y axis).
    pub center_tolerance: f32,
}

impl FramingProfile {
    /// Live attendance check-in: accepts almost any visible face.
    pub const RECOGNITION: Self = Self {
        min_screen_fraction: 0.005,
        center_tolerance: 0.50,
    };

    /// Enrollment: the face must be large and near the centre.
    pub const ENROLLMENT: Self = Self {
        min_screen_fraction: 0.20,
        center_tolerance: 0.13,
    };

    /// Fallback for unknown callers.
    pub const DEFAULT: Self = Self {
        min_screen_fraction: 0.25,
        center_tolerance: 0.17,
    };
}

impl Default for FramingProfile {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Overlay colour drawn around the face box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlayColor {
    Red,
    Green,
}

/// What the host shows for a classified frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Guidance {
    pub status: FaceStatus,
    pub color: OverlayColor,
    pub text: &'static str,
}

impl From<FaceStatus> for Guidance {
    fn from(status: FaceStatus) -> Self {
        let (color, text) = match status {
            FaceStatus::TooFar => (OverlayColor::Red, TOO_FAR_TEXT),
            FaceStatus::NotCentered => (OverlayColor::Red, NOT_CENTERED_TEXT),
            FaceStatus::Valid => (OverlayColor::Green, VALID_TEXT),
        };
        Self {
            status,
            color,
            text,
        }
    }
}

/// Face box clamped to the frame, plus its unclamped centre.
#[derive(Debug, Clone, Copy, PartialEq)]
struct FaceExtent {
    cx: f32,
    cy: f32,
    left: f32,
    top: f32,
    right: f32,
    bottom: f32,
}

impl FaceExtent {
    fn clamped(face: &BoundingBox, frame_width: f32, frame_height: f32) -> Self {
        let (cx, cy) = face.center();
        Self {
            cx,
            cy,
            left: (cx - face.width / 2.0).max(0.0),
            top: (cy - face.height / 2.0).max(0.0),
            right: (cx + face.width / 2.0).min(frame_width),
            bottom: (cy + face.height / 2.0).min(frame_height),
        }
    }
}

/// Classify a face box against a frame of `frame_width` × `frame_height` pixels.
pub fn classify(
    face: &BoundingBox,
    frame_width: u32,
    frame_height: u32,
    profile: &FramingProfile,
) -> FaceStatus {
    let w = frame_width as f32;
    let h = frame_height as f32;
    let extent = FaceExtent::clamped(face, w, h);

    if is_too_far(&extent, w, h, profile.min_screen_fraction) {
        FaceStatus::TooFar
    } else if is_off_center(&extent, w, h, profile.center_tolerance) {
        FaceStatus::NotCentered
    } else {
        FaceStatus::Valid
    }
}

fn is_too_far(extent: &FaceExtent, w: f32, h: f32, min_fraction: f32) -> bool {
    extent.bottom - extent.top <= h * min_fraction || extent.right - extent.left <= w * min_fraction
}

fn is_off_center(extent: &FaceExtent, w: f32, h: f32, tolerance: f32) -> bool {
    let (center_x, center_y) = (w / 2.0, h / 2.0);
    let (tol_x, tol_y) = (w * tolerance, h * tolerance);

    extent.cx < center_x - tol_x
        || extent.cx > center_x + tol_x
        || extent.cy < center_y - tol_y
        || extent.cy > center_y + tol_y
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: u32 = 640;
    const H: u32 = 480;

    /// Box of `w`×`h` centred at (`cx`, `cy`).
    fn centered_at(cx: f32, cy: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox::new(cx - w / 2.0, cy - h / 2.0, w, h)
    }

    #[test]
    fn test_small_box_is_too_far_for_every_profile() {
        let face = centered_at(320.0, 240.0, 2.0, 2.0);
        for profile in [
            FramingProfile::RECOGNITION,
            FramingProfile::ENROLLMENT,
            FramingProfile::DEFAULT,
        ] {
            assert_eq!(classify(&face, W, H, &profile), FaceStatus::TooFar);
        }
    }

    #[test]
    fn test_too_far_boundary_is_inclusive() {
        // Enrollment: 20% of 480 = 96, 20% of 640 = 128.
        let at_limit = centered_at(320.0, 240.0, 200.0, 96.0);
        assert_eq!(
            classify(&at_limit, W, H, &FramingProfile::ENROLLMENT),
            FaceStatus::TooFar
        );
        let just_over = centered_at(320.0, 240.0, 200.0, 97.0);
        assert_eq!(
            classify(&just_over, W, H, &FramingProfile::ENROLLMENT),
            FaceStatus::Valid
        );
    }

    #[test]
    fn test_narrow_box_is_too_far() {
        // Tall enough but only 100px wide (< 128px).
        let face = centered_at(320.0, 240.0, 100.0, 300.0);
        assert_eq!(
            classify(&face, W, H, &FramingProfile::ENROLLMENT),
            FaceStatus::TooFar
        );
    }

    #[test]
    fn test_centered_adequate_box_is_valid() {
        let face = centered_at(320.0, 240.0, 200.0, 200.0);
        for profile in [
            FramingProfile::RECOGNITION,
            FramingProfile::ENROLLMENT,
            FramingProfile::DEFAULT,
        ] {
            assert_eq!(classify(&face, W, H, &profile), FaceStatus::Valid);
        }
    }

    #[test]
    fn test_horizontal_shift_is_not_centered() {
        // Enrollment tolerance on x: 0.13 * 640 = 83.2
        let face = centered_at(320.0 + 90.0, 240.0, 200.0, 200.0);
        assert_eq!(
            classify(&face, W, H, &FramingProfile::ENROLLMENT),
            FaceStatus::NotCentered
        );
        let face = centered_at(320.0 - 90.0, 240.0, 200.0, 200.0);
        assert_eq!(
            classify(&face, W, H, &FramingProfile::ENROLLMENT),
            FaceStatus::NotCentered
        );
    }

    #[test]
    fn test_vertical_shift_is_not_centered() {
        // Enrollment tolerance on y: 0.13 * 480 = 62.4
        let face = centered_at(320.0, 240.0 + 70.0, 200.0, 200.0);
        assert_eq!(
            classify(&face, W, H, &FramingProfile::ENROLLMENT),
            FaceStatus::NotCentered
        );
    }

    #[test]
    fn test_shift_within_tolerance_is_valid() {
        let face = centered_at(320.0 + 80.0, 240.0 - 60.0, 200.0, 200.0);
        assert_eq!(
            classify(&face, W, H, &FramingProfile::ENROLLMENT),
            FaceStatus::Valid
        );
    }

    #[test]
    fn test_recognition_profile_tolerates_large_offsets() {
        // 50% tolerance: anywhere inside the frame is centred enough.
        let face = centered_at(600.0, 40.0, 60.0, 60.0);
        assert_eq!(
            classify(&face, W, H, &FramingProfile::RECOGNITION),
            FaceStatus::Valid
        );
    }

    #[test]
    fn test_too_far_takes_precedence_over_off_center() {
        let face = centered_at(10.0, 10.0, 20.0, 20.0);
        assert_eq!(
            classify(&face, W, H, &FramingProfile::ENROLLMENT),
            FaceStatus::TooFar
        );
    }

    #[test]
    fn test_clamping_shrinks_box_at_frame_edge() {
        // 160px wide box centred at x=20 keeps only 100px on screen (< 128px).
        let face = centered_at(20.0, 240.0, 160.0, 200.0);
        assert_eq!(
            classify(&face, W, H, &FramingProfile::ENROLLMENT),
            FaceStatus::TooFar
        );
    }

    #[test]
    fn test_guidance_colors_and_text() {
        let g = Guidance::from(FaceStatus::TooFar);
        assert_eq!(g.color, OverlayColor::Red);
        assert!(g.text.starts_with("Your face is too far\n"));

        let g = Guidance::from(FaceStatus::NotCentered);
        assert_eq!(g.color, OverlayColor::Red);
        assert_eq!(g.text, "Your Face is not centered");

        let g = Guidance::from(FaceStatus::Valid);
        assert_eq!(g.color, OverlayColor::Green);
        assert_eq!(g.text, "Your face is well-positioned");
    }

    #[test]
    fn test_default_profile() {
        assert_eq!(FramingProfile::default(), FramingProfile::DEFAULT);
    }
}
