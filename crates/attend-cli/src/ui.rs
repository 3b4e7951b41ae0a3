//! Terminal output shared by the host flows.

use attend_core::{Guidance, OverlayColor};
use std::io::Write;

pub const GENERIC_FAILURE: &str = "Error: Failed to process the image.";
pub const CAMERA_PERMISSION_REQUIRED: &str = "Camera permission is required to take pictures.";

/// One-line progress indicator on stderr.
pub struct Progress {
    active: bool,
}

impl Progress {
    pub fn start(message: &str) -> Self {
        eprint!("{message}");
        let _ = std::io::stderr().flush();
        Self { active: true }
    }

    pub fn clear(&mut self) {
        if std::mem::take(&mut self.active) {
            eprint!("\r\x1b[2K");
            let _ = std::io::stderr().flush();
        }
    }
}

impl Drop for Progress {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Overwrite the guidance line with the latest classification.
pub fn show_guidance(guidance: &Guidance) {
    let color = match guidance.color {
        OverlayColor::Red => "\x1b[31m",
        OverlayColor::Green => "\x1b[32m",
    };
    let text = status_line(guidance.text);
    eprint!("\r\x1b[2K{color}{text}\x1b[0m");
    let _ = std::io::stderr().flush();
}

/// Fold a multi-line guidance text onto the single status line.
fn status_line(text: &str) -> String {
    text.lines().map(str::trim).collect::<Vec<_>>().join(" ")
}

/// End the guidance line so later output starts on a fresh line.
pub fn end_guidance() {
    eprintln!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use attend_core::FaceStatus;

    #[test]
    fn test_status_line_keeps_every_line() {
        let guidance = Guidance::from(FaceStatus::TooFar);
        assert_eq!(
            status_line(guidance.text),
            "Your face is too far Please move closer to the camera for better accuracy."
        );
        assert_eq!(status_line("Your Face is not centered"), "Your Face is not centered");
    }
}
