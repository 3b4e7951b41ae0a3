//! Enrollment: capture (or pick) a photo, store it, register its encoding.

use crate::config::Config;
use crate::engine::EngineHandle;
use crate::session::{CaptureSession, Latch, SessionError};
use crate::ui::{self, Progress};
use anyhow::{bail, Result};
use attend_core::{FaceLocator, FramingProfile};
use attend_hw::{photo, CameraError};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};

pub struct EnrollOptions {
    pub user_id: i64,
    pub name: String,
    /// Existing photo to enroll instead of using the camera.
    pub image: Option<PathBuf>,
    /// Skip the save confirmation.
    pub yes: bool,
    /// Refresh an existing user's encoding instead of refusing a taken id.
    pub update: bool,
}

/// Reject names that cannot serve as a photo file stem.
pub fn validate_name(name: &str) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        bail!("name must not be empty");
    }
    if name.contains(['/', '\\']) || name == "." || name == ".." {
        bail!("name must not contain path separators: {name}");
    }
    Ok(())
}

pub async fn run_enroll<L>(config: &Config, engine: &EngineHandle, locator: L, opts: &EnrollOptions) -> Result<()>
where
    L: FaceLocator + 'static,
{
    validate_name(&opts.name)?;
    if opts.user_id <= 0 {
        bail!("user id must be a positive number");
    }

    let source = match &opts.image {
        Some(path) => path.clone(),
        None => {
            let temp = config.temp_image_path();
            match capture_enrollment_photo(config, locator, &temp).await {
                Ok(true) => temp,
                Ok(false) => {
                    println!("Capture cancelled.");
                    return Ok(());
                }
                Err(SessionError::Camera(CameraError::PermissionDenied(device))) => {
                    tracing::error!(device = %device, "camera permission denied");
                    println!("{}", ui::CAMERA_PERMISSION_REQUIRED);
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }
        }
    };

    if !opts.yes && !confirm(&format!("Save photo for {} (ID {})? [y/N]", opts.name, opts.user_id)).await? {
        println!("Enrollment cancelled.");
        return Ok(());
    }

    let dest = config.enrollment_photo_path(opts.name.trim());
    if let Err(e) = photo::save_enrollment_photo(&source, &dest) {
        tracing::error!(src = %source.display(), error = %e, "enrollment photo unusable");
        println!("{}", ui::GENERIC_FAILURE);
        return Ok(());
    }

    let mut progress = Progress::start("Enrolling...");
    let outcome = if opts.update {
        engine.update_face_encodings(dest, config.db_path.clone(), opts.user_id).await
    } else {
        engine.id_check(config.db_path.clone(), opts.user_id, dest).await
    };
    progress.clear();

    match outcome {
        Ok(response) => println!("{}", response.message),
        Err(e) => {
            tracing::error!(error = %e, "enrollment failed");
            println!("{}", ui::GENERIC_FAILURE);
        }
    }
    Ok(())
}

/// Wait for the first well-framed face, save it to `path` and close the camera.
///
/// Returns false when the camera stopped before a face was framed.
async fn capture_enrollment_photo<L>(config: &Config, locator: L, path: &Path) -> Result<bool, SessionError>
where
    L: FaceLocator + 'static,
{
    let mut session = CaptureSession::start(
        &config.camera_device,
        config.warmup_frames,
        locator,
        FramingProfile::ENROLLMENT,
    )
    .await?;

    let mut latch = Latch::default();
    while let Some(guidance) = session.next_guidance().await {
        ui::show_guidance(&guidance);
        if latch.observe(guidance.status) {
            ui::end_guidance();
            session.take_picture(path).await?;
            session.close();
            return Ok(true);
        }
    }
    ui::end_guidance();
    Ok(false)
}

async fn confirm(question: &str) -> Result<bool> {
    println!("{question}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let answer = lines.next_line().await?.unwrap_or_default();
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("alice").is_ok());
        assert!(validate_name("Mary Ann").is_ok());
        assert!(validate_name("  ").is_err());
        assert!(validate_name("../etc/passwd").is_err());
        assert!(validate_name("a\\b").is_err());
        assert!(validate_name("..").is_err());
    }
}
