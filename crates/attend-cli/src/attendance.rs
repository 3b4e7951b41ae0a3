//! Attendance check-in: live camera capture, identification, punch confirmation.

use crate::config::Config;
use crate::engine::{EngineError, EngineHandle};
use crate::session::{CaptureSession, Latch, SessionError};
use crate::ui::{self, Progress};
use crate::verdict::IdentificationVerdict;
use anyhow::Result;
use attend_core::{FaceLocator, FramingProfile};
use attend_hw::photo::{self, ATTENDANCE_JPEG_QUALITY};
use attend_hw::CameraError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

/// How long the verdict stays on screen before the camera resumes.
const VERDICT_DISPLAY: Duration = Duration::from_secs(3);
/// Accepted user-chosen liveness thresholds; 0 disables the check.
pub const LIVENESS_RANGE: std::ops::RangeInclusive<u32> = 20..=150;

/// Attendance event confirmed after a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Punch {
    In,
    Out,
    PersonalOut,
    SickOut,
}

impl Punch {
    pub fn label(self) -> &'static str {
        match self {
            Punch::In => "In",
            Punch::Out => "Out",
            Punch::PersonalOut => "Personal Out",
            Punch::SickOut => "Sick Out",
        }
    }
}

/// Answer to the punch prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PunchChoice {
    Punch(Punch),
    /// Dismissed: resume the camera without showing a verdict.
    Close,
}

/// Parse an answer to the punch prompt: a menu number or a name.
pub fn parse_punch(input: &str) -> Option<PunchChoice> {
    let choice = match input.trim().to_ascii_lowercase().as_str() {
        "1" | "in" => PunchChoice::Punch(Punch::In),
        "2" | "out" => PunchChoice::Punch(Punch::Out),
        "3" | "personal out" | "personal-out" => PunchChoice::Punch(Punch::PersonalOut),
        "4" | "sick out" | "sick-out" => PunchChoice::Punch(Punch::SickOut),
        "0" | "c" | "close" => PunchChoice::Close,
        _ => return None,
    };
    Some(choice)
}

/// clap value parser for `--liveness`: 0, or a value inside [`LIVENESS_RANGE`].
pub fn parse_liveness(s: &str) -> Result<u32, String> {
    let value: u32 = s.parse().map_err(|_| format!("`{s}` is not a number"))?;
    if value == 0 || LIVENESS_RANGE.contains(&value) {
        Ok(value)
    } else {
        Err(format!(
            "liveness threshold must be 0 (off) or between {} and {}",
            LIVENESS_RANGE.start(),
            LIVENESS_RANGE.end()
        ))
    }
}

pub struct CheckInOptions {
    pub liveness: u32,
    pub punch: Option<Punch>,
    pub continuous: bool,
    pub json: bool,
}

/// Run the live check-in flow until one attendance is handled (or forever in
/// continuous mode).
pub async fn run_check_in<L>(config: &Config, engine: &EngineHandle, locator: L, opts: &CheckInOptions) -> Result<()>
where
    L: FaceLocator + 'static,
{
    let mut session = match CaptureSession::start(
        &config.camera_device,
        config.warmup_frames,
        locator,
        FramingProfile::RECOGNITION,
    )
    .await
    {
        Err(SessionError::Camera(CameraError::PermissionDenied(device))) => {
            tracing::error!(device = %device, "camera permission denied");
            println!("{}", ui::CAMERA_PERMISSION_REQUIRED);
            return Ok(());
        }
        other => other?,
    };

    let mut latch = Latch::default();
    while let Some(guidance) = session.next_guidance().await {
        ui::show_guidance(&guidance);
        if !latch.observe(guidance.status) {
            continue;
        }
        ui::end_guidance();

        let temp = config.temp_image_path();
        session.take_picture(&temp).await?;
        let Some(captured) = prepare_attendance_copy(config, &temp) else {
            break;
        };

        let pending = {
            let engine = engine.clone();
            let db_path = config.db_path.clone();
            let liveness = opts.liveness as f64;
            tokio::spawn(async move { engine.process_image(captured, db_path, liveness).await })
        };

        tokio::time::sleep(Duration::from_millis(config.confirm_delay_ms)).await;
        let choice = match opts.punch {
            Some(punch) => PunchChoice::Punch(punch),
            None => prompt_punch().await?,
        };

        match choice {
            PunchChoice::Punch(punch) => {
                let mut progress = Progress::start("Processing...");
                let outcome = pending.await.unwrap_or(Err(EngineError::ChannelClosed));
                progress.clear();
                report(outcome, Some(punch), opts.json);
            }
            PunchChoice::Close => {
                tracing::info!("punch prompt closed");
            }
        }

        if !opts.continuous {
            break;
        }
        tokio::time::sleep(VERDICT_DISPLAY).await;
        session.discard_pending_guidance();
        latch.rearm();
    }

    session.close();
    Ok(())
}

/// Identify a photo from disk, without the camera.
pub async fn run_identify(config: &Config, engine: &EngineHandle, image: &Path, liveness: u32, json: bool) -> Result<()> {
    let Some(captured) = prepare_attendance_copy(config, image) else {
        return Ok(());
    };
    let mut progress = Progress::start("Processing...");
    let outcome = engine
        .process_image(captured, config.db_path.clone(), liveness as f64)
        .await;
    progress.clear();
    report(outcome, None, json);
    Ok(())
}

/// Copy the capture to the upright attendance image and check the database.
/// Logs and returns `None` when either is unusable.
fn prepare_attendance_copy(config: &Config, source: &Path) -> Option<PathBuf> {
    let captured = config.captured_image_path();
    if let Err(e) = photo::copy_upright(source, &captured, ATTENDANCE_JPEG_QUALITY) {
        tracing::error!(path = %source.display(), error = %e, "captured image unusable");
        println!("{}", ui::GENERIC_FAILURE);
        return None;
    }
    if let Err(e) = photo::ensure_non_empty(&config.db_path) {
        tracing::error!(error = %e, "encoding database unusable");
        println!("{}", ui::GENERIC_FAILURE);
        return None;
    }
    Some(captured)
}

async fn prompt_punch() -> Result<PunchChoice> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        println!("Select punch: [1] In  [2] Out  [3] Personal Out  [4] Sick Out  [0] Close");
        let Some(line) = lines.next_line().await? else {
            return Ok(PunchChoice::Close);
        };
        match parse_punch(&line) {
            Some(choice) => return Ok(choice),
            None => println!("Unrecognized choice: {}", line.trim()),
        }
    }
}

fn report(outcome: Result<IdentificationVerdict, EngineError>, punch: Option<Punch>, json: bool) {
    let verdict = match outcome {
        Ok(verdict) => verdict,
        Err(e) => {
            tracing::error!(error = %e, "identification failed");
            println!("{}", ui::GENERIC_FAILURE);
            return;
        }
    };

    if let Some(punch) = punch {
        tracing::info!(punch = punch.label(), status = ?verdict.status, id = ?verdict.id, "attendance handled");
    }

    if json {
        match serde_json::to_string_pretty(&verdict) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                tracing::error!(error = %e, "verdict serialization failed");
                println!("{}", ui::GENERIC_FAILURE);
            }
        }
        return;
    }

    if let Some(punch) = punch.filter(|_| verdict.is_success()) {
        println!("Punch: {}", punch.label());
    }
    println!("{}", verdict.render());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_punch() {
        assert_eq!(parse_punch("1"), Some(PunchChoice::Punch(Punch::In)));
        assert_eq!(parse_punch(" out \n"), Some(PunchChoice::Punch(Punch::Out)));
        assert_eq!(parse_punch("Personal Out"), Some(PunchChoice::Punch(Punch::PersonalOut)));
        assert_eq!(parse_punch("4"), Some(PunchChoice::Punch(Punch::SickOut)));
        assert_eq!(parse_punch("c"), Some(PunchChoice::Close));
        assert_eq!(parse_punch("lunch"), None);
    }

    #[test]
    fn test_parse_liveness_range() {
        assert_eq!(parse_liveness("0"), Ok(0));
        assert_eq!(parse_liveness("20"), Ok(20));
        assert_eq!(parse_liveness("150"), Ok(150));
        assert!(parse_liveness("19").is_err());
        assert!(parse_liveness("151").is_err());
        assert!(parse_liveness("abc").is_err());
    }

    #[test]
    fn test_punch_labels() {
        assert_eq!(Punch::PersonalOut.label(), "Personal Out");
        assert_eq!(Punch::SickOut.label(), "Sick Out");
    }
}
