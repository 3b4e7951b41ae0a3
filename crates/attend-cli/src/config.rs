use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Distance and light thresholds used by identification and enrollment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Best cosine distance must be strictly below this for a match.
    pub match_distance: f32,
    /// Re-enrollment replaces an encoding when the new one is at most this far.
    pub update_distance: f32,
    /// A new id is refused when another user is closer than this.
    pub duplicate_distance: f32,
    /// Mean gray level below which the scene is too dark.
    pub min_brightness: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            match_distance: 0.60,
            update_distance: 0.55,
            duplicate_distance: 0.60,
            min_brightness: 50.0,
        }
    }
}

/// Kiosk configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Directory for captured and enrolled photos.
    pub data_dir: PathBuf,
    /// Path to the encoding database.
    pub db_path: PathBuf,
    /// Database copied into place when `db_path` is missing or empty.
    pub seed_db: Option<PathBuf>,
    pub thresholds: Thresholds,
    /// Frames discarded after the camera opens (AGC/AE stabilization).
    pub warmup_frames: usize,
    /// Pause between an attendance capture and the punch prompt.
    pub confirm_delay_ms: u64,
}

/// Optional TOML file; every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    camera_device: Option<String>,
    model_dir: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    db_path: Option<PathBuf>,
    seed_db: Option<PathBuf>,
    match_distance: Option<f32>,
    update_distance: Option<f32>,
    duplicate_distance: Option<f32>,
    min_brightness: Option<f32>,
    warmup_frames: Option<usize>,
    confirm_delay_ms: Option<u64>,
}

impl FileConfig {
    fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&text)?)
    }
}

impl Config {
    /// Load the file named by `ATTEND_CONFIG` (if set), then apply `ATTEND_*`
    /// environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var("ATTEND_CONFIG") {
            Ok(path) => {
                tracing::debug!(path = %path, "reading config file");
                Ok(Self::resolve(FileConfig::read(Path::new(&path))?))
            }
            Err(_) => Ok(Self::from_env()),
        }
    }

    /// Load configuration from `ATTEND_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::resolve(FileConfig::default())
    }

    fn resolve(file: FileConfig) -> Self {
        let defaults = Thresholds::default();

        let model_dir = env_path("ATTEND_MODEL_DIR")
            .or(file.model_dir)
            .unwrap_or_else(attend_core::default_model_dir);

        let data_dir = env_path("ATTEND_DATA_DIR")
            .or(file.data_dir)
            .unwrap_or_else(default_data_dir);

        let db_path = env_path("ATTEND_DB_PATH")
            .or(file.db_path)
            .unwrap_or_else(|| data_dir.join("face_data.db"));

        Self {
            camera_device: std::env::var("ATTEND_CAMERA_DEVICE")
                .ok()
                .or(file.camera_device)
                .unwrap_or_else(|| "/dev/video0".to_string()),
            model_dir,
            seed_db: env_path("ATTEND_SEED_DB").or(file.seed_db),
            db_path,
            data_dir,
            thresholds: Thresholds {
                match_distance: env_f32(
                    "ATTEND_MATCH_DISTANCE",
                    file.match_distance.unwrap_or(defaults.match_distance),
                ),
                update_distance: env_f32(
                    "ATTEND_UPDATE_DISTANCE",
                    file.update_distance.unwrap_or(defaults.update_distance),
                ),
                duplicate_distance: env_f32(
                    "ATTEND_DUPLICATE_DISTANCE",
                    file.duplicate_distance.unwrap_or(defaults.duplicate_distance),
                ),
                min_brightness: env_f32(
                    "ATTEND_MIN_BRIGHTNESS",
                    file.min_brightness.unwrap_or(defaults.min_brightness),
                ),
            },
            warmup_frames: env_usize("ATTEND_WARMUP_FRAMES", file.warmup_frames.unwrap_or(4)),
            confirm_delay_ms: env_u64("ATTEND_CONFIRM_DELAY_MS", file.confirm_delay_ms.unwrap_or(2000)),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(attend_core::DETECTOR_MODEL_FILE)
    }

    /// Path to the ArcFace recognition model.
    pub fn recognizer_model_path(&self) -> PathBuf {
        self.model_dir.join(attend_core::RECOGNIZER_MODEL_FILE)
    }

    /// Raw capture written by the camera session.
    pub fn temp_image_path(&self) -> PathBuf {
        self.data_dir.join("temp_image.jpg")
    }

    /// Upright attendance copy handed to identification.
    pub fn captured_image_path(&self) -> PathBuf {
        self.data_dir.join("captured_image.jpg")
    }

    /// Stored enrollment photo; its file stem becomes the user's name.
    pub fn enrollment_photo_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("{name}.jpg"))
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("attend")
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().map(PathBuf::from)
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
