use anyhow::{Context, Result};
use attend_core::{FaceDetector, OnnxPipeline};
use attend_hw::Camera;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod attendance;
mod config;
mod engine;
mod enroll;
mod recognition;
mod session;
mod store;
mod ui;
mod verdict;

use attendance::{parse_liveness, CheckInOptions, Punch};
use config::Config;
use enroll::EnrollOptions;
use store::EncodingStore;

#[derive(Parser)]
#[command(name = "attend", about = "Face attendance kiosk")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check in with the camera: wait for a framed face, identify, confirm punch
    CheckIn {
        /// Liveness threshold: 0 (off) or 20–150
        #[arg(long, default_value_t = 0, value_parser = parse_liveness)]
        liveness: u32,
        /// Punch kind; asked interactively when omitted
        #[arg(long, value_enum)]
        punch: Option<Punch>,
        /// Keep the camera running and re-arm after each attendance
        #[arg(long)]
        continuous: bool,
        /// Print the full verdict as JSON
        #[arg(long)]
        json: bool,
    },
    /// Identify the person in an existing photo
    Identify {
        image: PathBuf,
        /// Liveness threshold: 0 (off) or 20–150
        #[arg(long, default_value_t = 0, value_parser = parse_liveness)]
        liveness: u32,
        /// Print the full verdict as JSON
        #[arg(long)]
        json: bool,
    },
    /// Enroll a user from the camera or from a photo
    Enroll {
        /// Numeric user id
        #[arg(long)]
        id: i64,
        /// Display name; also names the stored photo
        #[arg(long)]
        name: String,
        /// Enroll this photo instead of using the camera
        #[arg(long)]
        image: Option<PathBuf>,
        /// Save without asking for confirmation
        #[arg(short, long)]
        yes: bool,
        /// Refresh the encoding of an existing user
        #[arg(long)]
        update: bool,
    },
    /// List enrolled users
    List {
        #[arg(long)]
        json: bool,
    },
    /// List V4L2 capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
        Commands::List { json } => {
            EncodingStore::seed_if_missing(&config.db_path, config.seed_db.as_deref())?;
            let users = EncodingStore::open(&config.db_path)?.list()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&users)?);
            } else if users.is_empty() {
                println!("No users enrolled");
            } else {
                for u in users {
                    println!("{:>8}  {:<24} {}  {}", u.user_id, u.name, u.model_version, u.updated_at);
                }
            }
        }
        Commands::Identify { image, liveness, json } => {
            let engine = start_engine(&config)?;
            attendance::run_identify(&config, &engine, &image, liveness, json).await?;
        }
        Commands::CheckIn {
            liveness,
            punch,
            continuous,
            json,
        } => {
            let engine = start_engine(&config)?;
            let locator = load_locator(&config)?;
            let opts = CheckInOptions {
                liveness,
                punch,
                continuous,
                json,
            };
            attendance::run_check_in(&config, &engine, locator, &opts).await?;
        }
        Commands::Enroll {
            id,
            name,
            image,
            yes,
            update,
        } => {
            let engine = start_engine(&config)?;
            let locator = load_locator(&config)?;
            let opts = EnrollOptions {
                user_id: id,
                name,
                image,
                yes,
                update,
            };
            enroll::run_enroll(&config, &engine, locator, &opts).await?;
        }
    }

    Ok(())
}

/// Seed the database if needed, load both models and start the engine thread.
fn start_engine(config: &Config) -> Result<engine::EngineHandle> {
    EncodingStore::seed_if_missing(&config.db_path, config.seed_db.as_deref())?;
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data directory {}", config.data_dir.display()))?;

    let pipeline = OnnxPipeline::load(&config.detector_model_path(), &config.recognizer_model_path())?;
    tracing::info!(model_dir = %config.model_dir.display(), "recognition models loaded");
    Ok(engine::spawn_engine(pipeline, config.thresholds))
}

/// Detector used by the live analyzer, separate from the engine's pipeline.
fn load_locator(config: &Config) -> Result<FaceDetector> {
    Ok(FaceDetector::load(&config.detector_model_path())?)
}
