// Mission driver
//
// Flies one mission and logs the telemetry to <output_dir>/telemetry_log.csv:
//
//   mission <output_dir> autonomous <model_file> [--duration 200]
//   mission <output_dir> waypoint <waypoints.csv>
//
// The autonomous mission keeps the brightest spot of the video in front of the
// drone. The waypoint mission visits the lat,lon,alt rows of the file in order.
//
// Exits with 1 on invalid arguments or an unreadable input file, 2 if the mission
// fails.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use dji_pilot::mission::{CsvRecorder, CsvWaypoints, Mission, ModelHandle, perception_fn};
use dji_pilot::subsystems::capture::{FfmpegRecorder, FfmpegStream, Frame};
use dji_pilot::subsystems::media::Perception;
use dji_pilot::{Config, Drone, Error, MovementVector};
use log::{error, info};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Kind {
    /// Fly from the live video
    Autonomous,
    /// Visit the waypoints of a CSV file
    Waypoint,
}

#[derive(Debug, Parser)]
#[command(name = "mission", about = "Fly a DJI drone mission through the bridge")]
struct Cli {
    /// Directory receiving the telemetry log and the video
    output_dir: PathBuf,
    /// Mission kind
    #[arg(value_enum)]
    kind: Kind,
    /// Perception model for autonomous missions, waypoint file otherwise
    file: PathBuf,
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Autonomous mission duration, seconds
    #[arg(long, default_value_t = 200)]
    duration: u64,
    /// Bridge address, overrides the configuration
    #[arg(long)]
    address: Option<String>,
}

/// Pixel luma above which a pixel is part of the tracked spot
const BRIGHT: u8 = 200;

// Lateral command towards the centroid of the bright pixels, slowly forward
fn track_brightest(frame: &Frame, _model: &ModelHandle, _output_dir: &Path, frame_index: u64) -> dji_pilot::Result<MovementVector> {
    let luma = frame.to_luma8();
    let (width, height) = luma.dimensions();

    let (mut sum_x, mut sum_y, mut count) = (0u64, 0u64, 0u64);
    for (x, y, pixel) in luma.enumerate_pixels() {
        if pixel.0[0] >= BRIGHT {
            sum_x += x as u64;
            sum_y += y as u64;
            count += 1;
        }
    }
    if count == 0 {
        return Err(Error::PerceptionError(format!("nothing to track in frame {}", frame_index)));
    }

    let half_width = width as f64 / 2.0;
    let half_height = height as f64 / 2.0;
    let cx = sum_x as f64 / count as f64;
    let cy = sum_y as f64 / count as f64;

    // Image y grows downwards
    Ok(MovementVector::new(
        (cx - half_width) / half_width,
        0.2,
        (half_height - cy) / half_height,
    ))
}

/// Read the model of an autonomous mission, check that the waypoint file exists
///
/// Runs before connecting, a bad file is a usage error.
fn load_inputs(cli: &Cli) -> Result<Option<Vec<u8>>, String> {
    match cli.kind {
        Kind::Autonomous => std::fs::read(&cli.file)
            .map(Some)
            .map_err(|e| format!("cannot read model {}: {}", cli.file.display(), e)),
        Kind::Waypoint if cli.file.is_file() => Ok(None),
        Kind::Waypoint => Err(format!("no waypoint file at {}", cli.file.display())),
    }
}

async fn run(cli: Cli, model: Option<Vec<u8>>) -> dji_pilot::Result<()> {
    std::fs::create_dir_all(&cli.output_dir)
        .map_err(|e| Error::RecorderError(format!("{}: {}", cli.output_dir.display(), e)))?;

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(address) = cli.address {
        config.link.address = address;
    }

    let recorder = Arc::new(CsvRecorder::create(&cli.output_dir)?);
    let video_url = config.link.video_url();
    let fps = config.media.fps;

    match cli.kind {
        Kind::Autonomous => {
            let perception = Perception {
                callback: perception_fn(track_brightest),
                model: Arc::new(model.unwrap_or_default()),
                output_dir: cli.output_dir.clone(),
            };

            let drone = Drone::connect(config).await?;
            let source = match FfmpegStream::start(&video_url, fps, cli.output_dir.join("buffer.jpg")) {
                Ok(source) => source,
                Err(e) => {
                    drone.disconnect().await;
                    return Err(e);
                }
            };
            let video = FfmpegRecorder::new(&video_url, cli.output_dir.join("output.mp4"));

            let report = Mission::new(drone, recorder)
                .run_autonomous(
                    Box::new(source),
                    Some(Box::new(video)),
                    perception,
                    Duration::from_secs(cli.duration),
                )
                .await?;
            info!("Mission done: {:?}", report.stats);
        }
        Kind::Waypoint => {
            let waypoints = CsvWaypoints::new(&cli.file);
            let drone = Drone::connect(config).await?;
            let visited = Mission::new(drone, recorder).run_waypoints(&waypoints).await?;
            info!("Mission done, {} waypoints visited", visited);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            return ExitCode::from(1);
        }
        Err(e) => {
            // --help and --version
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
    };

    let model = match load_inputs(&cli) {
        Ok(model) => model,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(1);
        }
    };

    match run(cli, model).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Mission failed: {}", e);
            ExitCode::from(2)
        }
    }
}
