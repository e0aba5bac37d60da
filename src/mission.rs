//! # Missions
//!
//! A mission flies a [Drone] from takeoff to landing. Two kinds are available:
//!
//! - **autonomous**: the [media pipeline](crate::subsystems::media) drives the
//!   vehicle from the live video for a fixed duration.
//! - **waypoint**: the vehicle visits a list of positions in order.
//!
//! The mission talks to the outside world through three traits:
//! [PerceptionCallback] computes a movement from a frame, [WaypointProvider] lists
//! the positions to visit and [TelemetryRecorder] keeps a log of what happened.
//! [CsvWaypoints] and [CsvRecorder] implement the last two on top of CSV files.
//!
//! Once airborne, any error lands the vehicle before being returned.

use std::any::Any;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use log::{error, info, warn};

use crate::state::{GeoPoint, MovementVector, TelemetryState};
use crate::subsystems::capture::{Frame, FrameSource, VideoRecorder};
use crate::subsystems::media::{Perception, PipelineReport};
use crate::{Drone, Error, Result};

/// Opaque model given back to the perception callback on every call
pub type ModelHandle = Arc<dyn Any + Send + Sync>;

/// # Movement from a video frame
///
/// Called from a blocking thread, one frame at a time. The callback only sees the
/// frame, it has no access to the pipeline.
pub trait PerceptionCallback: Send + Sync + 'static {
    /// Movement the vehicle should make after `frame`, in the body frame
    fn perceive(&self, frame: &Frame, model: &ModelHandle, output_dir: &Path, frame_index: u64) -> Result<MovementVector>;
}

impl<F> PerceptionCallback for F
where
    F: Fn(&Frame, &ModelHandle, &Path, u64) -> Result<MovementVector> + Send + Sync + 'static,
{
    fn perceive(&self, frame: &Frame, model: &ModelHandle, output_dir: &Path, frame_index: u64) -> Result<MovementVector> {
        self(frame, model, output_dir, frame_index)
    }
}

/// Wrap a closure as a perception callback
///
/// ```
/// use dji_pilot::mission::perception_fn;
/// use dji_pilot::MovementVector;
///
/// let climb = perception_fn(|_frame, _model, _dir, _index| Ok(MovementVector::new(0.0, 0.0, 1.0)));
/// ```
pub fn perception_fn<F>(callback: F) -> Arc<dyn PerceptionCallback>
where
    F: Fn(&Frame, &ModelHandle, &Path, u64) -> Result<MovementVector> + Send + Sync + 'static,
{
    Arc::new(callback)
}

/// Ordered list of positions to visit
pub trait WaypointProvider {
    /// Positions in visiting order
    fn waypoints(&self) -> Result<Vec<GeoPoint>>;
}

/// Append-only sink of telemetry records
pub trait TelemetryRecorder: Send + Sync {
    /// Store one record after the previous ones
    fn append(&self, record: &TelemetryRecord) -> Result<()>;
}

/// Vehicle position and commanded movement at one processed frame or waypoint
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    /// Local time the record was taken
    pub timestamp: DateTime<Local>,
    /// Vehicle latitude, degrees
    pub lat: f64,
    /// Vehicle longitude, degrees
    pub lon: f64,
    /// Vehicle altitude, meters
    pub alt: f64,
    /// Movement commanded at this point
    pub movement: MovementVector,
    /// Frame index, or waypoint number starting at 1
    pub frame: u64,
}

impl TelemetryRecord {
    /// Record of `state` taken now
    pub fn now(state: &TelemetryState, movement: MovementVector, frame: u64) -> Self {
        Self {
            timestamp: Local::now(),
            lat: state.location.latitude,
            lon: state.location.longitude,
            alt: state.location.altitude,
            movement,
            frame,
        }
    }

    /// CSV row, without line terminator
    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.lat,
            self.lon,
            self.alt,
            self.movement.x,
            self.movement.y,
            self.movement.z,
            self.frame
        )
    }
}

/// # Telemetry log in `<output_dir>/telemetry_log.csv`
///
/// The header is written when the file is created, an existing log is appended to.
#[derive(Debug, Clone)]
pub struct CsvRecorder {
    path: PathBuf,
}

impl CsvRecorder {
    /// Name of the log in the output directory
    pub const FILE_NAME: &'static str = "telemetry_log.csv";
    /// First line of the log
    pub const HEADER: &'static str = "timestamp,x,y,z,move_x,move_y,move_z,frame";

    /// Open the log of `output_dir`, the directory must exist
    pub fn create(output_dir: impl AsRef<Path>) -> Result<Self> {
        let path = output_dir.as_ref().join(Self::FILE_NAME);

        if !path.exists() {
            std::fs::write(&path, format!("{}\n", Self::HEADER))
                .map_err(|e| Error::RecorderError(format!("cannot create {}: {}", path.display(), e)))?;
        }

        Ok(Self { path })
    }

    /// Location of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TelemetryRecorder for CsvRecorder {
    fn append(&self, record: &TelemetryRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::RecorderError(format!("{}: {}", self.path.display(), e)))?;

        writeln!(file, "{}", record.to_csv_row())
            .map_err(|e| Error::RecorderError(format!("{}: {}", self.path.display(), e)))
    }
}

/// # Waypoints read from `lat,lon,alt` CSV rows
///
/// Blank lines and lines starting with `#` are ignored.
#[derive(Debug, Clone)]
pub struct CsvWaypoints {
    path: PathBuf,
}

impl CsvWaypoints {
    /// Waypoints of the file at `path`, read when they are asked for
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Parse waypoints from CSV text
    pub fn parse(text: &str) -> Result<Vec<GeoPoint>> {
        text.lines()
            .enumerate()
            .map(|(i, line)| (i + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
            .map(|(number, line)| {
                let fields = line
                    .split(',')
                    .map(|field| field.trim().parse::<f64>())
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| Error::RecorderError(format!("line {}: {}", number, e)))?;

                match fields[..] {
                    [lat, lon, alt, ..] => Ok(GeoPoint { lat, lon, alt }),
                    _ => Err(Error::RecorderError(format!(
                        "line {}: expected lat,lon,alt, got {} fields",
                        number,
                        fields.len()
                    ))),
                }
            })
            .collect()
    }
}

impl WaypointProvider for CsvWaypoints {
    fn waypoints(&self) -> Result<Vec<GeoPoint>> {
        let text = std::fs::read_to_string(&self.path)
            .map_err(|e| Error::RecorderError(format!("{}: {}", self.path.display(), e)))?;
        Self::parse(&text)
    }
}

/// # A flight from takeoff to landing
///
/// The drone must already be connected, setup errors are expected to happen
/// before a mission is created. The mission disconnects the drone when it ends.
pub struct Mission {
    drone: Drone,
    recorder: Arc<dyn TelemetryRecorder>,
}

impl Mission {
    /// Mission flying `drone` and logging to `recorder`
    pub fn new(drone: Drone, recorder: Arc<dyn TelemetryRecorder>) -> Self {
        Self { drone, recorder }
    }

    /// Drone flown by the mission
    pub fn drone(&self) -> &Drone {
        &self.drone
    }

    /// Fly from the video for `duration`
    ///
    /// The video recording, if any, covers the whole time the pipeline runs. The
    /// mission ends early on the first fault of the pipeline or of a background move.
    pub async fn run_autonomous(
        self,
        source: Box<dyn FrameSource>,
        mut video: Option<Box<dyn VideoRecorder>>,
        perception: Perception,
        duration: Duration,
    ) -> Result<PipelineReport> {
        info!("------ AUTONOMOUS MISSION ({:?}) ------", duration);

        if let Err(e) = self.drone.piloting.takeoff(false).await {
            return Err(self.abort(e).await);
        }

        if let Some(video) = video.as_mut() {
            if let Err(e) = video.start().await {
                return Err(self.abort(e).await);
            }
        }

        let media = &self.drone.media;
        if let Err(e) = media.start(source, perception, Some(self.recorder.clone())).await {
            stop_video(&mut video).await;
            return Err(self.abort(e).await);
        }

        let media_faults = media.faults();
        let piloting_faults = self.drone.piloting.faults();
        let fault = tokio::select! {
            _ = tokio::time::sleep(duration) => None,
            Ok(e) = media_faults.recv_async() => Some(e),
            Ok(e) = piloting_faults.recv_async() => Some(e),
        };

        let report = media.stop().await;
        stop_video(&mut video).await;

        // Moves started by the pipeline must not outlive it
        self.drone.piloting.cancel_move_by().await;
        if let Err(e) = self.drone.piloting.wait_idle().await {
            warn!("Background move ended badly: {}", e);
        }

        if let Some(e) = fault {
            return Err(self.abort(e).await);
        }
        let report = match report {
            Ok(report) => report,
            Err(e) => return Err(self.abort(e).await),
        };

        self.finish().await?;
        Ok(report)
    }

    /// Visit every waypoint of `provider` in order, keeping the current heading
    ///
    /// One record is appended per waypoint reached. Returns the number of waypoints
    /// visited.
    pub async fn run_waypoints(self, provider: &dyn WaypointProvider) -> Result<usize> {
        let points = provider.waypoints()?;
        if points.is_empty() {
            self.drone.disconnect().await;
            return Err(Error::InvalidArgument("no waypoint to visit".to_owned()));
        }
        info!("------ WAYPOINT MISSION ({} waypoints) ------", points.len());

        if let Err(e) = self.drone.piloting.takeoff(false).await {
            return Err(self.abort(e).await);
        }

        for (i, point) in points.iter().enumerate() {
            info!("Waypoint {}/{}: {:?}", i + 1, points.len(), point);
            if let Err(e) = self.visit(point, i as u64 + 1).await {
                return Err(self.abort(e).await);
            }
        }

        self.finish().await?;
        Ok(points.len())
    }

    async fn visit(&self, point: &GeoPoint, number: u64) -> Result<()> {
        let heading = self.drone.navigation.current_waypoint().await?.head;
        self.drone
            .piloting
            .move_to(point.lat, point.lon, point.alt, heading, true, false)
            .await?;

        let state = self.drone.link.get_all_states().await?;
        let record = TelemetryRecord::now(&state, MovementVector::default(), number);
        if let Err(e) = self.recorder.append(&record) {
            warn!("Telemetry record of waypoint {} lost: {}", number, e);
        }
        Ok(())
    }

    async fn finish(&self) -> Result<()> {
        let landed = self.drone.piloting.land(false).await;
        self.drone.disconnect().await;
        landed
    }

    /// Land after a failure, `error` is returned
    async fn abort(&self, e: Error) -> Error {
        error!("Mission failed, landing: {}", e);
        if let Err(land_error) = self.drone.piloting.land(false).await {
            error!("Landing failed: {}", land_error);
        }
        self.drone.disconnect().await;
        e
    }
}

async fn stop_video(video: &mut Option<Box<dyn VideoRecorder>>) {
    if let Some(video) = video.as_mut() {
        if let Err(e) = video.stop().await {
            warn!("Video recording did not stop cleanly: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_waypoint_rows() {
        let points = CsvWaypoints::parse("# lat,lon,alt\n0.0256,36.9037,20\n\n 0.0257 , 36.9038 , 25.5\n").unwrap();
        assert_eq!(
            points,
            vec![
                GeoPoint { lat: 0.0256, lon: 36.9037, alt: 20.0 },
                GeoPoint { lat: 0.0257, lon: 36.9038, alt: 25.5 },
            ]
        );
    }

    #[test]
    fn rejects_malformed_rows() {
        assert!(matches!(CsvWaypoints::parse("1.0,2.0\n"), Err(Error::RecorderError(_))));
        assert!(matches!(CsvWaypoints::parse("1.0,north,3.0\n"), Err(Error::RecorderError(_))));
    }

    #[test]
    fn record_row_format() {
        let record = TelemetryRecord {
            timestamp: Local::now(),
            lat: 0.5,
            lon: -1.25,
            alt: 20.0,
            movement: MovementVector::new(0.1, -0.2, 0.0),
            frame: 40,
        };
        let row = record.to_csv_row();
        let fields: Vec<&str> = row.split(',').collect();
        assert_eq!(fields.len(), 8);
        assert_eq!(fields[0].len(), "2024-01-01 00:00:00".len());
        assert_eq!(&fields[1..], ["0.5", "-1.25", "20", "0.1", "-0.2", "0", "40"]);
    }
}
