// Simulated vehicle shared by the integration tests
#![allow(dead_code)]

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dji_pilot::config::Config;
use dji_pilot::geo::{geodetic_to_enu, Enu};
use dji_pilot::mission::{TelemetryRecord, TelemetryRecorder};
use dji_pilot::subsystems::capture::{Frame, FrameSource};
use dji_pilot::state::{Attitude, Location, Speed};
use dji_pilot::subsystems::link::{Transport, EP_ALL_STATES, EP_BASE, EP_GIMBAL_SET_PITCH, EP_STICK, EP_ZOOM};
use dji_pilot::{Drone, Error, GeoPoint, Result, StickCommand, TelemetryState};

/// Meters travelled per unit of stick and per command
const METERS_PER_UNIT: f64 = 5.0;
/// Degrees turned per unit of yaw stick and per command
const DEGREES_PER_UNIT: f64 = 100.0;
const METERS_PER_DEGREE: f64 = 111_320.0;

/// A stick command as received, with the vehicle state it was applied to
#[derive(Debug, Clone, Copy)]
pub struct ReceivedStick {
    pub command: StickCommand,
    pub altitude_before: f64,
}

type StickHook = Box<dyn Fn(&StickCommand) + Send + Sync>;
type TelemetryHook = Box<dyn Fn() + Send + Sync>;

struct SimState {
    telemetry: TelemetryState,
    requests: Vec<(String, String)>,
    sticks: Vec<ReceivedStick>,
    telemetry_reads: usize,
    telemetry_attempts: usize,
    /// Telemetry attempts failing, by attempt number
    telemetry_outage: Option<std::ops::Range<usize>>,
    failing_posts: usize,
    stick_hook: Option<StickHook>,
    telemetry_hook: Option<TelemetryHook>,
}

/// Vehicle integrating stick commands into its telemetry
pub struct SimVehicle {
    state: Mutex<SimState>,
}

impl SimVehicle {
    pub fn new(lat: f64, lon: f64, alt: f64, heading: f64) -> Arc<Self> {
        let telemetry = TelemetryState {
            speed: Speed::default(),
            heading,
            attitude: Attitude::default(),
            location: Location {
                latitude: lat,
                longitude: lon,
                altitude: alt,
            },
            gimbal_attitude: Attitude::default(),
            zoom_ratio: 1.0,
            zoom_fl: None,
            hybrid_fl: None,
            optical_fl: None,
        };

        Arc::new(Self {
            state: Mutex::new(SimState {
                telemetry,
                requests: Vec::new(),
                sticks: Vec::new(),
                telemetry_reads: 0,
                telemetry_attempts: 0,
                telemetry_outage: None,
                failing_posts: 0,
                stick_hook: None,
                telemetry_hook: None,
            }),
        })
    }

    pub fn telemetry(&self) -> TelemetryState {
        self.state.lock().unwrap().telemetry.clone()
    }

    pub fn position(&self) -> GeoPoint {
        let location = self.telemetry().location;
        GeoPoint {
            lat: location.latitude,
            lon: location.longitude,
            alt: location.altitude,
        }
    }

    /// Offset of the vehicle from `origin`, in meters
    pub fn offset_from(&self, origin: &GeoPoint) -> Enu {
        geodetic_to_enu(&self.position(), origin)
    }

    pub fn requests(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn sticks(&self) -> Vec<ReceivedStick> {
        self.state.lock().unwrap().sticks.clone()
    }

    pub fn telemetry_reads(&self) -> usize {
        self.state.lock().unwrap().telemetry_reads
    }

    /// Telemetry requests fail once `count` more of them have been served
    pub fn fail_telemetry_after(&self, count: usize) {
        self.telemetry_outage(count, usize::MAX);
    }

    /// Telemetry requests fail for `length` requests, starting `after` requests from now
    pub fn telemetry_outage(&self, after: usize, length: usize) {
        let mut state = self.state.lock().unwrap();
        let start = state.telemetry_attempts + after;
        state.telemetry_outage = Some(start..start.saturating_add(length));
    }

    /// The next `count` POST requests fail
    pub fn fail_next_posts(&self, count: usize) {
        self.state.lock().unwrap().failing_posts = count;
    }

    /// Called on every telemetry request served
    pub fn on_telemetry(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.state.lock().unwrap().telemetry_hook = Some(Box::new(hook));
    }

    /// Called with every stick command, after it is applied
    pub fn on_stick(&self, hook: impl Fn(&StickCommand) + Send + Sync + 'static) {
        self.state.lock().unwrap().stick_hook = Some(Box::new(hook));
    }
}

fn parse_stick(body: &str) -> Result<StickCommand> {
    let channels = body
        .split(',')
        .map(|c| c.parse::<f64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::LinkError(format!("bad stick body {}: {}", body, e)))?;
    match channels[..] {
        [left_x, left_y, right_x, right_y] => Ok(StickCommand::new(left_x, left_y, right_x, right_y)),
        _ => Err(Error::LinkError(format!("bad stick body {}", body))),
    }
}

fn apply_stick(telemetry: &mut TelemetryState, command: &StickCommand) {
    let heading = telemetry.heading.to_radians();
    let right = command.right_x * METERS_PER_UNIT;
    let forward = command.right_y * METERS_PER_UNIT;
    let east = right * heading.cos() + forward * heading.sin();
    let north = -right * heading.sin() + forward * heading.cos();

    let location = &mut telemetry.location;
    location.latitude += north / METERS_PER_DEGREE;
    location.longitude += east / (METERS_PER_DEGREE * location.latitude.to_radians().cos());
    location.altitude += command.left_y * METERS_PER_UNIT;

    telemetry.heading = dji_pilot::geo::wrap_180(telemetry.heading + command.left_x * DEGREES_PER_UNIT);
}

#[async_trait]
impl Transport for SimVehicle {
    async fn get(&self, end_point: &str) -> Result<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        match end_point {
            EP_BASE => Ok(b"OK".to_vec()),
            EP_ALL_STATES => {
                let attempt = state.telemetry_attempts;
                state.telemetry_attempts += 1;
                if let Some(outage) = &state.telemetry_outage {
                    if outage.contains(&attempt) {
                        return Err(Error::LinkError("simulated telemetry loss".to_owned()));
                    }
                }
                state.telemetry_reads += 1;
                if let Some(hook) = &state.telemetry_hook {
                    hook();
                }
                serde_json::to_vec(&state.telemetry).map_err(|e| Error::LinkError(e.to_string()))
            }
            _ => Err(Error::LinkError(format!("404 {}", end_point))),
        }
    }

    async fn post(&self, end_point: &str, body: String) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing_posts > 0 {
            state.failing_posts -= 1;
            return Err(Error::LinkError("simulated post failure".to_owned()));
        }
        state.requests.push((end_point.to_owned(), body.clone()));

        match end_point {
            EP_STICK => {
                let command = parse_stick(&body)?;
                let altitude_before = state.telemetry.location.altitude;
                apply_stick(&mut state.telemetry, &command);
                state.sticks.push(ReceivedStick {
                    command,
                    altitude_before,
                });
                if let Some(hook) = &state.stick_hook {
                    hook(&command);
                }
                Ok(())
            }
            EP_GIMBAL_SET_PITCH => {
                let pitch = body.split(',').nth(1).and_then(|p| p.parse().ok());
                state.telemetry.gimbal_attitude.pitch = pitch.ok_or_else(|| Error::LinkError(body.clone()))?;
                Ok(())
            }
            EP_ZOOM => {
                state.telemetry.zoom_ratio = body.parse().map_err(|_| Error::LinkError(body.clone()))?;
                Ok(())
            }
            _ => Err(Error::LinkError(format!("404 {}", end_point))),
        }
    }
}

/// Yields `count` small frames, then reports misses
pub struct SyntheticSource {
    remaining: usize,
    pub stopped: Arc<AtomicBool>,
    pub exhausted_at: Arc<Mutex<Option<Instant>>>,
}

impl SyntheticSource {
    pub fn new(count: usize) -> Self {
        Self {
            remaining: count,
            stopped: Arc::new(AtomicBool::new(false)),
            exhausted_at: Arc::new(Mutex::new(None)),
        }
    }
}

#[async_trait]
impl FrameSource for SyntheticSource {
    async fn read_frame(&mut self) -> Result<Frame> {
        if self.remaining == 0 {
            self.exhausted_at.lock().unwrap().get_or_insert_with(Instant::now);
            tokio::time::sleep(Duration::from_millis(1)).await;
            return Err(Error::CaptureError("end of stream".to_owned()));
        }
        self.remaining -= 1;
        Ok(Frame::new_rgb8(4, 4))
    }

    async fn stop(&mut self) -> Result<()> {
        self.stopped.store(true, Relaxed);
        Ok(())
    }
}

/// Keeps the records in memory
#[derive(Default)]
pub struct MemoryRecorder {
    pub records: Mutex<Vec<TelemetryRecord>>,
}

impl TelemetryRecorder for MemoryRecorder {
    fn append(&self, record: &TelemetryRecord) -> Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// Configuration with no waiting between iterations nor after a pass
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.control.settle_delay_ms = 0;
    config.control.control_period_ms = 0;
    config
}

/// Logs go to the test output, filtered by RUST_LOG
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub async fn connect(vehicle: &Arc<SimVehicle>, config: Config) -> Drone {
    init_logging();
    Drone::connect_from_transport(vehicle.clone(), config).await.unwrap()
}
