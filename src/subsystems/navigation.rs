//! # Waypoint navigation
//!
//! The [Navigator] drives the vehicle to a [Waypoint] with a proportional
//! controller split in four phases, always run in this order:
//!
//! | Phase | Error | Stick channel | Left when |
//! |-------|-------|---------------|-----------|
//! | Altitude | up component of the ENU error | throttle (`leftY`) | `|err_alt| < thresh_alt` |
//! | Horizontal | east/north error rotated in the body frame | lateral and forward (`rightX`, `rightY`) | `|err_x| < thresh_x` and `|err_y| < thresh_y` |
//! | Heading | target heading minus current heading | yaw (`leftX`) | `|err_head| < thresh_head` |
//! | Camera | | gimbal pitch and zoom are set, then the vehicle settles | always |
//!
//! Telemetry is fetched again on every iteration, the vehicle keeps moving between
//! two iterations. Losing telemetry aborts the pass with
//! [Error::NavigationError](crate::Error::NavigationError), there is no retry inside
//! a pass.
//!
//! A pass can be cancelled through an [AtomicBool] checked at the top of every
//! iteration. A cancelled pass stops sending commands and leaves the vehicle where
//! it is, it does not send a neutral stick.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Relaxed;

use log::{debug, info, warn};
use tokio::time::sleep;

use crate::config::ControlConfig;
use crate::geo::{geodetic_to_enu, wrap_180};
use crate::state::{GeoPoint, StickCommand, TelemetryState, Waypoint};
use crate::subsystems::link::VehicleLink;
use crate::{Error, Result};

/// Stage of a navigation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Climb or descend to the target altitude
    Altitude,
    /// Move over the target position
    Horizontal,
    /// Turn to the target heading
    Heading,
    /// Set gimbal pitch and zoom
    Camera,
}

impl Phase {
    fn next(self) -> Option<Phase> {
        match self {
            Phase::Altitude => Some(Phase::Horizontal),
            Phase::Horizontal => Some(Phase::Heading),
            Phase::Heading => Some(Phase::Camera),
            Phase::Camera => None,
        }
    }
}

/// How a navigation pass ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Every phase completed
    Reached,
    /// Stopped by the cancel flag
    Canceled,
}

/// Summary of a navigation pass
#[derive(Debug, Clone, PartialEq)]
pub struct PassReport {
    /// How the pass ended
    pub outcome: PassOutcome,
    /// Phases entered, in order
    pub phases: Vec<Phase>,
    /// Number of telemetry snapshots processed
    pub iterations: usize,
}

/// Errors between a telemetry snapshot and a target
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ControlErrors {
    /// Vertical error, meters, positive when the target is above
    pub alt: f64,
    /// Lateral error in the body frame, meters, positive when the target is on the right
    pub x: f64,
    /// Longitudinal error in the body frame, meters, positive when the target is ahead
    pub y: f64,
    /// Heading error in degrees, wrapped to `(-180, 180]`
    pub head: f64,
}

impl ControlErrors {
    /// Compute the errors of `state` with respect to `target`
    ///
    /// The target is expressed in an ENU plane centered on the vehicle, the
    /// horizontal part is then rotated by the current heading.
    pub fn compute(target: &Waypoint, state: &TelemetryState) -> Self {
        let enu = geodetic_to_enu(&target.position(), &position_of(state));

        let dist = enu.horizontal_distance();
        let bearing = enu.bearing();
        let angle = bearing + std::f64::consts::FRAC_PI_2 - state.heading.to_radians();

        Self {
            alt: enu.up,
            x: -dist * angle.cos(),
            y: dist * angle.sin(),
            head: heading_error(target.head, state.heading),
        }
    }
}

fn position_of(state: &TelemetryState) -> GeoPoint {
    GeoPoint {
        lat: state.location.latitude,
        lon: state.location.longitude,
        alt: state.location.altitude,
    }
}

/// Shortest signed rotation from `current` to `target`, degrees in `(-180, 180]`
pub fn heading_error(target: f64, current: f64) -> f64 {
    wrap_180(target - current)
}

/// Altitude steps of a landing
///
/// The target altitude goes from `start.alt` down to `ground_height` at
/// `(start.alt - ground_height) / descent_time` meters per second, one waypoint per
/// second. The last waypoint is at `ground_height`. An empty list is returned when
/// the vehicle is already at or below the ground height.
///
/// `descent_time` must be in `(0, ControlConfig::MAX_DESCENT_TIME]`.
pub fn landing_steps(start: &Waypoint, ground_height: f64, descent_time: f64) -> Result<Vec<Waypoint>> {
    if !(descent_time > 0.0 && descent_time <= ControlConfig::MAX_DESCENT_TIME) {
        return Err(Error::InvalidArgument(format!(
            "descent_time must be in (0, {}], got {}",
            ControlConfig::MAX_DESCENT_TIME,
            descent_time
        )));
    }

    let height = start.alt - ground_height;
    if !(height > 0.0) {
        return Ok(Vec::new());
    }

    let rate = height / descent_time;
    let steps = descent_time.ceil() as usize;

    Ok((1..=steps)
        .map(|i| start.with_alt((start.alt - rate * i as f64).max(ground_height)))
        .collect())
}

/// # Waypoint navigation controller
///
/// See the [navigation module documentation](crate::subsystems::navigation) for more
/// context and information.
#[derive(Debug, Clone)]
pub struct Navigator {
    link: VehicleLink,
    config: ControlConfig,
}

impl Navigator {
    /// Controller sending its commands through `link`
    pub fn new(link: VehicleLink, config: ControlConfig) -> Self {
        Self { link, config }
    }

    /// Gains and thresholds in use
    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    /// Link the commands go through
    pub fn link(&self) -> &VehicleLink {
        &self.link
    }

    /// Waypoint matching the current state of the vehicle
    ///
    /// Used as the base of relative moves.
    pub async fn current_waypoint(&self) -> Result<Waypoint> {
        let state = self.link.get_all_states().await?;
        Ok(Waypoint::from_state(&state))
    }

    /// Current waypoint raised by the configured climb height
    pub async fn takeoff_waypoint(&self) -> Result<Waypoint> {
        let current = self.current_waypoint().await?;
        Ok(current.with_alt(current.alt + self.config.climb_height))
    }

    /// Descending waypoints from the current position to the ground height
    ///
    /// See [landing_steps()].
    pub async fn landing_waypoints(&self, descent_time: f64) -> Result<Vec<Waypoint>> {
        let current = self.current_waypoint().await?;
        landing_steps(&current, self.config.ground_height, descent_time)
    }

    /// Run a navigation pass to `target`
    ///
    /// Returns once the camera phase is done or when `cancel` is set. Telemetry
    /// failures end the pass with an error.
    pub async fn go_to(&self, target: &Waypoint, cancel: &AtomicBool) -> Result<PassReport> {
        self.run_pass(target, cancel, true).await
    }

    /// Land with a sequence of passes at decreasing altitude
    ///
    /// Stops early if one of the passes is cancelled.
    pub async fn descend(&self, descent_time: f64, cancel: &AtomicBool) -> Result<PassOutcome> {
        let steps = self.landing_waypoints(descent_time).await?;
        let count = steps.len();
        info!("Landing in {} steps", count);

        for (i, step) in steps.iter().enumerate() {
            // Camera is only settled on the last step
            let report = self.run_pass(step, cancel, i + 1 == count).await?;
            if report.outcome == PassOutcome::Canceled {
                return Ok(PassOutcome::Canceled);
            }
        }

        Ok(PassOutcome::Reached)
    }

    async fn run_pass(&self, target: &Waypoint, cancel: &AtomicBool, settle: bool) -> Result<PassReport> {
        info!("Going to waypoint {:?}", target);

        let config = &self.config;
        let mut phase = Phase::Altitude;
        let mut phases = vec![phase];
        let mut iterations = 0;

        loop {
            if cancel.load(Relaxed) {
                info!("Pass cancelled during {:?} phase", phase);
                return Ok(PassReport {
                    outcome: PassOutcome::Canceled,
                    phases,
                    iterations,
                });
            }

            let state = self.link.get_all_states().await.map_err(|e| {
                Error::NavigationError(format!("telemetry lost during {:?} phase: {}", phase, e))
            })?;
            iterations += 1;

            let errors = ControlErrors::compute(target, &state);
            debug!("{:?} phase, errors {:?}", phase, errors);

            let done = match phase {
                Phase::Altitude => {
                    let command = StickCommand::new(0.0, errors.alt * config.gain_alt, 0.0, 0.0);
                    self.send(command).await;
                    errors.alt.abs() < config.thresh_alt
                }
                Phase::Horizontal => {
                    let command = StickCommand::new(
                        0.0,
                        0.0,
                        errors.x * config.gain_x,
                        errors.y * config.gain_y,
                    );
                    self.send(command).await;
                    errors.x.abs() < config.thresh_x && errors.y.abs() < config.thresh_y
                }
                Phase::Heading => {
                    let command = StickCommand::new(errors.head * config.gain_head, 0.0, 0.0, 0.0);
                    self.send(command).await;
                    errors.head.abs() < config.thresh_head
                }
                Phase::Camera => {
                    if let Err(e) = self.link.set_gimbal_pitch(target.gimbal_pitch).await {
                        warn!("Failed to set gimbal pitch: {}", e);
                    }
                    if let Err(e) = self.link.set_zoom_ratio(target.zoom_ratio).await {
                        warn!("Failed to set zoom ratio: {}", e);
                    }
                    if settle {
                        sleep(config.settle_delay()).await;
                    }
                    info!("Waypoint reached after {} iterations, state: {:?}", iterations, state.location);
                    return Ok(PassReport {
                        outcome: PassOutcome::Reached,
                        phases,
                        iterations,
                    });
                }
            };

            if done {
                if let Some(next) = phase.next() {
                    debug!("{:?} phase done", phase);
                    phase = next;
                    phases.push(phase);
                }
            }

            if config.control_period_ms > 0 {
                sleep(config.control_period()).await;
            }
        }
    }

    // A lost command is recovered by the next iteration, only telemetry loss is fatal
    async fn send(&self, command: StickCommand) {
        if let Err(e) = self.link.send_stick(command).await {
            warn!("Stick command lost: {}", e);
        }
    }
}
