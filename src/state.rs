//! # Vehicle data model
//!
//! Telemetry snapshots as served by the bridge, navigation targets and the two
//! kinds of movement intent (stick channels and body-frame movement vectors).
//!
//! Body frame convention used throughout the crate: `x` points right, `y` points
//! forward and `z` points up. Stick commands follow the same layout, `rightX` is
//! the lateral channel, `rightY` the forward channel and `leftY` the throttle.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Linear speed, m/s
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Speed {
    /// East
    pub x: f64,
    /// North
    pub y: f64,
    /// Down
    pub z: f64,
}

/// Orientation in degrees
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Attitude {
    /// Nose up is positive
    pub pitch: f64,
    /// Right wing down is positive
    pub roll: f64,
    /// Clockwise from north
    pub yaw: f64,
}

/// Geodetic position, altitude in meters above the takeoff reference
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    /// Degrees, WGS-84
    pub latitude: f64,
    /// Degrees, WGS-84
    pub longitude: f64,
    /// Meters
    pub altitude: f64,
}

/// # Telemetry snapshot
///
/// Decoded from `GET /aircraft/allStates`. Every field except the focal lengths
/// is mandatory, a payload missing one of them is rejected as a whole.
///
/// A snapshot describes the vehicle at one instant only, control loops fetch a
/// new one on every iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryState {
    /// Ground speed
    pub speed: Speed,
    /// Degrees, clockwise from north
    pub heading: f64,
    /// Aircraft orientation
    pub attitude: Attitude,
    /// Aircraft position
    pub location: Location,
    /// Camera gimbal orientation
    pub gimbal_attitude: Attitude,
    /// Camera zoom, 1 is no zoom
    pub zoom_ratio: f64,
    /// Zoom lens focal length, when the camera reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zoom_fl: Option<f64>,
    /// Hybrid zoom focal length, when the camera reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hybrid_fl: Option<f64>,
    /// Optical zoom focal length, when the camera reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optical_fl: Option<f64>,
}

impl TelemetryState {
    /// Decode a bridge payload
    pub fn from_json(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// A geodetic point, as produced by mission waypoint files
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    /// Latitude, degrees
    pub lat: f64,
    /// Longitude, degrees
    pub lon: f64,
    /// Altitude, meters
    pub alt: f64,
}

/// # Navigation target
///
/// Position, heading and camera setting the [Navigator](crate::subsystems::navigation::Navigator)
/// drives the vehicle to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Waypoint {
    /// Latitude, degrees
    pub lat: f64,
    /// Longitude, degrees
    pub lon: f64,
    /// Altitude, meters
    pub alt: f64,
    /// Target heading in degrees
    pub head: f64,
    /// Gimbal pitch set in the camera phase, degrees
    pub gimbal_pitch: f64,
    /// Zoom ratio set in the camera phase
    pub zoom_ratio: f64,
}

impl Waypoint {
    /// Waypoint matching the current state of the vehicle
    pub fn from_state(state: &TelemetryState) -> Self {
        Self {
            lat: state.location.latitude,
            lon: state.location.longitude,
            alt: state.location.altitude,
            head: state.heading,
            gimbal_pitch: state.gimbal_attitude.pitch,
            zoom_ratio: state.zoom_ratio,
        }
    }

    /// Same waypoint at another altitude
    pub fn with_alt(self, alt: f64) -> Self {
        Self { alt, ..self }
    }

    /// Position part of the waypoint
    pub fn position(&self) -> GeoPoint {
        GeoPoint {
            lat: self.lat,
            lon: self.lon,
            alt: self.alt,
        }
    }
}

/// # Virtual stick command
///
/// Emulates the two sticks of the remote controller: `left_x` is yaw, `left_y`
/// throttle, `right_x` lateral and `right_y` forward.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StickCommand {
    /// Yaw, positive turns clockwise
    pub left_x: f64,
    /// Throttle, positive climbs
    pub left_y: f64,
    /// Lateral, positive goes right
    pub right_x: f64,
    /// Forward, positive goes ahead
    pub right_y: f64,
}

fn saturate(value: f64, limit: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(-limit, limit)
    }
}

impl StickCommand {
    /// Channels in wire order
    pub fn new(left_x: f64, left_y: f64, right_x: f64, right_y: f64) -> Self {
        Self {
            left_x,
            left_y,
            right_x,
            right_y,
        }
    }

    /// All channels at rest
    pub fn neutral() -> Self {
        Self::default()
    }

    /// Clamp every channel to `[-limit, limit]`, NaN channels become 0
    pub fn saturated(self, limit: f64) -> Self {
        Self {
            left_x: saturate(self.left_x, limit),
            left_y: saturate(self.left_y, limit),
            right_x: saturate(self.right_x, limit),
            right_y: saturate(self.right_y, limit),
        }
    }

    /// Body of a `POST /send/stick` request
    pub fn to_wire(&self) -> String {
        format!(
            "{:.4},{:.4},{:.4},{:.4}",
            self.left_x, self.left_y, self.right_x, self.right_y
        )
    }

    /// Channels in wire order
    pub fn channels(&self) -> [f64; 4] {
        [self.left_x, self.left_y, self.right_x, self.right_y]
    }
}

/// # Body-frame movement intent
///
/// Typically produced by a perception callback. `angle` is an optional heading
/// change in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MovementVector {
    /// Right
    pub x: f64,
    /// Forward
    pub y: f64,
    /// Up
    pub z: f64,
    /// Heading change, degrees
    pub angle: f64,
}

impl MovementVector {
    /// Movement keeping the heading
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z, angle: 0.0 }
    }

    /// Same movement with a heading change
    pub fn with_angle(self, angle: f64) -> Self {
        Self { angle, ..self }
    }

    /// Largest absolute component among `x`, `y` and `z`
    pub fn max_component(&self) -> f64 {
        self.x.abs().max(self.y.abs()).max(self.z.abs())
    }

    /// Scale the vector down so that no component exceeds `limit`
    ///
    /// The same factor is applied to all three components so the direction is kept.
    /// A vector already within bounds is returned unchanged. Non-finite components
    /// are reported as a [Error::PerceptionError].
    pub fn saturated(self, limit: f64) -> Result<Self> {
        if !(self.x.is_finite() && self.y.is_finite() && self.z.is_finite()) {
            return Err(Error::PerceptionError(format!(
                "non-finite movement vector ({}, {}, {})",
                self.x, self.y, self.z
            )));
        }

        let max = self.max_component();
        if max <= limit {
            return Ok(self);
        }

        let scale = limit / max;
        Ok(Self {
            x: self.x * scale,
            y: self.y * scale,
            z: self.z * scale,
            angle: self.angle,
        })
    }
}
