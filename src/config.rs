//! # Configuration
//!
//! Gains, thresholds, link endpoint and media pipeline settings are grouped in
//! [Config]. Every field has a default, so a TOML file only needs to list what
//! it overrides:
//!
//! ```
//! # use dji_pilot::Config;
//! let config = Config::from_toml_str(r#"
//!     [link]
//!     address = "192.168.1.20"
//!
//!     [control]
//!     gain_alt = 0.2
//!     climb_height = 10.0
//! "#).unwrap();
//!
//! assert_eq!(config.link.base_url(), "http://192.168.1.20:8080");
//! assert_eq!(config.control.gain_x, 0.03);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::{Error, Result};

/// Top level configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Vehicle bridge endpoint
    pub link: LinkConfig,
    /// Navigation controller gains and thresholds
    pub control: ControlConfig,
    /// Media pipeline settings
    pub media: MediaConfig,
}

impl Config {
    /// Parse a configuration from a TOML string
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml)?;
        config.control.validate()?;
        config.media.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }
}

/// Address of the bridge application running next to the remote controller
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Host name or IP of the bridge
    pub address: String,
    /// HTTP port of the bridge
    pub port: u16,
    /// Timeout applied to every HTTP request
    pub request_timeout_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            address: "localhost".to_owned(),
            port: 8080,
            request_timeout_ms: 2000,
        }
    }
}

impl LinkConfig {
    /// Root of the bridge HTTP API
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }

    /// Live video feed exposed by the bridge
    pub fn video_url(&self) -> String {
        format!("rtsp://aaa:aaa@{}:8554/streaming/live/1", self.address)
    }

    /// See [LinkConfig::request_timeout_ms]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Proportional controller configuration
///
/// Gains multiply the error of the active phase to produce a stick value, a phase
/// is left once its error is below the matching threshold. `max_authority` is the
/// saturation applied to every stick channel before transmission.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Throttle per meter of altitude error
    pub gain_alt: f64,
    /// Lateral stick per meter of lateral error
    pub gain_x: f64,
    /// Forward stick per meter of longitudinal error
    pub gain_y: f64,
    /// Yaw stick per degree of heading error
    pub gain_head: f64,
    /// meters
    pub thresh_alt: f64,
    /// meters
    pub thresh_x: f64,
    /// meters
    pub thresh_y: f64,
    /// degrees
    pub thresh_head: f64,
    /// Largest magnitude sent on a stick channel
    pub max_authority: f64,
    /// Altitude gained by a takeoff, in meters
    pub climb_height: f64,
    /// Altitude considered as ground by a landing, in meters
    pub ground_height: f64,
    /// Duration of a landing descent, in seconds, at most [ControlConfig::MAX_DESCENT_TIME]
    pub descent_time: f64,
    /// Hold time after setting the camera at the end of a pass
    pub settle_delay_ms: u64,
    /// Pause between two control iterations, 0 to iterate as fast as the link answers
    pub control_period_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            gain_alt: 0.1,
            gain_x: 0.03,
            gain_y: 0.03,
            gain_head: 1.0 / 200.0,
            thresh_alt: 0.1,
            thresh_x: 0.1,
            thresh_y: 0.1,
            thresh_head: 0.1,
            max_authority: 0.3,
            climb_height: 5.0,
            ground_height: 0.0,
            descent_time: 5.0,
            settle_delay_ms: 2000,
            control_period_ms: 0,
        }
    }
}

impl ControlConfig {
    /// Longest landing descent, in seconds. A landing makes one pass per second.
    pub const MAX_DESCENT_TIME: f64 = 600.0;

    /// Check that the configuration can drive a vehicle
    pub fn validate(&self) -> Result<()> {
        if !(self.max_authority > 0.0) {
            return Err(Error::ConfigError("max_authority must be > 0".to_owned()));
        }
        if !(self.descent_time > 0.0 && self.descent_time <= Self::MAX_DESCENT_TIME) {
            return Err(Error::ConfigError(format!(
                "descent_time must be in (0, {}]",
                Self::MAX_DESCENT_TIME
            )));
        }
        let non_negative = [
            ("gain_alt", self.gain_alt),
            ("gain_x", self.gain_x),
            ("gain_y", self.gain_y),
            ("gain_head", self.gain_head),
            ("thresh_alt", self.thresh_alt),
            ("thresh_x", self.thresh_x),
            ("thresh_y", self.thresh_y),
            ("thresh_head", self.thresh_head),
        ];
        for (name, value) in non_negative {
            if !(value >= 0.0) {
                return Err(Error::ConfigError(format!("{} must be >= 0", name)));
            }
        }
        Ok(())
    }

    /// See [ControlConfig::settle_delay_ms]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// See [ControlConfig::control_period_ms]
    pub fn control_period(&self) -> Duration {
        Duration::from_millis(self.control_period_ms)
    }
}

/// How the media pipeline turns a movement vector into a vehicle command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementOutput {
    /// Raw stick command through the link
    Stick,
    /// Body-relative move through the piloting queue
    MoveBy,
}

/// Media pipeline configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Rate of the video source, also the back-off period after a capture miss
    pub fps: u32,
    /// Only one frame out of `frame_interval` is given to the perception callback
    pub frame_interval: u64,
    /// Bound of the frame queue between the reader and the processor
    pub queue_capacity: usize,
    /// Longest wait of the processor for a frame before checking if it must stop
    pub poll_timeout_ms: u64,
    /// Consecutive capture misses tolerated before the reader gives up
    pub max_capture_failures: u32,
    /// Where movement vectors are sent
    pub output: MovementOutput,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            fps: 10,
            frame_interval: 40,
            queue_capacity: 8,
            poll_timeout_ms: 100,
            max_capture_failures: 50,
            output: MovementOutput::Stick,
        }
    }
}

impl MediaConfig {
    /// Check that the pipeline can run with this configuration
    pub fn validate(&self) -> Result<()> {
        if self.fps == 0 {
            return Err(Error::ConfigError("fps must be > 0".to_owned()));
        }
        if self.frame_interval == 0 {
            return Err(Error::ConfigError("frame_interval must be > 0".to_owned()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::ConfigError("queue_capacity must be > 0".to_owned()));
        }
        Ok(())
    }

    /// Time between two frames of the source
    pub fn frame_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }

    /// See [MediaConfig::poll_timeout_ms]
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}
