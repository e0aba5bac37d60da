//! # Vehicle link
//!
//! The vehicle is reached through a bridge application running on the remote
//! controller, exposing a small HTTP API on the local wireless network:
//!
//! | Request | Body | Purpose |
//! |---------|------|---------|
//! | `GET /` | | Liveness probe |
//! | `GET /aircraft/allStates` | | Telemetry as JSON |
//! | `POST /send/stick` | `<leftX>,<leftY>,<rightX>,<rightY>` | Virtual stick command |
//! | `POST /send/gimbal/pitch` | `0,<pitch>,0` | Gimbal pitch |
//! | `POST /send/camera/zoom` | `<ratio>` | Camera zoom ratio |
//!
//! The link does not retry anything: each call is one request, and a failed request
//! is reported as [Error::LinkError](crate::Error::LinkError). Stick commands are
//! saturated by [VehicleLink::send_stick()] itself, callers cannot bypass the
//! authority limit.
//!
//! Requests go through a [Transport]. [HttpTransport] talks to the bridge, tests and
//! simulators plug their own transport and see exactly what would be on the wire.

use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use crate::config::LinkConfig;
use crate::state::{StickCommand, TelemetryState};
use crate::{Error, Result};

/// Liveness probe
pub const EP_BASE: &str = "/";
/// Aggregated telemetry
pub const EP_ALL_STATES: &str = "/aircraft/allStates";
/// Virtual sticks, body formatted as `"<leftX>,<leftY>,<rightX>,<rightY>"`
pub const EP_STICK: &str = "/send/stick";
/// Gimbal pitch, body formatted as `"0,<pitch>,0"`
pub const EP_GIMBAL_SET_PITCH: &str = "/send/gimbal/pitch";
/// Zoom ratio
pub const EP_ZOOM: &str = "/send/camera/zoom";

/// Request/response exchange with the bridge
#[async_trait]
pub trait Transport: Send + Sync {
    /// GET `end_point` and return the response body
    async fn get(&self, end_point: &str) -> Result<Vec<u8>>;

    /// POST `body` to `end_point`
    async fn post(&self, end_point: &str, body: String) -> Result<()>;
}

/// [Transport] over HTTP with `reqwest`
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// HTTP client for the bridge of `config`, nothing is sent yet
    pub fn new(config: &LinkConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url(),
        })
    }

    /// Root URL every end point is appended to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, end_point: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, end_point))
            .send()
            .await?
            .error_for_status()?;
        let body = response.bytes().await?;

        debug!("GET {} -> {} bytes", end_point, body.len());
        Ok(body.to_vec())
    }

    async fn post(&self, end_point: &str, body: String) -> Result<()> {
        debug!("POST {} {}", end_point, body);

        self.client
            .post(format!("{}{}", self.base_url, end_point))
            .body(body)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}

/// # Access to the vehicle
///
/// Holds no state besides its transport and authority limit. Cloning is cheap and
/// all methods take `&self`, so one link can be shared by the navigation
/// controller, the piloting queue and the media pipeline.
///
/// ```no_run
/// # async fn fly() -> dji_pilot::Result<()> {
/// use dji_pilot::subsystems::link::VehicleLink;
/// use dji_pilot::{Config, StickCommand};
///
/// let config = Config::default();
/// let link = VehicleLink::http(&config.link, config.control.max_authority)?;
/// link.connect().await?;
///
/// let state = link.get_all_states().await?;
/// println!("Altitude: {}", state.location.altitude);
///
/// // Climb, the throttle is clamped to the authority limit
/// link.send_stick(StickCommand::new(0.0, 1.0, 0.0, 0.0)).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct VehicleLink {
    transport: Arc<dyn Transport>,
    max_authority: f64,
}

impl std::fmt::Debug for VehicleLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VehicleLink")
            .field("max_authority", &self.max_authority)
            .finish_non_exhaustive()
    }
}

impl VehicleLink {
    /// Create a link over any transport
    pub fn new(transport: Arc<dyn Transport>, max_authority: f64) -> Result<Self> {
        if !(max_authority > 0.0) {
            return Err(Error::InvalidArgument("max_authority must be > 0".to_owned()));
        }
        Ok(Self {
            transport,
            max_authority,
        })
    }

    /// Create a link to the bridge described by `config`
    ///
    /// No request is made, call [VehicleLink::connect()] to probe the vehicle.
    pub fn http(config: &LinkConfig, max_authority: f64) -> Result<Self> {
        Self::new(Arc::new(HttpTransport::new(config)?), max_authority)
    }

    /// Authority limit applied to every stick channel
    pub fn max_authority(&self) -> f64 {
        self.max_authority
    }

    /// Check that the vehicle answers. Does not retry.
    pub async fn connect(&self) -> Result<()> {
        self.transport
            .get(EP_BASE)
            .await
            .map_err(|e| Error::LinkError(format!("vehicle unreachable: {}", e)))?;
        Ok(())
    }

    /// Best effort disconnection, never fails
    ///
    /// The bridge keeps no session, this only sends the sticks back to neutral.
    pub async fn disconnect(&self) {
        if let Err(e) = self.send_stick(StickCommand::neutral()).await {
            debug!("Neutral stick on disconnect failed: {}", e);
        }
    }

    /// Fetch a fresh telemetry snapshot
    pub async fn get_all_states(&self) -> Result<TelemetryState> {
        let body = self.transport.get(EP_ALL_STATES).await?;
        TelemetryState::from_json(&body)
    }

    /// Send a stick command
    ///
    /// Channels are clamped to `[-max_authority, max_authority]` and formatted with
    /// 4 decimals. Transport success is the only acknowledgment.
    pub async fn send_stick(&self, command: StickCommand) -> Result<()> {
        let command = command.saturated(self.max_authority);
        self.transport.post(EP_STICK, command.to_wire()).await
    }

    /// Set the gimbal pitch in degrees
    pub async fn set_gimbal_pitch(&self, pitch: f64) -> Result<()> {
        self.transport
            .post(EP_GIMBAL_SET_PITCH, format!("0,{:?},0", pitch))
            .await
    }

    /// Set the camera zoom ratio
    pub async fn set_zoom_ratio(&self, ratio: f64) -> Result<()> {
        self.transport.post(EP_ZOOM, format!("{:?}", ratio)).await
    }
}
