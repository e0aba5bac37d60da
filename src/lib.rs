//! # DJI pilot library
//!
//! This crate allows to connect to, and fly, a DJI drone through the bridge application running next to its
//! remote controller. The bridge exposes telemetry, virtual sticks, gimbal and zoom on a small HTTP API and the
//! live video as an RTSP stream.
//!
//! ## Status
//!
//! The functionalities are implemented in subsystems. The current status is:
//!
//! | Subsystem | Support |
//! |-----------|---------|
//! | Link (telemetry, sticks, gimbal, zoom) | Full |
//! | Navigation (waypoint controller) | Full |
//! | Piloting (takeoff, land, moves, action queue) | Full |
//! | Media (video to movement pipeline) | Full |
//! | Capture (ffmpeg stream and recording) | Full |
//! | Missions (autonomous, waypoint) | Full |
//!
//! ## Usage
//!
//! The basic procedure to use the lib is:
//!  - Write a [Config], or load one with [Config::from_file()]
//!  - Create a [Drone] with [Drone::connect()], this probes the bridge and initializes the subsystems
//!  - Subsystems are available as public fields of the [Drone] struct
//!  - Call [Drone::disconnect()] when done, it releases the sticks
//!
//! All subsystems functions are only taking an un-mutable reference to self (`&self`), the intention is for the
//! Drone object to be shared between tasks using `Arc<>`.
//!
//! For example:
//! ``` no_run
//! # async fn fly() -> dji_pilot::Result<()> {
//! let mut config = dji_pilot::Config::default();
//! config.link.address = "192.168.1.20".to_owned();
//!
//! let drone = dji_pilot::Drone::connect(config).await?;
//!
//! let state = drone.link.get_all_states().await?;
//! println!("Heading: {}, altitude: {}", state.heading, state.location.altitude);
//!
//! drone.piloting.takeoff(false).await?;
//! drone.piloting.move_by(0.0, 10.0, 0.0, 0.0, true, false).await?;
//! drone.piloting.land(false).await?;
//!
//! drone.disconnect().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Safety
//!
//! Every stick command goes through [VehicleLink::send_stick()](subsystems::link::VehicleLink::send_stick)
//! which clamps each channel to the configured authority limit. Cancelling a move does not stop the vehicle, call
//! [Piloting::stop()](subsystems::piloting::Piloting::stop) to release the sticks.

#![warn(missing_docs)]

mod drone;
mod error;

pub mod config;
pub mod geo;
pub mod mission;
pub mod state;
pub mod subsystems;

pub use crate::config::Config;
pub use crate::drone::Drone;
pub use crate::error::{Error, Result};
pub use crate::state::{GeoPoint, MovementVector, StickCommand, TelemetryState, Waypoint};
