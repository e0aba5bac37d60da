//! # Drone subsystems
//!
//! The [link] is the only module talking to the vehicle. Everything else is layered on top of it: [navigation] drives
//! the vehicle to a waypoint, [piloting] sequences navigation passes into operator verbs and [media] turns the live
//! video, obtained through [capture], into movements.
//!
//! Modules here are the main way to communicate and interact with the drone.

pub mod capture;
pub mod link;
pub mod media;
pub mod navigation;
pub mod piloting;
