//! # Geodetic helpers
//!
//! Conversions between WGS-84 geodetic coordinates and a local East-North-Up
//! tangent plane, going through Earth-centered Earth-fixed coordinates. Errors of
//! a few hundred meters around the vehicle are expressed in this plane by the
//! navigation controller.

use nalgebra::{Matrix3, Vector3};

use crate::state::GeoPoint;

const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;

/// East, north and up offsets in meters
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Enu {
    /// Towards east
    pub east: f64,
    /// Towards north
    pub north: f64,
    /// Away from the ellipsoid
    pub up: f64,
}

impl Enu {
    /// Horizontal distance, meters
    pub fn horizontal_distance(&self) -> f64 {
        self.east.hypot(self.north)
    }

    /// Bearing from north, clockwise, in radians
    pub fn bearing(&self) -> f64 {
        self.east.atan2(self.north)
    }
}

fn eccentricity_squared() -> f64 {
    WGS84_F * (2.0 - WGS84_F)
}

fn geodetic_to_ecef(point: &GeoPoint) -> Vector3<f64> {
    let lat = point.lat.to_radians();
    let lon = point.lon.to_radians();
    let e2 = eccentricity_squared();
    let n = WGS84_A / (1.0 - e2 * lat.sin().powi(2)).sqrt();

    Vector3::new(
        (n + point.alt) * lat.cos() * lon.cos(),
        (n + point.alt) * lat.cos() * lon.sin(),
        (n * (1.0 - e2) + point.alt) * lat.sin(),
    )
}

fn ecef_to_geodetic(ecef: &Vector3<f64>) -> GeoPoint {
    let e2 = eccentricity_squared();
    let p = ecef.x.hypot(ecef.y);
    let lon = ecef.y.atan2(ecef.x);

    // Fixed point iteration, converges to sub-millimeter in a handful of steps near the surface
    let mut lat = ecef.z.atan2(p * (1.0 - e2));
    let mut alt = 0.0;
    for _ in 0..8 {
        let n = WGS84_A / (1.0 - e2 * lat.sin().powi(2)).sqrt();
        alt = if lat.cos().abs() > 1e-9 {
            p / lat.cos() - n
        } else {
            ecef.z.abs() - n * (1.0 - e2)
        };
        lat = ecef.z.atan2(p * (1.0 - e2 * n / (n + alt)));
    }

    GeoPoint {
        lat: lat.to_degrees(),
        lon: lon.to_degrees(),
        alt,
    }
}

/// Rotation from ECEF offsets to ENU offsets at the given reference
fn ecef_to_enu_rotation(reference: &GeoPoint) -> Matrix3<f64> {
    let (slat, clat) = reference.lat.to_radians().sin_cos();
    let (slon, clon) = reference.lon.to_radians().sin_cos();

    #[rustfmt::skip]
    let rotation = Matrix3::new(
        -slon, clon, 0.0,
        -slat * clon, -slat * slon, clat,
        clat * clon, clat * slon, slat,
    );
    rotation
}

/// Position of `target` in the ENU plane centered on `reference`
pub fn geodetic_to_enu(target: &GeoPoint, reference: &GeoPoint) -> Enu {
    let delta = geodetic_to_ecef(target) - geodetic_to_ecef(reference);
    let enu = ecef_to_enu_rotation(reference) * delta;

    Enu {
        east: enu.x,
        north: enu.y,
        up: enu.z,
    }
}

/// Geodetic position of an ENU offset from `reference`
pub fn enu_to_geodetic(offset: &Enu, reference: &GeoPoint) -> GeoPoint {
    let enu = Vector3::new(offset.east, offset.north, offset.up);
    let ecef = geodetic_to_ecef(reference) + ecef_to_enu_rotation(reference).transpose() * enu;

    ecef_to_geodetic(&ecef)
}

/// Wrap an angle in degrees to `[0, 360)`
pub fn wrap_360(angle: f64) -> f64 {
    angle.rem_euclid(360.0)
}

/// Wrap an angle in degrees to `(-180, 180]`
pub fn wrap_180(angle: f64) -> f64 {
    let angle = wrap_360(angle);
    if angle > 180.0 {
        angle - 360.0
    } else {
        angle
    }
}
