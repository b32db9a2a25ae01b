//! Geolocation for skylock: projecting a tracked pixel to WGS-84 ground
//! coordinates, and geodesic helpers for distance display.

pub mod geodesic;
pub mod projection;

use thiserror::Error;

pub use projection::{AttitudeProjector, CameraModel, NadirProjector, Projector};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoError {
    /// The pixel ray cannot intersect the ground (points at or above the
    /// horizon), or an input was not a finite number.
    #[error("pixel ray has no ground intersection")]
    NoSolution,
    /// The intrinsic matrix is not invertible.
    #[error("camera intrinsic matrix is singular")]
    SingularIntrinsics,
}

/// Geodesic ground distance in meters between two WGS-84 points.
pub fn distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    geodesic::inverse(lat1, lon1, lat2, lon2)
}
