//! Pixel-to-ground projection.
//!
//! Both projectors consume center-origin signed pixel offsets (+x right,
//! +y down). Image drawing elsewhere uses top-left coordinates; the caller
//! converts once at the boundary.

use nalgebra::{Matrix3, Rotation3, Vector3};
use tracing::trace;
use types::TelemetrySample;

use crate::geodesic;
use crate::GeoError;

/// Camera geometry shared by both projection modes.
#[derive(Debug, Clone, Copy)]
pub struct CameraModel {
    /// Diagonal field of view in radians.
    pub fov_diag_rad: f64,
    pub img_width_px: f64,
    pub img_height_px: f64,
}

impl CameraModel {
    pub fn new(fov_diag_deg: f64, img_width_px: u32, img_height_px: u32) -> Self {
        Self {
            fov_diag_rad: fov_diag_deg.to_radians(),
            img_width_px: img_width_px as f64,
            img_height_px: img_height_px as f64,
        }
    }

    /// Approximate the intrinsic matrix from the diagonal FOV and resolution.
    ///
    /// Splits the diagonal FOV into horizontal/vertical components via the
    /// aspect ratio (tan(Fd/2)^2 = tan(Fh/2)^2 + tan(Fv/2)^2), then converts
    /// each to a focal length in pixel units. The principal point is assumed
    /// at the image center.
    pub fn intrinsics(&self) -> Matrix3<f64> {
        let aspect = self.img_width_px / self.img_height_px;
        let tan_half_diag = (self.fov_diag_rad / 2.0).tan();
        let norm = (aspect * aspect + 1.0).sqrt();

        let tan_half_h = tan_half_diag * (aspect / norm);
        let tan_half_v = tan_half_diag * (1.0 / norm);

        let fx = (self.img_width_px / 2.0) / tan_half_h;
        let fy = (self.img_height_px / 2.0) / tan_half_v;
        let cx = self.img_width_px / 2.0;
        let cy = self.img_height_px / 2.0;

        Matrix3::new(fx, 0.0, cx, 0.0, fy, cy, 0.0, 0.0, 1.0)
    }
}

/// Downward-facing projection: altitude and FOV alone fix the ground scale,
/// independent of vehicle attitude.
#[derive(Debug, Clone, Copy)]
pub struct NadirProjector {
    camera: CameraModel,
}

impl NadirProjector {
    pub fn new(camera: CameraModel) -> Self {
        Self { camera }
    }

    /// Project a center-origin pixel offset to a ground coordinate.
    pub fn locate(
        &self,
        uav_lat: f64,
        uav_lon: f64,
        alt_agl_m: f64,
        obj_x_px: f64,
        obj_y_px: f64,
    ) -> Result<(f64, f64), GeoError> {
        if !uav_lat.is_finite() || !uav_lon.is_finite() || !alt_agl_m.is_finite()
            || !obj_x_px.is_finite()
            || !obj_y_px.is_finite()
        {
            return Err(GeoError::NoSolution);
        }
        if alt_agl_m <= 0.0 {
            return Ok((uav_lat, uav_lon));
        }

        let diagonal_m = 2.0 * alt_agl_m * (self.camera.fov_diag_rad / 2.0).tan();
        let ground_width_m = (diagonal_m * diagonal_m
            / (1.0 + self.camera.img_height_px / self.camera.img_width_px))
            .sqrt();
        let m_per_px = ground_width_m / self.camera.img_width_px;

        let dx_m = obj_x_px * m_per_px;
        let dy_m = obj_y_px * m_per_px;
        let dist = (dx_m * dx_m + dy_m * dy_m).sqrt();

        let bearing_deg = (90.0 - obj_y_px.atan2(obj_x_px).to_degrees()).rem_euclid(360.0);

        trace!(dist, bearing_deg, "nadir projection");
        Ok(geodesic::direct(uav_lat, uav_lon, bearing_deg, dist))
    }
}

/// Attitude-aware projection: casts the pixel ray through the camera mount
/// and vehicle attitude into NED and intersects the ground plane.
#[derive(Debug, Clone)]
pub struct AttitudeProjector {
    camera: CameraModel,
    k_inv: Matrix3<f64>,
}

impl AttitudeProjector {
    /// Build from the FOV-approximated intrinsics.
    pub fn new(camera: CameraModel) -> Result<Self, GeoError> {
        Self::with_intrinsics(camera, camera.intrinsics())
    }

    /// Build with an explicit calibration matrix.
    pub fn with_intrinsics(camera: CameraModel, k: Matrix3<f64>) -> Result<Self, GeoError> {
        let k_inv = k.try_inverse().ok_or(GeoError::SingularIntrinsics)?;
        Ok(Self { camera, k_inv })
    }

    /// Fixed mount: forward-looking camera axes pitched 90 degrees down.
    ///
    /// Camera frame is x-right, y-down, z-optical-axis; after the mount
    /// rotation the optical axis is body-down, image-right is body-right.
    fn camera_to_body() -> Matrix3<f64> {
        Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0)
    }

    /// Project a center-origin pixel offset to a ground coordinate.
    ///
    /// `yaw` is the ATTITUDE-message yaw in radians `[-pi, pi]`, not the
    /// compass heading.
    #[allow(clippy::too_many_arguments)]
    pub fn locate(
        &self,
        uav_lat: f64,
        uav_lon: f64,
        alt_agl_m: f64,
        roll_rad: f64,
        pitch_rad: f64,
        yaw_rad: f64,
        obj_x_px: f64,
        obj_y_px: f64,
    ) -> Result<(f64, f64), GeoError> {
        if !uav_lat.is_finite()
            || !uav_lon.is_finite()
            || !alt_agl_m.is_finite()
            || !roll_rad.is_finite()
            || !pitch_rad.is_finite()
            || !yaw_rad.is_finite()
            || !obj_x_px.is_finite()
            || !obj_y_px.is_finite()
        {
            return Err(GeoError::NoSolution);
        }
        if alt_agl_m <= 0.0 {
            return Ok((uav_lat, uav_lon));
        }

        // Intrinsics expect top-left pixel coordinates.
        let px = obj_x_px + self.camera.img_width_px / 2.0;
        let py = obj_y_px + self.camera.img_height_px / 2.0;

        let mut ray_cam = self.k_inv * Vector3::new(px, py, 1.0);
        ray_cam.normalize_mut();

        let body_to_ned = Rotation3::from_euler_angles(roll_rad, pitch_rad, yaw_rad);
        let ray_ned = body_to_ned * (Self::camera_to_body() * ray_cam);

        // NED z is down-positive; a ray that cannot reach the ground has no
        // solution.
        if ray_ned.z <= 1e-9 {
            return Err(GeoError::NoSolution);
        }

        let t = alt_agl_m / ray_ned.z;
        let north_m = t * ray_ned.x;
        let east_m = t * ray_ned.y;

        let dist = (north_m * north_m + east_m * east_m).sqrt();
        let bearing_deg = east_m.atan2(north_m).to_degrees().rem_euclid(360.0);

        trace!(north_m, east_m, "attitude projection");
        Ok(geodesic::direct(uav_lat, uav_lon, bearing_deg, dist))
    }
}

/// Configured projection mode, selected at startup.
#[derive(Debug, Clone)]
pub enum Projector {
    Nadir(NadirProjector),
    Attitude(AttitudeProjector),
}

impl Projector {
    /// Locate a target from the tracked pixel offset and the synced
    /// telemetry sample.
    pub fn locate(
        &self,
        sample: &TelemetrySample,
        obj_x_px: f64,
        obj_y_px: f64,
    ) -> Result<(f64, f64), GeoError> {
        match self {
            Self::Nadir(p) => p.locate(sample.lat, sample.lon, sample.alt_agl, obj_x_px, obj_y_px),
            Self::Attitude(p) => p.locate(
                sample.lat,
                sample.lon,
                sample.alt_agl,
                sample.roll_rad,
                sample.pitch_rad,
                sample.yaw_rad,
                obj_x_px,
                obj_y_px,
            ),
        }
    }
}
