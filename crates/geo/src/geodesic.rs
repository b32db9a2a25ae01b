//! Geodesic direct and inverse problems on the WGS-84 ellipsoid (Vincenty).

/// WGS-84 semi-major axis in meters.
const WGS84_A: f64 = 6_378_137.0;
/// WGS-84 flattening.
const WGS84_F: f64 = 1.0 / 298.257_223_563;

const MAX_ITERATIONS: usize = 200;
const CONVERGENCE: f64 = 1e-12;

/// Destination point given start, initial bearing (degrees clockwise from
/// north) and distance in meters.
pub fn direct(lat_deg: f64, lon_deg: f64, bearing_deg: f64, distance_m: f64) -> (f64, f64) {
    if distance_m == 0.0 {
        return (lat_deg, lon_deg);
    }

    let b = WGS84_A * (1.0 - WGS84_F);
    let alpha1 = bearing_deg.to_radians();
    let (sin_alpha1, cos_alpha1) = alpha1.sin_cos();

    let tan_u1 = (1.0 - WGS84_F) * lat_deg.to_radians().tan();
    let cos_u1 = 1.0 / (1.0 + tan_u1 * tan_u1).sqrt();
    let sin_u1 = tan_u1 * cos_u1;

    let sigma1 = tan_u1.atan2(cos_alpha1);
    let sin_alpha = cos_u1 * sin_alpha1;
    let cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
    let u_sq = cos_sq_alpha * (WGS84_A * WGS84_A - b * b) / (b * b);
    let a_coeff = 1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
    let b_coeff = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));

    let mut sigma = distance_m / (b * a_coeff);
    let mut cos2_sigma_m;
    let mut sin_sigma;
    let mut cos_sigma;

    let mut iterations = 0;
    loop {
        cos2_sigma_m = (2.0 * sigma1 + sigma).cos();
        sin_sigma = sigma.sin();
        cos_sigma = sigma.cos();
        let delta_sigma = b_coeff
            * sin_sigma
            * (cos2_sigma_m
                + b_coeff / 4.0
                    * (cos_sigma * (-1.0 + 2.0 * cos2_sigma_m * cos2_sigma_m)
                        - b_coeff / 6.0
                            * cos2_sigma_m
                            * (-3.0 + 4.0 * sin_sigma * sin_sigma)
                            * (-3.0 + 4.0 * cos2_sigma_m * cos2_sigma_m)));
        let sigma_next = distance_m / (b * a_coeff) + delta_sigma;
        iterations += 1;
        if (sigma_next - sigma).abs() < CONVERGENCE || iterations >= MAX_ITERATIONS {
            sigma = sigma_next;
            break;
        }
        sigma = sigma_next;
    }

    cos2_sigma_m = (2.0 * sigma1 + sigma).cos();
    sin_sigma = sigma.sin();
    cos_sigma = sigma.cos();

    let tmp = sin_u1 * sin_sigma - cos_u1 * cos_sigma * cos_alpha1;
    let lat2 = (sin_u1 * cos_sigma + cos_u1 * sin_sigma * cos_alpha1)
        .atan2((1.0 - WGS84_F) * (sin_alpha * sin_alpha + tmp * tmp).sqrt());
    let lambda = (sin_sigma * sin_alpha1).atan2(cos_u1 * cos_sigma - sin_u1 * sin_sigma * cos_alpha1);
    let c_coeff = WGS84_F / 16.0 * cos_sq_alpha * (4.0 + WGS84_F * (4.0 - 3.0 * cos_sq_alpha));
    let l = lambda
        - (1.0 - c_coeff)
            * WGS84_F
            * sin_alpha
            * (sigma
                + c_coeff
                    * sin_sigma
                    * (cos2_sigma_m
                        + c_coeff * cos_sigma * (-1.0 + 2.0 * cos2_sigma_m * cos2_sigma_m)));

    let lon2 = lon_deg + l.to_degrees();
    // Normalize longitude to [-180, 180).
    let lon2 = (lon2 + 540.0).rem_euclid(360.0) - 180.0;

    (lat2.to_degrees(), lon2)
}

/// Geodesic distance in meters between two points.
///
/// Falls back to the great-circle distance for the rare near-antipodal
/// inputs where Vincenty's inverse does not converge.
pub fn inverse(lat1_deg: f64, lon1_deg: f64, lat2_deg: f64, lon2_deg: f64) -> f64 {
    if lat1_deg == lat2_deg && lon1_deg == lon2_deg {
        return 0.0;
    }

    let b = WGS84_A * (1.0 - WGS84_F);
    let l = (lon2_deg - lon1_deg).to_radians();
    let u1 = ((1.0 - WGS84_F) * lat1_deg.to_radians().tan()).atan();
    let u2 = ((1.0 - WGS84_F) * lat2_deg.to_radians().tan()).atan();
    let (sin_u1, cos_u1) = u1.sin_cos();
    let (sin_u2, cos_u2) = u2.sin_cos();

    let mut lambda = l;
    let mut iterations = 0;
    let (mut sin_sigma, mut cos_sigma, mut sigma, mut cos_sq_alpha, mut cos2_sigma_m);

    loop {
        let (sin_lambda, cos_lambda) = lambda.sin_cos();
        sin_sigma = ((cos_u2 * sin_lambda).powi(2)
            + (cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda).powi(2))
        .sqrt();
        if sin_sigma == 0.0 {
            return 0.0;
        }
        cos_sigma = sin_u1 * sin_u2 + cos_u1 * cos_u2 * cos_lambda;
        sigma = sin_sigma.atan2(cos_sigma);
        let sin_alpha = cos_u1 * cos_u2 * sin_lambda / sin_sigma;
        cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
        cos2_sigma_m = if cos_sq_alpha != 0.0 {
            cos_sigma - 2.0 * sin_u1 * sin_u2 / cos_sq_alpha
        } else {
            0.0 // Equatorial line
        };
        let c = WGS84_F / 16.0 * cos_sq_alpha * (4.0 + WGS84_F * (4.0 - 3.0 * cos_sq_alpha));
        let lambda_next = l
            + (1.0 - c)
                * WGS84_F
                * sin_alpha
                * (sigma
                    + c * sin_sigma
                        * (cos2_sigma_m
                            + c * cos_sigma * (-1.0 + 2.0 * cos2_sigma_m * cos2_sigma_m)));

        iterations += 1;
        if (lambda_next - lambda).abs() < CONVERGENCE {
            break;
        }
        if iterations >= MAX_ITERATIONS {
            return haversine(lat1_deg, lon1_deg, lat2_deg, lon2_deg);
        }
        lambda = lambda_next;
    }

    let u_sq = cos_sq_alpha * (WGS84_A * WGS84_A - b * b) / (b * b);
    let a_coeff = 1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
    let b_coeff = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));
    let delta_sigma = b_coeff
        * sin_sigma
        * (cos2_sigma_m
            + b_coeff / 4.0
                * (cos_sigma * (-1.0 + 2.0 * cos2_sigma_m * cos2_sigma_m)
                    - b_coeff / 6.0
                        * cos2_sigma_m
                        * (-3.0 + 4.0 * sin_sigma * sin_sigma)
                        * (-3.0 + 4.0 * cos2_sigma_m * cos2_sigma_m)));

    b * a_coeff * (sigma - delta_sigma)
}

/// Great-circle fallback on the mean-radius sphere.
fn haversine(lat1_deg: f64, lon1_deg: f64, lat2_deg: f64, lon2_deg: f64) -> f64 {
    const MEAN_RADIUS: f64 = 6_371_000.0;
    let dlat = (lat2_deg - lat1_deg).to_radians();
    let dlon = (lon2_deg - lon1_deg).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1_deg.to_radians().cos() * lat2_deg.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    2.0 * MEAN_RADIUS * a.sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_zero_distance() {
        let (lat, lon) = direct(51.0, -114.0, 45.0, 0.0);
        assert_eq!(lat, 51.0);
        assert_eq!(lon, -114.0);
    }

    #[test]
    fn test_direct_north_along_meridian() {
        // One degree of latitude at the equator is ~110,574 m.
        let (lat, lon) = direct(0.0, 0.0, 0.0, 110_574.4);
        assert!((lat - 1.0).abs() < 1e-4, "lat = {lat}");
        assert!(lon.abs() < 1e-9, "lon = {lon}");
    }

    #[test]
    fn test_direct_east_along_equator() {
        // One degree of longitude at the equator is ~111,319.5 m.
        let (lat, lon) = direct(0.0, 0.0, 90.0, 111_319.5);
        assert!(lat.abs() < 1e-6, "lat = {lat}");
        assert!((lon - 1.0).abs() < 1e-4, "lon = {lon}");
    }

    #[test]
    fn test_direct_inverse_roundtrip() {
        let cases = [
            (51.0457, -114.0625, 37.0, 850.0),
            (-33.8688, 151.2093, 203.5, 12_345.0),
            (63.5, 10.4, 359.0, 150.0),
        ];
        for (lat, lon, bearing, dist) in cases {
            let (lat2, lon2) = direct(lat, lon, bearing, dist);
            let measured = inverse(lat, lon, lat2, lon2);
            assert!(
                (measured - dist).abs() < 0.01,
                "roundtrip {dist} m -> {measured} m"
            );
        }
    }

    #[test]
    fn test_inverse_coincident() {
        assert_eq!(inverse(51.0, -114.0, 51.0, -114.0), 0.0);
    }

    #[test]
    fn test_inverse_known_baseline() {
        // Flinders Peak to Buninyong, the classic Vincenty test baseline:
        // 54,972.271 m.
        let d = inverse(
            -(37.0 + 57.0 / 60.0 + 3.72030 / 3600.0),
            144.0 + 25.0 / 60.0 + 29.52440 / 3600.0,
            -(37.0 + 39.0 / 60.0 + 10.15610 / 3600.0),
            143.0 + 55.0 / 60.0 + 35.38390 / 3600.0,
        );
        assert!((d - 54_972.271).abs() < 0.05, "d = {d}");
    }

    #[test]
    fn test_longitude_normalization() {
        let (_, lon) = direct(0.0, 179.9, 90.0, 50_000.0);
        assert!(lon < 180.0 && lon >= -180.0, "lon = {lon}");
        assert!(lon < -179.0, "wrapped east across the antimeridian: {lon}");
    }
}
