//! Small ECEF/geodetic helpers shared by the observation model.
use nalgebra::Vector3;

use crate::{
    constants::{
        EARTH_ANGULAR_VEL_RAD, EARTH_FLATTENING_WGS84, EARTH_SEMI_MAJOR_AXIS_WGS84,
        SPEED_OF_LIGHT_M_S,
    },
    providers::LineOfSight,
};

/// ECEF (meters) to geodetic (lat rad, long rad, height m), iterative
/// on the WGS84 ellipsoid.
pub(crate) fn ecef_to_geodetic(ecef_m: Vector3<f64>) -> (f64, f64, f64) {
    let (x, y, z) = (ecef_m[0], ecef_m[1], ecef_m[2]);
    let e2 = EARTH_FLATTENING_WGS84 * (2.0 - EARTH_FLATTENING_WGS84);
    let r2 = x * x + y * y;

    let long_rad = y.atan2(x);

    let mut zk = 0.0;
    let mut z_adj = z;
    let mut v = EARTH_SEMI_MAJOR_AXIS_WGS84;

    while (z_adj - zk).abs() >= 1.0E-4 {
        zk = z_adj;
        let sin_lat = z_adj / (r2 + z_adj * z_adj).sqrt();
        v = EARTH_SEMI_MAJOR_AXIS_WGS84 / (1.0 - e2 * sin_lat * sin_lat).sqrt();
        z_adj = z + v * e2 * sin_lat;
    }

    let lat_rad = if r2 > 1.0E-12 {
        z_adj.atan2(r2.sqrt())
    } else if z > 0.0 {
        std::f64::consts::FRAC_PI_2
    } else {
        -std::f64::consts::FRAC_PI_2
    };

    let height_m = (r2 + z_adj * z_adj).sqrt() - v;

    (lat_rad, long_rad, height_m)
}

/// Geometric range corrected for Earth rotation during signal
/// propagation (Sagnac term), plus the receiver→satellite unit vector.
pub(crate) fn sagnac_range(sat_ecef_m: Vector3<f64>, rcv_ecef_m: Vector3<f64>) -> (f64, Vector3<f64>) {
    let dr = sat_ecef_m - rcv_ecef_m;
    let rho = dr.norm();

    let sagnac = EARTH_ANGULAR_VEL_RAD
        * (sat_ecef_m[0] * rcv_ecef_m[1] - sat_ecef_m[1] * rcv_ecef_m[0])
        / SPEED_OF_LIGHT_M_S;

    (rho + sagnac, dr / rho)
}

/// (elevation, azimuth) in radians, from receiver to satellite.
/// Receivers near the geocenter (unresolved first guess) see everything
/// at zenith so that no mask applies yet.
pub(crate) fn elevation_azimuth(rcv_ecef_m: Vector3<f64>, sat_ecef_m: Vector3<f64>) -> (f64, f64) {
    if rcv_ecef_m.norm() < 1.0E6 {
        return (std::f64::consts::FRAC_PI_2, 0.0);
    }

    let (lat, long, _) = ecef_to_geodetic(rcv_ecef_m);
    let dr = (sat_ecef_m - rcv_ecef_m).normalize();

    let (sin_lat, cos_lat) = lat.sin_cos();
    let (sin_long, cos_long) = long.sin_cos();

    let east = -sin_long * dr[0] + cos_long * dr[1];
    let north =
        -sin_lat * cos_long * dr[0] - sin_lat * sin_long * dr[1] + cos_lat * dr[2];
    let up = cos_lat * cos_long * dr[0] + cos_lat * sin_long * dr[1] + sin_lat * dr[2];

    let elevation = up.asin();
    let mut azimuth = east.atan2(north);
    if azimuth < 0.0 {
        azimuth += 2.0 * std::f64::consts::PI;
    }

    (elevation, azimuth)
}

/// ENU offset at this site, expressed in the ECEF frame.
pub(crate) fn enu_to_ecef_offset(site_ecef_m: Vector3<f64>, enu_m: (f64, f64, f64)) -> Vector3<f64> {
    let (lat, long, _) = ecef_to_geodetic(site_ecef_m);
    let (sin_lat, cos_lat) = lat.sin_cos();
    let (sin_long, cos_long) = long.sin_cos();
    let (e, n, u) = enu_m;

    Vector3::new(
        -sin_long * e - sin_lat * cos_long * n + cos_lat * cos_long * u,
        cos_long * e - sin_lat * sin_long * n + cos_lat * sin_long * u,
        cos_lat * n + sin_lat * u,
    )
}

/// Builds the [LineOfSight] the atmosphere model expects.
pub(crate) fn line_of_sight(
    rcv_ecef_m: Vector3<f64>,
    elevation_rad: f64,
    azimuth_rad: f64,
) -> LineOfSight {
    let (latitude_rad, longitude_rad, height_m) = ecef_to_geodetic(rcv_ecef_m);
    LineOfSight {
        elevation_rad,
        azimuth_rad,
        latitude_rad,
        longitude_rad,
        height_m,
    }
}

#[cfg(test)]
mod test {
    use super::{ecef_to_geodetic, elevation_azimuth, sagnac_range};
    use nalgebra::Vector3;

    #[test]
    fn geodetic_roundtrip_equator() {
        let ecef = Vector3::new(6378137.0, 0.0, 0.0);
        let (lat, long, h) = ecef_to_geodetic(ecef);
        assert!(lat.abs() < 1.0E-9);
        assert!(long.abs() < 1.0E-9);
        assert!(h.abs() < 1.0E-3);
    }

    #[test]
    fn zenith_satellite() {
        let rcv = Vector3::new(6378137.0, 0.0, 0.0);
        let sat = Vector3::new(26378137.0, 0.0, 0.0);
        let (el, _az) = elevation_azimuth(rcv, sat);
        assert!((el - std::f64::consts::FRAC_PI_2).abs() < 1.0E-6);
    }

    #[test]
    fn sagnac_small_against_plain_range() {
        let rcv = Vector3::new(6378137.0, 0.0, 0.0);
        let sat = Vector3::new(20000.0E3, 10000.0E3, 5000.0E3);
        let (rho, unit) = sagnac_range(sat, rcv);
        let plain = (sat - rcv).norm();
        // Sagnac correction is metric-scale on MEO ranges
        assert!((rho - plain).abs() < 50.0);
        assert!((unit.norm() - 1.0).abs() < 1.0E-12);
    }
}
