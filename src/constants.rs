/// Speed of light in m.s⁻¹
pub const SPEED_OF_LIGHT_M_S: f64 = 299_792_458.0;

/// Earth angular velocity, in WGS84 frame rad/s
pub const EARTH_ANGULAR_VEL_RAD: f64 = 7.2921151467E-5;

/// WGS84 Ellipsoid semi-major axis (meters)
pub const EARTH_SEMI_MAJOR_AXIS_WGS84: f64 = 6378137.0_f64;

/// WGS84 Ellipsoid flattening
pub const EARTH_FLATTENING_WGS84: f64 = 1.0 / 298.257223563;

/// GLONASS FDMA channel spacing on G1 (Hz)
pub const GLONASS_G1_CHANNEL_SPACING_HZ: f64 = 562.5E3;

/// GLONASS FDMA channel spacing on G2 (Hz)
pub const GLONASS_G2_CHANNEL_SPACING_HZ: f64 = 437.5E3;
