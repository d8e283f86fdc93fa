//! Compact Position Reporting — globally unambiguous position from a
//! paired odd/even message, plus the geodesy helpers the tracker needs.
//!
//! CPR latitude and longitude are 17-bit fractions of a zone; the even
//! message uses 60 latitude zones, the odd one 59. Resolving a pair only
//! works when both messages fall in the same longitude-zone band, which
//! the NL(lat) table decides.

use serde::Serialize;

/// 2^17, the CPR coordinate resolution.
const CPR_MAX: f64 = 131072.0;

/// Latitude zone size for even messages (360/60).
const AIR_DLAT0: f64 = 360.0 / 60.0;
/// Latitude zone size for odd messages (360/59).
const AIR_DLAT1: f64 = 360.0 / 59.0;

/// Mean earth radius in meters.
pub const EARTH_RADIUS: f64 = 6_371_000.0;

const SMALL_VAL: f64 = 0.0001;

/// A resolved geographic position, degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
}

/// A position in the earth-centred cartesian frame, meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cartesian {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Always-positive MOD, used for CPR decoding.
fn cpr_mod(a: i64, b: i64) -> i64 {
    let res = a % b;
    if res < 0 {
        res + b
    } else {
        res
    }
}

/// NL(lat): number of longitude zones for a latitude.
///
/// Precomputed 59-band table from 1090-WP-9-14; symmetric about the
/// equator, monotone down to 1 beyond 87 degrees.
#[rustfmt::skip]
pub fn nl(lat: f64) -> i32 {
    let lat = lat.abs();
    if lat < 10.470_471_30 { return 59; }
    if lat < 14.828_174_37 { return 58; }
    if lat < 18.186_263_57 { return 57; }
    if lat < 21.029_394_93 { return 56; }
    if lat < 23.545_044_87 { return 55; }
    if lat < 25.829_247_07 { return 54; }
    if lat < 27.938_987_10 { return 53; }
    if lat < 29.911_356_86 { return 52; }
    if lat < 31.772_097_08 { return 51; }
    if lat < 33.539_934_36 { return 50; }
    if lat < 35.228_995_98 { return 49; }
    if lat < 36.850_251_08 { return 48; }
    if lat < 38.412_418_92 { return 47; }
    if lat < 39.922_566_84 { return 46; }
    if lat < 41.386_518_32 { return 45; }
    if lat < 42.809_140_12 { return 44; }
    if lat < 44.194_549_51 { return 43; }
    if lat < 45.546_267_23 { return 42; }
    if lat < 46.867_332_52 { return 41; }
    if lat < 48.160_391_28 { return 40; }
    if lat < 49.427_764_39 { return 39; }
    if lat < 50.671_501_66 { return 38; }
    if lat < 51.893_424_69 { return 37; }
    if lat < 53.095_161_53 { return 36; }
    if lat < 54.278_174_72 { return 35; }
    if lat < 55.443_784_44 { return 34; }
    if lat < 56.593_187_56 { return 33; }
    if lat < 57.727_473_54 { return 32; }
    if lat < 58.847_637_76 { return 31; }
    if lat < 59.954_592_77 { return 30; }
    if lat < 61.049_177_74 { return 29; }
    if lat < 62.132_166_59 { return 28; }
    if lat < 63.204_274_79 { return 27; }
    if lat < 64.266_165_23 { return 26; }
    if lat < 65.318_453_10 { return 25; }
    if lat < 66.361_710_08 { return 24; }
    if lat < 67.396_467_74 { return 23; }
    if lat < 68.423_220_22 { return 22; }
    if lat < 69.442_426_31 { return 21; }
    if lat < 70.454_510_75 { return 20; }
    if lat < 71.459_864_73 { return 19; }
    if lat < 72.458_845_45 { return 18; }
    if lat < 73.451_774_42 { return 17; }
    if lat < 74.438_934_16 { return 16; }
    if lat < 75.420_562_57 { return 15; }
    if lat < 76.396_843_91 { return 14; }
    if lat < 77.367_894_61 { return 13; }
    if lat < 78.333_740_83 { return 12; }
    if lat < 79.294_282_25 { return 11; }
    if lat < 80.249_232_13 { return 10; }
    if lat < 81.198_013_49 { return 9; }
    if lat < 82.139_569_81 { return 8; }
    if lat < 83.071_994_45 { return 7; }
    if lat < 83.991_735_63 { return 6; }
    if lat < 84.891_661_91 { return 5; }
    if lat < 85.755_416_21 { return 4; }
    if lat < 86.535_369_98 { return 3; }
    if lat < 87.000_000_00 { return 2; }
    1
}

/// Effective longitude zone count: NL minus one for odd messages, never
/// below 1.
fn n_func(lat: f64, odd: bool) -> i32 {
    (nl(lat) - odd as i32).max(1)
}

/// Longitude zone size in degrees at a latitude.
fn dlong(lat: f64, odd: bool) -> f64 {
    360.0 / n_func(lat, odd) as f64
}

/// Resolve a paired even/odd CPR sample into a position.
///
/// The more recent of the two messages decides which zone set resolves the
/// longitude. Returns `None` when the two samples straddle a longitude
/// zone boundary; the caller keeps the previous position in that case.
/// The caller is also responsible for the pairing window (10 minutes).
pub fn decode_cpr(
    even_lat: i32,
    even_lon: i32,
    even_time: u64,
    odd_lat: i32,
    odd_lon: i32,
    odd_time: u64,
) -> Option<Position> {
    let lat0 = even_lat as f64;
    let lat1 = odd_lat as f64;
    let lon0 = even_lon as f64;
    let lon1 = odd_lon as f64;

    // Latitude index j
    let j = (((59.0 * lat0 - 60.0 * lat1) / CPR_MAX) + 0.5).floor() as i64;
    let mut rlat0 = AIR_DLAT0 * (cpr_mod(j, 60) as f64 + lat0 / CPR_MAX);
    let mut rlat1 = AIR_DLAT1 * (cpr_mod(j, 59) as f64 + lat1 / CPR_MAX);

    if rlat0 >= 270.0 {
        rlat0 -= 360.0;
    }
    if rlat1 >= 270.0 {
        rlat1 -= 360.0;
    }

    // Both must fall in the same longitude-zone band.
    if nl(rlat0) != nl(rlat1) {
        return None;
    }

    let (lat, mut lon) = if even_time > odd_time {
        // Use the even packet
        let ni = n_func(rlat0, false) as i64;
        let m = ((((lon0 * (nl(rlat0) - 1) as f64) - (lon1 * nl(rlat0) as f64)) / CPR_MAX) + 0.5)
            .floor() as i64;
        (
            rlat0,
            dlong(rlat0, false) * (cpr_mod(m, ni) as f64 + lon0 / CPR_MAX),
        )
    } else {
        // Use the odd packet
        let ni = n_func(rlat1, true) as i64;
        let m = ((((lon0 * (nl(rlat1) - 1) as f64) - (lon1 * nl(rlat1) as f64)) / CPR_MAX) + 0.5)
            .floor() as i64;
        (
            rlat1,
            dlong(rlat1, true) * (cpr_mod(m, ni) as f64 + lon1 / CPR_MAX),
        )
    };

    if lon > 180.0 {
        lon -= 360.0;
    }

    Some(Position { lat, lon })
}

// ---------------------------------------------------------------------------
// Geodesy
// ---------------------------------------------------------------------------

/// Geodetic to geocentric latitude, radians.
fn geocentric_latitude(lat: f64) -> f64 {
    let e2 = 0.00669437999014;
    ((1.0 - e2) * lat.tan()).atan()
}

/// Geographic position to the earth-centred cartesian frame.
pub fn spherical_to_cartesian(pos: Position) -> Cartesian {
    let lat = pos.lat.to_radians();
    let lon = pos.lon.to_radians();
    let geo_lat = geocentric_latitude(lat);

    Cartesian {
        x: EARTH_RADIUS * lon.cos() * geo_lat.cos(),
        y: EARTH_RADIUS * lon.sin() * geo_lat.cos(),
        z: EARTH_RADIUS * geo_lat.sin(),
    }
}

/// Cartesian back to geographic; close to `EARTH_RADIUS` by construction,
/// so the radius is not recomputed.
pub fn cartesian_to_spherical(cart: Cartesian) -> Position {
    Position {
        lat: cart.z.atan2(cart.x.hypot(cart.y)).to_degrees(),
        lon: cart.y.atan2(cart.x).to_degrees(),
    }
}

/// Horizontal distance between two cartesian points, meters.
pub fn cartesian_distance(a: Cartesian, b: Cartesian) -> f64 {
    (b.x - a.x).hypot(b.y - a.y)
}

/// Whichever of `val1`, `val2` lies closer to `val`.
pub fn closest_to(val: f64, val1: f64, val2: f64) -> f64 {
    if (val2 - val).abs() > (val1 - val).abs() {
        val1
    } else {
        val2
    }
}

/// Great-circle distance between two positions, meters.
///
/// Spherical-earth model, up to 0.5% error; not used where that matters.
pub fn great_circle_dist(pos1: Position, pos2: Position) -> f64 {
    let lat1 = pos1.lat.to_radians();
    let lon1 = pos1.lon.to_radians();
    let lat2 = pos2.lat.to_radians();
    let lon2 = pos2.lon.to_radians();

    // Coincident points would hand acos a value just above 1.
    if (lat1 - lat2).abs() < SMALL_VAL && (lon1 - lon2).abs() < SMALL_VAL {
        return 0.0;
    }

    let angle = lat1.sin() * lat2.sin() + lat1.cos() * lat2.cos() * (lon1 - lon2).abs().cos();
    EARTH_RADIUS * angle.acos()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nl_equator_and_poles() {
        assert_eq!(nl(0.0), 59);
        assert_eq!(nl(87.0), 1);
        assert_eq!(nl(-87.0), 1);
        assert_eq!(nl(90.0), 1);
        assert_eq!(nl(-90.0), 1);
    }

    #[test]
    fn test_nl_monotone_non_increasing() {
        let mut prev = nl(0.0);
        let mut lat = 0.0;
        while lat <= 90.0 {
            let n = nl(lat);
            assert!(n <= prev, "NL increased at lat {lat}");
            assert!(n >= 1);
            prev = n;
            lat += 0.1;
        }
    }

    #[test]
    fn test_nl_symmetric() {
        for lat in [5.0, 33.3, 52.0, 71.5, 86.9] {
            assert_eq!(nl(lat), nl(-lat));
        }
    }

    #[test]
    fn test_decode_cpr_even_more_recent() {
        // Known vector from The 1090MHz Riddle, resolved with the even
        // packet: lat 52.2572, lon 3.91937.
        let pos = decode_cpr(93000, 51372, 10_000, 74158, 50194, 0).expect("pair resolves");
        assert!((pos.lat - 52.2572).abs() < 0.001, "lat {}", pos.lat);
        assert!((pos.lon - 3.9193).abs() < 0.001, "lon {}", pos.lon);
    }

    #[test]
    fn test_decode_cpr_odd_more_recent() {
        // Same pair with the odd packet newer: resolves at the odd
        // message's position a little further along track.
        let pos = decode_cpr(93000, 51372, 0, 74158, 50194, 10_000).expect("pair resolves");
        assert!((pos.lat - 52.26578).abs() < 0.001, "lat {}", pos.lat);
        assert!((pos.lon - 3.93892).abs() < 0.001, "lon {}", pos.lon);
    }

    #[test]
    fn test_decode_cpr_pair_within_five_km_of_truth() {
        // Either resolution stays within 5 km of the aircraft's actual
        // position for a pair taken seconds apart.
        let truth = Position { lat: 52.2572, lon: 3.91937 };
        for (te, to) in [(0u64, 10_000u64), (10_000, 0)] {
            let pos = decode_cpr(93000, 51372, te, 74158, 50194, to).unwrap();
            assert!(great_circle_dist(pos, truth) < 5_000.0);
        }
    }

    #[test]
    fn test_decode_cpr_zone_mismatch() {
        // This raw pair resolves to -25.829 (NL 53) and -25.802 (NL 54):
        // the samples straddle a zone boundary, so no position.
        assert!(decode_cpr(91108, 51372, 0, 101101, 50194, 1000).is_none());
    }

    #[test]
    fn test_great_circle_dist() {
        let amsterdam = Position { lat: 52.3676, lon: 4.9041 };
        let london = Position { lat: 51.5072, lon: -0.1276 };
        let d = great_circle_dist(amsterdam, london);
        // ~358 km
        assert!((d - 358_000.0).abs() < 10_000.0, "distance {d}");
    }

    #[test]
    fn test_great_circle_dist_coincident() {
        let p = Position { lat: 52.0, lon: 4.0 };
        assert_eq!(great_circle_dist(p, p), 0.0);
    }

    #[test]
    fn test_cartesian_roundtrip_longitude() {
        let p = Position { lat: 45.0, lon: 30.0 };
        let back = cartesian_to_spherical(spherical_to_cartesian(p));
        assert!((back.lon - 30.0).abs() < 1e-6);
        // Latitude passes through the geocentric correction, stays close.
        assert!((back.lat - 45.0).abs() < 0.25);
    }

    #[test]
    fn test_cartesian_distance() {
        let a = Cartesian { x: 0.0, y: 0.0, z: 0.0 };
        let b = Cartesian { x: 3.0, y: 4.0, z: 100.0 };
        assert_eq!(cartesian_distance(a, b), 5.0); // z ignored
    }

    #[test]
    fn test_closest_to() {
        assert_eq!(closest_to(10.0, 9.0, 20.0), 9.0);
        assert_eq!(closest_to(10.0, 30.0, 11.0), 11.0);
    }

    #[test]
    fn test_cpr_mod_negative() {
        assert_eq!(cpr_mod(-1, 60), 59);
        assert_eq!(cpr_mod(7, 3), 1);
    }
}
