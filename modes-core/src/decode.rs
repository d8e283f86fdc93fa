//! Decode a raw Mode S frame into a `ModeSMessage`.
//!
//! Handles the Downlink Formats this receiver understands:
//! - DF0/4/16/20: 13-bit AC altitude replies
//! - DF5/21:      identity (squawk) replies
//! - DF11:        all-call reply (ICAO address acquisition)
//! - DF17:        ADS-B extended squitter (identification, airborne
//!                position, airborne velocity)
//!
//! CRC verification and repair happen here, before any field extraction,
//! so the fields are always read from the corrected bytes.

use crate::crc;
use crate::icao::IcaoCache;
use crate::stats::Stats;
use crate::types::{
    message_bits_for_df, ModeSMessage, Unit, AIS_CHARSET, LONG_MSG_BYTES,
};

// ---------------------------------------------------------------------------
// Altitude fields
// ---------------------------------------------------------------------------

/// Decode the 13-bit AC altitude field (DF0/4/16/20).
///
/// M=0, Q=1 is the 25 ft mode; N is the 11-bit integer left after removing
/// the M and Q bits. M=0, Q=0 (100 ft Gillham) and M=1 (metric) are
/// reserved and decode to 0.
pub fn decode_ac13_field(msg: &[u8]) -> (i32, Unit) {
    let m_bit = msg[3] & (1 << 6) != 0;
    let q_bit = msg[3] & (1 << 4) != 0;

    if m_bit {
        return (0, Unit::Meters);
    }
    if !q_bit {
        return (0, Unit::Feet);
    }

    let n = (((msg[2] & 31) as i32) << 6)
        | (((msg[3] & 0x80) as i32) >> 2)
        | (((msg[3] & 0x20) as i32) >> 1)
        | ((msg[3] & 15) as i32);

    ((25 * n - 1000).max(0), Unit::Feet)
}

/// Decode the 12-bit AC altitude field (DF17 airborne position).
pub fn decode_ac12_field(msg: &[u8]) -> (i32, Unit) {
    let q_bit = msg[5] & 1 != 0;
    if !q_bit {
        return (0, Unit::Feet);
    }

    let n = (((msg[5] >> 1) as i32) << 4) | (((msg[6] & 0xF0) as i32) >> 4);
    ((25 * n - 1000).max(0), Unit::Feet)
}

/// Decode the interleaved 13-bit identity field into the squawk code.
///
/// Bit order is C1-A1-C2-A2-C4-A4-ZERO-B1-D1-B2-D2-B4-D4; each group of
/// three is one octal digit. The result is the base-10 number whose digits
/// are the four octal values (squawk 7500 comes back as 7500).
fn decode_identity(msg: &[u8]) -> u32 {
    let a = (((msg[3] & 0x80) as u32) >> 5) | ((msg[2] & 0x02) as u32) | (((msg[2] & 0x08) as u32) >> 3);
    let b = (((msg[3] & 0x02) as u32) << 1) | (((msg[3] & 0x08) as u32) >> 2) | (((msg[3] & 0x20) as u32) >> 5);
    let c = (((msg[2] & 0x01) as u32) << 2) | (((msg[2] & 0x04) as u32) >> 1) | (((msg[2] & 0x10) as u32) >> 4);
    let d = (((msg[3] & 0x01) as u32) << 2) | (((msg[3] & 0x04) as u32) >> 1) | (((msg[3] & 0x10) as u32) >> 4);
    a * 1000 + b * 100 + c * 10 + d
}

// ---------------------------------------------------------------------------
// Main decoder
// ---------------------------------------------------------------------------

/// Decode a raw frame as demodulated by `detect_modes` or read from the
/// raw network input.
///
/// `raw` holds at least the message bytes for its DF (14 bytes is always
/// safe). `now_secs` feeds the recently-seen address cache used both for
/// acquisition (DF11/17) and Address/Parity recovery (the other formats).
pub fn decode_message(
    raw: &[u8],
    aggressive: bool,
    cache: &mut IcaoCache,
    stats: &mut Stats,
    now_secs: u64,
) -> ModeSMessage {
    let mut mm = ModeSMessage::default();
    let n = raw.len().min(LONG_MSG_BYTES);
    mm.msg[..n].copy_from_slice(&raw[..n]);

    mm.df = mm.msg[0] >> 3;
    mm.bits = message_bits_for_df(mm.df);

    mm.crc = crc::stored_crc(&mm.msg, mm.bits);
    mm.crc_ok = mm.crc == crc::checksum(&mm.msg, mm.bits);
    mm.error_bit = None;

    // Bit repair using the checksum, DF11 and DF17 only.
    if !mm.crc_ok && (mm.df == 11 || mm.df == 17) {
        mm.error_bit = crc::fix_single_bit(&mut mm.msg, mm.bits);
        if mm.error_bit.is_none() && aggressive && mm.df == 17 {
            mm.error_bit = crc::fix_two_bits(&mut mm.msg, mm.bits);
        }
        if mm.error_bit.is_some() {
            mm.crc = crc::stored_crc(&mm.msg, mm.bits);
            mm.crc_ok = true;
        }
    }

    // The fields below are read after any repair, from the fixed bytes.
    let msg = mm.msg;

    mm.ca = msg[0] & 7;
    mm.aa = [msg[1], msg[2], msg[3]];
    mm.me_type = msg[4] >> 3;
    mm.me_subtype = msg[4] & 7;
    mm.flight_status = msg[0] & 7;
    mm.dr_status = (msg[1] >> 3) & 31;
    mm.um_status = ((msg[1] & 7) << 3) | (msg[2] >> 5);
    mm.identity = decode_identity(&msg);

    if mm.df != 11 && mm.df != 17 {
        // The trailing field is CRC XOR address; recover the address and
        // accept only when it was recently seen in a verified frame.
        match crc::brute_force_ap(&msg, mm.df, mm.bits, cache, now_secs) {
            Some(aa) => {
                mm.aa = aa;
                mm.crc_ok = true;
            }
            None => mm.crc_ok = false,
        }
    } else if mm.crc_ok && mm.error_bit.is_none() {
        // Verified plain-CRC frame: whitelist the announced address.
        cache.add(mm.addr(), now_secs);
    }

    if matches!(mm.df, 0 | 4 | 16 | 20) {
        (mm.altitude, mm.unit) = decode_ac13_field(&msg);
    }

    if mm.df == 17 {
        decode_extended_squitter(&mut mm, &msg, stats);
    }

    mm
}

fn decode_extended_squitter(mm: &mut ModeSMessage, msg: &[u8], stats: &mut Stats) {
    match (mm.me_type, mm.me_subtype) {
        (1..=4, _) => {
            // Aircraft identification and category
            mm.aircraft_type = mm.me_type - 1;
            let mut flight = String::with_capacity(8);
            flight.push(AIS_CHARSET[(msg[5] >> 2) as usize] as char);
            flight.push(AIS_CHARSET[(((msg[5] & 3) << 4) | (msg[6] >> 4)) as usize] as char);
            flight.push(AIS_CHARSET[(((msg[6] & 15) << 2) | (msg[7] >> 6)) as usize] as char);
            flight.push(AIS_CHARSET[(msg[7] & 63) as usize] as char);
            flight.push(AIS_CHARSET[(msg[8] >> 2) as usize] as char);
            flight.push(AIS_CHARSET[(((msg[8] & 3) << 4) | (msg[9] >> 4)) as usize] as char);
            flight.push(AIS_CHARSET[(((msg[9] & 15) << 2) | (msg[10] >> 6)) as usize] as char);
            flight.push(AIS_CHARSET[(msg[10] & 63) as usize] as char);
            mm.flight = flight;
        }
        (9..=18, _) => {
            // Airborne position, barometric altitude
            mm.odd_flag = msg[6] & (1 << 2) != 0;
            mm.utc_flag = msg[6] & (1 << 3) != 0;
            (mm.altitude, mm.unit) = decode_ac12_field(msg);
            mm.raw_latitude =
                (((msg[6] & 3) as i32) << 15) | ((msg[7] as i32) << 7) | ((msg[8] as i32) >> 1);
            mm.raw_longitude =
                (((msg[8] & 1) as i32) << 16) | ((msg[9] as i32) << 8) | (msg[10] as i32);
        }
        (19, 1..=2) => {
            // Airborne velocity, cartesian components
            mm.ew_dir = (msg[5] & 4) >> 2;
            mm.ew_velocity = (((msg[5] & 3) as i32) << 8) | (msg[6] as i32);
            mm.ns_dir = (msg[7] & 0x80) >> 7;
            mm.ns_velocity = (((msg[7] & 0x7F) as i32) << 3) | (((msg[8] & 0xE0) as i32) >> 5);
            mm.vert_rate_source = (msg[8] & 0x10) >> 4;
            mm.vert_rate_sign = (msg[8] & 0x08) >> 3;
            mm.vert_rate = (((msg[8] & 7) as i32) << 6) | (((msg[9] & 0xFC) as i32) >> 2);

            mm.velocity = (mm.ns_velocity as f64).hypot(mm.ew_velocity as f64) as u32;

            if mm.velocity != 0 {
                let mut ew = mm.ew_velocity as f64;
                if mm.ew_dir != 0 {
                    ew = -ew;
                }
                let mut ns = mm.ns_velocity as f64;
                if mm.ns_dir != 0 {
                    ns = -ns;
                }
                let mut heading = ew.atan2(ns).to_degrees() as i32;
                if heading < 0 {
                    heading += 360;
                }
                mm.heading = heading;
                mm.heading_is_valid = true;
            }
        }
        (19, 3..=4) => {
            // Airborne velocity, airspeed and heading
            mm.heading_is_valid = msg[5] & (1 << 2) != 0;
            mm.heading =
                (360.0 / 128.0 * ((((msg[5] & 3) as i32) << 5) | ((msg[6] >> 3) as i32)) as f64)
                    as i32;
        }
        (23, _) | (28, _) => {
            // Test message / aircraft status: the squawk is already in
            // `identity`; nothing further to extract.
        }
        (t, s) => {
            if mm.crc_ok {
                stats.add_unrecognized_me(t, s);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Description tables (display layer)
// ---------------------------------------------------------------------------

/// Responder capability descriptions, indexed by the CA field.
pub const CAPABILITY_STR: [&str; 8] = [
    "Level 1 (Surveillance Only)",
    "Level 2 (DF0,4,5,11)",
    "Level 3 (DF0,4,5,11,20,21)",
    "Level 4 (DF0,4,5,11,20,21,24)",
    "Level 2+3+4 (DF0,4,5,11,20,21,24,code7 - is on ground)",
    "Level 2+3+4 (DF0,4,5,11,20,21,24,code7 - is airborne)",
    "Level 2+3+4 (DF0,4,5,11,20,21,24,code7)",
    "Level 7 ???",
];

/// Flight status descriptions for DF4/5/20/21.
pub const FLIGHT_STATUS_STR: [&str; 8] = [
    "Normal, Airborne",
    "Normal, On the ground",
    "ALERT,  Airborne",
    "ALERT,  On the ground",
    "ALERT & Special Position Identification. Airborne or Ground",
    "Special Position Identification. Airborne or Ground",
    "Value 6 is not assigned",
    "Value 7 is not assigned",
];

/// Emergency state descriptions for ME 28/1.
pub const EMERGENCY_STATE_STR: [&str; 8] = [
    "No emergency",
    "General emergency (Squawk 7700)",
    "Lifeguard/Medical",
    "Minimum fuel",
    "No communications (Squawk 7600)",
    "Unlawful interference (Squawk 7500)",
    "Reserved",
    "Reserved",
];

/// Human-readable description of an extended-squitter message type.
pub fn me_description(me_type: u8, me_subtype: u8) -> String {
    match (me_type, me_subtype) {
        (1..=4, _) => "Aircraft Identification and Category".into(),
        (5..=8, _) => "Surface Position".into(),
        (9..=18, _) => "Airborne Position (Baro Altitude)".into(),
        (19, 1..=4) => "Airborne Velocity".into(),
        (20..=22, _) => "Airborne Position (GNSS Height)".into(),
        (23, 0) => "Test Message".into(),
        (23, 7) => "Test Message -- Squawk".into(),
        (24, 1) => "Surface System Status".into(),
        (28, 1) => "Extended Squitter Aircraft Status (Emergency)".into(),
        (28, 2) => "Extended Squitter Aircraft Status (1090ES TCAS RA)".into(),
        (29, 0..=1) => "Target State and Status Message".into(),
        (31, 0..=1) => "Aircraft Operational Status Message".into(),
        (t, s) => format!("Unknown: {t}/{s}"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
