//! Shared types, error enum, and the decoded Mode S message structure.

use serde::Serialize;
use thiserror::Error;

/// All errors produced by modes-core.
#[derive(Debug, Error)]
pub enum ModesError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),
    #[error("invalid home position: {0}")]
    InvalidHomePos(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ModesError>;

// ---------------------------------------------------------------------------
// Message length and format constants
// ---------------------------------------------------------------------------

pub const SHORT_MSG_BITS: usize = 56;
pub const LONG_MSG_BITS: usize = 112;
pub const SHORT_MSG_BYTES: usize = SHORT_MSG_BITS / 8;
pub const LONG_MSG_BYTES: usize = LONG_MSG_BITS / 8;

/// Message length in bits, selected by the Downlink Format.
pub fn message_bits_for_df(df: u8) -> usize {
    match df {
        16 | 17 | 19 | 20 | 21 => LONG_MSG_BITS,
        _ => SHORT_MSG_BITS,
    }
}

/// Human-readable Downlink Format names, for display output.
pub fn df_name(df: u8) -> &'static str {
    match df {
        0 => "Short air-air surveillance",
        4 => "Surveillance, altitude reply",
        5 => "Surveillance, identity reply",
        11 => "All call reply",
        16 => "Long air-air surveillance",
        17 => "ADS-B extended squitter",
        20 => "Comm-B, altitude reply",
        21 => "Comm-B, identity reply",
        24 => "Comm-D extended length message",
        _ => "Unknown",
    }
}

/// Altitude unit selected by the M bit of the AC field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Unit {
    #[default]
    Feet,
    Meters,
}

// ---------------------------------------------------------------------------
// ICAO address helpers
// ---------------------------------------------------------------------------

/// Pack the three AA bytes into a 24-bit address.
pub fn icao_addr(aa: &[u8; 3]) -> u32 {
    ((aa[0] as u32) << 16) | ((aa[1] as u32) << 8) | (aa[2] as u32)
}

/// Format a 24-bit address as 6-char uppercase hex.
pub fn icao_to_string(addr: u32) -> String {
    format!("{addr:06X}")
}

// ---------------------------------------------------------------------------
// Hex utilities
// ---------------------------------------------------------------------------

const HEX_CHARS: &[u8; 16] = b"0123456789ABCDEF";

/// Encode bytes as uppercase hex string.
pub fn hex_encode(data: &[u8]) -> String {
    let mut s = String::with_capacity(data.len() * 2);
    for &b in data {
        s.push(HEX_CHARS[(b >> 4) as usize] as char);
        s.push(HEX_CHARS[(b & 0x0F) as usize] as char);
    }
    s
}

/// Decode a hex string into bytes. Case-insensitive, must be even length.
pub fn hex_decode(hex: &str) -> Option<Vec<u8>> {
    let hex = hex.trim();
    if hex.len() % 2 != 0 {
        return None;
    }
    let mut bytes = Vec::with_capacity(hex.len() / 2);
    for chunk in hex.as_bytes().chunks(2) {
        let high = hex_digit(chunk[0])?;
        let low = hex_digit(chunk[1])?;
        bytes.push((high << 4) | low);
    }
    Some(bytes)
}

fn hex_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// AIS character set
// ---------------------------------------------------------------------------

/// 6-bit flight-id character set for the DF17 identification message.
pub const AIS_CHARSET: &[u8; 64] =
    b"?ABCDEFGHIJKLMNOPQRSTUVWXYZ????? ???????????????0123456789??????";

// ---------------------------------------------------------------------------
// Decoded message
// ---------------------------------------------------------------------------

/// A decoded Mode S downlink frame.
///
/// Fields beyond `df`/`aa`/`crc_ok` are only meaningful for the Downlink
/// Formats that carry them; the decoder zeroes everything else.
#[derive(Debug, Clone, Default)]
pub struct ModeSMessage {
    /// Binary message, up to 112 bits.
    pub msg: [u8; LONG_MSG_BYTES],
    /// Downlink Format (first 5 bits).
    pub df: u8,
    /// Number of bits in the message (56 or 112).
    pub bits: usize,
    /// CRC stored in the trailing 24 bits (after any repair).
    pub crc: u32,
    /// True if the CRC verified, possibly after repair or AP recovery.
    pub crc_ok: bool,
    /// Bit position fixed by error correction, or `None`.
    /// Two-bit fixes encode both positions as `j | (i << 8)`.
    pub error_bit: Option<u32>,
    /// ICAO Aircraft Address bytes.
    pub aa: [u8; 3],
    /// Responder capabilities.
    pub ca: u8,

    // DF4, DF5, DF20, DF21
    pub flight_status: u8,
    pub dr_status: u8,
    pub um_status: u8,
    /// Squawk code; four octal digits rendered base-10.
    pub identity: u32,

    // DF17 extended squitter
    pub me_type: u8,
    pub me_subtype: u8,
    /// Aircraft identification: 8-char flight id, trailing spaces kept.
    pub flight: String,
    /// Emitter category derived from the identification ME type.
    pub aircraft_type: u8,

    // Airborne position (ME 9..18)
    pub raw_latitude: i32,
    pub raw_longitude: i32,
    pub odd_flag: bool,
    pub utc_flag: bool,
    pub altitude: i32,
    pub unit: Unit,

    // Airborne velocity (ME 19)
    pub ew_dir: u8,
    pub ew_velocity: i32,
    pub ns_dir: u8,
    pub ns_velocity: i32,
    pub vert_rate_source: u8,
    pub vert_rate_sign: u8,
    pub vert_rate: i32,
    pub heading: i32,
    pub heading_is_valid: bool,
    /// Ground speed in knots, from the E/W and N/S components.
    pub velocity: u32,

    /// Linear normalized signal power for the frame.
    pub sig_level: f64,
    /// True when the frame only decoded after phase correction.
    pub phase_corrected: bool,
}

impl ModeSMessage {
    /// 24-bit ICAO address as an integer.
    pub fn addr(&self) -> u32 {
        icao_addr(&self.aa)
    }

    /// Message bytes actually used by this frame (7 or 14).
    pub fn payload(&self) -> &[u8] {
        &self.msg[..self.bits / 8]
    }

    /// The raw network line form: `*HEX;\n`.
    pub fn raw_line(&self) -> String {
        format!("*{};\n", hex_encode(self.payload()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_bits_for_df() {
        assert_eq!(message_bits_for_df(17), 112);
        assert_eq!(message_bits_for_df(16), 112);
        assert_eq!(message_bits_for_df(20), 112);
        assert_eq!(message_bits_for_df(11), 56);
        assert_eq!(message_bits_for_df(0), 56);
        assert_eq!(message_bits_for_df(5), 56);
    }

    #[test]
    fn test_icao_addr_roundtrip() {
        let aa = [0x4B, 0x96, 0x96];
        assert_eq!(icao_addr(&aa), 0x4B9696);
        assert_eq!(icao_to_string(0x4B9696), "4B9696");
    }

    #[test]
    fn test_icao_to_string_pads() {
        assert_eq!(icao_to_string(0xABC), "000ABC");
    }

    #[test]
    fn test_hex_roundtrip() {
        let bytes = hex_decode("8d4b969699155600e87406f5b69f").unwrap();
        assert_eq!(bytes.len(), 14);
        assert_eq!(hex_encode(&bytes), "8D4B969699155600E87406F5B69F");
    }

    #[test]
    fn test_hex_decode_rejects() {
        assert!(hex_decode("abc").is_none()); // odd length
        assert!(hex_decode("zz").is_none()); // invalid chars
    }

    #[test]
    fn test_raw_line_short() {
        let mut mm = ModeSMessage::default();
        mm.bits = 56;
        mm.msg[..7].copy_from_slice(&[0x5D, 0x4B, 0x96, 0x96, 0x00, 0x00, 0x00]);
        assert_eq!(mm.raw_line(), "*5D4B9696000000;\n");
    }

    #[test]
    fn test_df_name() {
        assert_eq!(df_name(17), "ADS-B extended squitter");
        assert_eq!(df_name(3), "Unknown");
    }
}
