//! 24-bit Mode S checksum and error correction.
//!
//! The checksum is the XOR of one fixed table entry per set message bit.
//! The last 24 entries are zero so the trailing CRC field never affects the
//! computation; 56-bit messages use the last 56 entries.
//!
//! DF11 and DF17 carry the plain CRC in the trailing 24 bits, which allows
//! single-bit (and, in aggressive mode, two-bit) repair. The other formats
//! XOR the CRC with the interrogated aircraft's address (AP field); those
//! are recovered against the recently-seen address cache instead.

use crate::icao::IcaoCache;
use crate::types::{LONG_MSG_BITS, SHORT_MSG_BITS};

#[rustfmt::skip]
const CHECKSUM_TABLE: [u32; LONG_MSG_BITS] = [
    0x3935EA, 0x1C9AF5, 0xF1B77E, 0x78DBBF, 0xC397DB, 0x9E31E9, 0xB0E2F0, 0x587178,
    0x2C38BC, 0x161C5E, 0x0B0E2F, 0xFA7D13, 0x82C48D, 0xBE9842, 0x5F4C21, 0xD05C14,
    0x682E0A, 0x341705, 0xE5F186, 0x72F8C3, 0xC68665, 0x9CB936, 0x4E5C9B, 0xD8D449,
    0x939020, 0x49C810, 0x24E408, 0x127204, 0x093902, 0x049C81, 0xFDB444, 0x7EDA22,
    0x3F6D11, 0xE04C8C, 0x702646, 0x381323, 0xE3F395, 0x8E03CE, 0x4701E7, 0xDC7AF7,
    0x91C77F, 0xB719BB, 0xA476D9, 0xADC168, 0x56E0B4, 0x2B705A, 0x15B82D, 0xF52612,
    0x7A9309, 0xC2B380, 0x6159C0, 0x30ACE0, 0x185670, 0x0C2B38, 0x06159C, 0x030ACE,
    0x018567, 0xFF38B7, 0x80665F, 0xBFC92B, 0xA01E91, 0xAFF54C, 0x57FAA6, 0x2BFD53,
    0xEA04AD, 0x8AF852, 0x457C29, 0xDD4410, 0x6EA208, 0x375104, 0x1BA882, 0x0DD441,
    0xF91024, 0x7C8812, 0x3E4409, 0xE0D800, 0x706C00, 0x383600, 0x1C1B00, 0x0E0D80,
    0x0706C0, 0x038360, 0x01C1B0, 0x00E0D8, 0x00706C, 0x003836, 0x001C1B, 0xFFF409,
    0x000000, 0x000000, 0x000000, 0x000000, 0x000000, 0x000000, 0x000000, 0x000000,
    0x000000, 0x000000, 0x000000, 0x000000, 0x000000, 0x000000, 0x000000, 0x000000,
    0x000000, 0x000000, 0x000000, 0x000000, 0x000000, 0x000000, 0x000000, 0x000000,
];

/// Compute the 24-bit checksum over the first `bits` bits of `msg`.
pub fn checksum(msg: &[u8], bits: usize) -> u32 {
    let offset = if bits == LONG_MSG_BITS {
        0
    } else {
        LONG_MSG_BITS - SHORT_MSG_BITS
    };

    let mut crc = 0u32;
    for j in 0..bits {
        let byte = j / 8;
        let bitmask = 1u8 << (7 - (j % 8));
        if msg[byte] & bitmask != 0 {
            crc ^= CHECKSUM_TABLE[j + offset];
        }
    }
    crc
}

/// The CRC stored in the trailing 24 bits of the message.
pub fn stored_crc(msg: &[u8], bits: usize) -> u32 {
    let n = bits / 8;
    ((msg[n - 3] as u32) << 16) | ((msg[n - 2] as u32) << 8) | (msg[n - 1] as u32)
}

/// Try to fix a single bit error using the checksum.
///
/// On success the buffer is overwritten with the corrected message and the
/// flipped bit position is returned. Only meaningful for DF11 and DF17;
/// the caller enforces that.
pub fn fix_single_bit(msg: &mut [u8], bits: usize) -> Option<u32> {
    let n = bits / 8;
    let mut aux = [0u8; LONG_MSG_BITS / 8];

    for i in 0..bits {
        aux[..n].copy_from_slice(&msg[..n]);
        aux[i / 8] ^= 1 << (7 - (i % 8));

        if stored_crc(&aux, bits) == checksum(&aux, bits) {
            msg[..n].copy_from_slice(&aux[..n]);
            return Some(i as u32);
        }
    }
    None
}

/// Try every two-bit combination; aggressive mode, DF17 only.
///
/// The result packs both positions as `j | (i << 8)` with `i > j`, so the
/// high byte is always non-zero and the caller can tell a two-bit fix from
/// a single-bit one.
pub fn fix_two_bits(msg: &mut [u8], bits: usize) -> Option<u32> {
    let n = bits / 8;
    let mut aux = [0u8; LONG_MSG_BITS / 8];

    for j in 0..bits {
        for i in (j + 1)..bits {
            aux[..n].copy_from_slice(&msg[..n]);
            aux[j / 8] ^= 1 << (7 - (j % 8));
            aux[i / 8] ^= 1 << (7 - (i % 8));

            if stored_crc(&aux, bits) == checksum(&aux, bits) {
                msg[..n].copy_from_slice(&aux[..n]);
                return Some((j as u32) | ((i as u32) << 8));
            }
        }
    }
    None
}

/// Recover the ICAO address from an Address/Parity field.
///
/// For the DF set that XORs the CRC with the interrogated address, XOR the
/// computed CRC back into the trailing bytes: `(addr ^ crc) ^ crc = addr`.
/// The message is accepted only when the recovered address was recently
/// seen in a frame with a plain, verified checksum.
pub fn brute_force_ap(
    msg: &[u8],
    df: u8,
    bits: usize,
    cache: &IcaoCache,
    now_secs: u64,
) -> Option<[u8; 3]> {
    if !matches!(df, 0 | 4 | 5 | 16 | 20 | 21 | 24) {
        return None;
    }

    let last = bits / 8 - 1;
    let crc = checksum(msg, bits);
    let aa = [
        msg[last - 2] ^ ((crc >> 16) & 0xFF) as u8,
        msg[last - 1] ^ ((crc >> 8) & 0xFF) as u8,
        msg[last] ^ (crc & 0xFF) as u8,
    ];

    let addr = crate::types::icao_addr(&aa);
    if cache.recently_seen(addr, now_secs) {
        Some(aa)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::hex_decode;

    const VALID_FRAMES: &[&str] = &[
        "8D4B969699155600E87406F5B69F",
        "8D4840D6202CC371C32CE0576098",
        "8D40621D58C382D690C8AC2863A7",
        "8D485020994409940838175B284F",
    ];

    #[test]
    fn test_checksum_matches_stored_for_valid_frames() {
        for hex in VALID_FRAMES {
            let msg = hex_decode(hex).unwrap();
            assert_eq!(
                checksum(&msg, 112),
                stored_crc(&msg, 112),
                "CRC mismatch for {hex}"
            );
        }
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let mut msg = hex_decode(VALID_FRAMES[0]).unwrap();
        msg[5] ^= 0x01;
        assert_ne!(checksum(&msg, 112), stored_crc(&msg, 112));
    }

    #[test]
    fn test_fix_single_bit_roundtrip_every_position() {
        // Flipping bit i of a valid frame must always be repaired at exactly i.
        let original = hex_decode(VALID_FRAMES[0]).unwrap();
        for i in 0..112usize {
            let mut msg = original.clone();
            msg[i / 8] ^= 1 << (7 - (i % 8));
            let fixed = fix_single_bit(&mut msg, 112);
            assert_eq!(fixed, Some(i as u32), "wrong position for flipped bit {i}");
            assert_eq!(msg, original, "buffer not restored for bit {i}");
        }
    }

    #[test]
    fn test_fix_single_bit_fails_on_two_errors() {
        let mut msg = hex_decode(VALID_FRAMES[1]).unwrap();
        msg[3] ^= 0x10;
        msg[9] ^= 0x01;
        assert_eq!(fix_single_bit(&mut msg, 112), None);
    }

    #[test]
    fn test_fix_two_bits() {
        let original = hex_decode(VALID_FRAMES[1]).unwrap();
        let mut msg = original.clone();
        msg[3] ^= 0x10; // bit 27
        msg[9] ^= 0x01; // bit 79
        let fixed = fix_two_bits(&mut msg, 112).expect("two-bit fix");
        assert_eq!(fixed & 0xFF, 27);
        assert_eq!(fixed >> 8, 79);
        assert_eq!(msg, original);
    }

    #[test]
    fn test_brute_force_ap_requires_cache_hit() {
        // DF4 altitude reply for a known address: craft one by XORing the
        // CRC of a zero payload with the address.
        let addr = 0x4B9696u32;
        let mut msg = [0u8; 7];
        msg[0] = 4 << 3; // DF4
        let crc = checksum(&msg, 56);
        let field = crc ^ addr;
        msg[4] = (field >> 16) as u8;
        msg[5] = (field >> 8) as u8;
        msg[6] = field as u8;

        let mut cache = IcaoCache::new(1 << 10);
        assert!(brute_force_ap(&msg, 4, 56, &cache, 100).is_none());

        cache.add(addr, 100);
        let aa = brute_force_ap(&msg, 4, 56, &cache, 100).expect("recover");
        assert_eq!(crate::types::icao_addr(&aa), addr);
    }

    #[test]
    fn test_brute_force_ap_wrong_df() {
        let msg = [0u8; 14];
        let cache = IcaoCache::new(1 << 10);
        assert!(brute_force_ap(&msg, 17, 112, &cache, 0).is_none());
        assert!(brute_force_ap(&msg, 11, 56, &cache, 0).is_none());
    }
}
