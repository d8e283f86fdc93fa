//! Mode S demodulation — magnitude samples to candidate frames.
//!
//! The preamble is made of 0.5 µs impulses at 0, 1.0, 3.5 and 4.5 µs. At
//! 2 Ms/s every magnitude sample covers 0.5 µs, so a preamble starting at
//! offset 0 looks like:
//!
//! ```text
//! 0   -----------------
//! 1   -
//! 2   ------------------
//! 3   --
//! 4   -
//! 5   --
//! 6   -
//! 7   ------------------
//! 8   --
//! 9   -------------------
//! ```
//!
//! Data bits are pulse-position modulated, two samples per bit: a falling
//! pair is a one, a rising pair a zero.

use crate::decode::decode_message;
use crate::icao::IcaoCache;
use crate::stats::Stats;
use crate::types::{message_bits_for_df, ModeSMessage, LONG_MSG_BITS, SHORT_MSG_BITS};

/// Preamble length in microseconds (= symbol times).
pub const PREAMBLE_US: usize = 8;

/// Preamble plus the longest message, in symbol times.
pub const FULL_LEN: usize = PREAMBLE_US + LONG_MSG_BITS; // 120

/// I/Q bytes delivered per source buffer.
pub const DATA_LEN: usize = 16 * 16384;

/// Bytes carried over from the previous window so a frame straddling two
/// fills is still detectable.
pub const WINDOW_CARRY: usize = 4 * (FULL_LEN - 1);

/// Total rolling sample-window length in bytes.
pub const WINDOW_LEN: usize = DATA_LEN + WINDOW_CARRY;

/// Magnitude samples per window (one per I/Q pair).
pub const MAG_LEN: usize = WINDOW_LEN / 2;

/// Minimum average high/low split for a real message, against noise that
/// happens to look like a preamble.
const MIN_BIT_DELTA: i64 = 10 * 255;

/// Sliced bit marker for two equal adjacent samples.
const BIT_ERROR: u8 = 2;

/// Phase drift of the message relative to the sample clock.
///
/// Returns 1 when out of phase to the right, -1 to the left, 0 when
/// reasonably centred. Reads `m[j-1]`, so callers must ensure `j > 0`.
fn detect_out_of_phase(m: &[u16], j: usize) -> i32 {
    if m[j + 3] > m[j + 2] / 3 {
        return 1;
    }
    if m[j + 10] > m[j + 9] / 3 {
        return 1;
    }
    if m[j + 6] > m[j + 7] / 3 {
        return -1;
    }
    if m[j - 1] > m[j + 1] / 3 {
        return -1;
    }
    0
}

/// Nudge the first sample of every bit toward the previous bit's value.
///
/// An out-of-phase message leaks part of each high pulse into the adjacent
/// sample, which blurs runs of identical bits. Amplifying after a one
/// (×5/4) and attenuating after a zero (×4/5) makes similar levels resolve
/// the right way more often. The caller restores the original samples
/// afterwards.
fn apply_phase_correction(m: &mut [u16], j: usize) {
    let data = j + 2 * PREAMBLE_US;
    for i in (0..2 * (LONG_MSG_BITS - 1)).step_by(2) {
        if m[data + i] > m[data + i + 1] {
            // One
            m[data + i + 2] = ((m[data + i + 2] as u32 * 5) / 4) as u16;
        } else {
            // Zero
            m[data + i + 2] = ((m[data + i + 2] as u32 * 4) / 5) as u16;
        }
    }
}

/// Scan a magnitude buffer for Mode S messages.
///
/// Every frame that survives the preamble gate, bit slicing, energy filter
/// and CRC (possibly repaired) is handed to `sink` in sample-time order.
/// Rejected candidates are retried once with phase correction.
///
/// `m` is mutable only for the phase-correction attempt; the touched
/// samples are restored before the function moves on.
pub fn detect_modes(
    m: &mut [u16],
    aggressive: bool,
    cache: &mut IcaoCache,
    stats: &mut Stats,
    now_secs: u64,
    sink: &mut dyn FnMut(ModeSMessage),
) {
    let mlen = m.len();
    if mlen < 2 * FULL_LEN {
        return;
    }

    let mut bits = [0u8; LONG_MSG_BITS];
    let mut msg = [0u8; LONG_MSG_BITS / 8];
    let mut aux = [0u16; 2 * LONG_MSG_BITS];

    let mut j = 0usize;
    let mut use_correction = false;

    while j < mlen - 2 * FULL_LEN {
        if !use_correction {
            // First a relational check of the ten preamble samples. No
            // point investigating further if this fails.
            if !(m[j] > m[j + 1]
                && m[j + 1] < m[j + 2]
                && m[j + 2] > m[j + 3]
                && m[j + 3] < m[j]
                && m[j + 4] < m[j]
                && m[j + 5] < m[j]
                && m[j + 6] < m[j]
                && m[j + 7] > m[j + 8]
                && m[j + 8] < m[j + 9]
                && m[j + 9] > m[j + 6])
            {
                j += 1;
                continue;
            }

            // The samples between the spikes must stay under the average
            // spike level. Samples right next to the spikes are skipped:
            // out-of-phase energy bleeds into them.
            let high = ((m[j] as u32 + m[j + 2] as u32 + m[j + 7] as u32 + m[j + 9] as u32) / 6)
                as u16;
            if m[j + 4] >= high || m[j + 5] >= high {
                j += 1;
                continue;
            }

            // Same for the dead zone between the preamble and the data.
            if m[j + 11] >= high || m[j + 12] >= high || m[j + 13] >= high || m[j + 14] >= high {
                j += 1;
                continue;
            }

            stats.valid_preamble += 1;
        } else {
            // Retry of the previous candidate: save the data samples and
            // apply the phase transform if the message looks shifted.
            let data = j + 2 * PREAMBLE_US;
            aux.copy_from_slice(&m[data..data + 2 * LONG_MSG_BITS]);
            if j > 0 && detect_out_of_phase(m, j) != 0 {
                apply_phase_correction(m, j);
                stats.out_of_phase += 1;
            }
        }

        // Slice all 112 bits regardless of the actual message length; the
        // DF decides how many are real.
        let mut errors = 0u32;
        for i in (0..2 * LONG_MSG_BITS).step_by(2) {
            let low = m[j + i + 2 * PREAMBLE_US] as i32;
            let high = m[j + i + 2 * PREAMBLE_US + 1] as i32;
            let delta = (low - high).abs();

            if i > 0 && delta < 256 {
                // Weak transition: carry the previous bit.
                bits[i / 2] = bits[i / 2 - 1];
            } else if low == high {
                // Two identical adjacent samples are a strong hint this is
                // noise that happened to pass the preamble gate.
                bits[i / 2] = BIT_ERROR;
                if i < 2 * SHORT_MSG_BITS {
                    errors += 1;
                }
            } else if low > high {
                bits[i / 2] = 1;
            } else {
                bits[i / 2] = 0;
            }
        }

        // Restore the samples the phase correction touched.
        if use_correction {
            let data = j + 2 * PREAMBLE_US;
            m[data..data + 2 * LONG_MSG_BITS].copy_from_slice(&aux);
        }

        // Pack bits into bytes. Error-marked bits (value 2) spill into the
        // neighbouring position exactly as the wider arithmetic would; the
        // error counter is what keeps such frames out.
        for i in (0..LONG_MSG_BITS).step_by(8) {
            let mut b = 0u32;
            for k in 0..8 {
                b |= (bits[i + k] as u32) << (7 - k);
            }
            msg[i / 8] = b as u8;
        }

        let df = msg[0] >> 3;
        let msg_len = message_bits_for_df(df) / 8;

        // Last gate: the high and low halves of each bit must differ
        // enough on average to be a real transmission and not noise.
        let mut delta = 0i64;
        for i in (0..8 * 2 * msg_len).step_by(2) {
            delta += (m[j + i + 2 * PREAMBLE_US] as i64 - m[j + i + 2 * PREAMBLE_US + 1] as i64)
                .abs();
        }
        delta /= (4 * msg_len) as i64;

        if delta < MIN_BIT_DELTA {
            use_correction = false;
            j += 1;
            continue;
        }

        let mut good_message = false;

        if errors == 0 || (aggressive && errors <= 2) {
            let mut mm = decode_message(&msg, aggressive, cache, stats, now_secs);

            // Linear normalized signal power over the whole frame.
            let mut signal_power = 0f64;
            for &mag in &m[j..j + FULL_LEN] {
                signal_power += mag as f64 * mag as f64;
            }
            mm.sig_level = signal_power / (65536.0 * mlen as f64);

            if mm.crc_ok || use_correction {
                if errors == 0 {
                    stats.demodulated += 1;
                }
                match mm.error_bit {
                    None => {
                        if mm.crc_ok {
                            stats.good_crc += 1;
                        } else {
                            stats.bad_crc += 1;
                        }
                    }
                    Some(pos) => {
                        stats.bad_crc += 1;
                        stats.fixed += 1;
                        if pos < LONG_MSG_BITS as u32 {
                            stats.single_bit_fix += 1;
                        } else {
                            stats.two_bits_fix += 1;
                        }
                    }
                }
            }

            if mm.crc_ok {
                good_message = true;
                if use_correction {
                    mm.phase_corrected = true;
                }
                // Skip the samples this frame consumed.
                j += 2 * (PREAMBLE_US + 8 * msg_len);
                sink(mm);
            }
        }

        // One phase-corrected retry per candidate.
        if !good_message && !use_correction {
            use_correction = true;
        } else {
            use_correction = false;
            j += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::hex_decode;

    /// Paint one message (preamble + PPM bits) into a magnitude buffer.
    fn paint_frame(m: &mut [u16], at: usize, bytes: &[u8]) {
        const HI: u16 = 6000;
        // Preamble spikes at 0, 2, 7, 9
        for &p in &[0usize, 2, 7, 9] {
            m[at + p] = HI;
        }
        for (i, &byte) in bytes.iter().enumerate() {
            for k in 0..8 {
                let bit = (byte >> (7 - k)) & 1;
                let s = at + 2 * PREAMBLE_US + 2 * (8 * i + k);
                if bit == 1 {
                    m[s] = HI;
                } else {
                    m[s + 1] = HI;
                }
            }
        }
    }

    fn run(m: &mut [u16]) -> (Vec<ModeSMessage>, Stats) {
        let mut cache = IcaoCache::new(1 << 10);
        let mut stats = Stats::new();
        let mut out = Vec::new();
        detect_modes(m, false, &mut cache, &mut stats, 1000, &mut |mm| out.push(mm));
        (out, stats)
    }

    #[test]
    fn test_silence_produces_nothing() {
        // All-127 I/Q maps to all-zero magnitude.
        let mut m = vec![0u16; 2 * DATA_LEN / 2];
        let (frames, stats) = run(&mut m);
        assert!(frames.is_empty());
        assert_eq!(stats.valid_preamble, 0);
    }

    #[test]
    fn test_demodulates_df17_velocity_frame() {
        let bytes = hex_decode("8D4B969699155600E87406F5B69F").unwrap();
        let mut m = vec![0u16; 4096];
        paint_frame(&mut m, 100, &bytes);

        let (frames, stats) = run(&mut m);
        assert_eq!(frames.len(), 1);
        let mm = &frames[0];
        assert_eq!(mm.df, 17);
        assert_eq!(mm.addr(), 0x4B9696);
        assert!(mm.crc_ok);
        assert_eq!(mm.me_type, 19);
        assert_eq!(mm.me_subtype, 1);
        assert!(mm.velocity > 0);
        assert!(!mm.phase_corrected);
        assert!(mm.sig_level > 0.0);
        assert_eq!(stats.valid_preamble, 1);
        assert_eq!(stats.demodulated, 1);
        assert_eq!(stats.good_crc, 1);
    }

    #[test]
    fn test_demodulates_short_frame() {
        // DF11 all-call reply: craft one with a valid CRC.
        let mut bytes = hex_decode("5D4B969600000000000000000000").unwrap();
        let crc = crate::crc::checksum(&bytes, 56);
        bytes[4] = (crc >> 16) as u8;
        bytes[5] = (crc >> 8) as u8;
        bytes[6] = crc as u8;

        let mut m = vec![0u16; 4096];
        paint_frame(&mut m, 64, &bytes[..7]);

        let (frames, _) = run(&mut m);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].df, 11);
        assert_eq!(frames[0].bits, 56);
        assert_eq!(frames[0].addr(), 0x4B9696);
    }

    #[test]
    fn test_two_frames_in_order() {
        let a = hex_decode("8D4B969699155600E87406F5B69F").unwrap();
        let b = hex_decode("8D4840D6202CC371C32CE0576098").unwrap();
        let mut m = vec![0u16; 8192];
        paint_frame(&mut m, 50, &a);
        paint_frame(&mut m, 2000, &b);

        let (frames, _) = run(&mut m);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].addr(), 0x4B9696);
        assert_eq!(frames[1].addr(), 0x4840D6);
    }

    #[test]
    fn test_single_bit_error_is_repaired() {
        let mut bytes = hex_decode("8D4B969699155600E87406F5B69F").unwrap();
        bytes[7] ^= 0x10; // flip one payload bit
        let mut m = vec![0u16; 4096];
        paint_frame(&mut m, 100, &bytes);

        let (frames, stats) = run(&mut m);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].crc_ok);
        assert!(frames[0].error_bit.is_some());
        assert_eq!(stats.single_bit_fix, 1);
        assert_eq!(stats.fixed, 1);
    }

    #[test]
    fn test_buffer_shorter_than_frame() {
        let mut m = vec![1u16; FULL_LEN];
        let (frames, _) = run(&mut m);
        assert!(frames.is_empty());
    }
}
