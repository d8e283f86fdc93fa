//! I/Q sample to magnitude conversion.
//!
//! The receiver delivers interleaved unsigned 8-bit I/Q pairs centred on
//! 127. Magnitude is `sqrt(I² + Q²)` scaled by 360 so that every distinct
//! (I, Q) pair maps to a distinct `u16`; the decoder folds the negative
//! half-axes before indexing, so a 129×129 quarter-plane table suffices.

use std::sync::LazyLock;

/// One side of the quarter-plane table: |I - 127| and |Q - 127| are in 0..=128.
pub const LUT_DIM: usize = 129;

/// Scale factor applied to `sqrt(I² + Q²)`.
const LUT_SCALE: f64 = 360.0;

/// Precomputed magnitude for all folded (I, Q) combinations.
/// `MAG_LUT[129 * I + Q] = round(360 * sqrt(I² + Q²))`
static MAG_LUT: LazyLock<Vec<u16>> = LazyLock::new(build_magnitude_lut);

/// Build the magnitude table from the closed formula.
pub fn build_magnitude_lut() -> Vec<u16> {
    let mut lut = vec![0u16; LUT_DIM * LUT_DIM];
    for i in 0..LUT_DIM {
        for q in 0..LUT_DIM {
            let mag = LUT_SCALE * ((i * i + q * q) as f64).sqrt();
            lut[LUT_DIM * i + q] = mag.round() as u16;
        }
    }
    lut
}

/// Compute the magnitude vector for a window of interleaved I/Q bytes.
///
/// `out` must hold `iq.len() / 2` entries.
pub fn compute_magnitude_vector(iq: &[u8], out: &mut [u16]) {
    let lut = &*MAG_LUT;
    debug_assert!(out.len() >= iq.len() / 2);

    for (k, pair) in iq.chunks_exact(2).enumerate() {
        let i = (pair[0] as i32 - 127).unsigned_abs() as usize;
        let q = (pair[1] as i32 - 127).unsigned_abs() as usize;
        out[k] = lut[LUT_DIM * i + q];
    }
}

/// Verify the cached table against a freshly computed one.
///
/// Cheap startup self-test; the two construction paths must agree byte for
/// byte.
pub fn self_test() -> bool {
    *MAG_LUT == build_magnitude_lut()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lut_matches_formula_everywhere() {
        let lut = build_magnitude_lut();
        for i in 0..=128usize {
            for q in 0..=128usize {
                let expected = (360.0 * ((i * i + q * q) as f64).sqrt()).round() as u16;
                assert_eq!(lut[LUT_DIM * i + q], expected, "mismatch at I={i} Q={q}");
            }
        }
    }

    #[test]
    fn test_lut_corners() {
        let lut = build_magnitude_lut();
        assert_eq!(lut[0], 0);
        // I=128, Q=0: 360 * 128 = 46080
        assert_eq!(lut[LUT_DIM * 128], 46080);
        // I=Q=128: round(360 * 128 * sqrt(2)) = 65167, still inside u16
        assert_eq!(lut[LUT_DIM * 128 + 128], 65167);
    }

    #[test]
    fn test_self_test() {
        assert!(self_test());
    }

    #[test]
    fn test_silence_maps_to_zero() {
        // 127/127 is the DC centre; folded to (0, 0)
        let iq = [127u8, 127, 127, 127];
        let mut out = [0xFFFFu16; 2];
        compute_magnitude_vector(&iq, &mut out);
        assert_eq!(out, [0, 0]);
    }

    #[test]
    fn test_negative_half_axes_fold() {
        // 127 + d and 127 - d must give the same magnitude
        let iq = [127 + 50, 127, 127 - 50, 127];
        let mut out = [0u16; 2];
        compute_magnitude_vector(&iq, &mut out);
        assert_eq!(out[0], out[1]);
        assert_eq!(out[0], 360 * 50);
    }

    #[test]
    fn test_byte_255_folds_to_128() {
        let iq = [255u8, 127];
        let mut out = [0u16; 1];
        compute_magnitude_vector(&iq, &mut out);
        assert_eq!(out[0], 46080);
    }
}
