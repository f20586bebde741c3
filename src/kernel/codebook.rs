//! Code tables for the 4-bit schemes and the nested scale quantizer

use crate::stats::QuantScheme;
use crate::{Error, Result};

/// NormalFloat4 levels: quantiles of N(0, 1) rescaled to [-1, 1]
pub const NF4_LEVELS: [f32; 16] = [
    -1.0,
    -0.696_192_8,
    -0.525_073_05,
    -0.394_917_5,
    -0.284_441_38,
    -0.184_773_43,
    -0.091_050_036,
    0.0,
    0.079_580_3,
    0.160_930_2,
    0.246_112_3,
    0.337_915_24,
    0.440_709_83,
    0.562_617,
    0.722_956_84,
    1.0,
];

/// E2M1 magnitudes {0, 0.5, 1, 1.5, 2, 3, 4, 6} divided by 6
const FP4_MAGNITUDES: [f32; 8] = [
    0.0,
    1.0 / 12.0,
    1.0 / 6.0,
    0.25,
    1.0 / 3.0,
    0.5,
    2.0 / 3.0,
    1.0,
];

/// Bit 3 of an FP4 code carries the sign
const FP4_SIGN_BIT: u8 = 0b1000;

/// Levels of the 8-bit code used for nested scales
pub const NESTED_LEVELS: usize = 255;

/// Table mapping each 4-bit code to its normalized value
pub fn four_bit_levels(scheme: QuantScheme) -> Result<[f32; 16]> {
    match scheme {
        QuantScheme::Nf4 => Ok(NF4_LEVELS),
        QuantScheme::Fp4 => {
            let mut levels = [0.0f32; 16];
            for (code, level) in levels.iter_mut().enumerate() {
                let magnitude = FP4_MAGNITUDES[code & 0b0111];
                *level = if code as u8 & FP4_SIGN_BIT != 0 {
                    -magnitude
                } else {
                    magnitude
                };
            }
            Ok(levels)
        }
        other => Err(Error::UnsupportedScheme(format!(
            "{other} has no 4-bit codebook"
        ))),
    }
}

/// Nearest 4-bit code for a value already normalized to [-1, 1]
pub fn quantize_four_bit(scheme: QuantScheme, normalized: f32) -> u8 {
    match scheme {
        QuantScheme::Fp4 => {
            let magnitude = nearest(&FP4_MAGNITUDES, normalized.abs());
            if normalized < 0.0 && magnitude != 0 {
                magnitude | FP4_SIGN_BIT
            } else {
                magnitude
            }
        }
        _ => nearest(&NF4_LEVELS, normalized),
    }
}

fn nearest(levels: &[f32], value: f32) -> u8 {
    let mut best_idx = 0;
    let mut best_dist = f32::MAX;
    for (idx, &level) in levels.iter().enumerate() {
        let dist = (value - level).abs();
        if dist < best_dist {
            best_dist = dist;
            best_idx = idx;
        }
    }
    best_idx as u8
}

/// Symmetric 255-level code `(i - 127) / 127` used for nested scales
pub fn nested_levels() -> Vec<f32> {
    (0..NESTED_LEVELS)
        .map(|i| (i as f32 - 127.0) / 127.0)
        .collect()
}

/// Nested code for a value normalized to [-1, 1]
pub fn quantize_nested(normalized: f32) -> u8 {
    ((normalized * 127.0).round().clamp(-127.0, 127.0) + 127.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nf4_levels_sorted_and_bounded() {
        assert!(NF4_LEVELS.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(NF4_LEVELS[0], -1.0);
        assert_eq!(NF4_LEVELS[15], 1.0);
        assert_eq!(NF4_LEVELS[7], 0.0);
    }

    #[test]
    fn test_fp4_sign_bit() {
        let levels = four_bit_levels(QuantScheme::Fp4).unwrap();
        assert_eq!(levels[7], 1.0);
        assert_eq!(levels[15], -1.0);
        assert_eq!(levels[5], 0.5);
        assert_eq!(levels[13], -0.5);
    }

    #[test]
    fn test_quantize_four_bit_hits_exact_levels() {
        for scheme in [QuantScheme::Nf4, QuantScheme::Fp4] {
            let levels = four_bit_levels(scheme).unwrap();
            for (code, &level) in levels.iter().enumerate() {
                let q = quantize_four_bit(scheme, level);
                assert_eq!(levels[q as usize], level, "{scheme} code {code}");
            }
        }
    }

    #[test]
    fn test_fp4_negative_zero_maps_to_zero() {
        assert_eq!(quantize_four_bit(QuantScheme::Fp4, -0.01), 0);
    }

    #[test]
    fn test_int8_has_no_four_bit_codebook() {
        assert!(matches!(
            four_bit_levels(QuantScheme::Int8RowMajor),
            Err(Error::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_nested_code_round_trip() {
        let levels = nested_levels();
        assert_eq!(levels.len(), NESTED_LEVELS);
        for v in [-1.0f32, -0.5, 0.0, 0.25, 1.0] {
            let code = quantize_nested(v);
            assert!((levels[code as usize] - v).abs() <= 0.5 / 127.0 + 1e-6);
        }
    }
}
