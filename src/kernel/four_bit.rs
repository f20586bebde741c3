//! Blockwise 4-bit quantization and nested scale compression
//!
//! Weights are flattened and cut into blocks of `block_size` elements, each
//! with its own absmax. Codes are packed two per byte, low nibble first.

use super::codebook::{self, NESTED_LEVELS};
use crate::stats::QuantScheme;

/// Elements covered by one nested absmax
pub const NESTED_BLOCK_SIZE: usize = 256;

/// Packed codes plus per-block absmax
pub struct Blockwise {
    pub packed: Vec<u8>,
    pub absmax: Vec<f32>,
}

/// Quantize `values` in blocks, mapping each element to its nearest level
pub fn quantize_blockwise(values: &[f32], scheme: QuantScheme, block_size: usize) -> Blockwise {
    let block_size = block_size.max(1);
    let mut codes = Vec::with_capacity(values.len());
    let mut absmax = Vec::with_capacity(values.len().div_ceil(block_size));

    for block in values.chunks(block_size) {
        let max = block.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        absmax.push(max);
        codes.extend(block.iter().map(|&v| {
            let normalized = if max > 0.0 { v / max } else { 0.0 };
            codebook::quantize_four_bit(scheme, normalized)
        }));
    }

    Blockwise {
        packed: pack_nibbles(&codes),
        absmax,
    }
}

/// Inverse of [`quantize_blockwise`] given decoded per-block scales
pub fn dequantize_blockwise(
    packed: &[u8],
    len: usize,
    scales: &[f32],
    levels: &[f32],
    block_size: usize,
) -> Vec<f32> {
    let block_size = block_size.max(1);
    (0..len)
        .map(|i| {
            let byte = packed[i / 2];
            let code = if i % 2 == 0 { byte & 0x0F } else { byte >> 4 };
            levels[code as usize] * scales[i / block_size]
        })
        .collect()
}

/// Two codes per byte, low nibble first; an odd tail leaves the high nibble zero
pub fn pack_nibbles(codes: &[u8]) -> Vec<u8> {
    codes
        .chunks(2)
        .map(|pair| {
            let lo = pair[0] & 0x0F;
            let hi = pair.get(1).map_or(0, |c| c & 0x0F);
            lo | (hi << 4)
        })
        .collect()
}

/// Double-quantized absmax vector
pub struct CompressedScales {
    pub codes: Vec<u8>,
    pub offset: f32,
    pub absmax: Vec<f32>,
}

/// Subtract the mean, then 8-bit quantize the scales in blocks of 256
pub fn compress_scales(scales: &[f32]) -> CompressedScales {
    let offset = if scales.is_empty() {
        0.0
    } else {
        scales.iter().sum::<f32>() / scales.len() as f32
    };

    let mut codes = Vec::with_capacity(scales.len());
    let mut absmax = Vec::with_capacity(scales.len().div_ceil(NESTED_BLOCK_SIZE));
    for block in scales.chunks(NESTED_BLOCK_SIZE) {
        let max = block.iter().fold(0.0f32, |m, s| m.max((s - offset).abs()));
        let max = if max > 0.0 { max } else { 1.0 };
        absmax.push(max);
        codes.extend(
            block
                .iter()
                .map(|s| codebook::quantize_nested((s - offset) / max)),
        );
    }

    debug_assert!(codes.iter().all(|&c| usize::from(c) < NESTED_LEVELS));
    CompressedScales {
        codes,
        offset,
        absmax,
    }
}
