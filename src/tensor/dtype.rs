//! Element types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Element type of a [`Tensor`](super::Tensor).
///
/// Half-precision types are stored widened to `f32` but every value written
/// into them is rounded to the narrower format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    F32,
    F16,
    BF16,
    /// Signed 8-bit codes
    I8,
    /// Unsigned bytes (packed 4-bit codes, nested 8-bit codes)
    U8,
}

impl DType {
    pub fn is_float(&self) -> bool {
        matches!(self, DType::F32 | DType::F16 | DType::BF16)
    }

    /// Bytes per element as stored on disk
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F16 | DType::BF16 => 2,
            DType::I8 | DType::U8 => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DType::F32 => "f32",
            DType::F16 => "f16",
            DType::BF16 => "bf16",
            DType::I8 => "i8",
            DType::U8 => "u8",
        }
    }

    /// Round a value to this dtype's precision (floats only; identity otherwise)
    pub(crate) fn round(&self, value: f32) -> f32 {
        match self {
            DType::F16 => half::f16::from_f32(value).to_f32(),
            DType::BF16 => half::bf16::from_f32(value).to_f32(),
            _ => value,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_classification() {
        assert!(DType::F32.is_float());
        assert!(DType::BF16.is_float());
        assert!(!DType::I8.is_float());
        assert!(!DType::U8.is_float());
    }

    #[test]
    fn test_half_rounding_loses_precision() {
        let v = 0.1f32 + 1e-6;
        assert_ne!(DType::F16.round(v), v);
        assert_ne!(DType::BF16.round(v), v);
        assert_eq!(DType::F32.round(v), v);
    }

    #[test]
    fn test_dtype_serde() {
        let json = serde_json::to_string(&DType::BF16).unwrap();
        assert_eq!(json, "\"bf16\"");
        let back: DType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, DType::BF16);
    }
}
