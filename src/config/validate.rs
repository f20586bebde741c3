//! Layer specification validation

use super::schema::LayerSpec;
use crate::stats::QuantScheme;
use crate::tensor::DType;

/// Validation error type
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ValidationError {
    #[error("Invalid feature count: in={in_features}, out={out_features} (both must be > 0)")]
    InvalidFeatures {
        in_features: usize,
        out_features: usize,
    },

    #[error("Invalid threshold: {0} (must be finite and >= 0.0)")]
    InvalidThreshold(f32),

    #[error("Invalid block size: {0} (must be even and > 0)")]
    InvalidBlockSize(usize),

    #[error("Invalid compute dtype: {0} (must be floating point)")]
    InvalidComputeDType(DType),

    #[error("Scheme {0} cannot be requested directly (must be one of: int8, fp4, nf4)")]
    InvalidScheme(QuantScheme),

    #[error("Option {option} applies to int8 layers only, not {scheme}")]
    Int8OnlyOption {
        option: &'static str,
        scheme: QuantScheme,
    },

    #[error("Option {0} applies to 4-bit layers only")]
    FourBitOnlyOption(&'static str),
}

/// Validate a layer specification
///
/// Checks:
/// - Feature counts are non-zero
/// - Numeric values are in valid ranges
/// - Options match the requested scheme
pub fn validate_spec(spec: &LayerSpec) -> Result<(), ValidationError> {
    if spec.in_features == 0 || spec.out_features == 0 {
        return Err(ValidationError::InvalidFeatures {
            in_features: spec.in_features,
            out_features: spec.out_features,
        });
    }

    if spec.scheme == QuantScheme::Int8FusedLayout {
        return Err(ValidationError::InvalidScheme(spec.scheme));
    }

    if !spec.threshold.is_finite() || spec.threshold < 0.0 {
        return Err(ValidationError::InvalidThreshold(spec.threshold));
    }

    if spec.scheme.is_int8() {
        if spec.compute_dtype.is_some() {
            return Err(ValidationError::FourBitOnlyOption("compute_dtype"));
        }
        return Ok(());
    }

    if spec.has_full_precision_weights {
        return Err(ValidationError::Int8OnlyOption {
            option: "has_full_precision_weights",
            scheme: spec.scheme,
        });
    }
    if spec.threshold > 0.0 {
        return Err(ValidationError::Int8OnlyOption {
            option: "threshold",
            scheme: spec.scheme,
        });
    }

    if spec.block_size == 0 || spec.block_size % 2 != 0 {
        return Err(ValidationError::InvalidBlockSize(spec.block_size));
    }

    if let Some(dtype) = spec.compute_dtype {
        if !dtype.is_float() {
            return Err(ValidationError::InvalidComputeDType(dtype));
        }
    }

    Ok(())
}
