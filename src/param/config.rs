//! Per-parameter quantization settings

use serde::{Deserialize, Serialize};

use crate::stats::QuantScheme;
use crate::{Error, Result};

/// Default 4-bit block size
pub const DEFAULT_BLOCK_SIZE: usize = 64;

/// How a parameter is encoded once it is quantized
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantConfig {
    pub scheme: QuantScheme,
    /// Elements per absmax block (4-bit schemes)
    pub block_size: usize,
    /// Double-quantize the 4-bit absmax vector
    pub compress_statistics: bool,
    /// Keep the weight in full precision and quantize on the fly
    pub has_full_precision_weights: bool,
}

impl QuantConfig {
    /// Row-wise int8
    pub fn int8(has_full_precision_weights: bool) -> Self {
        Self {
            scheme: QuantScheme::Int8RowMajor,
            block_size: DEFAULT_BLOCK_SIZE,
            compress_statistics: false,
            has_full_precision_weights,
        }
    }

    pub fn fp4() -> Self {
        Self::four_bit(QuantScheme::Fp4)
    }

    pub fn nf4() -> Self {
        Self::four_bit(QuantScheme::Nf4)
    }

    fn four_bit(scheme: QuantScheme) -> Self {
        Self {
            scheme,
            block_size: DEFAULT_BLOCK_SIZE,
            compress_statistics: true,
            has_full_precision_weights: false,
        }
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_compress_statistics(mut self, compress: bool) -> Self {
        self.compress_statistics = compress;
        self
    }

    /// Check settings the kernel cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.scheme == QuantScheme::Int8FusedLayout {
            return Err(Error::UnsupportedScheme(
                "int8_fused_layout is produced by a layout transform, not by encoding".into(),
            ));
        }
        if self.scheme.is_four_bit() {
            if self.block_size == 0 || self.block_size % 2 != 0 {
                return Err(Error::InvalidParameter(format!(
                    "block_size must be a positive even number, got {}",
                    self.block_size
                )));
            }
            if self.has_full_precision_weights {
                return Err(Error::InvalidParameter(
                    "4-bit parameters cannot keep full precision weights".into(),
                ));
            }
        }
        Ok(())
    }
}
