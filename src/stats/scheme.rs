//! Quantization scheme tags

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Numeric encoding family of a quantized buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantScheme {
    /// Int8 codes, row-major, one absmax scale per row
    #[serde(alias = "int8")]
    Int8RowMajor,
    /// Int8 codes reordered into the fused-kernel tile layout
    Int8FusedLayout,
    /// 4-bit float (E2M1) codes with blockwise absmax
    Fp4,
    /// 4-bit normal-float codes with blockwise absmax
    Nf4,
}

impl QuantScheme {
    pub fn is_int8(&self) -> bool {
        matches!(self, QuantScheme::Int8RowMajor | QuantScheme::Int8FusedLayout)
    }

    pub fn is_four_bit(&self) -> bool {
        matches!(self, QuantScheme::Fp4 | QuantScheme::Nf4)
    }

    /// Bits per stored code
    pub fn bits(&self) -> u8 {
        if self.is_four_bit() {
            4
        } else {
            8
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QuantScheme::Int8RowMajor => "int8_row_major",
            QuantScheme::Int8FusedLayout => "int8_fused_layout",
            QuantScheme::Fp4 => "fp4",
            QuantScheme::Nf4 => "nf4",
        }
    }

    /// True when checkpoints written under `self` can be read into `other`
    ///
    /// Both int8 variants share the same on-disk row-major form.
    pub fn checkpoint_compatible(&self, other: QuantScheme) -> bool {
        (self.is_int8() && other.is_int8()) || *self == other
    }
}

impl fmt::Display for QuantScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuantScheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "int8" | "int8_row_major" => Ok(QuantScheme::Int8RowMajor),
            "int8_fused_layout" => Ok(QuantScheme::Int8FusedLayout),
            "fp4" => Ok(QuantScheme::Fp4),
            "nf4" => Ok(QuantScheme::Nf4),
            other => Err(Error::UnsupportedScheme(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_families() {
        assert!(QuantScheme::Int8RowMajor.is_int8());
        assert!(QuantScheme::Int8FusedLayout.is_int8());
        assert!(QuantScheme::Nf4.is_four_bit());
        assert_eq!(QuantScheme::Fp4.bits(), 4);
        assert_eq!(QuantScheme::Int8RowMajor.bits(), 8);
    }

    #[test]
    fn test_scheme_parse() {
        assert_eq!("int8".parse::<QuantScheme>().unwrap(), QuantScheme::Int8RowMajor);
        assert_eq!("NF4".parse::<QuantScheme>().unwrap(), QuantScheme::Nf4);
        assert!(matches!(
            "int3".parse::<QuantScheme>(),
            Err(Error::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_checkpoint_compatibility() {
        assert!(QuantScheme::Int8FusedLayout.checkpoint_compatible(QuantScheme::Int8RowMajor));
        assert!(QuantScheme::Nf4.checkpoint_compatible(QuantScheme::Nf4));
        assert!(!QuantScheme::Nf4.checkpoint_compatible(QuantScheme::Fp4));
        assert!(!QuantScheme::Fp4.checkpoint_compatible(QuantScheme::Int8RowMajor));
    }

    #[test]
    fn test_scheme_serde_names() {
        let yaml = serde_yaml::to_string(&QuantScheme::Int8FusedLayout).unwrap();
        assert_eq!(yaml.trim(), "int8_fused_layout");
    }
}
