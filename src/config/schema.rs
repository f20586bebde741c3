//! Declarative layer specification

use serde::{Deserialize, Serialize};

use crate::param::DEFAULT_BLOCK_SIZE;
use crate::stats::QuantScheme;
use crate::tensor::DType;

/// Construction parameters for one quantized linear layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSpec {
    /// Width of the input's last dimension
    pub in_features: usize,

    /// Width of the output's last dimension
    pub out_features: usize,

    /// Encoding family: "int8" | "fp4" | "nf4"
    pub scheme: QuantScheme,

    /// Whether the layer carries a bias
    #[serde(default = "default_true")]
    pub bias: bool,

    /// Keep the full-precision weight and quantize per call (int8 only)
    #[serde(default)]
    pub has_full_precision_weights: bool,

    /// Outlier threshold for the mixed int8 matmul; 0 disables it (int8 only)
    #[serde(default)]
    pub threshold: f32,

    /// Precision the 4-bit forward runs in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compute_dtype: Option<DType>,

    /// Elements per absmax block (4-bit only)
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    /// Compress the per-block scales into nested 8-bit statistics (4-bit only)
    #[serde(default = "default_true")]
    pub compress_statistics: bool,
}

fn default_true() -> bool {
    true
}

fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}

impl LayerSpec {
    /// Spec with every optional field at its default
    pub fn new(in_features: usize, out_features: usize, scheme: QuantScheme) -> Self {
        Self {
            in_features,
            out_features,
            scheme,
            bias: true,
            has_full_precision_weights: false,
            threshold: 0.0,
            compute_dtype: None,
            block_size: DEFAULT_BLOCK_SIZE,
            compress_statistics: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_yaml() {
        let yaml = "in_features: 16\nout_features: 8\nscheme: nf4\n";
        let spec: LayerSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec, LayerSpec::new(16, 8, QuantScheme::Nf4));
    }

    #[test]
    fn test_int8_alias() {
        let yaml = "in_features: 4\nout_features: 4\nscheme: int8\nthreshold: 6.0\n";
        let spec: LayerSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.scheme, QuantScheme::Int8RowMajor);
        assert_eq!(spec.threshold, 6.0);
    }

    #[test]
    fn test_scheme_is_required() {
        let yaml = "in_features: 4\nout_features: 4\n";
        assert!(serde_yaml::from_str::<LayerSpec>(yaml).is_err());
    }

    #[test]
    fn test_json_compute_dtype() {
        let json = r#"{"in_features": 64, "out_features": 4, "scheme": "fp4", "compute_dtype": "bf16"}"#;
        let spec: LayerSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.compute_dtype, Some(DType::BF16));
    }
}
