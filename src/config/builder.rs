//! Build layers from a specification

use super::schema::LayerSpec;
use super::validate::validate_spec;
use crate::error::{Error, Result};
use crate::nn::{Linear4bit, Linear8bit, QuantizedLayer};
use crate::stats::QuantScheme;

/// Build a layer from a validated spec
///
/// Weights are Kaiming-initialized and start in full precision; placing the
/// layer on an accelerator triggers quantization.
pub fn build_layer(spec: &LayerSpec) -> Result<Box<dyn QuantizedLayer>> {
    validate_spec(spec).map_err(|e| Error::ConfigError(format!("Invalid layer spec: {e}")))?;

    let layer: Box<dyn QuantizedLayer> = match spec.scheme {
        QuantScheme::Int8RowMajor | QuantScheme::Int8FusedLayout => Box::new(Linear8bit::new(
            spec.in_features,
            spec.out_features,
            spec.bias,
            spec.has_full_precision_weights,
            spec.threshold,
        )?),
        QuantScheme::Fp4 | QuantScheme::Nf4 => {
            let layer = Linear4bit::new(
                spec.in_features,
                spec.out_features,
                spec.bias,
                spec.compute_dtype,
                spec.compress_statistics,
                spec.scheme,
            )?;
            Box::new(layer.with_block_size(spec.block_size)?)
        }
    };
    Ok(layer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::EncodingState;
    use crate::tensor::{DType, Device, Tensor};

    #[test]
    fn test_build_int8() {
        let mut spec = LayerSpec::new(16, 8, QuantScheme::Int8RowMajor);
        spec.threshold = 6.0;
        let mut layer = build_layer(&spec).unwrap();
        assert_eq!(layer.scheme(), QuantScheme::Int8RowMajor);
        assert_eq!(layer.encoding_state(), EncodingState::FullPrecision);
        layer.place_on_device(Device::Cuda(0)).unwrap();
        assert_eq!(layer.encoding_state(), EncodingState::QuantizedUntransformed);
    }

    #[test]
    fn test_build_four_bit_with_block_size() {
        let mut spec = LayerSpec::new(64, 4, QuantScheme::Fp4);
        spec.block_size = 32;
        spec.bias = false;
        let mut layer = build_layer(&spec).unwrap();
        assert_eq!(layer.scheme(), QuantScheme::Fp4);
        assert_eq!((layer.in_features(), layer.out_features()), (64, 4));
        layer.place_on_device(Device::Cuda(0)).unwrap();
        let x = Tensor::zeros(&[2, 64], DType::F32).to_device(Device::Cuda(0));
        assert_eq!(layer.forward(&x).unwrap().shape(), &[2, 4]);
    }

    #[test]
    fn test_invalid_spec_is_config_error() {
        let spec = LayerSpec::new(0, 4, QuantScheme::Nf4);
        assert!(matches!(build_layer(&spec), Err(Error::ConfigError(_))));
    }
}
