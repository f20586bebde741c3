//! 4-bit (FP4 / NF4) linear layer

use std::borrow::Cow;

use rand::Rng;
use tracing::warn;

use super::init::{check_features, check_input, kaiming_uniform};
use crate::kernel::{dense_linear, QuantKernel, ReferenceKernel};
use crate::param::{EncodingState, QuantConfig, QuantizedParameter};
use crate::stats::QuantScheme;
use crate::tensor::{DType, Device, Tensor};
use crate::{Error, Result};

/// `y = x @ W^T + b` with a blockwise 4-bit weight
///
/// Quantization happens on the first placement onto an accelerator. There
/// is no layout-transform stage.
pub struct Linear4bit<K: QuantKernel = ReferenceKernel> {
    weight: QuantizedParameter,
    bias: Option<Tensor>,
    compute_dtype: Option<DType>,
    in_features: usize,
    out_features: usize,
    /// Mirrored for the layer trait; the 4-bit forward has no train/eval split
    training: bool,
    missing_statistics_warnings: usize,
    kernel: K,
}

impl Linear4bit<ReferenceKernel> {
    pub fn new(
        in_features: usize,
        out_features: usize,
        bias: bool,
        compute_dtype: Option<DType>,
        compress_statistics: bool,
        scheme: QuantScheme,
    ) -> Result<Self> {
        Self::new_with_rng(
            in_features,
            out_features,
            bias,
            compute_dtype,
            compress_statistics,
            scheme,
            &mut rand::rng(),
        )
    }

    /// FP4 layer with default settings
    pub fn fp4(in_features: usize, out_features: usize, bias: bool) -> Result<Self> {
        Self::new(in_features, out_features, bias, None, true, QuantScheme::Fp4)
    }

    /// NF4 layer with default settings
    pub fn nf4(in_features: usize, out_features: usize, bias: bool) -> Result<Self> {
        Self::new(in_features, out_features, bias, None, true, QuantScheme::Nf4)
    }

    pub fn new_with_rng<R: Rng + ?Sized>(
        in_features: usize,
        out_features: usize,
        bias: bool,
        compute_dtype: Option<DType>,
        compress_statistics: bool,
        scheme: QuantScheme,
        rng: &mut R,
    ) -> Result<Self> {
        check_features(in_features, out_features)?;
        let weight = kaiming_uniform(&[out_features, in_features], in_features, rng)?;
        let bias = if bias {
            Some(kaiming_uniform(&[out_features], in_features, rng)?)
        } else {
            None
        };
        let config = four_bit_config(scheme)?.with_compress_statistics(compress_statistics);
        Self::from_weights(weight, bias, config, compute_dtype)
    }

    /// Wrap explicit `[out, in]` weights
    pub fn from_weights(
        weight: Tensor,
        bias: Option<Tensor>,
        config: QuantConfig,
        compute_dtype: Option<DType>,
    ) -> Result<Self> {
        if !config.scheme.is_four_bit() {
            return Err(Error::UnsupportedScheme(format!(
                "{} is not a 4-bit scheme",
                config.scheme
            )));
        }
        config.validate()?;
        if let Some(dtype) = compute_dtype {
            if !dtype.is_float() {
                return Err(Error::InvalidParameter(format!(
                    "compute dtype must be floating point, got {dtype}"
                )));
            }
        }
        let (out_features, in_features) = match weight.shape() {
            [out, inp] => (*out, *inp),
            other => {
                return Err(Error::InvalidParameter(format!(
                    "expected a 2-D weight, got shape {other:?}"
                )))
            }
        };
        check_features(in_features, out_features)?;
        if let Some(b) = &bias {
            if b.shape() != [out_features] {
                return Err(Error::shape(&[out_features], b.shape()));
            }
        }

        Ok(Self {
            weight: QuantizedParameter::new(weight.with_requires_grad(false), config),
            bias,
            compute_dtype,
            in_features,
            out_features,
            training: true,
            missing_statistics_warnings: 0,
            kernel: ReferenceKernel,
        })
    }
}

fn four_bit_config(scheme: QuantScheme) -> Result<QuantConfig> {
    match scheme {
        QuantScheme::Fp4 => Ok(QuantConfig::fp4()),
        QuantScheme::Nf4 => Ok(QuantConfig::nf4()),
        other => Err(Error::UnsupportedScheme(format!(
            "{other} is not a 4-bit scheme"
        ))),
    }
}

impl<K: QuantKernel> Linear4bit<K> {
    pub fn with_kernel<K2: QuantKernel>(self, kernel: K2) -> Linear4bit<K2> {
        Linear4bit {
            weight: self.weight,
            bias: self.bias,
            compute_dtype: self.compute_dtype,
            in_features: self.in_features,
            out_features: self.out_features,
            training: self.training,
            missing_statistics_warnings: self.missing_statistics_warnings,
            kernel,
        }
    }

    /// Change the block size; only possible before quantization
    pub fn with_block_size(self, block_size: usize) -> Result<Self> {
        if self.weight.is_quantized() {
            return Err(Error::UnsupportedTransition(
                "block size cannot change after quantization".into(),
            ));
        }
        let config = self.weight.config().clone().with_block_size(block_size);
        config.validate()?;
        Ok(Self {
            weight: QuantizedParameter::new(self.weight.data().clone(), config),
            ..self
        })
    }

    pub fn weight(&self) -> &QuantizedParameter {
        &self.weight
    }

    pub(crate) fn weight_mut(&mut self) -> &mut QuantizedParameter {
        &mut self.weight
    }

    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }

    pub(crate) fn bias_mut(&mut self) -> Option<&mut Tensor> {
        self.bias.as_mut()
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    pub fn compute_dtype(&self) -> Option<DType> {
        self.compute_dtype
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    pub fn encoding_state(&self) -> EncodingState {
        self.weight.encoding()
    }

    pub fn scheme(&self) -> QuantScheme {
        self.weight.config().scheme
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    /// Forward calls that ran without quantization statistics
    pub fn missing_statistics_warnings(&self) -> usize {
        self.missing_statistics_warnings
    }

    pub fn place_on_device(&mut self, target: Device) -> Result<()> {
        self.weight.place_on_device(target, &self.kernel)?;
        if let Some(bias) = &mut self.bias {
            bias.move_to(target);
        }
        Ok(())
    }

    /// `x @ W^T + b` for `x` shaped `[..., in_features]`
    ///
    /// Runs in `compute_dtype` when set and returns the input's dtype. A
    /// weight without statistics logs a warning: a never-placed weight
    /// falls back to the dense product, a quantized one fails with
    /// [`Error::MissingQuantizationStatistics`].
    pub fn forward(&mut self, x: &Tensor) -> Result<Tensor> {
        check_input(x, self.in_features)?;
        let input_dtype = x.dtype();

        let x: Cow<'_, Tensor> = match self.compute_dtype {
            Some(dtype) if dtype != input_dtype => Cow::Owned(x.cast(dtype)?),
            _ => Cow::Borrowed(x),
        };

        if let Some(bias) = &mut self.bias {
            if bias.dtype() != input_dtype {
                *bias = bias.cast(input_dtype)?;
            }
        }
        let bias: Option<Cow<'_, Tensor>> = match &self.bias {
            Some(b) if b.dtype() != x.dtype() => Some(Cow::Owned(b.cast(x.dtype())?)),
            Some(b) => Some(Cow::Borrowed(b)),
            None => None,
        };

        let output = match self.weight.statistics() {
            Some(stats) => {
                self.kernel
                    .matmul_4bit(&x, self.weight.data(), stats, bias.as_deref())?
            }
            None => {
                self.missing_statistics_warnings += 1;
                warn!(
                    encoding = %self.weight.encoding(),
                    "4-bit weight has no quantization statistics; place the layer on an \
                     accelerator before running forward"
                );
                if self.weight.is_quantized() {
                    return Err(Error::MissingQuantizationStatistics(
                        "4-bit weight is quantized but its statistics are gone".into(),
                    ));
                }
                let weight = self.weight.data().cast(x.dtype())?;
                dense_linear(&x, &weight, bias.as_deref())?
            }
        };

        output.cast(input_dtype)
    }

    /// Bytes held by the weight and bias
    pub fn memory_bytes(&self) -> usize {
        self.weight.memory_bytes() + self.bias.as_ref().map_or(0, Tensor::memory_bytes)
    }
}
