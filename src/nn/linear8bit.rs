//! Int8 linear layer with lazy quantization and a one-time layout transform

use rand::Rng;
use tracing::debug;

use super::init::{check_features, check_input, kaiming_uniform};
use super::MatmulState;
use crate::kernel::{QuantKernel, ReferenceKernel};
use crate::param::{EncodingState, QuantConfig, QuantizedParameter};
use crate::tensor::{Device, Tensor};
use crate::{Error, Result};

/// `y = x @ W^T + b` with an int8 weight
///
/// The weight stays in full precision until the layer is first placed on an
/// accelerator. The first forward after that hands the quantized buffer to
/// the layer's [`MatmulState`]; the kernel may then return a tiled copy of
/// the codes, which replaces the row-major buffer for all later calls.
pub struct Linear8bit<K: QuantKernel = ReferenceKernel> {
    weight: QuantizedParameter,
    bias: Option<Tensor>,
    state: MatmulState,
    in_features: usize,
    out_features: usize,
    training: bool,
    kernel: K,
}

fn check_threshold(threshold: f32) -> Result<()> {
    if !threshold.is_finite() || threshold < 0.0 {
        return Err(Error::InvalidParameter(format!(
            "threshold must be a finite value >= 0, got {threshold}"
        )));
    }
    Ok(())
}

impl Linear8bit<ReferenceKernel> {
    /// Create a layer with Kaiming-uniform weights
    pub fn new(
        in_features: usize,
        out_features: usize,
        bias: bool,
        has_full_precision_weights: bool,
        threshold: f32,
    ) -> Result<Self> {
        Self::new_with_rng(
            in_features,
            out_features,
            bias,
            has_full_precision_weights,
            threshold,
            &mut rand::rng(),
        )
    }

    /// Like [`new`](Self::new) with a caller-supplied RNG
    pub fn new_with_rng<R: Rng + ?Sized>(
        in_features: usize,
        out_features: usize,
        bias: bool,
        has_full_precision_weights: bool,
        threshold: f32,
        rng: &mut R,
    ) -> Result<Self> {
        check_features(in_features, out_features)?;
        let weight = kaiming_uniform(&[out_features, in_features], in_features, rng)?;
        let bias = if bias {
            Some(kaiming_uniform(&[out_features], in_features, rng)?)
        } else {
            None
        };
        Self::from_weights(weight, bias, has_full_precision_weights, threshold)
    }

    /// Wrap explicit `[out, in]` weights and an optional `[out]` bias
    pub fn from_weights(
        weight: Tensor,
        bias: Option<Tensor>,
        has_full_precision_weights: bool,
        threshold: f32,
    ) -> Result<Self> {
        check_threshold(threshold)?;
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

        let weight = weight.with_requires_grad(has_full_precision_weights);
        Ok(Self {
            weight: QuantizedParameter::new(weight, QuantConfig::int8(has_full_precision_weights)),
            bias,
            state: MatmulState::new(threshold, has_full_precision_weights),
            in_features,
            out_features,
            training: true,
            kernel: ReferenceKernel,
        })
    }
}

impl<K: QuantKernel> Linear8bit<K> {
    /// Swap the kernel, keeping weights and state
    pub fn with_kernel<K2: QuantKernel>(self, kernel: K2) -> Linear8bit<K2> {
        Linear8bit {
            weight: self.weight,
            bias: self.bias,
            state: self.state,
            in_features: self.in_features,
            out_features: self.out_features,
            training: self.training,
            kernel,
        }
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

    pub fn state(&self) -> &MatmulState {
        &self.state
    }

    /// Direct access to the matmul state; callers must keep the weight and
    /// state consistent
    pub fn state_mut(&mut self) -> &mut MatmulState {
        &mut self.state
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
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

    pub fn is_training(&self) -> bool {
        self.training
    }

    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    pub fn train(&mut self) {
        self.set_training(true);
    }

    pub fn eval(&mut self) {
        self.set_training(false);
    }

    /// Move weight, bias and any handed-off buffers to `target`
    ///
    /// The first move from the host onto an accelerator quantizes the weight
    /// (unless it keeps full precision weights). Nothing moves if the weight
    /// rejects the request.
    pub fn place_on_device(&mut self, target: Device) -> Result<()> {
        self.weight.place_on_device(target, &self.kernel)?;
        if let Some(bias) = &mut self.bias {
            bias.move_to(target);
        }
        self.state.move_to(target);
        Ok(())
    }

    /// Hand the weight's quantized buffer and statistics to the layer state
    ///
    /// Returns `true` if a hand-off happened. Afterwards the weight holds an
    /// empty buffer and no statistics.
    pub fn init_8bit_state(&mut self) -> bool {
        let Some((buffer, statistics)) = self.weight.take_quantized() else {
            return false;
        };
        match self.weight.encoding() {
            EncodingState::QuantizedLayoutTransformed => self.state.tiled = Some(buffer),
            _ => self.state.row_major = Some(buffer),
        }
        self.state.statistics = Some(statistics);
        debug!(
            in_features = self.in_features,
            out_features = self.out_features,
            "moved int8 weight into matmul state"
        );
        true
    }

    /// `x @ W^T + b` for `x` shaped `[..., in_features]`
    pub fn forward(&mut self, x: &Tensor) -> Result<Tensor> {
        check_input(x, self.in_features)?;
        self.state.is_training = self.training;

        if self.weight.has_cached_payload() {
            self.init_8bit_state();
        }

        if let Some(bias) = &mut self.bias {
            if bias.dtype() != x.dtype() {
                *bias = bias.cast(x.dtype())?;
            }
        }

        let out = self
            .kernel
            .fused_matmul(x, &self.weight, self.bias.as_ref(), &self.state)?;

        if let Some((tiled, tag)) = out.transformed {
            if !self.state.has_full_precision_weights {
                self.weight.mark_layout_transformed()?;
                self.state.adopt_tiled(tiled, tag);
            }
        }
        Ok(out.output)
    }

    /// Bytes held by the weight, bias and matmul state
    pub fn memory_bytes(&self) -> usize {
        let state = [&self.state.row_major, &self.state.tiled]
            .into_iter()
            .flatten()
            .map(Tensor::memory_bytes)
            .sum::<usize>()
            + self
                .state
                .statistics
                .as_ref()
                .map_or(0, |s| s.memory_bytes());
        self.weight.memory_bytes() + self.bias.as_ref().map_or(0, Tensor::memory_bytes) + state
    }
}
