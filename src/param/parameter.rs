//! Quantized parameter value holder and its state machine

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use super::QuantConfig;
use crate::kernel::QuantKernel;
use crate::stats::StatisticsBlob;
use crate::tensor::{DType, Device, Tensor};
use crate::{Error, Result};

/// Encoding of a parameter's buffer
///
/// Transitions only move forward:
/// `FullPrecision -> QuantizedUntransformed -> QuantizedLayoutTransformed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingState {
    FullPrecision,
    QuantizedUntransformed,
    QuantizedLayoutTransformed,
}

impl EncodingState {
    pub fn is_quantized(&self) -> bool {
        !matches!(self, EncodingState::FullPrecision)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EncodingState::FullPrecision => "full_precision",
            EncodingState::QuantizedUntransformed => "quantized_untransformed",
            EncodingState::QuantizedLayoutTransformed => "quantized_layout_transformed",
        }
    }
}

impl fmt::Display for EncodingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Weight buffer plus explicit encoding metadata
///
/// `statistics` is `None` in `FullPrecision`. Once quantized, the buffer and
/// statistics may be handed off to a layer (see [`take_quantized`]), after
/// which the parameter keeps only its encoding state and an empty buffer.
///
/// [`take_quantized`]: QuantizedParameter::take_quantized
#[derive(Clone, Debug)]
pub struct QuantizedParameter {
    data: Tensor,
    encoding: EncodingState,
    statistics: Option<StatisticsBlob>,
    config: QuantConfig,
    requires_grad: bool,
}

impl QuantizedParameter {
    /// Wrap a full-precision tensor
    pub fn new(data: Tensor, config: QuantConfig) -> Self {
        let requires_grad = data.requires_grad();
        Self {
            data,
            encoding: EncodingState::FullPrecision,
            statistics: None,
            config,
            requires_grad,
        }
    }

    pub fn data(&self) -> &Tensor {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut Tensor {
        &mut self.data
    }

    pub fn encoding(&self) -> EncodingState {
        self.encoding
    }

    pub fn is_quantized(&self) -> bool {
        self.encoding.is_quantized()
    }

    pub fn statistics(&self) -> Option<&StatisticsBlob> {
        self.statistics.as_ref()
    }

    pub(crate) fn statistics_mut(&mut self) -> Option<&mut StatisticsBlob> {
        self.statistics.as_mut()
    }

    pub fn config(&self) -> &QuantConfig {
        &self.config
    }

    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    pub fn device(&self) -> Device {
        self.data.device()
    }

    /// True while the parameter itself holds a quantized buffer and its statistics
    pub fn has_cached_payload(&self) -> bool {
        self.encoding.is_quantized() && self.statistics.is_some() && !self.data.is_empty()
    }

    /// Move the parameter to `target`, quantizing on the first host-to-accelerator move
    ///
    /// Already-quantized parameters are re-homed without re-encoding. A
    /// layout-transformed buffer cannot leave the accelerator; that request
    /// fails with [`Error::UnsupportedTransition`] and leaves the parameter as it was.
    pub fn place_on_device<K>(&mut self, target: Device, kernel: &K) -> Result<()>
    where
        K: QuantKernel + ?Sized,
    {
        let current = self.data.device();
        match self.encoding {
            EncodingState::FullPrecision
                if target.is_accelerator()
                    && !current.is_accelerator()
                    && !self.config.has_full_precision_weights =>
            {
                self.data.move_to(target);
                if let Err(err) = self.quantize(kernel) {
                    self.data.move_to(current);
                    return Err(err);
                }
                Ok(())
            }
            EncodingState::FullPrecision => {
                self.data.move_to(target);
                Ok(())
            }
            EncodingState::QuantizedLayoutTransformed if !target.is_accelerator() => {
                Err(Error::UnsupportedTransition(format!(
                    "cannot move a layout-transformed parameter from {current} to {target}"
                )))
            }
            EncodingState::QuantizedUntransformed | EncodingState::QuantizedLayoutTransformed => {
                self.data.move_to(target);
                if let Some(stats) = &mut self.statistics {
                    stats.move_to(target);
                }
                debug!(
                    encoding = %self.encoding,
                    from = %current,
                    to = %target,
                    "re-homed quantized parameter"
                );
                Ok(())
            }
        }
    }

    /// Encode the buffer now; fails if the parameter is already quantized
    pub fn quantize<K>(&mut self, kernel: &K) -> Result<()>
    where
        K: QuantKernel + ?Sized,
    {
        if self.encoding.is_quantized() {
            return Err(Error::UnsupportedTransition(format!(
                "parameter is already {}; re-quantizing is not supported",
                self.encoding
            )));
        }
        let (buffer, statistics) = kernel.encode(&self.data, &self.config)?;
        self.transition(EncodingState::QuantizedUntransformed);
        self.data = buffer;
        self.statistics = Some(statistics);
        self.requires_grad = false;
        Ok(())
    }

    /// Cast a full-precision parameter into a fresh one at `dtype`
    pub fn reencode_with_new_precision(&self, dtype: DType) -> Result<QuantizedParameter> {
        if self.encoding.is_quantized() {
            return Err(Error::UnsupportedTransition(format!(
                "cannot cast a {} parameter to {dtype}",
                self.encoding
            )));
        }
        let data = self.data.cast(dtype)?;
        Ok(Self {
            data,
            encoding: EncodingState::FullPrecision,
            statistics: None,
            config: self.config.clone(),
            requires_grad: self.requires_grad,
        })
    }

    /// Move the quantized buffer and statistics out, leaving an empty buffer
    ///
    /// Returns `None` when there is nothing to hand off.
    pub fn take_quantized(&mut self) -> Option<(Tensor, StatisticsBlob)> {
        if !self.has_cached_payload() {
            return None;
        }
        let statistics = self.statistics.take()?;
        let empty = Tensor::empty(self.data.dtype(), self.data.device());
        let buffer = std::mem::replace(&mut self.data, empty);
        debug!(encoding = %self.encoding, "handed off quantized buffer");
        Some((buffer, statistics))
    }

    /// Advance `QuantizedUntransformed -> QuantizedLayoutTransformed`
    pub fn mark_layout_transformed(&mut self) -> Result<()> {
        if self.encoding != EncodingState::QuantizedUntransformed {
            return Err(Error::UnsupportedTransition(format!(
                "cannot apply a layout transform to a {} parameter",
                self.encoding
            )));
        }
        self.transition(EncodingState::QuantizedLayoutTransformed);
        Ok(())
    }

    /// Bytes held by the buffer and any statistics still owned here
    pub fn memory_bytes(&self) -> usize {
        self.data.memory_bytes() + self.statistics.as_ref().map_or(0, StatisticsBlob::memory_bytes)
    }

    fn transition(&mut self, to: EncodingState) {
        debug!(
            from = %self.encoding,
            to = %to,
            scheme = %self.config.scheme,
            device = %self.data.device(),
            "parameter encoding transition"
        );
        self.encoding = to;
    }
}
