//! State-dict save/load for the quantized layers
//!
//! The weight is always written row-major under `{prefix}weight`. When the
//! live buffer is tiled, a scratch row-major copy is produced with
//! `undo_layout` and dropped afterwards; the live buffer is never touched.
//! Statistics travel under `{prefix}SCB` in their flat form. Loads are
//! staged: every key is validated before anything is written.

use std::borrow::Cow;

use tracing::debug;

use super::{LoadReport, StateDict};
use crate::kernel::QuantKernel;
use crate::nn::{Linear4bit, Linear8bit};
use crate::param::EncodingState;
use crate::stats::StatisticsBlob;
use crate::tensor::{DType, Tensor};
use crate::{Error, Result};

/// Key suffix of the weight buffer
pub const WEIGHT_KEY: &str = "weight";
/// Key suffix of the bias
pub const BIAS_KEY: &str = "bias";
/// Key suffix of the flat statistics side channel
pub const STATISTICS_KEY: &str = "SCB";

struct Keys {
    weight: String,
    bias: String,
    statistics: String,
}

impl Keys {
    fn new(prefix: &str) -> Self {
        Self {
            weight: format!("{prefix}{WEIGHT_KEY}"),
            bias: format!("{prefix}{BIAS_KEY}"),
            statistics: format!("{prefix}{STATISTICS_KEY}"),
        }
    }
}

fn key_report(dict: &StateDict, prefix: &str, keys: &Keys, has_bias: bool) -> LoadReport {
    let mut report = LoadReport::default();
    if !dict.contains_key(&keys.weight) {
        report.missing_keys.push(keys.weight.clone());
    }
    if has_bias && !dict.contains_key(&keys.bias) {
        report.missing_keys.push(keys.bias.clone());
    }
    for key in dict.keys().filter(|k| k.starts_with(prefix)) {
        let known = key == keys.weight || key == keys.statistics || (has_bias && key == keys.bias);
        if !known {
            report.unexpected_keys.push(key.to_string());
        }
    }
    report
}

fn check_strict(report: &LoadReport, strict: bool) -> Result<()> {
    if strict && !report.is_clean() {
        return Err(Error::StateDictMismatch {
            missing: report.missing_keys.clone(),
            unexpected: report.unexpected_keys.clone(),
        });
    }
    Ok(())
}

fn flat_statistics(stats: &StatisticsBlob) -> Result<Tensor> {
    let flat = stats.to_flat();
    let len = flat.len();
    Tensor::from_vec(flat, &[len])
}

/// Decode the side channel against a copy of the live statistics
fn stage_statistics(src: &Tensor, slot: &StatisticsBlob) -> Result<Vec<f32>> {
    let flat = src.to_f32_vec();
    let mut probe = slot.clone();
    probe.copy_from_flat(&flat)?;
    Ok(flat)
}

fn expect_tensor(src: &Tensor, shape: &[usize], dtype: Option<DType>) -> Result<()> {
    if src.shape() != shape {
        return Err(Error::shape(shape, src.shape()));
    }
    match dtype {
        Some(dtype) if src.dtype() != dtype => Err(Error::DTypeMismatch {
            expected: dtype.to_string(),
            got: src.dtype().to_string(),
        }),
        None if !src.dtype().is_float() => Err(Error::DTypeMismatch {
            expected: "floating point".into(),
            got: src.dtype().to_string(),
        }),
        _ => Ok(()),
    }
}

fn stage_bias(src: Option<&Tensor>, live: Option<&Tensor>) -> Result<Option<Tensor>> {
    match (src, live) {
        (Some(src), Some(live)) => {
            expect_tensor(src, live.shape(), None)?;
            Ok(Some(src.clone()))
        }
        _ => Ok(None),
    }
}

fn full_precision_into_quantized() -> Error {
    Error::UnsupportedTransition(
        "loading a full-precision checkpoint into a quantized layer would require re-encoding"
            .into(),
    )
}

fn missing(what: &str) -> Error {
    Error::MissingQuantizationStatistics(format!("{what} is not available"))
}

impl<K: QuantKernel> Linear8bit<K> {
    /// Statistics wherever they currently live: the weight first, then the matmul state
    fn statistics_slot(&self) -> Option<&StatisticsBlob> {
        self.weight()
            .statistics()
            .or(self.state().statistics.as_ref())
    }

    fn statistics_slot_mut(&mut self) -> Option<&mut StatisticsBlob> {
        if self.weight().statistics().is_some() {
            return self.weight_mut().statistics_mut();
        }
        self.state_mut().statistics.as_mut()
    }

    /// Int8 codes in their current layout, wherever they live
    fn live_codes(&self) -> Option<&Tensor> {
        if self.weight().has_cached_payload() {
            return Some(self.weight().data());
        }
        match self.encoding_state() {
            EncodingState::QuantizedLayoutTransformed => self.state().tiled.as_ref(),
            _ => self.state().row_major.as_ref(),
        }
    }

    fn live_codes_mut(&mut self) -> Option<&mut Tensor> {
        if self.weight().has_cached_payload() {
            return Some(self.weight_mut().data_mut());
        }
        let encoding = self.encoding_state();
        let state = self.state_mut();
        match encoding {
            EncodingState::QuantizedLayoutTransformed => state.tiled.as_mut(),
            _ => state.row_major.as_mut(),
        }
    }

    /// Row-major form of the weight; a scratch copy when the live buffer is tiled
    fn row_major_weight(&self) -> Result<Cow<'_, Tensor>> {
        match self.encoding_state() {
            EncodingState::FullPrecision => Ok(Cow::Borrowed(self.weight().data())),
            EncodingState::QuantizedUntransformed => self
                .live_codes()
                .map(Cow::Borrowed)
                .ok_or_else(|| missing("row-major int8 weight")),
            EncodingState::QuantizedLayoutTransformed => {
                let tiled = self.live_codes().ok_or_else(|| missing("tiled int8 weight"))?;
                let tag = self
                    .statistics_slot()
                    .and_then(|s| s.layout_tag.as_ref())
                    .ok_or_else(|| missing("layout tag"))?;
                Ok(Cow::Owned(self.kernel().undo_layout(tiled, tag)?))
            }
        }
    }

    /// Collect `{prefix}weight`, `{prefix}bias` and, once quantized, `{prefix}SCB`
    pub fn state_dict(&self, prefix: &str) -> Result<StateDict> {
        let keys = Keys::new(prefix);
        let mut dict = StateDict::new();

        let weight = self.row_major_weight()?;
        dict.insert(keys.weight, weight.into_owned());
        if let Some(bias) = self.bias() {
            dict.insert(keys.bias, bias.clone());
        }
        if self.weight().is_quantized() {
            let stats = self.statistics_slot().ok_or_else(|| missing("row scales"))?;
            dict.insert(keys.statistics, flat_statistics(stats)?);
        }

        debug!(prefix, tensors = dict.len(), encoding = %self.encoding_state(), "collected int8 state dict");
        Ok(dict)
    }

    /// Load tensors saved by [`state_dict`](Self::state_dict)
    ///
    /// A `{prefix}SCB` key requires the layer to already hold statistics
    /// (placed on an accelerator); otherwise the load fails with
    /// [`Error::QuantizedCheckpointIntoUnquantizedLayer`]. Nothing is
    /// written unless every key validates.
    pub fn load_state_dict(&mut self, dict: &StateDict, prefix: &str, strict: bool) -> Result<LoadReport> {
        let keys = Keys::new(prefix);
        let report = key_report(dict, prefix, &keys, self.bias().is_some());
        check_strict(&report, strict)?;

        let encoding = self.encoding_state();
        let weight_src = dict.get(&keys.weight);
        let shape = [self.out_features(), self.in_features()];

        let staged_stats = match dict.get(&keys.statistics) {
            Some(src) => {
                let slot = self
                    .statistics_slot()
                    .ok_or(Error::QuantizedCheckpointIntoUnquantizedLayer)?;
                Some(stage_statistics(src, slot)?)
            }
            None if encoding.is_quantized() && weight_src.is_some() => {
                return Err(full_precision_into_quantized());
            }
            None => None,
        };

        let staged_weight = match (weight_src, encoding) {
            (None, _) => None,
            (Some(src), EncodingState::FullPrecision) => {
                expect_tensor(src, &shape, None)?;
                Some(src.clone())
            }
            (Some(src), EncodingState::QuantizedUntransformed) => {
                expect_tensor(src, &shape, Some(DType::I8))?;
                self.live_codes().ok_or_else(|| missing("row-major int8 weight"))?;
                Some(src.clone())
            }
            (Some(src), EncodingState::QuantizedLayoutTransformed) => {
                expect_tensor(src, &shape, Some(DType::I8))?;
                let (tiled, tag) = self.kernel().layout_transform(src)?;
                let live_tag = self.statistics_slot().and_then(|s| s.layout_tag.as_ref());
                if live_tag != Some(&tag) {
                    return Err(Error::UnsupportedTransition(
                        "checkpoint tiling does not match the live layout".into(),
                    ));
                }
                let live = self.live_codes().ok_or_else(|| missing("tiled int8 weight"))?;
                if live.shape() != tiled.shape() {
                    return Err(Error::shape(live.shape(), tiled.shape()));
                }
                Some(tiled)
            }
        };
        let staged_bias = stage_bias(dict.get(&keys.bias), self.bias())?;

        if let (Some(flat), Some(slot)) = (staged_stats, self.statistics_slot_mut()) {
            slot.copy_from_flat(&flat)?;
        }
        if let Some(weight) = staged_weight {
            let live = match encoding {
                EncodingState::FullPrecision => Some(self.weight_mut().data_mut()),
                _ => self.live_codes_mut(),
            };
            if let Some(live) = live {
                live.copy_from(&weight)?;
            }
        }
        if let (Some(bias), Some(live)) = (staged_bias, self.bias_mut()) {
            live.copy_from(&bias)?;
        }

        debug!(prefix, encoding = %encoding, missing = report.missing_keys.len(), "loaded int8 state dict");
        Ok(report)
    }
}

impl<K: QuantKernel> Linear4bit<K> {
    /// Collect `{prefix}weight` (packed codes once quantized), `{prefix}bias`
    /// and, once quantized, the flat statistics under `{prefix}SCB`
    pub fn state_dict(&self, prefix: &str) -> Result<StateDict> {
        let keys = Keys::new(prefix);
        let mut dict = StateDict::new();
        dict.insert(keys.weight, self.weight().data().clone());
        if let Some(bias) = self.bias() {
            dict.insert(keys.bias, bias.clone());
        }
        if self.weight().is_quantized() {
            let stats = self
                .weight()
                .statistics()
                .ok_or_else(|| missing("4-bit statistics"))?;
            dict.insert(keys.statistics, flat_statistics(stats)?);
        }
        debug!(prefix, tensors = dict.len(), scheme = %self.scheme(), "collected 4-bit state dict");
        Ok(dict)
    }

    /// Load tensors saved by [`state_dict`](Self::state_dict); same staging
    /// and side-channel rules as the int8 layer
    pub fn load_state_dict(&mut self, dict: &StateDict, prefix: &str, strict: bool) -> Result<LoadReport> {
        let keys = Keys::new(prefix);
        let report = key_report(dict, prefix, &keys, self.bias().is_some());
        check_strict(&report, strict)?;

        let quantized = self.weight().is_quantized();
        let weight_src = dict.get(&keys.weight);

        let staged_stats = match dict.get(&keys.statistics) {
            Some(src) => {
                let slot = self
                    .weight()
                    .statistics()
                    .ok_or(Error::QuantizedCheckpointIntoUnquantizedLayer)?;
                Some(stage_statistics(src, slot)?)
            }
            None if quantized && weight_src.is_some() => return Err(full_precision_into_quantized()),
            None => None,
        };

        let live = self.weight().data();
        let staged_weight = match weight_src {
            Some(src) if quantized => {
                expect_tensor(src, live.shape(), Some(DType::U8))?;
                Some(src.clone())
            }
            Some(src) => {
                expect_tensor(src, &[self.out_features(), self.in_features()], None)?;
                Some(src.clone())
            }
            None => None,
        };
        let staged_bias = stage_bias(dict.get(&keys.bias), self.bias())?;

        if let (Some(flat), Some(slot)) = (staged_stats, self.weight_mut().statistics_mut()) {
            slot.copy_from_flat(&flat)?;
        }
        if let Some(weight) = staged_weight {
            self.weight_mut().data_mut().copy_from(&weight)?;
        }
        if let (Some(bias), Some(live)) = (staged_bias, self.bias_mut()) {
            live.copy_from(&bias)?;
        }

        debug!(prefix, scheme = %self.scheme(), missing = report.missing_keys.len(), "loaded 4-bit state dict");
        Ok(report)
    }
}
