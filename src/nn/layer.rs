//! Object-safe interface shared by the quantized linear layers

use crate::checkpoint::{LoadReport, StateDict};
use crate::kernel::QuantKernel;
use crate::param::EncodingState;
use crate::stats::QuantScheme;
use crate::tensor::{Device, Tensor};
use crate::Result;

use super::{Linear4bit, Linear8bit};

/// A linear layer whose weight goes through the quantized lifecycle
pub trait QuantizedLayer {
    fn forward(&mut self, x: &Tensor) -> Result<Tensor>;
    fn place_on_device(&mut self, target: Device) -> Result<()>;
    fn encoding_state(&self) -> EncodingState;
    fn scheme(&self) -> QuantScheme;
    fn state_dict(&self, prefix: &str) -> Result<StateDict>;
    fn load_state_dict(&mut self, dict: &StateDict, prefix: &str, strict: bool) -> Result<LoadReport>;
    fn set_training(&mut self, training: bool);
    fn in_features(&self) -> usize;
    fn out_features(&self) -> usize;
    fn memory_bytes(&self) -> usize;
}

impl<K: QuantKernel> QuantizedLayer for Linear8bit<K> {
    fn forward(&mut self, x: &Tensor) -> Result<Tensor> {
        Linear8bit::forward(self, x)
    }

    fn place_on_device(&mut self, target: Device) -> Result<()> {
        Linear8bit::place_on_device(self, target)
    }

    fn encoding_state(&self) -> EncodingState {
        Linear8bit::encoding_state(self)
    }

    fn scheme(&self) -> QuantScheme {
        QuantScheme::Int8RowMajor
    }

    fn state_dict(&self, prefix: &str) -> Result<StateDict> {
        Linear8bit::state_dict(self, prefix)
    }

    fn load_state_dict(&mut self, dict: &StateDict, prefix: &str, strict: bool) -> Result<LoadReport> {
        Linear8bit::load_state_dict(self, dict, prefix, strict)
    }

    fn set_training(&mut self, training: bool) {
        Linear8bit::set_training(self, training)
    }

    fn in_features(&self) -> usize {
        Linear8bit::in_features(self)
    }

    fn out_features(&self) -> usize {
        Linear8bit::out_features(self)
    }

    fn memory_bytes(&self) -> usize {
        Linear8bit::memory_bytes(self)
    }
}

impl<K: QuantKernel> QuantizedLayer for Linear4bit<K> {
    fn forward(&mut self, x: &Tensor) -> Result<Tensor> {
        Linear4bit::forward(self, x)
    }

    fn place_on_device(&mut self, target: Device) -> Result<()> {
        Linear4bit::place_on_device(self, target)
    }

    fn encoding_state(&self) -> EncodingState {
        Linear4bit::encoding_state(self)
    }

    fn scheme(&self) -> QuantScheme {
        Linear4bit::scheme(self)
    }

    fn state_dict(&self, prefix: &str) -> Result<StateDict> {
        Linear4bit::state_dict(self, prefix)
    }

    fn load_state_dict(&mut self, dict: &StateDict, prefix: &str, strict: bool) -> Result<LoadReport> {
        Linear4bit::load_state_dict(self, dict, prefix, strict)
    }

    fn set_training(&mut self, training: bool) {
        Linear4bit::set_training(self, training)
    }

    fn in_features(&self) -> usize {
        Linear4bit::in_features(self)
    }

    fn out_features(&self) -> usize {
        Linear4bit::out_features(self)
    }

    fn memory_bytes(&self) -> usize {
        Linear4bit::memory_bytes(self)
    }
}
