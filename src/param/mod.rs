//! Quantized parameters
//!
//! A [`QuantizedParameter`] is a numeric buffer plus explicit metadata: the
//! current [`EncodingState`], the statistics needed to decode the buffer and
//! the [`QuantConfig`] used to produce it. Encoding happens lazily, once,
//! on the first placement onto an accelerator.

mod config;
mod parameter;


pub use config::{QuantConfig, DEFAULT_BLOCK_SIZE};
pub use parameter::{EncodingState, QuantizedParameter};
