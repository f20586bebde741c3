//! Quantized linear layers
//!
//! - [`Linear8bit`]: int8 weights, lazy hand-off into a [`MatmulState`] and a
//!   one-time tile layout for the fused kernel
//! - [`Linear4bit`]: blockwise FP4 / NF4 weights with optional nested statistics
//!
//! Both implement [`QuantizedLayer`] so they can be driven as trait objects.

mod init;
mod layer;
mod linear4bit;
mod linear8bit;
mod state;


pub use layer::QuantizedLayer;
pub use linear4bit::Linear4bit;
pub use linear8bit::Linear8bit;
pub use state::MatmulState;
