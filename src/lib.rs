//! # Cuantizar: quantized linear layers
//!
//! Cuantizar provides 8-bit and 4-bit linear layers whose weights move
//! through a lazy low-precision lifecycle: full precision at construction,
//! quantized on first placement onto an accelerator, and (for int8)
//! reordered once into a fused-kernel tile layout on first use.
//!
//! ## Architecture
//!
//! - **tensor**: Host tensor runtime (dtype, device, storage)
//! - **stats**: Quantization statistics, schemes and tile layout tags
//! - **kernel**: Kernel interface and host reference kernels
//! - **param**: Quantized parameter state machine
//! - **nn**: `Linear8bit`, `Linear4bit` and the shared layer trait
//! - **checkpoint**: State dicts with the statistics side channel, SafeTensors files
//! - **config**: Declarative YAML/JSON layer specs

pub mod checkpoint;
pub mod config;
pub mod kernel;
pub mod nn;
pub mod param;
pub mod stats;
pub mod tensor;

pub mod error;

// Re-export commonly used types
pub use checkpoint::{load_checkpoint, save_checkpoint, LoadReport, StateDict};
pub use error::{Error, Result};
pub use kernel::{QuantKernel, ReferenceKernel};
pub use nn::{Linear4bit, Linear8bit, MatmulState, QuantizedLayer};
pub use param::{EncodingState, QuantConfig, QuantizedParameter};
pub use stats::{QuantScheme, StatisticsBlob};
pub use tensor::{DType, Device, Tensor};
