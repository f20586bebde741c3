//! Quantization kernel interface
//!
//! [`QuantKernel`] is the boundary between the parameter lifecycle and the
//! numeric kernels: encode/decode, the fused-layout transform and its
//! inverse, and the two matmul variants. [`ReferenceKernel`] implements it on
//! the host.

pub mod codebook;
pub mod four_bit;
pub mod int8;
mod reference;


pub use reference::ReferenceKernel;

pub(crate) use reference::dense_linear;

use crate::nn::MatmulState;
use crate::param::{QuantConfig, QuantizedParameter};
use crate::stats::{LayoutTag, StatisticsBlob};
use crate::tensor::Tensor;
use crate::Result;

/// Output of a fused int8 matmul
#[derive(Debug)]
pub struct MatmulOutput {
    pub output: Tensor,
    /// Set on the first call against a row-major buffer that should be tiled;
    /// the caller adopts it in place of the row-major buffer.
    pub transformed: Option<(Tensor, LayoutTag)>,
}

/// Numeric kernels behind the quantized layers
///
/// # Contract
///
/// - `decode(encode(t))` approximates `t` within the scheme's error bound.
/// - `undo_layout(layout_transform(b))` reproduces `b` exactly.
/// - Matmul inputs are `[..., in_features]` and outputs `[..., out_features]`
///   in the input's dtype and device.
pub trait QuantKernel {
    /// Quantize `tensor` per `config`, returning the buffer and its statistics
    fn encode(&self, tensor: &Tensor, config: &QuantConfig) -> Result<(Tensor, StatisticsBlob)>;

    /// Reconstruct an approximation of the original tensor
    fn decode(&self, buffer: &Tensor, stats: &StatisticsBlob) -> Result<Tensor>;

    /// Reorder a row-major int8 buffer into the fused-kernel layout
    fn layout_transform(&self, buffer: &Tensor) -> Result<(Tensor, LayoutTag)>;

    /// Inverse of [`layout_transform`](Self::layout_transform)
    fn undo_layout(&self, tiled: &Tensor, tag: &LayoutTag) -> Result<Tensor>;

    /// `x @ W^T + bias` against an int8 (or not yet quantized) weight
    fn fused_matmul(
        &self,
        x: &Tensor,
        weight: &QuantizedParameter,
        bias: Option<&Tensor>,
        state: &MatmulState,
    ) -> Result<MatmulOutput>;

    /// `x @ W^T + bias` against a packed 4-bit weight
    fn matmul_4bit(
        &self,
        x: &Tensor,
        weight: &Tensor,
        stats: &StatisticsBlob,
        bias: Option<&Tensor>,
    ) -> Result<Tensor>;
}
