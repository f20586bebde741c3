//! Host implementation of [`QuantKernel`]

use ndarray::{Array2, ArrayView2};
use tracing::trace;

use super::codebook;
use super::four_bit::{self, NESTED_BLOCK_SIZE};
use super::int8::{self, CodeView};
use super::{MatmulOutput, QuantKernel};
use crate::nn::MatmulState;
use crate::param::{EncodingState, QuantConfig, QuantizedParameter};
use crate::stats::{LayoutTag, QuantScheme, StatisticsBlob};
use crate::tensor::{DType, Tensor};
use crate::{Error, Result};

/// Straightforward host kernels: row-wise int8 with outlier decomposition,
/// blockwise NF4/FP4 and the 8x32 tile layout
#[derive(Clone, Copy, Debug, Default)]
pub struct ReferenceKernel;

impl ReferenceKernel {
    pub fn new() -> Self {
        Self
    }

    fn encode_int8(&self, tensor: &Tensor) -> Result<(Tensor, StatisticsBlob)> {
        let (rows, cols) = weight_dims(tensor.shape())?;
        let (codes, scales) = int8::quantize_rows(tensor.as_f32()?, rows, cols);

        let mut buffer = Tensor::from_i8(codes, &[rows, cols])?;
        buffer.move_to(tensor.device());
        let mut stats = StatisticsBlob::new(
            QuantScheme::Int8RowMajor,
            Tensor::from_vec(scales, &[rows])?,
            cols,
            tensor.shape(),
            tensor.dtype(),
        );
        stats.move_to(tensor.device());
        Ok((buffer, stats))
    }

    fn encode_four_bit(&self, tensor: &Tensor, config: &QuantConfig) -> Result<(Tensor, StatisticsBlob)> {
        let values = tensor.as_f32()?;
        let q = four_bit::quantize_blockwise(values, config.scheme, config.block_size);
        let blocks = q.absmax.len();

        let mut buffer = Tensor::from_u8(q.packed, &[values.len().div_ceil(2), 1])?;
        buffer.move_to(tensor.device());

        let levels = codebook::four_bit_levels(config.scheme)?;
        let code = Tensor::from_vec(levels.to_vec(), &[levels.len()])?;

        let mut stats = if config.compress_statistics {
            let compressed = four_bit::compress_scales(&q.absmax);
            let inner_len = compressed.absmax.len();
            let nested = StatisticsBlob::new(
                QuantScheme::Int8RowMajor,
                Tensor::from_vec(compressed.absmax, &[inner_len])?,
                NESTED_BLOCK_SIZE,
                &[blocks],
                DType::F32,
            )
            .with_code(Tensor::from_vec(
                codebook::nested_levels(),
                &[codebook::NESTED_LEVELS],
            )?);
            StatisticsBlob::new(
                config.scheme,
                Tensor::from_u8(compressed.codes, &[blocks])?,
                config.block_size,
                tensor.shape(),
                tensor.dtype(),
            )
            .with_code(code)
            .with_nested(Tensor::from_vec(vec![compressed.offset], &[1])?, nested)
        } else {
            StatisticsBlob::new(
                config.scheme,
                Tensor::from_vec(q.absmax, &[blocks])?,
                config.block_size,
                tensor.shape(),
                tensor.dtype(),
            )
            .with_code(code)
        };
        stats.move_to(tensor.device());
        Ok((buffer, stats))
    }

    fn decode_int8(&self, buffer: &Tensor, stats: &StatisticsBlob) -> Result<Vec<f32>> {
        let (rows, cols) = weight_dims(&stats.original_shape)?;
        let codes = buffer.as_i8()?;
        if codes.len() != rows * cols {
            return Err(Error::shape(&stats.original_shape, buffer.shape()));
        }
        let scales = stats.scale.as_f32()?;
        if scales.len() != rows {
            return Err(Error::shape(&[rows], stats.scale.shape()));
        }
        let view = match &stats.layout_tag {
            Some(tag) => CodeView::Tiled { codes, tag },
            None => CodeView::RowMajor { codes, cols },
        };
        Ok(int8::dequantize_rows(&view, scales, rows, cols))
    }

    fn decode_four_bit(&self, buffer: &Tensor, stats: &StatisticsBlob) -> Result<Vec<f32>> {
        let len: usize = stats.original_shape.iter().product();
        let packed = buffer.as_u8()?;
        if packed.len() != len.div_ceil(2) {
            return Err(Error::shape(&[len.div_ceil(2), 1], buffer.shape()));
        }
        let block_size = stats.block_size.max(1);
        let scales = stats.effective_scale()?;
        if scales.len() != len.div_ceil(block_size) {
            return Err(Error::shape(&[len.div_ceil(block_size)], &[scales.len()]));
        }
        let levels = match &stats.code {
            Some(code) => code.as_f32()?.to_vec(),
            None => codebook::four_bit_levels(stats.scheme)?.to_vec(),
        };
        if levels.len() != 16 {
            return Err(Error::shape(&[16], &[levels.len()]));
        }
        Ok(four_bit::dequantize_blockwise(
            packed, len, &scales, &levels, block_size,
        ))
    }

    /// Quantize a full-precision weight on the fly and multiply
    fn matmul_full_precision_weight(
        &self,
        x: &Tensor,
        weight: &Tensor,
        bias: Option<&Tensor>,
        threshold: f32,
    ) -> Result<Tensor> {
        let (n, in_features) = x.matrix_dims()?;
        let (out_features, w_in) = weight_dims(weight.shape())?;
        if w_in != in_features {
            return Err(Error::shape(&[out_features, in_features], weight.shape()));
        }
        let (codes, scb) = int8::quantize_rows(weight.as_f32()?, out_features, in_features);
        let view = CodeView::RowMajor {
            codes: &codes,
            cols: in_features,
        };
        let y = int8::mixed_matmul(x.as_f32()?, n, in_features, &view, &scb, out_features, threshold);
        finish_output(x, y, out_features, bias)
    }
}

impl QuantKernel for ReferenceKernel {
    fn encode(&self, tensor: &Tensor, config: &QuantConfig) -> Result<(Tensor, StatisticsBlob)> {
        config.validate()?;
        if !tensor.dtype().is_float() {
            return Err(Error::DTypeMismatch {
                expected: "floating point weight".into(),
                got: tensor.dtype().to_string(),
            });
        }
        trace!(scheme = %config.scheme, shape = ?tensor.shape(), "encode");
        match config.scheme {
            QuantScheme::Int8RowMajor => self.encode_int8(tensor),
            QuantScheme::Fp4 | QuantScheme::Nf4 => self.encode_four_bit(tensor, config),
            QuantScheme::Int8FusedLayout => Err(Error::UnsupportedScheme(
                QuantScheme::Int8FusedLayout.to_string(),
            )),
        }
    }

    fn decode(&self, buffer: &Tensor, stats: &StatisticsBlob) -> Result<Tensor> {
        stats.validate()?;
        let values = if stats.scheme.is_int8() {
            self.decode_int8(buffer, stats)?
        } else {
            self.decode_four_bit(buffer, stats)?
        };
        let mut out = Tensor::from_vec(values, &stats.original_shape)?.cast(stats.original_dtype)?;
        out.move_to(buffer.device());
        Ok(out)
    }

    fn layout_transform(&self, buffer: &Tensor) -> Result<(Tensor, LayoutTag)> {
        let (rows, cols) = weight_dims(buffer.shape())?;
        let tag = LayoutTag::tiled(rows, cols);
        let tiled = int8::to_tiled(buffer.as_i8()?, &tag);
        let mut out = Tensor::from_i8(tiled, &[rows * cols])?;
        out.move_to(buffer.device());
        Ok((out, tag))
    }

    fn undo_layout(&self, tiled: &Tensor, tag: &LayoutTag) -> Result<Tensor> {
        tag.check_len(tiled.numel())?;
        let codes = int8::from_tiled(tiled.as_i8()?, tag);
        let mut out = Tensor::from_i8(codes, &tag.shape())?;
        out.move_to(tiled.device());
        Ok(out)
    }

    fn fused_matmul(
        &self,
        x: &Tensor,
        weight: &QuantizedParameter,
        bias: Option<&Tensor>,
        state: &MatmulState,
    ) -> Result<MatmulOutput> {
        if weight.encoding() == EncodingState::FullPrecision {
            let output = self.matmul_full_precision_weight(x, weight.data(), bias, state.threshold)?;
            return Ok(MatmulOutput {
                output,
                transformed: None,
            });
        }

        let stats = state
            .statistics
            .as_ref()
            .or_else(|| weight.statistics())
            .ok_or_else(|| {
                Error::MissingQuantizationStatistics(format!(
                    "weight is {} but no row scales are available",
                    weight.encoding()
                ))
            })?;
        if !stats.scheme.is_int8() {
            return Err(Error::UnsupportedScheme(format!(
                "{} weight passed to the int8 matmul",
                stats.scheme
            )));
        }

        let (n, in_features) = x.matrix_dims()?;
        let (out_features, w_in) = weight_dims(&stats.original_shape)?;
        if w_in != in_features {
            return Err(Error::shape(&[out_features, in_features], &stats.original_shape));
        }
        let scb = stats.scale.as_f32()?;
        if scb.len() != out_features {
            return Err(Error::shape(&[out_features], stats.scale.shape()));
        }
        let payload = weight.has_cached_payload().then(|| weight.data());

        let (view, transformed) = match &stats.layout_tag {
            Some(tag) => {
                let tiled = state.tiled.as_ref().or(payload).ok_or_else(|| {
                    Error::MissingQuantizationStatistics("tiled weight buffer is missing".into())
                })?;
                tag.check_len(tiled.numel())?;
                (
                    CodeView::Tiled {
                        codes: tiled.as_i8()?,
                        tag,
                    },
                    None,
                )
            }
            None => {
                let row_major = state.row_major.as_ref().or(payload).ok_or_else(|| {
                    Error::MissingQuantizationStatistics("row-major weight buffer is missing".into())
                })?;
                if row_major.numel() != out_features * in_features {
                    return Err(Error::shape(&stats.original_shape, row_major.shape()));
                }
                let transformed = if !state.has_full_precision_weights
                    && row_major.device().is_accelerator()
                {
                    Some(self.layout_transform(row_major)?)
                } else {
                    None
                };
                (
                    CodeView::RowMajor {
                        codes: row_major.as_i8()?,
                        cols: in_features,
                    },
                    transformed,
                )
            }
        };

        let y = int8::mixed_matmul(
            x.as_f32()?,
            n,
            in_features,
            &view,
            scb,
            out_features,
            state.threshold,
        );
        Ok(MatmulOutput {
            output: finish_output(x, y, out_features, bias)?,
            transformed,
        })
    }

    fn matmul_4bit(
        &self,
        x: &Tensor,
        weight: &Tensor,
        stats: &StatisticsBlob,
        bias: Option<&Tensor>,
    ) -> Result<Tensor> {
        if !stats.scheme.is_four_bit() {
            return Err(Error::UnsupportedScheme(format!(
                "{} weight passed to the 4-bit matmul",
                stats.scheme
            )));
        }
        let (n, in_features) = x.matrix_dims()?;
        let (out_features, w_in) = weight_dims(&stats.original_shape)?;
        if w_in != in_features {
            return Err(Error::shape(&[out_features, in_features], &stats.original_shape));
        }
        let w = self.decode(weight, stats)?;
        let y = dense_matmul(x.as_f32()?, n, in_features, w.as_f32()?, out_features)?;
        finish_output(x, y, out_features, bias)
    }
}

/// `[out, in]` from a 2-D weight shape
fn weight_dims(shape: &[usize]) -> Result<(usize, usize)> {
    match shape {
        [rows, cols] => Ok((*rows, *cols)),
        other => Err(Error::InvalidParameter(format!(
            "expected a 2-D weight, got shape {other:?}"
        ))),
    }
}

/// Dense `x @ W^T + bias` against a weight that was never quantized
pub(crate) fn dense_linear(x: &Tensor, weight: &Tensor, bias: Option<&Tensor>) -> Result<Tensor> {
    let (n, in_features) = x.matrix_dims()?;
    let (out_features, w_in) = weight_dims(weight.shape())?;
    if w_in != in_features {
        return Err(Error::shape(&[out_features, in_features], weight.shape()));
    }
    let y = dense_matmul(x.as_f32()?, n, in_features, weight.as_f32()?, out_features)?;
    finish_output(x, y, out_features, bias)
}

/// `x @ W^T` in f32
pub(crate) fn dense_matmul(
    x: &[f32],
    n: usize,
    in_features: usize,
    w: &[f32],
    out_features: usize,
) -> Result<Vec<f32>> {
    let x = ArrayView2::from_shape((n, in_features), x)
        .map_err(|e| Error::InvalidParameter(e.to_string()))?;
    let w = ArrayView2::from_shape((out_features, in_features), w)
        .map_err(|e| Error::InvalidParameter(e.to_string()))?;
    let y: Array2<f32> = x.dot(&w.t());
    Ok(y.iter().copied().collect())
}

/// Add bias, restore the leading dims, and match the input's dtype and device
fn finish_output(x: &Tensor, mut y: Vec<f32>, out_features: usize, bias: Option<&Tensor>) -> Result<Tensor> {
    if let Some(bias) = bias {
        let b = bias.as_f32()?;
        if b.len() != out_features {
            return Err(Error::shape(&[out_features], bias.shape()));
        }
        for row in y.chunks_mut(out_features.max(1)) {
            for (v, &bv) in row.iter_mut().zip(b) {
                *v += bv;
            }
        }
    }

    let mut shape = x.shape().to_vec();
    if let Some(last) = shape.last_mut() {
        *last = out_features;
    }
    let mut out = Tensor::from_vec(y, &shape)?.cast(x.dtype())?;
    out.move_to(x.device());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Device;
    use approx::assert_abs_diff_eq;

    fn weight(rows: usize, cols: usize) -> Tensor {
        let data = (0..rows * cols).map(|i| ((i * 13 % 29) as f32 - 14.0) / 10.0).collect();
        Tensor::from_vec(data, &[rows, cols]).unwrap()
    }

    #[test]
    fn test_encode_int8_shapes() {
        let kernel = ReferenceKernel::new();
        let (buffer, stats) = kernel.encode(&weight(8, 16), &QuantConfig::int8(false)).unwrap();
        assert_eq!(buffer.shape(), &[8, 16]);
        assert_eq!(buffer.dtype(), DType::I8);
        assert_eq!(stats.scale.shape(), &[8]);
        assert_eq!(stats.scheme, QuantScheme::Int8RowMajor);
        assert!(stats.layout_tag.is_none());
    }

    #[test]
    fn test_encode_keeps_device() {
        let kernel = ReferenceKernel::new();
        let w = weight(4, 64).to_device(Device::Cuda(0));
        let (buffer, stats) = kernel.encode(&w, &QuantConfig::nf4()).unwrap();
        assert_eq!(buffer.device(), Device::Cuda(0));
        assert!(stats.devices().iter().all(|&d| d == Device::Cuda(0)));
    }

    #[test]
    fn test_encode_four_bit_layout() {
        let kernel = ReferenceKernel::new();
        let config = QuantConfig::fp4().with_compress_statistics(false);
        let (buffer, stats) = kernel.encode(&weight(3, 7), &config).unwrap();
        assert_eq!(buffer.shape(), &[11, 1]);
        assert_eq!(buffer.dtype(), DType::U8);
        assert_eq!(stats.scale.shape(), &[1]);
        assert!(stats.nested.is_none());
        assert_eq!(stats.original_shape, vec![3, 7]);
    }

    #[test]
    fn test_encode_rejects_integer_input() {
        let kernel = ReferenceKernel::new();
        let codes = Tensor::from_i8(vec![1; 4], &[2, 2]).unwrap();
        assert!(kernel.encode(&codes, &QuantConfig::int8(false)).is_err());
    }

    #[test]
    fn test_decode_shape_mismatch() {
        let kernel = ReferenceKernel::new();
        let (buffer, mut stats) = kernel.encode(&weight(4, 8), &QuantConfig::int8(false)).unwrap();
        stats.original_shape = vec![4, 9];
        assert!(matches!(
            kernel.decode(&buffer, &stats),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_nested_four_bit() {
        let kernel = ReferenceKernel::new();
        let w = weight(16, 64);
        let (buffer, stats) = kernel.encode(&w, &QuantConfig::nf4()).unwrap();
        assert_eq!(stats.depth(), 2);
        let back = kernel.decode(&buffer, &stats).unwrap();
        let scales = stats.effective_scale().unwrap();
        for (i, (&a, &b)) in w.as_f32().unwrap().iter().zip(back.as_f32().unwrap()).enumerate() {
            // level spacing plus the nested scale error
            let bound = scales[i / 64].abs() / 6.0 + 0.02;
            assert!((a - b).abs() <= bound, "index {i}: {a} vs {b}");
        }
    }

    #[test]
    fn test_layout_round_trip_preserves_device() {
        let kernel = ReferenceKernel::new();
        let (buffer, _) = kernel.encode(&weight(9, 40), &QuantConfig::int8(false)).unwrap();
        let buffer = buffer.to_device(Device::Cuda(0));
        let (tiled, tag) = kernel.layout_transform(&buffer).unwrap();
        assert_eq!(tiled.shape(), &[360]);
        let back = kernel.undo_layout(&tiled, &tag).unwrap();
        assert_eq!(back, buffer);
    }

    #[test]
    fn test_undo_layout_rejects_wrong_tag() {
        let kernel = ReferenceKernel::new();
        let tiled = Tensor::from_i8(vec![0; 12], &[12]).unwrap();
        assert!(kernel.undo_layout(&tiled, &LayoutTag::tiled(4, 4)).is_err());
    }

    #[test]
    fn test_matmul_4bit_rejects_int8_stats() {
        let kernel = ReferenceKernel::new();
        let (buffer, stats) = kernel.encode(&weight(4, 8), &QuantConfig::int8(false)).unwrap();
        let x = Tensor::zeros(&[1, 8], DType::F32);
        assert!(matches!(
            kernel.matmul_4bit(&x, &buffer, &stats, None),
            Err(Error::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_matmul_4bit_matches_decoded_dense() {
        let kernel = ReferenceKernel::new();
        let (buffer, stats) = kernel
            .encode(&weight(4, 64), &QuantConfig::fp4())
            .unwrap();
        let w = kernel.decode(&buffer, &stats).unwrap();
        let x = Tensor::from_vec((0..128).map(|i| (i as f32 * 0.1).cos()).collect(), &[2, 64]).unwrap();
        let bias = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], &[4]).unwrap();
        let y = kernel.matmul_4bit(&x, &buffer, &stats, Some(&bias)).unwrap();
        assert_eq!(y.shape(), &[2, 4]);
        let expected = dense_matmul(x.as_f32().unwrap(), 2, 64, w.as_f32().unwrap(), 4).unwrap();
        for (i, (&a, &b)) in y.as_f32().unwrap().iter().zip(&expected).enumerate() {
            assert_abs_diff_eq!(a, b + (i % 4 + 1) as f32, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_dense_matmul() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let w = [1.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let y = dense_matmul(&x, 2, 2, &w, 3).unwrap();
        assert_eq!(y, vec![1.0, 2.0, 3.0, 3.0, 4.0, 7.0]);
    }
}
