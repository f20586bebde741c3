//! Statistics blob carried alongside every quantized buffer

use super::{LayoutTag, QuantScheme};
use crate::tensor::{DType, Device, Tensor};
use crate::{Error, Result};

/// Current blob format version
pub const STATISTICS_VERSION: u32 = 1;

/// Top-level blob plus at most one nested level
pub const MAX_STATISTICS_DEPTH: usize = 2;

/// Second-level statistics for double-quantized scales
///
/// The parent's `scale` then holds u8 codes; decoding one is
/// `stats.code[c] * stats.scale[i / stats.block_size] + offset`.
#[derive(Clone, Debug, PartialEq)]
pub struct NestedStatistics {
    /// Mean subtracted from the parent scales before quantizing them
    pub offset: Tensor,
    pub stats: Box<StatisticsBlob>,
}

/// Everything needed to decode one quantized buffer
#[derive(Clone, Debug, PartialEq)]
pub struct StatisticsBlob {
    pub version: u32,
    pub scheme: QuantScheme,
    /// Per-row (int8) or per-block (4-bit) absmax, or u8 codes when nested
    pub scale: Tensor,
    /// Codebook mapping codes to normalized values; None for int8 row-wise
    pub code: Option<Tensor>,
    pub nested: Option<NestedStatistics>,
    /// Elements covered by one scale entry
    pub block_size: usize,
    pub original_shape: Vec<usize>,
    pub original_dtype: DType,
    /// Present only once a fused-kernel layout has been applied
    pub layout_tag: Option<LayoutTag>,
}

impl StatisticsBlob {
    pub fn new(
        scheme: QuantScheme,
        scale: Tensor,
        block_size: usize,
        original_shape: &[usize],
        original_dtype: DType,
    ) -> Self {
        Self {
            version: STATISTICS_VERSION,
            scheme,
            scale,
            code: None,
            nested: None,
            block_size,
            original_shape: original_shape.to_vec(),
            original_dtype,
            layout_tag: None,
        }
    }

    pub fn with_code(mut self, code: Tensor) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_nested(mut self, offset: Tensor, stats: StatisticsBlob) -> Self {
        self.nested = Some(NestedStatistics {
            offset,
            stats: Box::new(stats),
        });
        self
    }

    /// Number of levels, counting this one
    pub fn depth(&self) -> usize {
        1 + self.nested.as_ref().map_or(0, |n| n.stats.depth())
    }

    /// Check version, nesting depth and scale encodings
    pub fn validate(&self) -> Result<()> {
        if self.version != STATISTICS_VERSION {
            return Err(Error::InvalidParameter(format!(
                "statistics version {} is not supported (expected {STATISTICS_VERSION})",
                self.version
            )));
        }
        if self.depth() > MAX_STATISTICS_DEPTH {
            return Err(Error::InvalidParameter(format!(
                "statistics nested {} levels deep, at most {MAX_STATISTICS_DEPTH} allowed",
                self.depth()
            )));
        }
        match &self.nested {
            Some(nested) => {
                self.scale.as_u8()?;
                let per_block = nested.stats.block_size.max(1);
                let expected = self.scale.numel().div_ceil(per_block);
                if nested.stats.scale.numel() != expected {
                    return Err(Error::shape(&[expected], nested.stats.scale.shape()));
                }
                nested.stats.validate()
            }
            None => self.scale.as_f32().map(|_| ()),
        }
    }

    /// Device of the top-level scale
    pub fn device(&self) -> Device {
        self.scale.device()
    }

    /// Device of every device-bound field at every level
    pub fn devices(&self) -> Vec<Device> {
        let mut out = vec![self.scale.device()];
        if let Some(code) = &self.code {
            out.push(code.device());
        }
        if let Some(nested) = &self.nested {
            out.push(nested.offset.device());
            out.extend(nested.stats.devices());
        }
        out
    }

    /// Re-home every device-bound field, recursing into nested levels
    pub fn move_to(&mut self, target: Device) {
        self.scale.move_to(target);
        if let Some(code) = &mut self.code {
            code.move_to(target);
        }
        if let Some(nested) = &mut self.nested {
            nested.offset.move_to(target);
            nested.stats.move_to(target);
        }
    }

    fn flat_targets(&self) -> Vec<&Tensor> {
        let mut out = vec![&self.scale];
        if let Some(nested) = &self.nested {
            out.push(&nested.offset);
            out.extend(nested.stats.flat_targets());
        }
        out
    }

    fn flat_targets_mut(&mut self) -> Vec<&mut Tensor> {
        let mut out = vec![&mut self.scale];
        if let Some(nested) = &mut self.nested {
            out.push(&mut nested.offset);
            out.extend(nested.stats.flat_targets_mut());
        }
        out
    }

    /// Length of the flat side-channel form
    pub fn flat_len(&self) -> usize {
        self.flat_targets().iter().map(|t| t.numel()).sum()
    }

    /// Flat side-channel form: `scale ++ [offset ++ nested scale]`
    ///
    /// Codebooks are implied by the scheme and are not included.
    pub fn to_flat(&self) -> Vec<f32> {
        self.flat_targets()
            .into_iter()
            .flat_map(|t| t.to_f32_vec())
            .collect()
    }

    /// Overwrite the statistics in place from their flat form
    ///
    /// Every segment is decoded before anything is written, so a rejected
    /// input leaves the blob untouched.
    pub fn copy_from_flat(&mut self, values: &[f32]) -> Result<()> {
        let expected = self.flat_len();
        if values.len() != expected {
            return Err(Error::shape(&[expected], &[values.len()]));
        }

        let mut staged = Vec::new();
        let mut cursor = 0;
        for target in self.flat_targets() {
            let n = target.numel();
            staged.push(tensor_like(&values[cursor..cursor + n], target)?);
            cursor += n;
        }

        for (dst, src) in self.flat_targets_mut().into_iter().zip(&staged) {
            dst.copy_from(src)?;
        }
        Ok(())
    }

    /// Decoded scale per row or block, whether or not nesting is applied
    pub fn effective_scale(&self) -> Result<Vec<f32>> {
        let Some(nested) = &self.nested else {
            return Ok(self.scale.as_f32()?.to_vec());
        };

        let codes = self.scale.as_u8()?;
        let inner = nested.stats.effective_scale()?;
        let codebook = nested
            .stats
            .code
            .as_ref()
            .ok_or_else(|| Error::MissingQuantizationStatistics("nested codebook".into()))?
            .as_f32()?;
        let offset = nested.offset.as_f32()?.first().copied().unwrap_or(0.0);
        let per_block = nested.stats.block_size.max(1);

        codes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                let level = codebook.get(usize::from(c));
                let absmax = inner.get(i / per_block);
                match (level, absmax) {
                    (Some(level), Some(absmax)) => Ok(level * absmax + offset),
                    _ => Err(Error::MissingQuantizationStatistics(format!(
                        "nested statistics do not cover scale entry {i}"
                    ))),
                }
            })
            .collect()
    }

    /// Bytes held by this blob, nested levels included
    pub fn memory_bytes(&self) -> usize {
        let own = self.scale.memory_bytes() + self.code.as_ref().map_or(0, Tensor::memory_bytes);
        let nested = self
            .nested
            .as_ref()
            .map_or(0, |n| n.offset.memory_bytes() + n.stats.memory_bytes());
        own + nested
    }

    /// Record that the paired buffer now uses the fused-kernel layout
    pub fn mark_layout(&mut self, tag: LayoutTag) {
        self.scheme = QuantScheme::Int8FusedLayout;
        self.layout_tag = Some(tag);
    }
}

/// Decode a flat segment into a tensor shaped and typed like `like`
fn tensor_like(values: &[f32], like: &Tensor) -> Result<Tensor> {
    let shape = like.shape();
    match like.dtype() {
        DType::U8 => {
            let codes = values
                .iter()
                .map(|&v| integral_in(v, 0.0, 255.0).map(|v| v as u8))
                .collect::<Result<Vec<_>>>()?;
            Tensor::from_u8(codes, shape)
        }
        DType::I8 => {
            let codes = values
                .iter()
                .map(|&v| integral_in(v, -128.0, 127.0).map(|v| v as i8))
                .collect::<Result<Vec<_>>>()?;
            Tensor::from_i8(codes, shape)
        }
        dtype => Tensor::from_vec(values.to_vec(), shape)?.cast(dtype),
    }
}

fn integral_in(v: f32, lo: f32, hi: f32) -> Result<f32> {
    if v.is_finite() && v.fract() == 0.0 && (lo..=hi).contains(&v) {
        Ok(v)
    } else {
        Err(Error::Serialization(format!(
            "statistics code {v} is not an integer in [{lo}, {hi}]"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn nested_blob() -> StatisticsBlob {
        let codebook: Vec<f32> = (0..255).map(|i| (i as f32 - 127.0) / 127.0).collect();
        let inner = StatisticsBlob::new(
            QuantScheme::Int8RowMajor,
            Tensor::from_vec(vec![2.0], &[1]).unwrap(),
            256,
            &[3],
            DType::F32,
        )
        .with_code(Tensor::from_vec(codebook, &[255]).unwrap());

        StatisticsBlob::new(
            QuantScheme::Nf4,
            Tensor::from_u8(vec![127, 254, 0], &[3]).unwrap(),
            64,
            &[8, 24],
            DType::F32,
        )
        .with_code(Tensor::zeros(&[16], DType::F32))
        .with_nested(Tensor::from_vec(vec![0.5], &[1]).unwrap(), inner)
    }

    #[test]
    fn test_depth_and_validate() {
        let blob = nested_blob();
        assert_eq!(blob.depth(), 2);
        blob.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_third_level() {
        let mut blob = nested_blob();
        let deeper = blob.clone();
        if let Some(nested) = &mut blob.nested {
            nested.stats = Box::new(deeper);
        }
        assert_eq!(blob.depth(), 3);
        assert!(blob.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_foreign_version() {
        let mut blob = nested_blob();
        blob.version = STATISTICS_VERSION + 1;
        assert!(matches!(blob.validate(), Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn test_move_to_relocates_every_level() {
        let mut blob = nested_blob();
        blob.move_to(Device::Cuda(1));
        let devices = blob.devices();
        // scale, code, offset, nested scale, nested code
        assert_eq!(devices.len(), 5);
        assert!(devices.iter().all(|&d| d == Device::Cuda(1)));
    }

    #[test]
    fn test_flat_layout() {
        let blob = nested_blob();
        assert_eq!(blob.flat_len(), 3 + 1 + 1);
        assert_eq!(blob.to_flat(), vec![127.0, 254.0, 0.0, 0.5, 2.0]);
    }

    #[test]
    fn test_copy_from_flat_in_place() {
        let mut blob = nested_blob();
        let ptr = blob.scale.storage_ptr();
        blob.copy_from_flat(&[1.0, 2.0, 3.0, -0.25, 4.0]).unwrap();
        assert_eq!(blob.scale.storage_ptr(), ptr);
        assert_eq!(blob.to_flat(), vec![1.0, 2.0, 3.0, -0.25, 4.0]);
    }

    #[test]
    fn test_copy_from_flat_wrong_length() {
        let mut blob = nested_blob();
        let err = blob.copy_from_flat(&[1.0, 2.0]).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn test_copy_from_flat_bad_code_leaves_blob_untouched() {
        let mut blob = nested_blob();
        let before = blob.clone();
        assert!(blob.copy_from_flat(&[1.0, 2.0, 300.0, 0.0, 1.0]).is_err());
        assert_eq!(blob, before);
    }

    #[test]
    fn test_effective_scale_nested() {
        let blob = nested_blob();
        let scale = blob.effective_scale().unwrap();
        // code 127 -> 0.0, 254 -> 1.0, 0 -> -1.0; times absmax 2.0 plus offset 0.5
        assert_abs_diff_eq!(scale[0], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(scale[1], 2.5, epsilon = 1e-6);
        assert_abs_diff_eq!(scale[2], -1.5, epsilon = 1e-6);
    }

    #[test]
    fn test_effective_scale_plain() {
        let blob = StatisticsBlob::new(
            QuantScheme::Int8RowMajor,
            Tensor::from_vec(vec![1.0, 3.0], &[2]).unwrap(),
            4,
            &[2, 4],
            DType::F16,
        );
        assert_eq!(blob.effective_scale().unwrap(), vec![1.0, 3.0]);
    }

    #[test]
    fn test_memory_bytes_counts_nested() {
        let blob = nested_blob();
        // u8 scale 3 + code 16*4 + offset 4 + nested scale 4 + nested code 255*4
        assert_eq!(blob.memory_bytes(), 3 + 64 + 4 + 4 + 1020);
    }

    #[test]
    fn test_mark_layout() {
        let mut blob = StatisticsBlob::new(
            QuantScheme::Int8RowMajor,
            Tensor::from_vec(vec![1.0; 8], &[8]).unwrap(),
            16,
            &[8, 16],
            DType::F32,
        );
        blob.mark_layout(LayoutTag::tiled(8, 16));
        assert_eq!(blob.scheme, QuantScheme::Int8FusedLayout);
        assert!(blob.layout_tag.is_some());
    }
}
