//! Layer-side state for the int8 matmul

use crate::stats::{LayoutTag, StatisticsBlob};
use crate::tensor::{Device, Tensor};

/// Matmul settings plus the quantized buffers handed off by the weight
///
/// After the hand-off exactly one of `row_major` / `tiled` holds the weight
/// codes and `statistics` holds their row scales.
#[derive(Clone, Debug, Default)]
pub struct MatmulState {
    /// Input magnitude at or above which a column is treated as an outlier
    pub threshold: f32,
    pub has_full_precision_weights: bool,
    /// Mirrored from the owning layer on every forward call
    pub is_training: bool,
    /// Row-major int8 codes
    pub row_major: Option<Tensor>,
    /// Int8 codes in the fused-kernel tile layout
    pub tiled: Option<Tensor>,
    /// Row scales (and layout tag once tiled)
    pub statistics: Option<StatisticsBlob>,
}

impl MatmulState {
    pub fn new(threshold: f32, has_full_precision_weights: bool) -> Self {
        Self {
            threshold,
            has_full_precision_weights,
            ..Self::default()
        }
    }

    /// Outlier pooling applies only to quantized weights with a positive threshold
    pub fn use_pool(&self) -> bool {
        self.threshold > 0.0 && !self.has_full_precision_weights
    }

    /// True once the weight's buffer and statistics live here
    pub fn has_payload(&self) -> bool {
        self.statistics.is_some() && (self.row_major.is_some() || self.tiled.is_some())
    }

    pub fn layout_tag(&self) -> Option<&LayoutTag> {
        self.statistics.as_ref().and_then(|s| s.layout_tag.as_ref())
    }

    /// Re-home every buffer held here
    pub fn move_to(&mut self, target: Device) {
        for buffer in [&mut self.row_major, &mut self.tiled].into_iter().flatten() {
            buffer.move_to(target);
        }
        if let Some(stats) = &mut self.statistics {
            stats.move_to(target);
        }
    }

    /// Replace the row-major codes with their tiled form
    pub(crate) fn adopt_tiled(&mut self, tiled: Tensor, tag: LayoutTag) {
        self.row_major = None;
        self.tiled = Some(tiled);
        if let Some(stats) = &mut self.statistics {
            stats.mark_layout(tag);
        }
    }
}
