//! Quantization statistics
//!
//! Everything needed to decode a quantized buffer travels in a
//! [`StatisticsBlob`]: per-row or per-block scales, an optional nested
//! (double-quantized) level, the scheme tag, the original shape/dtype and,
//! once a fused-kernel layout has been applied, a [`LayoutTag`].

mod blob;
mod layout;
mod scheme;


pub use blob::{NestedStatistics, StatisticsBlob, MAX_STATISTICS_DEPTH, STATISTICS_VERSION};
pub use layout::{LayoutTag, TILE_COLS, TILE_ROWS};
pub use scheme::QuantScheme;
