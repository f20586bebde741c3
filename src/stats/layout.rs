//! Tiled memory layout used by the fused int8 kernel
//!
//! A row-major `[rows, cols]` matrix is cut into tiles of
//! [`TILE_ROWS`] x [`TILE_COLS`]. Tiles are stored one after another in
//! row-major tile order and elements inside a tile are row-major. Tiles on
//! the bottom and right edges are clamped to the matrix, so the mapping is a
//! bijection for every shape and needs no padding.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Rows per tile
pub const TILE_ROWS: usize = 8;
/// Columns per tile
pub const TILE_COLS: usize = 32;

/// Opaque token describing how a buffer was reordered
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawLayoutTag")]
pub struct LayoutTag {
    rows: usize,
    cols: usize,
    tile_rows: usize,
    tile_cols: usize,
}

#[derive(Deserialize)]
struct RawLayoutTag {
    rows: usize,
    cols: usize,
    tile_rows: usize,
    tile_cols: usize,
}

impl TryFrom<RawLayoutTag> for LayoutTag {
    type Error = Error;

    fn try_from(raw: RawLayoutTag) -> Result<Self> {
        if raw.tile_rows == 0 || raw.tile_cols == 0 {
            return Err(Error::InvalidParameter(format!(
                "layout tile must be non-empty, got {}x{}",
                raw.tile_rows, raw.tile_cols
            )));
        }
        Ok(Self {
            rows: raw.rows,
            cols: raw.cols,
            tile_rows: raw.tile_rows,
            tile_cols: raw.tile_cols,
        })
    }
}

impl LayoutTag {
    /// Tag for the standard tiling of a `[rows, cols]` matrix
    pub fn tiled(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            tile_rows: TILE_ROWS,
            tile_cols: TILE_COLS,
        }
    }

    /// Row-major shape the tag was computed for
    pub fn shape(&self) -> [usize; 2] {
        [self.rows, self.cols]
    }

    pub fn numel(&self) -> usize {
        self.rows * self.cols
    }

    /// Position of row-major element `(row, col)` inside the tiled buffer
    #[inline]
    pub fn index_of(&self, row: usize, col: usize) -> usize {
        let band = row / self.tile_rows;
        let band_height = self.tile_rows.min(self.rows - band * self.tile_rows);
        let tile = col / self.tile_cols;
        let tile_width = self.tile_cols.min(self.cols - tile * self.tile_cols);

        band * self.tile_rows * self.cols
            + tile * self.tile_cols * band_height
            + (row % self.tile_rows) * tile_width
            + col % self.tile_cols
    }

    /// Reject a buffer whose element count does not match the tag
    pub fn check_len(&self, len: usize) -> Result<()> {
        if len != self.numel() {
            return Err(Error::shape(&self.shape(), &[len]));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_partial_tile_is_identity() {
        let tag = LayoutTag::tiled(4, 16);
        for r in 0..4 {
            for c in 0..16 {
                assert_eq!(tag.index_of(r, c), r * 16 + c);
            }
        }
    }

    #[test]
    fn test_second_tile_starts_after_first() {
        let tag = LayoutTag::tiled(8, 64);
        assert_eq!(tag.index_of(0, 32), TILE_ROWS * TILE_COLS);
        assert_eq!(tag.index_of(1, 0), 32);
    }

    #[test]
    fn test_ragged_shape_is_bijection() {
        let tag = LayoutTag::tiled(13, 45);
        let mut seen = vec![false; tag.numel()];
        for r in 0..13 {
            for c in 0..45 {
                let i = tag.index_of(r, c);
                assert!(!seen[i], "index {i} visited twice");
                seen[i] = true;
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_deserialize_rejects_empty_tiles() {
        let json = r#"{"rows":2,"cols":2,"tile_rows":0,"tile_cols":0}"#;
        assert!(serde_json::from_str::<LayoutTag>(json).is_err());

        let tag = LayoutTag::tiled(9, 40);
        let text = serde_json::to_string(&tag).unwrap();
        assert_eq!(serde_json::from_str::<LayoutTag>(&text).unwrap(), tag);
    }

    #[test]
    fn test_check_len() {
        let tag = LayoutTag::tiled(8, 16);
        assert!(tag.check_len(128).is_ok());
        assert!(matches!(
            tag.check_len(127),
            Err(Error::ShapeMismatch { .. })
        ));
    }
}
