//! Row-wise int8 quantization and the mixed-precision int8 matmul

use crate::stats::LayoutTag;

/// Largest int8 code magnitude
pub const INT8_MAX: f32 = 127.0;

/// Read access to int8 weight codes in either memory layout
#[derive(Clone, Copy)]
pub enum CodeView<'a> {
    RowMajor { codes: &'a [i8], cols: usize },
    Tiled { codes: &'a [i8], tag: &'a LayoutTag },
}

impl CodeView<'_> {
    #[inline]
    pub fn at(&self, row: usize, col: usize) -> i8 {
        match self {
            CodeView::RowMajor { codes, cols } => codes[row * cols + col],
            CodeView::Tiled { codes, tag } => codes[tag.index_of(row, col)],
        }
    }
}

/// Per-row absmax quantization of a row-major `[rows, cols]` matrix
///
/// Returns the codes and one scale per row; all-zero rows get scale 1.
pub fn quantize_rows(values: &[f32], rows: usize, cols: usize) -> (Vec<i8>, Vec<f32>) {
    let mut codes = Vec::with_capacity(rows * cols);
    let mut scales = Vec::with_capacity(rows);

    for row in values.chunks(cols.max(1)).take(rows) {
        let absmax = row.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        let scale = if absmax > 0.0 { absmax } else { 1.0 };
        codes.extend(
            row.iter()
                .map(|&v| (v * INT8_MAX / scale).round().clamp(-INT8_MAX, INT8_MAX) as i8),
        );
        scales.push(scale);
    }

    (codes, scales)
}

/// Reconstruct the row-major f32 matrix from codes and per-row scales
pub fn dequantize_rows(view: &CodeView<'_>, scales: &[f32], rows: usize, cols: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(rows * cols);
    for (r, &scale) in scales.iter().enumerate().take(rows) {
        out.extend((0..cols).map(|c| f32::from(view.at(r, c)) * scale / INT8_MAX));
    }
    out
}

/// Columns of `x` holding at least one value with magnitude `>= threshold`
pub fn outlier_columns(x: &[f32], cols: usize, threshold: f32) -> Vec<bool> {
    let mut outliers = vec![false; cols];
    if threshold <= 0.0 || cols == 0 {
        return outliers;
    }
    for row in x.chunks(cols) {
        for (flag, &v) in outliers.iter_mut().zip(row) {
            if v.abs() >= threshold {
                *flag = true;
            }
        }
    }
    outliers
}

/// `x @ W^T` with int8 weights
///
/// Outlier input columns are multiplied in full precision against the
/// dequantized weight; the remaining columns are quantized per input row,
/// accumulated in i64 and rescaled by `sx * scb / 127^2`.
pub fn mixed_matmul(
    x: &[f32],
    rows: usize,
    in_features: usize,
    weight: &CodeView<'_>,
    scb: &[f32],
    out_features: usize,
    threshold: f32,
) -> Vec<f32> {
    let outliers = outlier_columns(x, in_features, threshold);
    let mut out = vec![0.0f32; rows * out_features];
    let mut xq = vec![0i32; in_features];

    for r in 0..rows {
        let x_row = &x[r * in_features..(r + 1) * in_features];
        let sx = x_row
            .iter()
            .zip(&outliers)
            .filter(|&(_, &is_outlier)| !is_outlier)
            .fold(0.0f32, |m, (v, _)| m.max(v.abs()));

        for (q, (&v, &is_outlier)) in xq.iter_mut().zip(x_row.iter().zip(&outliers)) {
            *q = if is_outlier || sx == 0.0 {
                0
            } else {
                (v * INT8_MAX / sx).round() as i32
            };
        }

        let out_row = &mut out[r * out_features..(r + 1) * out_features];
        for (o, y) in out_row.iter_mut().enumerate() {
            let mut acc = 0i64;
            let mut outlier_sum = 0.0f32;
            for c in 0..in_features {
                let w = weight.at(o, c);
                if outliers[c] {
                    outlier_sum += x_row[c] * f32::from(w);
                } else {
                    acc += i64::from(xq[c]) * i64::from(w);
                }
            }
            *y = acc as f32 * sx * scb[o] / (INT8_MAX * INT8_MAX) + outlier_sum * scb[o] / INT8_MAX;
        }
    }

    out
}

/// Scatter a row-major matrix into the tiled layout described by `tag`
pub fn to_tiled(codes: &[i8], tag: &LayoutTag) -> Vec<i8> {
    let [rows, cols] = tag.shape();
    let mut tiled = vec![0i8; rows * cols];
    for r in 0..rows {
        for c in 0..cols {
            tiled[tag.index_of(r, c)] = codes[r * cols + c];
        }
    }
    tiled
}

/// Gather a tiled buffer back into row-major order
pub fn from_tiled(tiled: &[i8], tag: &LayoutTag) -> Vec<i8> {
    let [rows, cols] = tag.shape();
    let view = CodeView::Tiled { codes: tiled, tag };
    let mut codes = Vec::with_capacity(rows * cols);
    for r in 0..rows {
        codes.extend((0..cols).map(|c| view.at(r, c)));
    }
    codes
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_quantize_rows_scales_and_codes() {
        let w = [1.0, -2.0, 0.5, 0.0, 0.0, 0.0];
        let (codes, scales) = quantize_rows(&w, 2, 3);
        assert_eq!(scales, vec![2.0, 1.0]);
        assert_eq!(codes, vec![64, -127, 32, 0, 0, 0]);
    }

    #[test]
    fn test_dequantize_rows_error_bound() {
        let w: Vec<f32> = (0..32).map(|i| (i as f32 - 16.0) * 0.37).collect();
        let (codes, scales) = quantize_rows(&w, 4, 8);
        let view = CodeView::RowMajor { codes: &codes, cols: 8 };
        let back = dequantize_rows(&view, &scales, 4, 8);
        for (i, (&a, &b)) in w.iter().zip(&back).enumerate() {
            assert!((a - b).abs() <= scales[i / 8] / INT8_MAX, "index {i}");
        }
    }

    #[test]
    fn test_outlier_columns() {
        let x = [0.1, 7.0, 0.2, -0.3, 0.4, -6.0];
        assert_eq!(outlier_columns(&x, 3, 6.0), vec![false, true, false]);
        assert_eq!(outlier_columns(&x, 3, 0.0), vec![false, false, false]);
    }

    #[test]
    fn test_mixed_matmul_matches_dense() {
        let w: Vec<f32> = (0..12).map(|i| (i as f32 * 0.3).sin()).collect();
        let x = [0.5, 8.0, -1.0, 0.25, -0.5, 2.0, 1.0, -9.0];
        let (codes, scb) = quantize_rows(&w, 3, 4);
        let view = CodeView::RowMajor { codes: &codes, cols: 4 };
        let deq = dequantize_rows(&view, &scb, 3, 4);

        let y = mixed_matmul(&x, 2, 4, &view, &scb, 3, 6.0);
        for r in 0..2 {
            for o in 0..3 {
                let expected: f32 = (0..4).map(|c| x[r * 4 + c] * deq[o * 4 + c]).sum();
                assert_abs_diff_eq!(y[r * 3 + o], expected, epsilon = 0.05);
            }
        }
    }

    #[test]
    fn test_mixed_matmul_wide_row_does_not_overflow() {
        let in_features = 140_000;
        let x = vec![1.0f32; in_features];
        let codes = vec![127i8; in_features];
        let view = CodeView::RowMajor { codes: &codes, cols: in_features };

        let y = mixed_matmul(&x, 1, in_features, &view, &[1.0], 1, 0.0);
        assert_abs_diff_eq!(y[0], in_features as f32, epsilon = 1.0);
    }

    #[test]
    fn test_tiled_round_trip() {
        let tag = LayoutTag::tiled(9, 40);
        let codes: Vec<i8> = (0..360).map(|i| (i % 251) as i8).collect();
        let tiled = to_tiled(&codes, &tag);
        assert_ne!(tiled, codes);
        assert_eq!(from_tiled(&tiled, &tag), codes);
    }

    #[test]
    fn test_tiled_view_reads_in_place() {
        let tag = LayoutTag::tiled(10, 33);
        let codes: Vec<i8> = (0..330).map(|i| (i % 200) as i8 - 100).collect();
        let tiled = to_tiled(&codes, &tag);
        let row_major = CodeView::RowMajor { codes: &codes, cols: 33 };
        let tiled_view = CodeView::Tiled { codes: &tiled, tag: &tag };
        for r in 0..10 {
            for c in 0..33 {
                assert_eq!(row_major.at(r, c), tiled_view.at(r, c));
            }
        }
    }
}
