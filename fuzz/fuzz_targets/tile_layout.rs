#![no_main]

use arbitrary::Arbitrary;
use cuantizar::stats::LayoutTag;
use libfuzzer_sys::fuzz_target;

/// Fuzz target for the fused-kernel tile layout
///
/// For any matrix shape the tiled index must be a bijection onto
/// `0..rows * cols`, and the buffer round trip must be exact.

#[derive(Arbitrary, Debug)]
struct LayoutFuzzInput {
    rows: u8,
    cols: u8,
    seed: i8,
}

fuzz_target!(|input: LayoutFuzzInput| {
    let rows = (input.rows as usize).max(1);
    let cols = (input.cols as usize).max(1);
    let tag = LayoutTag::tiled(rows, cols);

    let mut seen = vec![false; rows * cols];
    for r in 0..rows {
        for c in 0..cols {
            let idx = tag.index_of(r, c);
            assert!(idx < seen.len(), "index {idx} out of range for {rows}x{cols}");
            assert!(!seen[idx], "index {idx} hit twice for {rows}x{cols}");
            seen[idx] = true;
        }
    }

    let codes: Vec<i8> = (0..rows * cols)
        .map(|i| (i as i8).wrapping_add(input.seed))
        .collect();
    let tiled = cuantizar::kernel::int8::to_tiled(&codes, &tag);
    assert_eq!(cuantizar::kernel::int8::from_tiled(&tiled, &tag), codes);
});
