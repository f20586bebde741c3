//! Integration tests for checkpoint save/load across encodings

use approx::assert_abs_diff_eq;
use cuantizar::{
    load_checkpoint, save_checkpoint, Device, EncodingState, Error, Linear4bit, Linear8bit,
    QuantScheme, QuantizedLayer, Tensor,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::NamedTempFile;

fn gpu0() -> Device {
    Device::Cuda(0)
}

fn input() -> Tensor {
    let data = (0..5 * 64).map(|i| ((i * 7 % 41) as f32 - 20.0) / 10.0).collect();
    Tensor::from_vec(data, &[5, 64]).unwrap().to_device(gpu0())
}

fn assert_outputs_match(a: &Tensor, b: &Tensor) {
    assert_eq!(a.shape(), b.shape());
    for (&x, &y) in a.as_f32().unwrap().iter().zip(b.as_f32().unwrap()) {
        assert_abs_diff_eq!(x, y, epsilon = 1e-5);
    }
}

fn int8(seed: u64, threshold: f32) -> Linear8bit {
    let mut rng = StdRng::seed_from_u64(seed);
    Linear8bit::new_with_rng(64, 32, true, false, threshold, &mut rng).unwrap()
}

fn four_bit(seed: u64, scheme: QuantScheme, compress: bool) -> Linear4bit {
    let mut rng = StdRng::seed_from_u64(seed);
    Linear4bit::new_with_rng(64, 32, true, None, compress, scheme, &mut rng).unwrap()
}

#[test]
fn test_int8_round_trip_past_layout_transform() {
    for threshold in [0.0, 1.5] {
        let mut source = int8(1, threshold);
        source.place_on_device(gpu0()).unwrap();
        let expected = source.forward(&input()).unwrap();
        assert_eq!(source.encoding_state(), EncodingState::QuantizedLayoutTransformed);

        let file = NamedTempFile::new().unwrap();
        save_checkpoint(&source, file.path(), "model.fc1.").unwrap();

        // Target already past its own layout transform
        let mut tiled = int8(2, threshold);
        tiled.place_on_device(gpu0()).unwrap();
        tiled.forward(&input()).unwrap();
        load_checkpoint(&mut tiled, file.path(), "model.fc1.", true).unwrap();
        assert_outputs_match(&tiled.forward(&input()).unwrap(), &expected);

        // Target still holding the row-major buffer
        let mut fresh = int8(3, threshold);
        fresh.place_on_device(gpu0()).unwrap();
        load_checkpoint(&mut fresh, file.path(), "model.fc1.", true).unwrap();
        assert_outputs_match(&fresh.forward(&input()).unwrap(), &expected);
        assert_eq!(fresh.encoding_state(), EncodingState::QuantizedLayoutTransformed);
    }
}

#[test]
fn test_four_bit_round_trip() {
    for scheme in [QuantScheme::Fp4, QuantScheme::Nf4] {
        for compress in [false, true] {
            let mut source = four_bit(1, scheme, compress);
            source.place_on_device(gpu0()).unwrap();
            let expected = source.forward(&input()).unwrap();

            let file = NamedTempFile::new().unwrap();
            save_checkpoint(&source, file.path(), "").unwrap();

            let mut target = four_bit(2, scheme, compress);
            target.place_on_device(gpu0()).unwrap();
            let report = load_checkpoint(&mut target, file.path(), "", true).unwrap();
            assert!(report.is_clean());
            assert_outputs_match(&target.forward(&input()).unwrap(), &expected);
        }
    }
}

#[test]
fn test_full_precision_round_trip_then_quantize() {
    let source = int8(1, 0.0);
    let file = NamedTempFile::new().unwrap();
    save_checkpoint(&source, file.path(), "").unwrap();

    let mut target = int8(2, 0.0);
    load_checkpoint(&mut target, file.path(), "", true).unwrap();
    assert_eq!(target.weight().data(), source.weight().data());

    let mut source = source;
    source.place_on_device(gpu0()).unwrap();
    target.place_on_device(gpu0()).unwrap();
    assert_outputs_match(
        &target.forward(&input()).unwrap(),
        &source.forward(&input()).unwrap(),
    );
}

#[test]
fn test_quantized_checkpoint_into_fresh_layer_is_rejected() {
    let mut source = int8(1, 0.0);
    source.place_on_device(gpu0()).unwrap();
    let file = NamedTempFile::new().unwrap();
    save_checkpoint(&source, file.path(), "").unwrap();

    let mut fresh = int8(2, 0.0);
    let err = load_checkpoint(&mut fresh, file.path(), "", false);
    assert!(matches!(err, Err(Error::QuantizedCheckpointIntoUnquantizedLayer)));
    assert_eq!(fresh.encoding_state(), EncodingState::FullPrecision);

    let mut source = four_bit(1, QuantScheme::Nf4, true);
    source.place_on_device(gpu0()).unwrap();
    save_checkpoint(&source, file.path(), "").unwrap();
    let mut fresh: Box<dyn QuantizedLayer> = Box::new(four_bit(2, QuantScheme::Nf4, true));
    let err = load_checkpoint(fresh.as_mut(), file.path(), "", false);
    assert!(matches!(err, Err(Error::QuantizedCheckpointIntoUnquantizedLayer)));
}

#[test]
fn test_fp4_checkpoint_into_nf4_layer_is_rejected() {
    let mut source = four_bit(1, QuantScheme::Fp4, true);
    source.place_on_device(gpu0()).unwrap();
    let file = NamedTempFile::new().unwrap();
    save_checkpoint(&source, file.path(), "").unwrap();

    let mut target = four_bit(2, QuantScheme::Nf4, true);
    target.place_on_device(gpu0()).unwrap();
    let err = load_checkpoint(&mut target, file.path(), "", true);
    assert!(matches!(err, Err(Error::UnsupportedScheme(_))));
}
