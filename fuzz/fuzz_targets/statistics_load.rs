#![no_main]

use arbitrary::Arbitrary;
use cuantizar::{Device, Linear4bit, Linear8bit, StateDict, Tensor};
use libfuzzer_sys::fuzz_target;

/// Fuzz target for checkpoint loads
///
/// Arbitrary side-channel values and weight bytes must never panic, and a
/// rejected load must leave the layer's statistics untouched.

#[derive(Arbitrary, Debug)]
struct LoadFuzzInput {
    four_bit: bool,
    statistics: Vec<f32>,
    weight: Vec<u8>,
    strict: bool,
}

fuzz_target!(|input: LoadFuzzInput| {
    let scb_len = input.statistics.len();
    let Ok(scb) = Tensor::from_vec(input.statistics, &[scb_len]) else {
        return;
    };

    let mut dict = StateDict::new();
    dict.insert("SCB", scb);

    if input.four_bit {
        let Ok(mut layer) = Linear4bit::nf4(32, 4, false) else {
            return;
        };
        if layer.place_on_device(Device::Cuda(0)).is_err() {
            return;
        }
        if input.weight.len() == 64 {
            if let Ok(w) = Tensor::from_u8(input.weight, &[64, 1]) {
                dict.insert("weight", w);
            }
        }
        let before = layer.weight().statistics().map(|s| s.to_flat());
        if layer.load_state_dict(&dict, "", input.strict).is_err() {
            assert_eq!(layer.weight().statistics().map(|s| s.to_flat()), before);
        }
    } else {
        let Ok(mut layer) = Linear8bit::new(32, 4, false, false, 0.0) else {
            return;
        };
        if layer.place_on_device(Device::Cuda(0)).is_err() {
            return;
        }
        if input.weight.len() == 128 {
            let codes = input.weight.iter().map(|&b| b as i8).collect();
            if let Ok(w) = Tensor::from_i8(codes, &[4, 32]) {
                dict.insert("weight", w);
            }
        }
        let before = layer.weight().statistics().map(|s| s.to_flat());
        if layer.load_state_dict(&dict, "", input.strict).is_err() {
            assert_eq!(layer.weight().statistics().map(|s| s.to_flat()), before);
        }
    }
});
