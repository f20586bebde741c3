//! Integration tests for config module

use super::*;
use crate::error::Error;
use crate::param::EncodingState;
use crate::stats::QuantScheme;
use crate::tensor::{DType, Device, Tensor};
use std::io::Write;
use tempfile::{Builder, NamedTempFile};

fn spec_file(suffix: &str, content: &str) -> NamedTempFile {
    let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_end_to_end_yaml() {
    let yaml = r#"
in_features: 16
out_features: 8
scheme: int8
threshold: 6.0
"#;
    let file = spec_file(".yaml", yaml);
    let spec = load_spec(file.path()).unwrap();
    assert_eq!(spec.scheme, QuantScheme::Int8RowMajor);
    assert!(spec.bias);

    let mut layer = build_layer(&spec).unwrap();
    layer.place_on_device(Device::Cuda(0)).unwrap();
    let x = Tensor::from_vec(vec![0.5; 64], &[4, 16]).unwrap().to_device(Device::Cuda(0));
    let y = layer.forward(&x).unwrap();
    assert_eq!(y.shape(), &[4, 8]);
    assert_eq!(layer.encoding_state(), EncodingState::QuantizedLayoutTransformed);
}

#[test]
fn test_end_to_end_json() {
    let json = r#"{
        "in_features": 64,
        "out_features": 2,
        "scheme": "nf4",
        "compute_dtype": "f16",
        "compress_statistics": false
    }"#;
    let file = spec_file(".json", json);
    let spec = load_spec(file.path()).unwrap();
    assert_eq!(spec.compute_dtype, Some(DType::F16));
    assert!(!spec.compress_statistics);
    assert_eq!(build_layer(&spec).unwrap().scheme(), QuantScheme::Nf4);
}

#[test]
fn test_yml_extension() {
    let file = spec_file(".yml", "in_features: 8\nout_features: 8\nscheme: fp4\n");
    assert!(load_spec(file.path()).is_ok());
}

#[test]
fn test_unknown_extension() {
    let file = spec_file(".toml", "in_features = 8\n");
    assert!(matches!(load_spec(file.path()), Err(Error::ConfigError(_))));
}

#[test]
fn test_invalid_spec_rejected_on_load() {
    let file = spec_file(".yaml", "in_features: 8\nout_features: 8\nscheme: nf4\nblock_size: 7\n");
    match load_spec(file.path()) {
        Err(Error::ConfigError(msg)) => assert!(msg.contains("block size")),
        other => panic!("expected ConfigError, got {other:?}"),
    }
}

#[test]
fn test_unknown_scheme_rejected() {
    let file = spec_file(".yaml", "in_features: 8\nout_features: 8\nscheme: int3\n");
    assert!(matches!(load_spec(file.path()), Err(Error::ConfigError(_))));
}

#[test]
fn test_missing_file() {
    assert!(matches!(
        load_spec("/nonexistent/layer.yaml"),
        Err(Error::ConfigError(_))
    ));
}
