//! SafeTensors checkpoint files
//!
//! One file holds the state dict of a layer plus string metadata recording
//! the scheme and encoding the tensors were written from.

use std::collections::HashMap;
use std::path::Path;

use safetensors::tensor::{Dtype, TensorView};
use safetensors::SafeTensors;
use tracing::info;

use super::StateDict;
use crate::checkpoint::LoadReport;
use crate::nn::QuantizedLayer;
use crate::stats::QuantScheme;
use crate::tensor::{DType, Tensor};
use crate::{Error, Result};

const FORMAT_KEY: &str = "format";
const FORMAT_NAME: &str = "cuantizar";

fn to_safetensors_dtype(dtype: DType) -> Dtype {
    match dtype {
        DType::F32 => Dtype::F32,
        DType::F16 => Dtype::F16,
        DType::BF16 => Dtype::BF16,
        DType::I8 => Dtype::I8,
        DType::U8 => Dtype::U8,
    }
}

fn from_safetensors_dtype(dtype: Dtype) -> Result<DType> {
    match dtype {
        Dtype::F32 => Ok(DType::F32),
        Dtype::F16 => Ok(DType::F16),
        Dtype::BF16 => Ok(DType::BF16),
        Dtype::I8 => Ok(DType::I8),
        Dtype::U8 => Ok(DType::U8),
        other => Err(Error::Serialization(format!(
            "unsupported tensor dtype {other:?} in checkpoint"
        ))),
    }
}

/// Write the layer's state dict to `path`
pub fn save_checkpoint<L: QuantizedLayer + ?Sized>(layer: &L, path: impl AsRef<Path>, prefix: &str) -> Result<()> {
    let path = path.as_ref();
    let dict = layer.state_dict(prefix)?;

    let tensor_data: Vec<(&str, Dtype, Vec<usize>, Vec<u8>)> = dict
        .iter()
        .map(|(name, tensor)| {
            (
                name,
                to_safetensors_dtype(tensor.dtype()),
                tensor.shape().to_vec(),
                tensor.to_le_bytes(),
            )
        })
        .collect();

    let views = tensor_data
        .iter()
        .map(|(name, dtype, shape, bytes)| {
            TensorView::new(*dtype, shape.clone(), bytes)
                .map(|view| (*name, view))
                .map_err(|e| Error::Serialization(format!("invalid tensor {name}: {e}")))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut metadata = HashMap::new();
    metadata.insert(FORMAT_KEY.to_string(), FORMAT_NAME.to_string());
    metadata.insert("version".to_string(), env!("CARGO_PKG_VERSION").to_string());
    metadata.insert(format!("{prefix}scheme"), layer.scheme().to_string());
    metadata.insert(format!("{prefix}encoding"), layer.encoding_state().to_string());

    let bytes = safetensors::serialize(views, Some(metadata))
        .map_err(|e| Error::Serialization(format!("SafeTensors serialization failed: {e}")))?;
    std::fs::write(path, bytes)?;

    info!(
        path = %path.display(),
        tensors = dict.len(),
        scheme = %layer.scheme(),
        encoding = %layer.encoding_state(),
        "saved checkpoint"
    );
    Ok(())
}

/// Read every tensor in a SafeTensors file into a [`StateDict`]
pub fn read_state_dict(path: impl AsRef<Path>) -> Result<(StateDict, HashMap<String, String>)> {
    let data = std::fs::read(path.as_ref())?;

    let (_, st_metadata) = SafeTensors::read_metadata(&data)
        .map_err(|e| Error::Serialization(format!("SafeTensors parsing failed: {e}")))?;
    let metadata = st_metadata.metadata().clone().unwrap_or_default();

    let tensors = SafeTensors::deserialize(&data)
        .map_err(|e| Error::Serialization(format!("SafeTensors parsing failed: {e}")))?;

    let mut dict = StateDict::new();
    for (name, view) in tensors.tensors() {
        let dtype = from_safetensors_dtype(view.dtype())?;
        let tensor = Tensor::from_le_bytes(view.data(), dtype, view.shape())?;
        dict.insert(name, tensor);
    }
    Ok((dict, metadata))
}

/// Load a file written by [`save_checkpoint`] into `layer`
///
/// The recorded scheme must be checkpoint-compatible with the layer's; the
/// two int8 schemes are interchangeable since the weight is always stored
/// row-major.
pub fn load_checkpoint<L: QuantizedLayer + ?Sized>(
    layer: &mut L,
    path: impl AsRef<Path>,
    prefix: &str,
    strict: bool,
) -> Result<LoadReport> {
    let path = path.as_ref();
    let (dict, metadata) = read_state_dict(path)?;

    if let Some(recorded) = metadata.get(&format!("{prefix}scheme")) {
        let recorded: QuantScheme = recorded.parse()?;
        if !recorded.checkpoint_compatible(layer.scheme()) {
            return Err(Error::UnsupportedScheme(format!(
                "checkpoint was written by a {recorded} layer, cannot load into {}",
                layer.scheme()
            )));
        }
    }

    let report = layer.load_state_dict(&dict, prefix, strict)?;
    info!(
        path = %path.display(),
        tensors = dict.len(),
        missing = report.missing_keys.len(),
        unexpected = report.unexpected_keys.len(),
        "loaded checkpoint"
    );
    Ok(report)
}
