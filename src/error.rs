//! Error types for cuantizar

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Invalid edge in the parameter state machine (re-quantizing, casting a
    /// quantized buffer, moving a tiled buffer off the accelerator, ...).
    #[error("Unsupported transition: {0}")]
    UnsupportedTransition(String),

    /// A buffer is marked quantized but the statistics needed to read it are gone.
    #[error("Missing quantization statistics: {0}")]
    MissingQuantizationStatistics(String),

    #[error(
        "Loading a quantized checkpoint into a non-quantized layer is not supported; \
         place the layer on an accelerator before loading"
    )]
    QuantizedCheckpointIntoUnquantizedLayer,

    #[error("Unsupported quantization scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("DType mismatch: expected {expected}, got {got}")]
    DTypeMismatch { expected: String, got: String },

    #[error("State dict mismatch: missing keys {missing:?}, unexpected keys {unexpected:?}")]
    StateDictMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl Error {
    pub(crate) fn shape(expected: &[usize], got: &[usize]) -> Self {
        Error::ShapeMismatch {
            expected: expected.to_vec(),
            got: got.to_vec(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_mismatch_display() {
        let err = Error::shape(&[8, 16], &[16, 8]);
        let msg = err.to_string();
        assert!(msg.contains("[8, 16]"));
        assert!(msg.contains("[16, 8]"));
    }

    #[test]
    fn test_checkpoint_error_mentions_placement() {
        let msg = Error::QuantizedCheckpointIntoUnquantizedLayer.to_string();
        assert!(msg.contains("accelerator"));
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
