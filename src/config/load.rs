//! Read layer specifications from disk

use std::fs;
use std::path::Path;

use super::schema::LayerSpec;
use super::validate::validate_spec;
use crate::error::{Error, Result};

/// Load and validate a layer spec from a YAML (`.yaml`/`.yml`) or JSON (`.json`) file
pub fn load_spec<P: AsRef<Path>>(path: P) -> Result<LayerSpec> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| {
        Error::ConfigError(format!("Failed to read spec file {}: {}", path.display(), e))
    })?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    let spec: LayerSpec = match extension.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse YAML spec: {e}")))?,
        "json" => serde_json::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse JSON spec: {e}")))?,
        other => {
            return Err(Error::ConfigError(format!(
                "Unsupported spec file extension {other:?} (expected yaml, yml or json)"
            )))
        }
    };

    validate_spec(&spec).map_err(|e| Error::ConfigError(format!("Invalid layer spec: {e}")))?;

    Ok(spec)
}
