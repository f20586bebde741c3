//! Declarative layer configuration
//!
//! Layers can be described in YAML or JSON and built as trait objects.
//!
//! # Example
//!
//! ```yaml
//! in_features: 4096
//! out_features: 4096
//! scheme: nf4
//! bias: false
//! compute_dtype: bf16
//! block_size: 64
//! compress_statistics: true
//! ```

mod builder;
mod load;
mod schema;
mod validate;

#[cfg(test)]
mod tests;

pub use builder::build_layer;
pub use load::load_spec;
pub use schema::LayerSpec;
pub use validate::{validate_spec, ValidationError};
