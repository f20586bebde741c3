//! Checkpoint adapter
//!
//! Layers export a [`StateDict`] keyed `{prefix}weight`, `{prefix}bias` and,
//! once quantized, `{prefix}SCB`: the flat statistics side channel that lets
//! a quantized checkpoint be restored into an already-placed layer without
//! re-quantizing. [`save_checkpoint`] and [`load_checkpoint`] move state
//! dicts through SafeTensors files.

mod adapter;
mod file;
mod state_dict;


pub use adapter::{BIAS_KEY, STATISTICS_KEY, WEIGHT_KEY};
pub use file::{load_checkpoint, read_state_dict, save_checkpoint};
pub use state_dict::{LoadReport, StateDict};
