//! Host tensor runtime
//!
//! A deliberately small tensor type: ndarray-backed storage tagged with a
//! logical shape, a [`DType`] and a [`Device`]. Quantization kernels produce
//! and consume these buffers; nothing here knows about quantization.

mod device;
mod dtype;
mod tensor;

pub use device::Device;
pub use dtype::DType;
pub use tensor::Tensor;
