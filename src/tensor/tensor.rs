//! Tensor type: typed ndarray storage with shape, dtype and device tags

use ndarray::Array1;

use super::{DType, Device};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
enum Storage {
    Float(Array1<f32>),
    I8(Array1<i8>),
    U8(Array1<u8>),
}

impl Storage {
    fn len(&self) -> usize {
        match self {
            Storage::Float(a) => a.len(),
            Storage::I8(a) => a.len(),
            Storage::U8(a) => a.len(),
        }
    }

    fn addr(&self) -> usize {
        match self {
            Storage::Float(a) => a.as_ptr() as usize,
            Storage::I8(a) => a.as_ptr() as usize,
            Storage::U8(a) => a.as_ptr() as usize,
        }
    }
}

fn contiguous<T>(a: &Array1<T>) -> Result<&[T]> {
    a.as_slice()
        .ok_or_else(|| Error::InvalidParameter("tensor storage is not contiguous".into()))
}

fn numel_of(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Dense tensor living on a (host-simulated) device
///
/// Half-precision tensors keep `f32` storage whose values are always
/// representable in the tagged dtype.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    storage: Storage,
    shape: Vec<usize>,
    dtype: DType,
    device: Device,
    requires_grad: bool,
}

impl Tensor {
    fn build(storage: Storage, shape: &[usize], dtype: DType) -> Result<Self> {
        if storage.len() != numel_of(shape) {
            return Err(Error::shape(shape, &[storage.len()]));
        }
        Ok(Self {
            storage,
            shape: shape.to_vec(),
            dtype,
            device: Device::Cpu,
            requires_grad: false,
        })
    }

    /// Create an f32 tensor from a vector
    pub fn from_vec(data: Vec<f32>, shape: &[usize]) -> Result<Self> {
        Self::build(Storage::Float(Array1::from(data)), shape, DType::F32)
    }

    /// Create an int8 code tensor
    pub fn from_i8(data: Vec<i8>, shape: &[usize]) -> Result<Self> {
        Self::build(Storage::I8(Array1::from(data)), shape, DType::I8)
    }

    /// Create an unsigned byte tensor
    pub fn from_u8(data: Vec<u8>, shape: &[usize]) -> Result<Self> {
        Self::build(Storage::U8(Array1::from(data)), shape, DType::U8)
    }

    /// Create a zero-filled tensor on the host
    pub fn zeros(shape: &[usize], dtype: DType) -> Self {
        let n = numel_of(shape);
        let storage = match dtype {
            DType::I8 => Storage::I8(Array1::zeros(n)),
            DType::U8 => Storage::U8(Array1::zeros(n)),
            _ => Storage::Float(Array1::zeros(n)),
        };
        Self {
            storage,
            shape: shape.to_vec(),
            dtype,
            device: Device::Cpu,
            requires_grad: false,
        }
    }

    /// Zero-element placeholder, left behind when a buffer is moved out
    pub fn empty(dtype: DType, device: Device) -> Self {
        let mut t = Self::zeros(&[0], dtype);
        t.device = device;
        t
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dims(&self) -> usize {
        self.shape.len()
    }

    pub fn numel(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.numel() == 0
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    pub fn set_requires_grad(&mut self, requires_grad: bool) {
        self.requires_grad = requires_grad;
    }

    /// Builder form of [`set_requires_grad`](Self::set_requires_grad)
    pub fn with_requires_grad(mut self, requires_grad: bool) -> Self {
        self.requires_grad = requires_grad;
        self
    }

    /// Address of the underlying allocation; equal addresses mean the same buffer
    pub fn storage_ptr(&self) -> usize {
        self.storage.addr()
    }

    /// Footprint in bytes at the tagged dtype
    pub fn memory_bytes(&self) -> usize {
        self.numel() * self.dtype.size_in_bytes()
    }

    /// Split the shape into (rows, last dimension)
    pub fn matrix_dims(&self) -> Result<(usize, usize)> {
        match self.shape.split_last() {
            Some((&cols, leading)) => Ok((numel_of(leading), cols)),
            None => Err(Error::InvalidParameter(
                "expected at least one dimension".into(),
            )),
        }
    }

    pub fn as_f32(&self) -> Result<&[f32]> {
        match &self.storage {
            Storage::Float(a) => contiguous(a),
            _ => Err(self.dtype_error("float")),
        }
    }

    pub fn as_i8(&self) -> Result<&[i8]> {
        match &self.storage {
            Storage::I8(a) => contiguous(a),
            _ => Err(self.dtype_error("i8")),
        }
    }

    pub fn as_u8(&self) -> Result<&[u8]> {
        match &self.storage {
            Storage::U8(a) => contiguous(a),
            _ => Err(self.dtype_error("u8")),
        }
    }

    /// Widen every element to f32
    pub fn to_f32_vec(&self) -> Vec<f32> {
        match &self.storage {
            Storage::Float(a) => a.to_vec(),
            Storage::I8(a) => a.iter().map(|&v| f32::from(v)).collect(),
            Storage::U8(a) => a.iter().map(|&v| f32::from(v)).collect(),
        }
    }

    /// Copy of this tensor tagged with a new device
    pub fn to_device(&self, target: Device) -> Tensor {
        let mut moved = self.clone();
        moved.device = target;
        moved
    }

    /// Re-tag in place; the allocation is kept
    pub fn move_to(&mut self, target: Device) {
        self.device = target;
    }

    /// Precision cast between floating dtypes
    pub fn cast(&self, dtype: DType) -> Result<Tensor> {
        if dtype == self.dtype {
            return Ok(self.clone());
        }
        if !(dtype.is_float() && self.dtype.is_float()) {
            return Err(Error::DTypeMismatch {
                expected: "floating point cast".into(),
                got: format!("{} -> {}", self.dtype, dtype),
            });
        }
        let mut out = self.clone();
        out.dtype = dtype;
        if let Storage::Float(a) = &mut out.storage {
            a.mapv_inplace(|v| dtype.round(v));
        }
        Ok(out)
    }

    /// Reinterpret the shape; element count must match
    pub fn reshape(mut self, shape: &[usize]) -> Result<Tensor> {
        if numel_of(shape) != self.numel() {
            return Err(Error::shape(shape, &self.shape));
        }
        self.shape = shape.to_vec();
        Ok(self)
    }

    /// Overwrite the values in place from `src`, converting to this tensor's dtype
    pub fn copy_from(&mut self, src: &Tensor) -> Result<()> {
        if self.shape != src.shape {
            return Err(Error::shape(&self.shape, &src.shape));
        }
        let dtype = self.dtype;
        match (&mut self.storage, &src.storage) {
            (Storage::Float(dst), Storage::Float(s)) => {
                dst.zip_mut_with(s, |d, &v| *d = dtype.round(v));
                Ok(())
            }
            (Storage::I8(dst), Storage::I8(s)) => {
                dst.assign(s);
                Ok(())
            }
            (Storage::U8(dst), Storage::U8(s)) => {
                dst.assign(s);
                Ok(())
            }
            _ => Err(Error::DTypeMismatch {
                expected: dtype.to_string(),
                got: src.dtype.to_string(),
            }),
        }
    }

    /// Little-endian bytes at the tagged dtype
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match &self.storage {
            Storage::Float(a) => match self.dtype {
                DType::F16 => a
                    .iter()
                    .flat_map(|&v| half::f16::from_f32(v).to_le_bytes())
                    .collect(),
                DType::BF16 => a
                    .iter()
                    .flat_map(|&v| half::bf16::from_f32(v).to_le_bytes())
                    .collect(),
                _ => a.iter().flat_map(|v| v.to_le_bytes()).collect(),
            },
            Storage::I8(a) => a.iter().map(|&v| v as u8).collect(),
            Storage::U8(a) => a.to_vec(),
        }
    }

    /// Rebuild a host tensor from little-endian bytes
    pub fn from_le_bytes(bytes: &[u8], dtype: DType, shape: &[usize]) -> Result<Tensor> {
        let expected = numel_of(shape) * dtype.size_in_bytes();
        if bytes.len() != expected {
            return Err(Error::Serialization(format!(
                "expected {expected} bytes for {dtype} tensor of shape {shape:?}, got {}",
                bytes.len()
            )));
        }
        let storage = match dtype {
            DType::F32 => Storage::Float(
                bytes
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            DType::F16 => Storage::Float(
                bytes
                    .chunks_exact(2)
                    .map(|c| half::f16::from_le_bytes([c[0], c[1]]).to_f32())
                    .collect(),
            ),
            DType::BF16 => Storage::Float(
                bytes
                    .chunks_exact(2)
                    .map(|c| half::bf16::from_le_bytes([c[0], c[1]]).to_f32())
                    .collect(),
            ),
            DType::I8 => Storage::I8(bytemuck::cast_slice::<u8, i8>(bytes).iter().copied().collect()),
            DType::U8 => Storage::U8(Array1::from(bytes.to_vec())),
        };
        Self::build(storage, shape, dtype)
    }

    fn dtype_error(&self, expected: &str) -> Error {
        Error::DTypeMismatch {
            expected: expected.into(),
            got: self.dtype.to_string(),
        }
    }
}
