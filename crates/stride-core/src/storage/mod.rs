mod accelerator_buffer;
mod cpu_buffer;
mod fill;

pub use accelerator_buffer::*;
pub use cpu_buffer::*;
pub use fill::*;

use bytemuck::NoUninit;

use crate::{DType, Device, DeviceError};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AllocationError {
    #[error("Dimension {dim} has negative size {size}")]
    NegativeDim { dim: usize, size: isize },
    #[error("Element count of {shape} overflows the addressable range")]
    Overflow { shape: String },
    #[error("Invalid layout: {size} bytes aligned to {alignment}")]
    InvalidLayout { size: usize, alignment: usize },
    #[error("Out of memory allocating {bytes} bytes")]
    OutOfMemory { bytes: usize },
    #[error("Invalid sampling distribution: {0}")]
    InvalidDistribution(String),
}

/// The buffer underlying one or more tensors.
#[derive(Debug)]
pub enum Storage {
    CPU(CPUBuffer),
    Accelerator(AcceleratorBuffer),
}

impl Storage {
    pub fn from_slice<T: NoUninit>(data: &[T], device: &Device) -> Result<Self, DeviceError> {
        Self::place(CPUBuffer::from_slice(data)?, device)
    }

    /// Host storage takes the vector's allocation as is.
    pub fn from_vec<T: NoUninit>(data: Vec<T>, device: &Device) -> Result<Self, DeviceError> {
        Self::place(CPUBuffer::from_vec(data), device)
    }

    pub(crate) fn place(host: CPUBuffer, device: &Device) -> Result<Self, DeviceError> {
        match device {
            Device::CPU => Ok(Storage::CPU(host)),
            Device::Accelerator(_) => Ok(Storage::Accelerator(host.to_device(device)?)),
        }
    }

    pub fn n_bytes(&self) -> usize {
        match self {
            Storage::CPU(c) => c.n_bytes(),
            Storage::Accelerator(a) => a.n_bytes(),
        }
    }

    pub fn dump(&self, dt: DType, full: bool) -> String {
        match self {
            Storage::CPU(c) => c.dump(dt, full),
            Storage::Accelerator(a) => a.dump(dt, full),
        }
    }

    pub fn try_cpu(&self) -> Result<&CPUBuffer, DeviceError> {
        match self {
            Storage::CPU(c) => Ok(c),
            Storage::Accelerator(a) => Err(DeviceError::DeviceMismatch(
                "CPU".to_string(),
                format!("ACC:{}", a.device().ordinal()),
            )),
        }
    }

    pub fn try_cpu_mut(&mut self) -> Result<&mut CPUBuffer, DeviceError> {
        match self {
            Storage::CPU(c) => Ok(c),
            Storage::Accelerator(a) => Err(DeviceError::DeviceMismatch(
                "CPU".to_string(),
                format!("ACC:{}", a.device().ordinal()),
            )),
        }
    }

    pub fn try_accelerator(&self) -> Result<&AcceleratorBuffer, DeviceError> {
        match self {
            Storage::Accelerator(a) => Ok(a),
            Storage::CPU(_) => Err(DeviceError::DeviceMismatch(
                "ACC".to_string(),
                "CPU".to_string(),
            )),
        }
    }
}

pub trait DeviceStorage: std::fmt::Debug + 'static {
    /// Creates a copy of the buffer on the accelerator `device`
    fn to_device(&self, device: &Device) -> Result<AcceleratorBuffer, DeviceError>;
    /// Creates a copy of the buffer on the CPU
    fn to_cpu(&self, device: &Device) -> Result<CPUBuffer, DeviceError>;
    fn n_bytes(&self) -> usize;
    fn dump(&self, dt: DType, full: bool) -> String;
}
