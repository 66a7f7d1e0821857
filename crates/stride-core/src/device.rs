use crate::AllocationError;

#[derive(Clone, Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Requested location {0:?} is not present in this runtime")]
    UnavailableLocation(DeviceRequest),
    #[error("Device mismatch, requested device: {0:?}, actual device: {1:?}")]
    DeviceMismatch(String, String),
    #[error("Failed to allocate transfer buffer: {0}")]
    BufferAllocationFailed(#[from] AllocationError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRequest {
    CPU,
    Accelerator(usize),
}

/// Handle to an accelerator location.
///
/// Only [crate::Runtime::request_device] hands these out, so holding one means
/// the location exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AcceleratorDevice {
    ordinal: usize,
}

impl AcceleratorDevice {
    pub(crate) fn new(ordinal: usize) -> Self {
        Self { ordinal }
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }
}

#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub enum Device {
    #[default]
    CPU,
    Accelerator(AcceleratorDevice),
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::CPU => write!(f, "CPU"),
            Device::Accelerator(acc) => write!(f, "ACC:{}", acc.ordinal()),
        }
    }
}

impl Device {
    pub fn is_cpu(&self) -> bool {
        matches!(self, Device::CPU)
    }

    pub fn is_accelerator(&self) -> bool {
        matches!(self, Device::Accelerator(_))
    }

    pub fn label(&self) -> String {
        format!("{:?}", self)
    }

    pub fn try_accelerator(&self) -> Result<&AcceleratorDevice, DeviceError> {
        match self {
            Device::Accelerator(acc) => Ok(acc),
            Device::CPU => Err(DeviceError::DeviceMismatch(
                "ACC".to_string(),
                "CPU".to_string(),
            )),
        }
    }

    pub fn try_cpu(&self) -> Result<(), DeviceError> {
        match self {
            Device::CPU => Ok(()),
            Device::Accelerator(_) => Err(DeviceError::DeviceMismatch(
                "CPU".to_string(),
                self.label(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels() {
        assert_eq!(Device::CPU.label(), "CPU");
        let acc = Device::Accelerator(AcceleratorDevice::new(1));
        assert_eq!(acc.label(), "ACC:1");
        assert!(acc.try_cpu().is_err());
        assert_eq!(acc.try_accelerator().unwrap().ordinal(), 1);
    }
}
