use crate::{
    storage::DeviceStorage, AcceleratorDevice, AllocationError, CPUBuffer, DType, Device,
    DeviceError, RawCPUBuffer,
};

/// Memory resident on an accelerator location.
///
/// The host never addresses it directly; contents move only through
/// [DeviceStorage::to_cpu] and [DeviceStorage::to_device].
#[derive(Debug)]
pub struct AcceleratorBuffer {
    inner: RawCPUBuffer,
    device: AcceleratorDevice,
}

unsafe impl Send for AcceleratorBuffer {}
unsafe impl Sync for AcceleratorBuffer {}

impl AcceleratorBuffer {
    pub(crate) fn from_host(
        src: &CPUBuffer,
        device: AcceleratorDevice,
    ) -> Result<Self, AllocationError> {
        let inner = src.inner().try_clone()?;
        log::debug!(
            "Uploaded {} bytes to ACC:{}",
            inner.n_bytes(),
            device.ordinal()
        );
        Ok(Self { inner, device })
    }

    pub fn device(&self) -> &AcceleratorDevice {
        &self.device
    }
}

impl DeviceStorage for AcceleratorBuffer {
    fn to_device(&self, device: &Device) -> Result<AcceleratorBuffer, DeviceError> {
        let dst = *device.try_accelerator()?;
        Ok(Self {
            inner: self.inner.try_clone()?,
            device: dst,
        })
    }

    fn to_cpu(&self, _device: &Device) -> Result<CPUBuffer, DeviceError> {
        let raw = self.inner.try_clone()?;
        log::debug!(
            "Downloaded {} bytes from ACC:{}",
            raw.n_bytes(),
            self.device.ordinal()
        );
        Ok(CPUBuffer::from(raw))
    }

    fn n_bytes(&self) -> usize {
        self.inner.n_bytes()
    }

    fn dump(&self, dt: DType, _full: bool) -> String {
        format!(
            "<{} bytes of {} on ACC:{}>",
            self.n_bytes(),
            dt,
            self.device.ordinal()
        )
    }
}
