use bytemuck::NoUninit;

use crate::{
    storage::DeviceStorage, AcceleratorBuffer, AllocationError, DType, Device, DeviceError,
    InvariantError, TensorDType,
};

use std::{alloc::Layout, fmt::Debug};

#[derive(Debug, PartialEq, Eq)]
pub struct RawCPUBuffer {
    ptr: *mut u8,
    layout: Layout,
    owned: bool,
}

fn dangling(alignment: usize) -> *mut u8 {
    std::ptr::null_mut::<u8>().wrapping_add(alignment)
}

impl RawCPUBuffer {
    pub fn into_raw_parts(&self) -> (*mut u8, Layout) {
        (self.ptr, self.layout)
    }

    pub fn n_bytes(&self) -> usize {
        self.layout.size()
    }

    /// Whether dropping this buffer frees the memory.
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    pub fn as_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.layout.size()) }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.layout.size()) }
    }

    pub fn zeroed(size: usize, alignment: usize) -> Result<Self, AllocationError> {
        let layout = Layout::from_size_align(size, alignment)
            .map_err(|_| AllocationError::InvalidLayout { size, alignment })?;
        let ptr = if size == 0 {
            dangling(layout.align())
        } else {
            let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
            if ptr.is_null() {
                return Err(AllocationError::OutOfMemory { bytes: size });
            }
            ptr
        };
        log::trace!("Allocated {} bytes at {:p}", size, ptr);
        Ok(Self {
            ptr,
            layout,
            owned: true,
        })
    }

    /// Takes over the allocation of `data` without copying it.
    pub fn from_vec<T: NoUninit>(data: Vec<T>) -> Self {
        let boxed = data.into_boxed_slice();
        let layout = Layout::for_value(&*boxed);
        let ptr = Box::into_raw(boxed) as *mut T as *mut u8;
        log::trace!("Adopted {} bytes at {:p}", layout.size(), ptr);
        Self {
            ptr,
            layout,
            owned: true,
        }
    }

    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `size` bytes, aligned to `alignment`,
    /// for as long as this buffer (and every clone of the storage handle) is alive.
    pub unsafe fn borrowed(
        ptr: *mut u8,
        size: usize,
        alignment: usize,
    ) -> Result<Self, AllocationError> {
        let layout = Layout::from_size_align(size, alignment)
            .map_err(|_| AllocationError::InvalidLayout { size, alignment })?;
        let ptr = if size == 0 { dangling(alignment) } else { ptr };
        Ok(Self {
            ptr,
            layout,
            owned: false,
        })
    }

    /// Copies the bytes into a fresh owned allocation.
    pub fn try_clone(&self) -> Result<Self, AllocationError> {
        let mut clone = Self::zeroed(self.layout.size(), self.layout.align())?;
        clone.as_bytes_mut().copy_from_slice(self.as_bytes());
        log::trace!("Cloned: {:p} -> {:p}", self.ptr, clone.ptr);
        Ok(clone)
    }
}

impl Drop for RawCPUBuffer {
    fn drop(&mut self) {
        if self.owned && self.layout.size() > 0 {
            log::trace!("Releasing {} bytes at {:p}", self.layout.size(), self.ptr);
            unsafe { std::alloc::dealloc(self.ptr, self.layout) }
        }
    }
}

/// Managed CPU buffer
#[derive(Debug)]
pub struct CPUBuffer {
    inner: RawCPUBuffer,
}

unsafe impl Send for CPUBuffer {}
unsafe impl Sync for CPUBuffer {}

impl CPUBuffer {
    pub fn zeros(n_bytes: usize, alignment: usize) -> Result<Self, AllocationError> {
        Ok(Self::from(RawCPUBuffer::zeroed(n_bytes, alignment)?))
    }

    pub fn from_slice<T: NoUninit>(data: &[T]) -> Result<Self, AllocationError> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        Self::from_bytes(bytes, std::mem::align_of::<T>())
    }

    pub fn from_vec<T: NoUninit>(data: Vec<T>) -> Self {
        Self::from(RawCPUBuffer::from_vec(data))
    }

    pub fn from_bytes(bytes: &[u8], alignment: usize) -> Result<Self, AllocationError> {
        let mut raw = RawCPUBuffer::zeroed(bytes.len(), alignment)?;
        raw.as_bytes_mut().copy_from_slice(bytes);
        Ok(Self::from(raw))
    }

    pub fn inner(&self) -> &RawCPUBuffer {
        &self.inner
    }

    pub fn deep_clone(&self) -> Result<Self, AllocationError> {
        Ok(Self::from(self.inner().try_clone()?))
    }

    /// Number of `dt` elements the buffer holds.
    pub fn capacity(&self, dt: DType) -> usize {
        self.inner.n_bytes() / dt.size_of()
    }

    pub fn as_slice<T: TensorDType>(&self) -> Result<&[T], InvariantError> {
        bytemuck::checked::try_cast_slice(self.inner.as_bytes())
            .map_err(|e| InvariantError::InvalidBitPattern(T::dt(), e.to_string()))
    }

    pub fn as_slice_mut<T: TensorDType>(&mut self) -> Result<&mut [T], InvariantError> {
        bytemuck::checked::try_cast_slice_mut(self.inner.as_bytes_mut())
            .map_err(|e| InvariantError::InvalidBitPattern(T::dt(), e.to_string()))
    }

    /// Reads the element at `offset`, in units of `T`.
    pub fn read<T: TensorDType>(&self, offset: usize) -> Result<T, InvariantError> {
        let size = std::mem::size_of::<T>();
        let bytes = &self.inner.as_bytes()[offset * size..(offset + 1) * size];
        bytemuck::checked::try_pod_read_unaligned(bytes)
            .map_err(|e| InvariantError::InvalidBitPattern(T::dt(), e.to_string()))
    }

    pub fn write<T: TensorDType>(&mut self, offset: usize, value: T) {
        let size = std::mem::size_of::<T>();
        self.inner.as_bytes_mut()[offset * size..(offset + 1) * size]
            .copy_from_slice(bytemuck::bytes_of(&value));
    }
}

impl From<RawCPUBuffer> for CPUBuffer {
    fn from(raw: RawCPUBuffer) -> Self {
        CPUBuffer { inner: raw }
    }
}

impl DeviceStorage for CPUBuffer {
    fn to_device(&self, device: &Device) -> Result<AcceleratorBuffer, DeviceError> {
        let accelerator = device.try_accelerator()?;
        Ok(AcceleratorBuffer::from_host(self, *accelerator)?)
    }

    fn to_cpu(&self, _device: &Device) -> Result<CPUBuffer, DeviceError> {
        Ok(self.deep_clone()?)
    }

    fn n_bytes(&self) -> usize {
        self.inner().n_bytes()
    }

    fn dump(&self, dtype: DType, full: bool) -> String {
        fn dump_inner<T: TensorDType>(buffer: &CPUBuffer, full: bool) -> String {
            let data = match buffer.as_slice::<T>() {
                Ok(data) => data,
                Err(e) => return format!("<{}>", e),
            };
            let length = if data.len() < 64 { data.len() } else { 64 };
            if full || data.len() <= 2 * length {
                format!("{:?}", data)
            } else {
                format!("{:?}...{:?}", &data[..length], &data[data.len() - length..])
            }
        }
        crate::dtype::with_dtype!(dtype, T => dump_inner::<T>(self, full))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_buffers_read_as_zero() {
        let buf = CPUBuffer::zeros(16, 4).unwrap();
        assert_eq!(buf.as_slice::<f32>().unwrap(), &[0.0; 4]);
        assert_eq!(buf.capacity(DType::F32), 4);
        assert_eq!(buf.capacity(DType::F64), 2);
    }

    #[test]
    fn adopted_vec_is_not_copied() {
        let data = vec![1i32, 2, 3];
        let ptr = data.as_ptr() as *const u8;
        let buf = CPUBuffer::from_vec(data);
        assert_eq!(buf.inner().into_raw_parts().0 as *const u8, ptr);
        assert_eq!(buf.as_slice::<i32>().unwrap(), &[1, 2, 3]);
    }

    #[test]
    fn borrowed_buffer_is_not_freed() {
        let mut backing = vec![0u16; 4];
        {
            let raw = unsafe {
                RawCPUBuffer::borrowed(backing.as_mut_ptr() as *mut u8, 8, 2).unwrap()
            };
            let mut buf = CPUBuffer::from(raw);
            assert!(!buf.inner().is_owned());
            buf.write::<u16>(2, 9);
        }
        assert_eq!(backing, vec![0, 0, 9, 0]);
    }

    #[test]
    fn invalid_bools_are_rejected() {
        let buf = CPUBuffer::from_slice(&[0u8, 1, 7]).unwrap();
        assert!(buf.read::<bool>(1).unwrap());
        assert!(matches!(
            buf.read::<bool>(2),
            Err(InvariantError::InvalidBitPattern(DType::Bool, _))
        ));
    }

    #[test]
    fn deep_clone_is_independent() {
        let mut buf = CPUBuffer::from_slice(&[1.0f64, 2.0]).unwrap();
        let clone = buf.deep_clone().unwrap();
        buf.write(0, 5.0f64);
        assert_eq!(clone.as_slice::<f64>().unwrap(), &[1.0, 2.0]);
        assert_eq!(buf.read::<f64>(0).unwrap(), 5.0);
    }
}
