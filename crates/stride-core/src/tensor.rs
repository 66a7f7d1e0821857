use crate::{
    cpu::{self, CPUOperation},
    dtype::with_dtype,
    ops::*,
    AllocationError, CPUBuffer, DType, Device, DeviceError, DeviceRequest, DeviceStorage,
    Enforcer, FillPolicy, IndexError, InvariantError, Nested, Operation, OperationError,
    RawCPUBuffer, Runtime, Scalar, Shape, ShapeError, Storage, StridedIndex, Strides,
    TensorDType, TensorId,
};

use derive_new::new;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use std::ops::Range;
use std::sync::Arc;

#[cfg(feature = "rand")]
use crate::Distribution;

#[derive(thiserror::Error, Debug)]
pub enum TensorError {
    #[error(transparent)]
    AllocationError(#[from] AllocationError),
    #[error(transparent)]
    OperationError(#[from] OperationError),
    #[error(transparent)]
    DeviceError(#[from] DeviceError),
    #[cfg(feature = "interop")]
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "interop")]
    #[error("Malformed npy data: {0}")]
    Npy(String),
}

macro_rules! impl_from_operation_error {
    ($($e:ty),*) => {
        $(
            impl From<$e> for TensorError {
                fn from(e: $e) -> Self {
                    TensorError::OperationError(e.into())
                }
            }
        )*
    };
}

impl_from_operation_error!(IndexError, ShapeError, InvariantError);

/// Where a tensor's elements live inside its buffer.
///
/// Element `index` sits at `offset + Σ index[i] * strides[i]`, counted in elements of `dt`.
#[derive(new, Debug, Clone, PartialEq)]
pub struct StorageView {
    shape: Shape,
    dt: DType,
    strides: Strides,
    offset: usize,
}

impl StorageView {
    /// Row-major view starting at element 0.
    pub fn contiguous(shape: Shape, dt: DType) -> Self {
        let strides = Strides::from(&shape);
        Self::new(shape, dt, strides, 0)
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dt(&self) -> DType {
        self.dt
    }

    pub fn strides(&self) -> &Strides {
        &self.strides
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    /// Whether logical order matches memory order with no gaps.
    ///
    /// Size-1 dimensions never affect the answer, and empty views are always contiguous.
    pub fn is_contiguous(&self) -> bool {
        if self.numel() == 0 {
            return true;
        }
        let mut expected = 1isize;
        for (&size, &stride) in self.shape.iter().zip(self.strides.iter()).rev() {
            if size == 1 {
                continue;
            }
            if stride != expected {
                return false;
            }
            expected *= size as isize;
        }
        true
    }

    /// Lowest and highest element offsets the view reaches, `None` when empty.
    pub fn extent(&self) -> Option<(isize, isize)> {
        if self.numel() == 0 {
            return None;
        }
        let start = self.offset as isize;
        let (mut min, mut max) = (start, start);
        for (&size, &stride) in self.shape.iter().zip(self.strides.iter()) {
            let reach = ((size - 1) as isize).saturating_mul(stride);
            if reach < 0 {
                min = min.saturating_add(reach);
            } else {
                max = max.saturating_add(reach);
            }
        }
        Some((min, max))
    }

    /// Whether two distinct indices can map to the same buffer element.
    pub fn is_overlapping(&self) -> bool {
        if self.numel() <= 1 {
            return false;
        }
        let mut dims = self
            .shape
            .iter()
            .zip(self.strides.iter())
            .filter(|(&size, _)| size > 1)
            .map(|(&size, &stride)| (stride.unsigned_abs(), size))
            .collect::<Vec<_>>();
        dims.sort_unstable();
        let mut span = 1usize;
        for (stride, size) in dims {
            if stride < span {
                return true;
            }
            span = span.saturating_add(stride.saturating_mul(size - 1));
        }
        false
    }

    /// Buffer offset of the element at `index`. `index` must be in range.
    pub fn offset_of(&self, index: &[usize]) -> usize {
        let delta: isize = index
            .iter()
            .zip(self.strides.iter())
            .map(|(&i, &s)| i as isize * s)
            .sum();
        (self.offset as isize + delta) as usize
    }

    pub fn strided_index(&self) -> StridedIndex<'_> {
        StridedIndex::new(&self.shape, &self.strides, self.offset)
    }
}

/// Caller-owned memory handed to [Tensor::wrap_external].
#[derive(Debug, Clone, Copy)]
pub struct ExternalBuffer {
    ptr: *mut u8,
    len: usize,
    dt: DType,
}

impl ExternalBuffer {
    /// Describes `len` elements of `T` starting at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` elements for as long as any
    /// tensor built from this descriptor is alive, and nothing else may access the
    /// memory mutably while those tensors do.
    pub unsafe fn from_raw_parts<T: TensorDType>(ptr: *mut T, len: usize) -> Self {
        Self {
            ptr: ptr as *mut u8,
            len,
            dt: T::dt(),
        }
    }

    pub fn dt(&self) -> DType {
        self.dt
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A strided view over a shared buffer.
///
/// Cloning a tensor clones the handle. Shape operations return a new handle over the
/// same buffer, so writes through one view are visible through every other.
#[derive(Clone)]
pub struct Tensor {
    inner: Arc<Inner>,
}

#[derive(Debug)]
pub struct Inner {
    id: TensorId,
    view: StorageView,
    device: Device,
    storage: Arc<RwLock<Storage>>,
}

impl std::ops::Deref for Tensor {
    type Target = Inner;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Tensor {
    pub(crate) fn from_parts(view: StorageView, storage: Storage, device: Device) -> Self {
        Self::shared(view, Arc::new(RwLock::new(storage)), device)
    }

    fn shared(view: StorageView, storage: Arc<RwLock<Storage>>, device: Device) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: TensorId::next(),
                view,
                device,
                storage,
            }),
        }
    }

    /// A new handle over this tensor's buffer.
    fn alias(&self, view: StorageView) -> Self {
        Self::shared(view, self.inner.storage.clone(), self.device.clone())
    }

    pub fn id(&self) -> TensorId {
        self.inner.id
    }

    pub fn storage_view(&self) -> &StorageView {
        &self.view
    }

    pub fn rank(&self) -> usize {
        self.view.rank()
    }

    pub fn dt(&self) -> DType {
        self.view.dt
    }

    pub fn shape(&self) -> &Shape {
        &self.view.shape
    }

    pub fn strides(&self) -> &Strides {
        &self.view.strides
    }

    pub fn offset(&self) -> usize {
        self.view.offset
    }

    pub fn numel(&self) -> usize {
        self.view.numel()
    }

    pub fn num_bytes(&self) -> usize {
        self.numel() * self.dt().size_of()
    }

    pub fn is_contiguous(&self) -> bool {
        self.view.is_contiguous()
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn storage(&self) -> RwLockReadGuard<Storage> {
        self.inner.storage.read()
    }

    pub(crate) fn storage_mut(&self) -> RwLockWriteGuard<Storage> {
        self.inner.storage.write()
    }

    /// Elements of this tensor's dtype the underlying buffer holds.
    pub fn capacity(&self) -> usize {
        self.storage().n_bytes() / self.dt().size_of()
    }

    /// Live handles on the underlying buffer, counting every view once.
    pub fn storage_refs(&self) -> usize {
        Arc::strong_count(&self.inner.storage)
    }

    pub fn shares_storage(&self, other: &Tensor) -> bool {
        Arc::ptr_eq(&self.inner.storage, &other.inner.storage)
    }
}

/// Construction.
impl Tensor {
    /// Allocates a fresh contiguous buffer for `shape` on `device`.
    pub fn allocate(
        shape: Shape,
        dt: DType,
        fill: FillPolicy,
        device: &Device,
    ) -> Result<Tensor, TensorError> {
        let overflow = || AllocationError::Overflow {
            shape: format!("{:?}", shape),
        };
        let numel = shape.checked_numel().ok_or_else(overflow)?;
        let n_bytes = numel.checked_mul(dt.size_of()).ok_or_else(overflow)?;
        if n_bytes > isize::MAX as usize {
            return Err(AllocationError::InvalidLayout {
                size: n_bytes,
                alignment: dt.align_of(),
            })?;
        }
        let host = with_dtype!(dt, T => match fill.materialize::<T>(numel)? {
            Some(data) => CPUBuffer::from_vec(data),
            None => CPUBuffer::zeros(n_bytes, dt.align_of())?,
        });
        log::debug!(
            "Allocated {:?} {} ({} bytes) on {:?} with {:?}",
            shape,
            dt,
            n_bytes,
            device,
            fill
        );
        let storage = Storage::place(host, device)?;
        Ok(Tensor::from_parts(
            StorageView::contiguous(shape, dt),
            storage,
            device.clone(),
        ))
    }

    pub fn zeros<T: TensorDType>(shape: Shape, device: &Device) -> Result<Tensor, TensorError> {
        Self::allocate(shape, T::dt(), FillPolicy::Zeros, device)
    }

    pub fn ones<T: TensorDType>(shape: Shape, device: &Device) -> Result<Tensor, TensorError> {
        Self::allocate(shape, T::dt(), FillPolicy::Ones, device)
    }

    pub fn full<T: TensorDType>(
        shape: Shape,
        value: T,
        device: &Device,
    ) -> Result<Tensor, TensorError> {
        Self::allocate(shape, T::dt(), FillPolicy::Full(value.to_scalar()), device)
    }

    /// Contents are unspecified; read them only after writing.
    pub fn empty(shape: Shape, dt: DType, device: &Device) -> Result<Tensor, TensorError> {
        Self::allocate(shape, dt, FillPolicy::Empty, device)
    }

    #[cfg(feature = "rand")]
    pub fn randn<T: TensorDType + num_traits::Float>(
        shape: Shape,
        seed: Option<u64>,
        device: &Device,
    ) -> Result<Tensor, TensorError> {
        let fill = FillPolicy::Random {
            distribution: Distribution::STANDARD_NORMAL,
            seed,
        };
        Self::allocate(shape, T::dt(), fill, device)
    }

    /// Samples uniformly from `[0, 1)`.
    #[cfg(feature = "rand")]
    pub fn rand<T: TensorDType + num_traits::Float>(
        shape: Shape,
        seed: Option<u64>,
        device: &Device,
    ) -> Result<Tensor, TensorError> {
        let fill = FillPolicy::Random {
            distribution: Distribution::UNIT_UNIFORM,
            seed,
        };
        Self::allocate(shape, T::dt(), fill, device)
    }

    /// `start, start + step, ...` up to but excluding `end`.
    pub fn arange<T: TensorDType + num_traits::NumCast>(
        start: T,
        end: T,
        step: T,
        device: &Device,
    ) -> Result<Tensor, TensorError> {
        let as_f64 = |x: T| {
            num_traits::cast::<T, f64>(x)
                .ok_or_else(|| InvariantError::InvalidArange(format!("{:?} is not finite", x)))
        };
        let (start, end, step) = (as_f64(start)?, as_f64(end)?, as_f64(step)?);
        if step == 0.0 || !step.is_finite() {
            return Err(InvariantError::InvalidArange(format!("step {}", step)))?;
        }
        if (end - start) * step < 0.0 {
            return Err(InvariantError::InvalidArange(format!(
                "{}..{} cannot be reached with step {}",
                start, end, step
            )))?;
        }
        let len = ((end - start) / step).ceil() as usize;
        let data = (0..len)
            .map(|i| T::from_scalar(Scalar::Float(start + i as f64 * step)))
            .collect::<Vec<_>>();
        Ok(Self::from_parts(
            StorageView::contiguous(crate::shape![len], T::dt()),
            Storage::from_vec(data, device)?,
            device.clone(),
        ))
    }

    /// Copies `data` into a fresh buffer laid out as `shape`.
    pub fn from_data<T: TensorDType, U: AsRef<[T]>>(
        data: U,
        shape: Shape,
        device: &Device,
    ) -> Result<Tensor, TensorError> {
        let data = data.as_ref();
        if data.len() != shape.numel() {
            return Err(ShapeError::DataLength {
                shape,
                actual: data.len(),
            })?;
        }
        let storage = Storage::from_slice(data, device)?;
        Ok(Tensor::from_parts(
            StorageView::contiguous(shape, T::dt()),
            storage,
            device.clone(),
        ))
    }

    /// A rank-0 tensor holding `value`.
    pub fn scalar<T: TensorDType>(value: T, device: &Device) -> Result<Tensor, TensorError> {
        Self::from_data([value], Shape::default(), device)
    }

    /// Views caller memory as a contiguous host tensor, without copying.
    ///
    /// # Safety
    ///
    /// The memory described by `buffer` must outlive every tensor derived from the result,
    /// as stated on [ExternalBuffer::from_raw_parts].
    pub unsafe fn wrap_external(buffer: ExternalBuffer, shape: Shape) -> Result<Tensor, TensorError> {
        let dt = buffer.dt;
        let size = buffer
            .len
            .checked_mul(dt.size_of())
            .ok_or_else(|| AllocationError::Overflow {
                shape: format!("{:?}", shape),
            })?;
        if (buffer.ptr.is_null() && buffer.len > 0) || buffer.ptr as usize % dt.align_of() != 0 {
            return Err(AllocationError::InvalidLayout {
                size,
                alignment: dt.align_of(),
            })?;
        }
        let view = StorageView::contiguous(shape, dt);
        Enforcer::check_extent(&view, buffer.len)?;
        let raw = RawCPUBuffer::borrowed(buffer.ptr, size, dt.align_of())?;
        log::debug!("Wrapped {} external bytes at {:p}", size, buffer.ptr);
        Ok(Tensor::from_parts(
            view,
            Storage::CPU(CPUBuffer::from(raw)),
            Device::CPU,
        ))
    }
}

/// Shape operations. Each returns a new view over the same buffer.
impl Tensor {
    fn apply_view<O: Operation>(&self, op: O) -> Result<Tensor, TensorError> {
        let view = op.apply(&self.view)?;
        Ok(self.alias(view))
    }

    pub fn transpose(&self, dim0: usize, dim1: usize) -> Result<Tensor, TensorError> {
        self.apply_view(Transpose::new(dim0, dim1))
    }

    pub fn permute(&self, dims: &[usize]) -> Result<Tensor, TensorError> {
        self.apply_view(Permute::new(dims.to_vec()))
    }

    /// Fails with [OperationError::NotContiguousError] when the current strides cannot
    /// express `shape`; see [Tensor::reshape_copy].
    pub fn reshape(&self, shape: Shape) -> Result<Tensor, TensorError> {
        self.apply_view(Reshape::new(shape))
    }

    /// [Tensor::reshape], inferring a single `-1` dimension.
    pub fn view(&self, dims: &[isize]) -> Result<Tensor, TensorError> {
        let shape = Reshape::infer(dims, self.numel())?;
        self.reshape(shape)
    }

    pub fn squeeze(&self, dim: usize) -> Result<Tensor, TensorError> {
        self.apply_view(Squeeze::new(Some(dim)))
    }

    pub fn squeeze_all(&self) -> Result<Tensor, TensorError> {
        self.apply_view(Squeeze::new(None))
    }

    pub fn unsqueeze(&self, dim: usize) -> Result<Tensor, TensorError> {
        self.apply_view(Unsqueeze::new(dim))
    }

    pub fn slice(
        &self,
        dim: usize,
        start: usize,
        stop: usize,
        step: usize,
    ) -> Result<Tensor, TensorError> {
        self.apply_view(Slice::new(dim, start, stop, step))
    }

    /// Applies one unit-step range per leading dimension.
    pub fn slice_ranges(&self, ranges: &[Range<usize>]) -> Result<Tensor, TensorError> {
        let mut view = self.view.clone();
        for (dim, range) in ranges.iter().enumerate() {
            view = Slice::new(dim, range.start, range.end, 1).apply(&view)?;
        }
        Ok(self.alias(view))
    }

    pub fn select(&self, dim: usize, index: usize) -> Result<Tensor, TensorError> {
        self.apply_view(Select::new(dim, index))
    }

    /// Any view whose reachable elements stay inside the buffer.
    pub fn as_strided(
        &self,
        shape: Shape,
        strides: Strides,
        offset: usize,
    ) -> Result<Tensor, TensorError> {
        let capacity = self.capacity();
        self.apply_view(AsStrided::new(shape, strides, offset, capacity))
    }
}

/// Copies.
impl Tensor {
    /// Runs `f` on a host-addressable form of the storage, downloading it first if needed.
    fn with_host_buffer<R>(
        &self,
        f: impl FnOnce(&CPUBuffer) -> Result<R, TensorError>,
    ) -> Result<R, TensorError> {
        let guard = self.storage();
        match &*guard {
            Storage::CPU(buffer) => f(buffer),
            Storage::Accelerator(buffer) => f(&buffer.to_cpu(&Device::CPU)?),
        }
    }

    fn compact_host(&self) -> Result<CPUBuffer, TensorError> {
        self.with_host_buffer(|buffer| Ok(cpu::compact(buffer, &self.view)?))
    }

    /// A contiguous copy with its own buffer on the same device.
    pub fn deep_clone(&self) -> Result<Tensor, TensorError> {
        let host = self.compact_host()?;
        let storage = Storage::place(host, self.device())?;
        log::debug!("Deep cloned {:?} {:?}", self.id(), self.shape());
        Ok(Tensor::from_parts(
            StorageView::contiguous(self.shape().clone(), self.dt()),
            storage,
            self.device.clone(),
        ))
    }

    /// `self` when already contiguous, else a contiguous copy.
    pub fn contiguous(&self) -> Result<Tensor, TensorError> {
        if self.is_contiguous() {
            Ok(self.clone())
        } else {
            self.deep_clone()
        }
    }

    /// Reshape that always succeeds for a matching element count, by copying.
    pub fn reshape_copy(&self, shape: Shape) -> Result<Tensor, TensorError> {
        Reshape::new(shape.clone()).check_invariants(&self.view)?;
        self.deep_clone()?.reshape(shape)
    }

    /// Converts into a new buffer of `dt`, even when `dt` is the current dtype.
    pub fn cast(&self, dt: DType) -> Result<Tensor, TensorError> {
        let op = Cast::new(dt);
        let view = op.compute_view(&self.view);
        let host = self.with_host_buffer(|buffer| Ok(op.apply_cpu(&[(buffer, &self.view)])?))?;
        let storage = Storage::place(host, self.device())?;
        Ok(Tensor::from_parts(view, storage, self.device.clone()))
    }

    /// Copies to `device`. Always copies, also when already resident there.
    pub fn to(&self, device: &Device) -> Result<Tensor, TensorError> {
        log::debug!(
            "Copying {:?} {:?} from {:?} to {:?}",
            self.id(),
            self.shape(),
            self.device(),
            device
        );
        let host = self.compact_host()?;
        let storage = Storage::place(host, device)?;
        Ok(Tensor::from_parts(
            StorageView::contiguous(self.shape().clone(), self.dt()),
            storage,
            device.clone(),
        ))
    }

    /// Resolves `request` against `runtime` and copies there.
    pub fn relocate(&self, request: DeviceRequest, runtime: &Runtime) -> Result<Tensor, TensorError> {
        let device = runtime.request_device(request)?;
        self.to(&device)
    }

    /// Joins `tensors` along `dim` into a new buffer.
    pub fn cat(tensors: &[Tensor], dim: usize) -> Result<Tensor, TensorError> {
        let first = tensors.first().ok_or(InvariantError::EmptyInput)?;
        let device = first.device().clone();
        if let Some(other) = tensors.iter().find(|t| t.device() != &device) {
            return Err(DeviceError::DeviceMismatch(
                device.label(),
                other.device().label(),
            ))?;
        }
        let op = Concat::new(dim);
        let views = tensors.iter().map(|t| &t.view).collect::<Vec<_>>();
        let dst = op.compute_view(&views)?;

        // The same buffer may appear more than once.
        let guards = tensors
            .iter()
            .map(|t| t.inner.storage.read_recursive())
            .collect::<Vec<_>>();
        let downloaded;
        let buffers: Vec<&CPUBuffer> = if device.is_cpu() {
            guards
                .iter()
                .map(|g| g.try_cpu())
                .collect::<Result<_, _>>()?
        } else {
            downloaded = guards
                .iter()
                .map(|g| g.try_accelerator()?.to_cpu(&Device::CPU))
                .collect::<Result<Vec<_>, _>>()?;
            downloaded.iter().collect()
        };
        let srcs = buffers
            .iter()
            .zip(views.iter())
            .map(|(b, v)| (*b, *v))
            .collect::<Vec<_>>();
        let host = op.apply_cpu(&srcs)?;
        let storage = Storage::place(host, &device)?;
        Ok(Tensor::from_parts(dst, storage, device))
    }
}

/// Host element access.
impl Tensor {
    pub(crate) fn check_dtype<T: TensorDType>(&self) -> Result<(), InvariantError> {
        if T::dt() != self.dt() {
            return Err(InvariantError::DTypeMismatch {
                expected: self.dt(),
                actual: T::dt(),
            });
        }
        Ok(())
    }

    /// The single element of a one-element tensor of any rank.
    pub fn item<T: TensorDType>(&self) -> Result<T, TensorError> {
        if self.numel() != 1 {
            return Err(ShapeError::NotScalar(self.shape().clone()))?;
        }
        self.check_dtype::<T>()?;
        let guard = self.storage();
        Ok(guard.try_cpu()?.read::<T>(self.offset())?)
    }

    pub fn to_scalar(&self) -> Result<Scalar, TensorError> {
        with_dtype!(self.dt(), T => self.item::<T>().map(TensorDType::to_scalar))
    }

    /// The elements in logical order.
    pub fn to_vec<T: TensorDType>(&self) -> Result<Vec<T>, TensorError> {
        self.check_dtype::<T>()?;
        let guard = self.storage();
        Ok(cpu::gather::<T>(guard.try_cpu()?, &self.view)?)
    }

    pub fn to_nested(&self) -> Result<Nested, TensorError> {
        let values = with_dtype!(self.dt(), T => self
            .to_vec::<T>()?
            .into_iter()
            .map(TensorDType::to_scalar)
            .collect::<Vec<_>>());
        Ok(Nested::from_flat(self.shape(), &values))
    }

    pub fn get<T: TensorDType>(&self, index: &[usize]) -> Result<T, TensorError> {
        Enforcer::check_index(index, self.shape())?;
        self.check_dtype::<T>()?;
        let guard = self.storage();
        Ok(guard.try_cpu()?.read::<T>(self.view.offset_of(index))?)
    }

    /// Writes through the view; every alias of the buffer observes the change.
    pub fn set<T: TensorDType>(&self, index: &[usize], value: T) -> Result<(), TensorError> {
        Enforcer::check_index(index, self.shape())?;
        self.check_dtype::<T>()?;
        let mut guard = self.storage_mut();
        guard.try_cpu_mut()?.write(self.view.offset_of(index), value);
        Ok(())
    }

    pub fn fill<T: TensorDType>(&self, value: T) -> Result<(), TensorError> {
        self.check_dtype::<T>()?;
        let mut guard = self.storage_mut();
        cpu::fill(guard.try_cpu_mut()?, &self.view, value)?;
        Ok(())
    }

    /// Copies the elements of `src` into this view, in logical order.
    ///
    /// `src` may alias this tensor.
    pub fn copy_from(&self, src: &Tensor) -> Result<(), TensorError> {
        if src.shape() != self.shape() {
            return Err(ShapeError::Mismatch {
                expected: self.shape().clone(),
                actual: src.shape().clone(),
            })?;
        }
        if src.dt() != self.dt() {
            return Err(InvariantError::DTypeMismatch {
                expected: self.dt(),
                actual: src.dt(),
            })?;
        }
        with_dtype!(self.dt(), T => {
            let values = src.to_vec::<T>()?;
            let mut guard = self.storage_mut();
            cpu::scatter(guard.try_cpu_mut()?, &self.view, &values)?;
        });
        Ok(())
    }
}

impl Tensor {
    /// Elementwise `|a - b| <= atol + rtol * |b|`, compared in f64.
    pub fn all_close(&self, other: &Self, atol: f64, rtol: f64) -> anyhow::Result<()> {
        if self.shape() != other.shape() {
            anyhow::bail!("Shape mismatch {:?} != {:?}", self.shape(), other.shape())
        }

        let a = self.cast(DType::F64)?.to_vec::<f64>()?;
        let b = other.cast(DType::F64)?.to_vec::<f64>()?;
        let mut stats = CloseStats::new(atol, rtol);
        for (flat, (a, b)) in a.iter().zip(b.iter()).enumerate() {
            stats.update(*a, *b, flat);
        }

        let at = stats
            .max_abs_error_idx
            .map(|flat| unravel(flat, self.shape()));
        if stats.fail_count > 0 {
            anyhow::bail!(
                "{} samples not close - AVGE={} MAE={} at {:?}",
                stats.fail_count,
                stats.avg_error(),
                stats.max_abs_error,
                at,
            );
        }
        log::debug!(
            "All close - AVGE={} MAE={} at {:?}",
            stats.avg_error(),
            stats.max_abs_error,
            at
        );
        Ok(())
    }
}

fn unravel(mut flat: usize, shape: &Shape) -> Vec<usize> {
    let mut index = vec![0; shape.rank()];
    for (i, &size) in shape.iter().enumerate().rev() {
        index[i] = flat % size;
        flat /= size;
    }
    index
}

struct CloseStats {
    total_error: f64,
    max_abs_error: f64,
    max_abs_error_idx: Option<usize>,
    element_count: usize,
    fail_count: usize,
    atol: f64,
    rtol: f64,
}

impl CloseStats {
    fn new(atol: f64, rtol: f64) -> Self {
        Self {
            total_error: 0.0,
            max_abs_error: 0.0,
            max_abs_error_idx: None,
            element_count: 0,
            fail_count: 0,
            atol,
            rtol,
        }
    }

    fn update(&mut self, a: f64, b: f64, index: usize) {
        let abs_diff = (a - b).abs();
        self.element_count += 1;

        if !self.is_close(a, b, abs_diff) {
            self.fail_count += 1;
        }
        if abs_diff.is_nan() {
            return;
        }
        self.total_error += abs_diff;
        if abs_diff > self.max_abs_error {
            self.max_abs_error = abs_diff;
            self.max_abs_error_idx = Some(index);
        }
    }

    fn avg_error(&self) -> f64 {
        if self.element_count == 0 {
            return 0.0;
        }
        self.total_error / self.element_count as f64
    }

    fn is_close(&self, a: f64, b: f64, abs_diff: f64) -> bool {
        (a.is_nan() && b.is_nan())
            || (a.is_infinite() && b.is_infinite() && a.signum() == b.signum())
            || abs_diff <= self.atol + self.rtol * b.abs()
    }
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let storage_fmt = self.storage().dump(self.dt(), false);
        f.debug_struct("Tensor")
            .field("id", &self.id())
            .field("shape", self.shape())
            .field("strides", self.strides())
            .field("offset", &self.offset())
            .field("dt", &self.dt())
            .field("device", self.device())
            .field("storage", &storage_fmt)
            .finish()
    }
}

impl std::fmt::Display for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let host = if self.device().is_cpu() {
            Ok(self.clone())
        } else {
            self.to(&Device::CPU)
        };
        match host.and_then(|t| t.to_nested()) {
            Ok(nested) => write!(f, "tensor({}", nested)?,
            Err(e) => write!(f, "tensor(<{}>", e)?,
        }
        write!(f, ", dtype={}, device={:?})", self.dt(), self.device())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{shape, RuntimeConfig};

    fn cpu() -> Device {
        Device::CPU
    }

    fn iota(shape: Shape) -> Tensor {
        let data = (0..shape.numel() as i32).collect::<Vec<_>>();
        Tensor::from_data(data, shape, &cpu()).unwrap()
    }

    #[test]
    fn contiguity() {
        let view = StorageView::contiguous(shape![2, 1, 3], DType::F32);
        assert!(view.is_contiguous());
        let odd = StorageView::new(shape![2, 1, 3], DType::F32, vec![3, 99, 1].into(), 0);
        assert!(odd.is_contiguous());
        let strided = StorageView::new(shape![2, 3], DType::F32, vec![4, 1].into(), 0);
        assert!(!strided.is_contiguous());
        assert_eq!(strided.extent(), Some((0, 6)));
    }

    #[test]
    fn allocate_with_policies() {
        let z = Tensor::zeros::<f32>(shape![2, 2], &cpu()).unwrap();
        assert_eq!(z.to_vec::<f32>().unwrap(), vec![0.0; 4]);
        let o = Tensor::ones::<u8>(shape![3], &cpu()).unwrap();
        assert_eq!(o.to_vec::<u8>().unwrap(), vec![1, 1, 1]);
        let f = Tensor::full(shape![2], 7i64, &cpu()).unwrap();
        assert_eq!(f.to_vec::<i64>().unwrap(), vec![7, 7]);
        let e = Tensor::empty(shape![0, 5], DType::BF16, &cpu()).unwrap();
        assert_eq!(e.numel(), 0);
        assert!(e.to_vec::<half::bf16>().unwrap().is_empty());
    }

    #[test]
    fn allocate_overflow() {
        let err = Tensor::allocate(shape![usize::MAX, 2], DType::F32, FillPolicy::Zeros, &cpu())
            .unwrap_err();
        assert!(matches!(
            err,
            TensorError::AllocationError(AllocationError::Overflow { .. })
        ));
        let err = Tensor::allocate(shape![usize::MAX / 4], DType::F64, FillPolicy::Empty, &cpu())
            .unwrap_err();
        assert!(matches!(err, TensorError::AllocationError(_)));
    }

    #[cfg(feature = "rand")]
    #[test]
    fn allocate_rejects_bad_distributions() {
        for distribution in [
            Distribution::Normal {
                mean: 0.0,
                std: -1.0,
            },
            Distribution::Uniform {
                low: 0.0,
                high: f64::INFINITY,
            },
        ] {
            let fill = FillPolicy::Random {
                distribution,
                seed: Some(11),
            };
            assert!(matches!(
                Tensor::allocate(shape![4], DType::F32, fill, &cpu()),
                Err(TensorError::AllocationError(
                    AllocationError::InvalidDistribution(_)
                ))
            ));
        }
    }

    #[test]
    fn arange_values() {
        let a = Tensor::arange(0i32, 5, 2, &cpu()).unwrap();
        assert_eq!(a.to_vec::<i32>().unwrap(), vec![0, 2, 4]);
        let b = Tensor::arange(1.0f32, 0.0, -0.25, &cpu()).unwrap();
        assert_eq!(b.to_vec::<f32>().unwrap(), vec![1.0, 0.75, 0.5, 0.25]);
        assert!(Tensor::arange(0i32, 5, 0, &cpu()).is_err());
        assert!(Tensor::arange(0i32, 5, -1, &cpu()).is_err());
    }

    #[test]
    fn from_data_length_mismatch() {
        assert!(matches!(
            Tensor::from_data([1.0f32, 2.0, 3.0], shape![2, 2], &cpu()),
            Err(TensorError::OperationError(OperationError::ShapeError(
                ShapeError::DataLength { actual: 3, .. }
            )))
        ));
    }

    #[test]
    fn views_alias() {
        let t = iota(shape![2, 3]);
        let tt = t.transpose(0, 1).unwrap();
        assert!(tt.shares_storage(&t));
        assert_eq!(t.storage_refs(), 2);
        tt.set(&[2, 1], 42i32).unwrap();
        assert_eq!(t.get::<i32>(&[1, 2]).unwrap(), 42);
        drop(tt);
        assert_eq!(t.storage_refs(), 1);
    }

    #[test]
    fn copies_do_not_alias() {
        let t = iota(shape![2, 3]);
        let c = t.transpose(0, 1).unwrap().deep_clone().unwrap();
        assert!(!c.shares_storage(&t));
        assert!(c.is_contiguous());
        assert_eq!(c.to_vec::<i32>().unwrap(), vec![0, 3, 1, 4, 2, 5]);
        c.fill(0i32).unwrap();
        assert_eq!(t.to_vec::<i32>().unwrap(), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn reshape_and_copy() {
        let t = iota(shape![2, 3]);
        let tt = t.transpose(0, 1).unwrap();
        assert!(matches!(
            tt.reshape(shape![6]),
            Err(TensorError::OperationError(
                OperationError::NotContiguousError { .. }
            ))
        ));
        let flat = tt.reshape_copy(shape![6]).unwrap();
        assert_eq!(flat.to_vec::<i32>().unwrap(), vec![0, 3, 1, 4, 2, 5]);
        assert!(tt.reshape_copy(shape![5]).is_err());

        let v = t.view(&[3, -1]).unwrap();
        assert!(v.shares_storage(&t));
        assert_eq!(v.shape(), &shape![3, 2]);
    }

    #[test]
    fn item_requires_one_element() {
        let t = iota(shape![1, 1]);
        assert_eq!(t.item::<i32>().unwrap(), 0);
        assert_eq!(t.to_scalar().unwrap(), Scalar::Int(0));
        let two = iota(shape![2]);
        assert!(matches!(
            two.item::<i32>(),
            Err(TensorError::OperationError(OperationError::ShapeError(
                ShapeError::NotScalar(_)
            )))
        ));
        assert!(matches!(
            t.item::<f32>(),
            Err(TensorError::OperationError(OperationError::InvariantError(
                InvariantError::DTypeMismatch { .. }
            )))
        ));
    }

    #[test]
    fn item_of_selected_element() {
        let t = iota(shape![2, 3]);
        let e = t.select(0, 1).unwrap().select(0, 2).unwrap();
        assert_eq!(e.rank(), 0);
        assert_eq!(e.item::<i32>().unwrap(), 5);
    }

    #[test]
    fn cast_always_copies() {
        let t = Tensor::from_data([1.5f32, -2.5], shape![2], &cpu()).unwrap();
        let same = t.cast(DType::F32).unwrap();
        assert!(!same.shares_storage(&t));
        let ints = t.cast(DType::I32).unwrap();
        assert_eq!(ints.to_vec::<i32>().unwrap(), vec![1, -2]);
    }

    #[test]
    fn copy_from_overlapping_views() {
        let t = iota(shape![4]);
        let head = t.slice(0, 0, 3, 1).unwrap();
        let tail = t.slice(0, 1, 4, 1).unwrap();
        tail.copy_from(&head).unwrap();
        assert_eq!(t.to_vec::<i32>().unwrap(), vec![0, 0, 1, 2]);
        assert!(tail.copy_from(&iota(shape![2])).is_err());
    }

    #[test]
    fn relocation() {
        let runtime = Runtime::new(RuntimeConfig {
            accelerators: 1,
            ..Default::default()
        });
        let t = iota(shape![2, 2]);
        assert!(matches!(
            t.relocate(DeviceRequest::Accelerator(1), &runtime),
            Err(TensorError::DeviceError(DeviceError::UnavailableLocation(_)))
        ));
        let acc = t.relocate(DeviceRequest::Accelerator(0), &runtime).unwrap();
        assert!(acc.device().is_accelerator());
        assert!(matches!(
            acc.to_vec::<i32>(),
            Err(TensorError::DeviceError(DeviceError::DeviceMismatch(..)))
        ));
        let back = acc.relocate(DeviceRequest::CPU, &runtime).unwrap();
        assert_eq!(back.to_vec::<i32>().unwrap(), vec![0, 1, 2, 3]);

        let same = t.to(&Device::CPU).unwrap();
        assert!(!same.shares_storage(&t));
    }

    #[test]
    fn accelerator_views_and_casts() {
        let runtime = Runtime::new(RuntimeConfig {
            accelerators: 2,
            ..Default::default()
        });
        let device = runtime.request_device(DeviceRequest::Accelerator(1)).unwrap();
        let t = iota(shape![2, 3]).to(&device).unwrap();
        let col = t.slice(1, 1, 2, 1).unwrap().cast(DType::F64).unwrap();
        assert_eq!(col.device(), &device);
        let host = col.to(&Device::CPU).unwrap();
        assert_eq!(host.to_vec::<f64>().unwrap(), vec![1.0, 4.0]);
        assert!(t.to_string().contains("ACC:1"));
    }

    #[test]
    fn concatenation() {
        let a = iota(shape![2, 2]);
        let b = iota(shape![2, 1]);
        let c = Tensor::cat(&[a.clone(), b], 1).unwrap();
        assert_eq!(c.shape(), &shape![2, 3]);
        assert_eq!(c.to_vec::<i32>().unwrap(), vec![0, 1, 0, 2, 3, 1]);

        let twice = Tensor::cat(&[a.clone(), a.transpose(0, 1).unwrap()], 0).unwrap();
        assert_eq!(
            twice.to_vec::<i32>().unwrap(),
            vec![0, 1, 2, 3, 0, 2, 1, 3]
        );
        assert!(Tensor::cat(&[], 0).is_err());
    }

    #[test]
    fn wrap_external_aliases() {
        let mut backing = vec![1.0f64, 2.0, 3.0, 4.0];
        let buffer = unsafe { ExternalBuffer::from_raw_parts(backing.as_mut_ptr(), backing.len()) };
        {
            let t = unsafe { Tensor::wrap_external(buffer, shape![2, 2]) }.unwrap();
            t.set(&[1, 0], 30.0f64).unwrap();
            assert_eq!(t.get::<f64>(&[0, 1]).unwrap(), 2.0);
            let too_big = unsafe { Tensor::wrap_external(buffer, shape![5]) };
            assert!(too_big.is_err());
        }
        assert_eq!(backing, vec![1.0, 2.0, 30.0, 4.0]);
    }

    #[test]
    fn display() {
        let t = Tensor::from_data([1i32, 2, 3, 4], shape![2, 2], &cpu()).unwrap();
        assert_eq!(
            t.to_string(),
            "tensor([[1, 2], [3, 4]], dtype=i32, device=CPU)"
        );
    }

    #[test]
    fn closeness() {
        let a = Tensor::from_data([1.0f32, 2.0], shape![2], &cpu()).unwrap();
        let b = Tensor::from_data([1.0f64, 2.000001], shape![2], &cpu()).unwrap();
        assert!(a.all_close(&b, 1e-4, 1e-4).is_ok());
        let c = Tensor::from_data([1.0f32, 3.0], shape![2], &cpu()).unwrap();
        assert!(a.all_close(&c, 1e-4, 1e-4).is_err());
    }
}
