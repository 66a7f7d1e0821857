use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD, Axis, IxDyn, ShapeBuilder};

use crate::{
    CPUBuffer, Device, Enforcer, InvariantError, Shape, ShapeError, Storage, StorageView, Strides,
    Tensor, TensorDType, TensorError,
};

/// ndarray only accepts non-negative strides from a raw pointer, so a view is described by
/// its lowest-addressed element, the absolute strides, and the axes to invert afterwards.
struct NdLayout {
    shape: ndarray::StrideShape<IxDyn>,
    start: usize,
    reversed: Vec<Axis>,
}

impl NdLayout {
    fn of(view: &StorageView) -> Self {
        let dims = IxDyn(&view.shape().to_vec());
        let strides = view
            .strides()
            .iter()
            .map(|s| s.unsigned_abs())
            .collect::<Vec<_>>();
        let reversed = view
            .strides()
            .iter()
            .enumerate()
            .filter(|(_, &s)| s < 0)
            .map(|(i, _)| Axis(i))
            .collect();
        Self {
            shape: dims.strides(IxDyn(&strides)),
            start: view.extent().map_or(0, |(min, _)| min as usize),
            reversed,
        }
    }
}

/// Conversion to and from ndarray arrays.
impl Tensor {
    /// Lends the elements to `f` as an ndarray view with this tensor's shape and strides.
    pub fn with_ndarray_view<T: TensorDType, R>(
        &self,
        f: impl FnOnce(ArrayViewD<'_, T>) -> R,
    ) -> Result<R, TensorError> {
        self.check_dtype::<T>()?;
        let guard = self.storage();
        let data = guard.try_cpu()?.as_slice::<T>()?;
        let layout = NdLayout::of(self.storage_view());
        let base = if self.numel() == 0 {
            data.as_ptr()
        } else {
            data[layout.start..].as_ptr()
        };
        // The extent invariant keeps every reachable element inside `data`.
        let mut array = unsafe { ArrayViewD::from_shape_ptr(layout.shape, base) };
        for axis in layout.reversed {
            array.invert_axis(axis);
        }
        Ok(f(array))
    }

    /// Mutable form of [Tensor::with_ndarray_view]; writes land in the shared buffer.
    ///
    /// The storage stays write-locked while `f` runs: reading or writing any tensor that
    /// shares this buffer from inside `f` deadlocks.
    pub fn with_ndarray_view_mut<T: TensorDType, R>(
        &self,
        f: impl FnOnce(ArrayViewMutD<'_, T>) -> R,
    ) -> Result<R, TensorError> {
        self.check_dtype::<T>()?;
        let view = self.storage_view();
        if view.is_overlapping() {
            return Err(InvariantError::OverlappingView(view.shape().clone()))?;
        }
        let layout = NdLayout::of(view);
        let mut guard = self.storage_mut();
        let data = guard.try_cpu_mut()?.as_slice_mut::<T>()?;
        let base = if view.numel() == 0 {
            data.as_mut_ptr()
        } else {
            data[layout.start..].as_mut_ptr()
        };
        let mut array = unsafe { ArrayViewMutD::from_shape_ptr(layout.shape, base) };
        for axis in layout.reversed {
            array.invert_axis(axis);
        }
        Ok(f(array))
    }

    /// Takes ownership of `array`'s allocation, keeping its offset and strides.
    ///
    /// No element is copied unless the array's vector has spare capacity to release.
    pub fn adopt_ndarray<T: TensorDType>(array: ArrayD<T>) -> Result<Tensor, TensorError> {
        let shape = Shape::from(array.shape());
        let strides = Strides::from(array.strides());
        let first = array.as_ptr() as usize;
        let data = array.into_raw_vec();
        let offset = if shape.numel() == 0 {
            0
        } else {
            (first - data.as_ptr() as usize) / std::mem::size_of::<T>()
        };
        let view = StorageView::new(shape, T::dt(), strides, offset);
        Enforcer::check_extent(&view, data.len())?;
        log::debug!(
            "Adopted ndarray {:?} with strides {:?} at offset {}",
            view.shape(),
            view.strides(),
            offset
        );
        Ok(Tensor::from_parts(
            view,
            Storage::CPU(CPUBuffer::from_vec(data)),
            Device::CPU,
        ))
    }

    /// A new contiguous host tensor holding a copy of `array`.
    pub fn copy_from_ndarray<T: TensorDType>(array: &ArrayViewD<T>) -> Result<Tensor, TensorError> {
        let data = array.iter().copied().collect::<Vec<_>>();
        Tensor::from_data(data, Shape::from(array.shape()), &Device::CPU)
    }

    /// A standard-layout copy of the elements.
    pub fn to_ndarray<T: TensorDType>(&self) -> Result<ArrayD<T>, TensorError> {
        let data = self.to_vec::<T>()?;
        let actual = data.len();
        ArrayD::from_shape_vec(IxDyn(&self.shape().to_vec()), data).map_err(|_| {
            ShapeError::DataLength {
                shape: self.shape().clone(),
                actual,
            }
            .into()
        })
    }
}
