mod cast;
mod concat;

use crate::{
    dtype::with_dtype, CPUBuffer, InvariantError, OperationError, StorageView, TensorDType,
};

/// A copying operation executed on host buffers.
pub(crate) trait CPUOperation {
    fn apply_cpu(&self, srcs: &[(&CPUBuffer, &StorageView)]) -> Result<CPUBuffer, OperationError>;
}

/// Copies the elements of `view` out of `buffer` in logical order.
pub(crate) fn gather<T: TensorDType>(
    buffer: &CPUBuffer,
    view: &StorageView,
) -> Result<Vec<T>, InvariantError> {
    let data = buffer.as_slice::<T>()?;
    // An empty view may carry any offset.
    if view.numel() == 0 {
        return Ok(vec![]);
    }
    if view.is_contiguous() {
        let start = view.offset();
        return Ok(data[start..start + view.numel()].to_vec());
    }
    Ok(view.strided_index().map(|o| data[o]).collect())
}

/// Writes `values`, in logical order, through `view` into `buffer`.
pub(crate) fn scatter<T: TensorDType>(
    buffer: &mut CPUBuffer,
    view: &StorageView,
    values: &[T],
) -> Result<(), InvariantError> {
    let data = buffer.as_slice_mut::<T>()?;
    if view.numel() == 0 {
        return Ok(());
    }
    if view.is_contiguous() {
        let start = view.offset();
        data[start..start + values.len()].copy_from_slice(values);
        return Ok(());
    }
    for (o, &v) in view.strided_index().zip(values) {
        data[o] = v;
    }
    Ok(())
}

pub(crate) fn fill<T: TensorDType>(
    buffer: &mut CPUBuffer,
    view: &StorageView,
    value: T,
) -> Result<(), InvariantError> {
    let data = buffer.as_slice_mut::<T>()?;
    if view.numel() == 0 {
        return Ok(());
    }
    for o in view.strided_index() {
        data[o] = value;
    }
    Ok(())
}

/// A fresh contiguous buffer holding the elements of `view`.
pub(crate) fn compact(buffer: &CPUBuffer, view: &StorageView) -> Result<CPUBuffer, InvariantError> {
    with_dtype!(view.dt(), T => Ok(CPUBuffer::from_vec(gather::<T>(buffer, view)?)))
}
