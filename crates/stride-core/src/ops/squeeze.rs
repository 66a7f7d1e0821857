use derive_new::new;

use crate::{Enforcer, IndexError, Operation, OperationError, ShapeError, StorageView};

/// Removes size-1 dimensions: the one at `dim`, or every one when `dim` is `None`.
#[derive(new, Debug, Clone)]
pub struct Squeeze {
    dim: Option<usize>,
}

impl Operation for Squeeze {
    fn name(&self) -> &'static str {
        "Squeeze"
    }

    fn check_invariants(&self, src: &StorageView) -> Result<(), OperationError> {
        if let Some(dim) = self.dim {
            Enforcer::check_dim(dim, src.rank())?;
            let size = src.shape()[dim];
            if size != 1 {
                return Err(ShapeError::NotSizeOne { dim, size })?;
            }
        }
        Ok(())
    }

    fn compute_view(&self, src: &StorageView) -> Result<StorageView, OperationError> {
        let mut shape = src.shape().clone();
        let mut strides = src.strides().clone();
        match self.dim {
            Some(dim) => {
                shape.remove(dim);
                strides.remove(dim);
            }
            None => {
                for dim in (0..src.rank()).rev() {
                    if shape[dim] == 1 {
                        shape.remove(dim);
                        strides.remove(dim);
                    }
                }
            }
        }
        Ok(StorageView::new(shape, src.dt(), strides, src.offset()))
    }
}

/// Inserts a size-1 dimension before `dim`; `dim == rank` appends.
#[derive(new, Debug, Clone)]
pub struct Unsqueeze {
    dim: usize,
}

impl Operation for Unsqueeze {
    fn name(&self) -> &'static str {
        "Unsqueeze"
    }

    fn check_invariants(&self, src: &StorageView) -> Result<(), OperationError> {
        if self.dim > src.rank() {
            return Err(IndexError::Dim {
                dim: self.dim,
                rank: src.rank() + 1,
            })?;
        }
        Ok(())
    }

    fn compute_view(&self, src: &StorageView) -> Result<StorageView, OperationError> {
        let mut shape = src.shape().clone();
        let mut strides = src.strides().clone();
        let stride = if self.dim < src.rank() {
            strides[self.dim] * shape[self.dim] as isize
        } else {
            1
        };
        shape.insert(self.dim, 1);
        strides.insert(self.dim, stride);
        Ok(StorageView::new(shape, src.dt(), strides, src.offset()))
    }
}
