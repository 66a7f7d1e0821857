use derive_new::new;

use crate::{Enforcer, Operation, OperationError, RVec, StorageView, Strides};

/// Reorders dimensions: output dimension `i` is source dimension `dims[i]`.
#[derive(new, Debug, Clone)]
pub struct Permute {
    pub dims: Vec<usize>,
}

impl Operation for Permute {
    fn name(&self) -> &'static str {
        "Permute"
    }

    fn check_invariants(&self, src: &StorageView) -> Result<(), OperationError> {
        Enforcer::check_permutation(&self.dims, src.rank())?;
        Ok(())
    }

    fn compute_view(&self, src: &StorageView) -> Result<StorageView, OperationError> {
        let shape = self.dims.iter().map(|&d| src.shape()[d]).collect::<RVec<_>>();
        let strides = self
            .dims
            .iter()
            .map(|&d| src.strides()[d])
            .collect::<RVec<_>>();
        Ok(StorageView::new(
            shape.into(),
            src.dt(),
            Strides::new(strides),
            src.offset(),
        ))
    }
}

/// Swaps two dimensions.
#[derive(new, Debug, Clone)]
pub struct Transpose {
    pub dim0: usize,
    pub dim1: usize,
}

impl Operation for Transpose {
    fn name(&self) -> &'static str {
        "Transpose"
    }

    fn check_invariants(&self, src: &StorageView) -> Result<(), OperationError> {
        Enforcer::check_dim(self.dim0, src.rank())?;
        Enforcer::check_dim(self.dim1, src.rank())?;
        Ok(())
    }

    fn compute_view(&self, src: &StorageView) -> Result<StorageView, OperationError> {
        let mut shape = src.shape().clone();
        let mut strides = src.strides().clone();
        shape.swap(self.dim0, self.dim1);
        strides.swap(self.dim0, self.dim1);
        Ok(StorageView::new(shape, src.dt(), strides, src.offset()))
    }
}
