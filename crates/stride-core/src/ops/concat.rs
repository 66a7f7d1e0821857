use derive_new::new;

use crate::{Enforcer, OperationError, StorageView};

/// Joins views end to end along `dim` into a new contiguous buffer.
#[derive(new, Debug, Clone)]
pub struct Concat {
    dim: usize,
}

impl Concat {
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn check_invariants(&self, srcs: &[&StorageView]) -> Result<(), OperationError> {
        let rank = Enforcer::assert_equal_ranks(srcs)?;
        Enforcer::check_dim(self.dim, rank)?;
        Enforcer::check_dtype_match(srcs)?;
        Enforcer::match_shapes_except(srcs, self.dim)?;
        Ok(())
    }

    pub fn compute_view(&self, srcs: &[&StorageView]) -> Result<StorageView, OperationError> {
        self.check_invariants(srcs)?;
        let first = srcs[0];
        let mut shape = first.shape().clone();
        shape[self.dim] = srcs.iter().map(|v| v.shape()[self.dim]).sum();
        Ok(StorageView::contiguous(shape, first.dt()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{shape, DType, InvariantError, ShapeError};

    #[test]
    fn concat_shape() {
        let a = StorageView::contiguous(shape![2, 3], DType::F32);
        let b = StorageView::contiguous(shape![2, 5], DType::F32);
        let out = Concat::new(1).compute_view(&[&a, &b]).unwrap();
        assert_eq!(out.shape(), &shape![2, 8]);
    }

    #[test]
    fn concat_rejects_mismatches() {
        let a = StorageView::contiguous(shape![2, 3], DType::F32);
        let b = StorageView::contiguous(shape![3, 3], DType::F32);
        assert!(matches!(
            Concat::new(1).compute_view(&[&a, &b]),
            Err(OperationError::ShapeError(ShapeError::ConcatMismatch { dim: 0, .. }))
        ));
        let c = StorageView::contiguous(shape![2, 3], DType::I32);
        assert!(matches!(
            Concat::new(0).compute_view(&[&a, &c]),
            Err(OperationError::InvariantError(
                InvariantError::DTypeMismatch { .. }
            ))
        ));
        assert!(matches!(
            Concat::new(0).compute_view(&[]),
            Err(OperationError::InvariantError(InvariantError::EmptyInput))
        ));
        assert!(Concat::new(2).compute_view(&[&a, &a]).is_err());
    }
}
