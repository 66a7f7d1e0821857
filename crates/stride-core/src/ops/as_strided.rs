use crate::{Enforcer, InvariantError, Operation, OperationError, Shape, StorageView, Strides};

/// An arbitrary view over a buffer of `capacity` elements.
///
/// The source geometry is ignored; only its dtype carries over.
#[derive(derive_new::new, Debug, Clone)]
pub struct AsStrided {
    shape: Shape,
    strides: Strides,
    offset: usize,
    capacity: usize,
}

impl Operation for AsStrided {
    fn name(&self) -> &'static str {
        "AsStrided"
    }

    fn check_invariants(&self, _: &StorageView) -> Result<(), OperationError> {
        if self.shape.rank() != self.strides.rank() {
            return Err(InvariantError::RankMismatch {
                accepted: self.shape.rank()..=self.shape.rank(),
                actual: self.strides.rank(),
            })?;
        }
        Ok(())
    }

    fn compute_view(&self, src: &StorageView) -> Result<StorageView, OperationError> {
        let view = StorageView::new(
            self.shape.clone(),
            src.dt(),
            self.strides.clone(),
            self.offset,
        );
        Enforcer::check_extent(&view, self.capacity)?;
        Ok(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{shape, DType, IndexError, StridedIndex};

    #[test]
    fn overlapping_windows() {
        let src = StorageView::contiguous(shape![6], DType::U8);
        let windows = AsStrided::new(shape![4, 3], Strides::from(vec![1, 1]), 0, 6)
            .apply(&src)
            .unwrap();
        let offsets: Vec<_> =
            StridedIndex::new(windows.shape(), windows.strides(), windows.offset()).collect();
        assert_eq!(offsets, vec![0, 1, 2, 1, 2, 3, 2, 3, 4, 3, 4, 5]);
    }

    #[test]
    fn reversed_view() {
        let src = StorageView::contiguous(shape![4], DType::U8);
        let rev = AsStrided::new(shape![4], Strides::from(vec![-1]), 3, 4)
            .apply(&src)
            .unwrap();
        let offsets: Vec<_> = StridedIndex::new(rev.shape(), rev.strides(), rev.offset()).collect();
        assert_eq!(offsets, vec![3, 2, 1, 0]);
    }

    #[test]
    fn out_of_storage() {
        let src = StorageView::contiguous(shape![4], DType::U8);
        assert!(matches!(
            AsStrided::new(shape![3], Strides::from(vec![2]), 0, 4).apply(&src),
            Err(OperationError::IndexError(IndexError::OutOfStorage { .. }))
        ));
        assert!(matches!(
            AsStrided::new(shape![2], Strides::from(vec![1, 1]), 0, 4).apply(&src),
            Err(OperationError::InvariantError(InvariantError::RankMismatch { .. }))
        ));
    }
}
